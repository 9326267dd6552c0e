//! # Cloudsearch Core
//!
//! Runtime-free building blocks for Cloudsearch: the result and account
//! models, the query DSL parser, the per-query result filter pipeline, and
//! the storage abstraction with in-memory backends.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The search
//! engine, cached search wrapper, and SQLite stores live in the
//! `cloudsearch` crate and build on the types defined here.

pub mod filter;
pub mod models;
pub mod query;
pub mod store;

pub use filter::{FilterChain, FilterFactory, ResultFilter};
pub use models::{
    AccountData, AccountType, ContentType, ResultDetails, ResultStatus, SearchResult,
};
pub use query::{Query, SearchMode, StaticCatalog, TypeCatalog};
pub use store::memory::{InMemoryAccountStore, InMemoryResultStore};
pub use store::{AccountStore, ResultStore};
