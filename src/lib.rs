//! # Cloudsearch
//!
//! One query across every linked account: cloud drives, mailboxes, local
//! folders. Each account contributes one or more search sources; the
//! engine fans a query out to all of them concurrently, filters and
//! de-duplicates what comes back, and streams a single merged result set
//! that always terminates.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │   Accounts   │──▶│   Registry   │──▶│ Sources (per account) │
//! │ SQLite store │   │ type → build │   │ cached ▸ live         │
//! └──────────────┘   └──────────────┘   └──────────┬───────────┘
//!                                                  │ fan-out / fan-in
//!                    ┌─────────────┐        ┌──────▼───────┐
//!                    │ Result cache│◀───────│ SearchEngine │──▶ stream
//!                    │ SQLite store│        │ filter chain │
//!                    └─────────────┘        └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Orchestrator: refresh, fan-out search, token watch |
//! | [`searchable`] | Search source trait and stock adapters |
//! | [`cached`] | Cache-augmented source wrapper and builder |
//! | [`registry`] | Account type → builder dispatch |
//! | [`auth`] | Identity service contract |
//! | [`stream`] | Result channels, cancellation-aware send/receive |
//! | [`connector_fs`] | Local-folder connector |
//! | [`sqlite_store`] | SQLite account and result stores |
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Subscriber setup for the binary |
//! | [`app`] | Config-to-engine wiring |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Error types |

pub mod app;
pub mod auth;
pub mod cached;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod migrate;
pub mod registry;
pub mod search;
pub mod searchable;
pub mod sources;
pub mod sqlite_store;
pub mod stream;

pub use cloudsearch_core;
pub use engine::{EngineSettings, SearchEngine};
pub use error::{Result, SearchError};
