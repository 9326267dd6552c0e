//! Per-query result filter pipeline.
//!
//! Every result streamed out of a source passes through a [`FilterChain`]
//! before it reaches the caller. A filter either hands the (possibly
//! modified) result on or drops it; the first drop short-circuits the rest
//! of the chain.
//!
//! Chains are built fresh for every query by a [`FilterFactory`], so
//! stateful filters such as [`Dedup`] never share state across queries.
//!
//! | Order | Filter | Effect |
//! |-------|--------|--------|
//! | 1 | [`AssignId`] | fills the content-addressed id |
//! | 2 | [`TimeRange`] | drops results outside `[after, before]` |
//! | 3 | [`Dedup`] | drops ids already emitted for this query |
//! | 4 | [`ContentTypes`] | drops content types the query excludes |
//!
//! `Error` results stand for a failed source, not an item, so the last two
//! let them through.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::models::{ResultStatus, SearchResult};
use crate::query::Query;

/// A single step of the pipeline.
///
/// Filters are called concurrently from every source of a query, hence
/// `Send + Sync` and `&self`.
pub trait ResultFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the result to keep it, `None` to drop it.
    fn apply(&self, query: &Query, result: SearchResult) -> Option<SearchResult>;
}

/// Builds the filter chain for one query.
pub type FilterFactory = Arc<dyn Fn(&Query) -> FilterChain + Send + Sync>;

/// Ordered list of filters applied to each result.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn ResultFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recommended chain: id assignment, time range, dedup, content type.
    pub fn standard() -> Self {
        Self::new()
            .with(AssignId)
            .with(TimeRange)
            .with(Dedup::new())
            .with(ContentTypes)
    }

    pub fn with(mut self, filter: impl ResultFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn push(&mut self, filter: Box<dyn ResultFilter>) {
        self.filters.push(filter);
    }

    pub fn apply(&self, query: &Query, result: SearchResult) -> Option<SearchResult> {
        let mut current = result;
        for filter in &self.filters {
            current = filter.apply(query, current)?;
        }
        Some(current)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Factory producing [`FilterChain::standard`] for every query.
pub fn standard_filters() -> FilterFactory {
    Arc::new(|_query: &Query| FilterChain::standard())
}

/// Assigns the content-addressed id when a source left it unset.
pub struct AssignId;

impl ResultFilter for AssignId {
    fn name(&self) -> &'static str {
        "assign_id"
    }

    fn apply(&self, _query: &Query, mut result: SearchResult) -> Option<SearchResult> {
        result.ensure_id();
        Some(result)
    }
}

/// Keeps results inside the inclusive `[after, before]` window.
///
/// Results without a timestamp are always kept.
pub struct TimeRange;

impl ResultFilter for TimeRange {
    fn name(&self) -> &'static str {
        "time_range"
    }

    fn apply(&self, query: &Query, result: SearchResult) -> Option<SearchResult> {
        let Some(ts) = result.timestamp else {
            return Some(result);
        };
        let after_ok = query.after.map_or(true, |after| ts >= after);
        let before_ok = query.before.map_or(true, |before| ts <= before);
        if after_ok && before_ok {
            Some(result)
        } else {
            debug!(id = %result.id, "filtering out of range");
            None
        }
    }
}

/// First occurrence of an id wins; later ones are dropped.
///
/// `Error` results carry no item identity and always pass, so every
/// failing source is reported.
pub struct Dedup {
    seen: RwLock<HashSet<String>>,
}

impl Dedup {
    pub fn new() -> Self {
        Self {
            seen: RwLock::new(HashSet::new()),
        }
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultFilter for Dedup {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn apply(&self, _query: &Query, result: SearchResult) -> Option<SearchResult> {
        if result.status == ResultStatus::Error {
            return Some(result);
        }
        let already_seen = self
            .seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&result.id);
        // The insert under the write lock is the authoritative check.
        let first = !already_seen
            && self
                .seen
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(result.id.clone());
        if first {
            Some(result)
        } else {
            debug!(id = %result.id, "already posted, filtering");
            None
        }
    }
}

/// Drops content types the query does not ask for. `Error` results pass.
pub struct ContentTypes;

impl ResultFilter for ContentTypes {
    fn name(&self) -> &'static str {
        "content_types"
    }

    fn apply(&self, query: &Query, result: SearchResult) -> Option<SearchResult> {
        if result.status == ResultStatus::Error
            || query.content_types.is_empty()
            || query.content_types.contains(&result.content_type)
        {
            Some(result)
        } else {
            debug!(id = %result.id, content_type = %result.content_type, "filtering by content type");
            None
        }
    }
}
