//! Storage abstraction for Cloudsearch.
//!
//! Two stores back the engine: an [`AccountStore`] holding linked
//! accounts and their credentials, and a [`ResultStore`] caching results
//! seen on earlier searches. Both are async (via `async-trait`) so SQLite
//! and in-memory backends share one interface.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`ResultStore::save`] | Overwrite a cached result |
//! | [`ResultStore::merge`] | Save, keeping user state (favorite flag) already cached |
//! | [`ResultStore::search`] | Match cached results against a [`Query`] |
//! | [`ResultStore::search_account`] | Same, restricted to one account before ranking |
//! | [`ResultStore::find_older_than`] | Results cached before a cutoff |
//! | [`AccountStore::save`] | Validate, id and persist an account |
//! | [`AccountStore::active`] | Accounts the engine should search |

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AccountData, SearchResult};
use crate::query::Query;

/// Persistent collection of linked accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn all(&self) -> Result<Vec<AccountData>>;

    /// Accounts with `active = true`.
    async fn active(&self) -> Result<Vec<AccountData>>;

    /// Insert or replace by id. Assigns the id when unset.
    ///
    /// Fails when `external_id` or `name` is empty.
    async fn save(&self, account: &mut AccountData) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn close(&self) {}
}

/// Local cache of previously seen results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Fully overwrite the cached copy. Returns the stored result with
    /// its id and `cached_at` set.
    async fn save(&self, result: SearchResult) -> Result<SearchResult>;

    /// Like [`save`](ResultStore::save), but a favorite flag already
    /// cached for the same id survives.
    async fn merge(&self, result: SearchResult) -> Result<SearchResult>;

    /// Cached results matching the query, best first, at most
    /// `query.max_results`.
    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>>;

    /// Like [`search`](ResultStore::search), over `account_id`'s results
    /// only. The limit applies after the account filter, so other
    /// accounts' hits never crowd these out.
    async fn search_account(&self, account_id: &str, query: &Query)
        -> Result<Vec<SearchResult>>;

    async fn get(&self, id: &str) -> Result<Option<SearchResult>>;

    /// Results whose `cached_at` is older than `cutoff`.
    async fn find_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<SearchResult>>;

    /// Remove every result of an account. Returns the number removed.
    async fn delete_all_from_account(&self, account_id: &str) -> Result<u64>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn close(&self) {}
}

/// Shared validation for [`AccountStore::save`] implementations.
pub fn prepare_account(account: &mut AccountData) -> Result<()> {
    if account.external_id.is_empty() {
        bail!("account external id must be set");
    }
    if account.name.is_empty() {
        bail!("account name must be set");
    }
    if account.id.is_empty() {
        account.assign_id();
    }
    Ok(())
}

/// Shared preparation for [`ResultStore::save`] implementations.
pub fn prepare_result(mut result: SearchResult, now: DateTime<Utc>) -> Result<SearchResult> {
    if result.original_id.is_empty() {
        bail!("result original id must be set");
    }
    result.ensure_id();
    result.cached_at = Some(now);
    Ok(result)
}

/// Order scored cache hits best first, newest first on ties, and keep
/// at most `max_results`.
pub fn rank_hits(hits: &mut Vec<SearchResult>, max_results: usize) {
    hits.sort_by(|a, b| {
        b.cache_hit_score
            .partial_cmp(&a.cache_hit_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
    hits.truncate(max_results);
}

/// Score a cached result against a query; `None` when it does not match.
///
/// Account type, content type and time bounds must all hold, and every
/// query term must occur somewhere. A term found in the title counts 3,
/// in the body 2, in the permalink 1.
/// A query without text matches on the structured filters alone, but
/// only when it names at least one content type.
pub fn match_score(query: &Query, result: &SearchResult) -> Option<f64> {
    if !query.account_types.is_empty() && !query.account_types.contains(&result.account_type) {
        return None;
    }
    if !query.content_types.is_empty() && !query.content_types.contains(&result.content_type) {
        return None;
    }
    if let Some(ts) = result.timestamp {
        if query.after.is_some_and(|after| ts < after)
            || query.before.is_some_and(|before| ts > before)
        {
            return None;
        }
    }

    let terms = query.terms();
    if terms.is_empty() {
        return (!query.content_types.is_empty()).then_some(1.0);
    }

    let title = result.title.to_lowercase();
    let body = result.body.to_lowercase();
    let permalink = result.permalink.to_lowercase();
    let mut score = 0.0;
    for t in &terms {
        let term_score = {
            let mut s = 0.0;
            if title.contains(t.as_str()) {
                s += 3.0;
            }
            if body.contains(t.as_str()) {
                s += 2.0;
            }
            if permalink.contains(t.as_str()) {
                s += 1.0;
            }
            s
        };
        if term_score == 0.0 {
            return None;
        }
        score += term_score;
    }
    Some(score)
}
