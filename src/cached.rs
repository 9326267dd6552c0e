//! Cache-augmented search: one source answering from the local cache and
//! the live provider at once.
//!
//! ```text
//!                 ┌──────────── cache branch ─────────────┐
//!  query ──┬──────▶ local (cache reader) ─────────────────┼──▶ output
//!          │      └───────────────────────────────────────┘
//!          │      ┌──────────── live branch ──────────────┐
//!          └──────▶ remote ──▶ Found: merge into cache    │
//!                 │           NotFound: delete from cache ┼──▶ output
//!                 └───────────────────────────────────────┘
//! ```
//!
//! `mode:cache` runs only the cache branch, `mode:live` only the live one,
//! the default runs both. The output closes once every branch that ran
//! has finished, or the search is cancelled.

use std::sync::Arc;
use std::time::Instant;

use cloudsearch_core::{AccountData, Query, ResultStatus, ResultStore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::registry::SearchBuilder;
use crate::searchable::{BatchSearchable, CacheReader, NoopSearchable, Searchable};
use crate::stream::{drain, forward, next_result, result_channel, ResultStream};

pub struct CachedSearchable {
    label: String,
    local: Arc<dyn Searchable>,
    remote: Arc<dyn Searchable>,
    results: Arc<dyn ResultStore>,
}

impl CachedSearchable {
    pub fn new(
        label: impl Into<String>,
        results: Arc<dyn ResultStore>,
        local: Arc<dyn Searchable>,
        remote: Arc<dyn Searchable>,
    ) -> Self {
        Self {
            label: label.into(),
            local,
            remote,
            results,
        }
    }
}

impl Searchable for CachedSearchable {
    fn label(&self) -> &str {
        &self.label
    }

    fn search(&self, query: Arc<Query>, ctx: CancellationToken) -> ResultStream {
        let (tx, rx) = result_channel();
        let mut branches = JoinSet::new();

        if query.mode.includes_cache() {
            debug!(source = %self.label, "searching cache");
            let mut stream = self.local.search(Arc::clone(&query), ctx.clone());
            let tx = tx.clone();
            let ctx = ctx.clone();
            let label = self.label.clone();
            branches.spawn(async move {
                let started = Instant::now();
                let mut count = 0usize;
                while let Some(result) = next_result(&mut stream, &ctx).await {
                    if !forward(&tx, &ctx, result).await {
                        break;
                    }
                    count += 1;
                }
                debug!(source = %label, count, elapsed_ms = started.elapsed().as_millis() as u64, "cached search done");
            });
        }

        if query.mode.includes_live() {
            debug!(source = %self.label, "searching remote");
            let mut stream = self.remote.search(Arc::clone(&query), ctx.clone());
            let tx = tx.clone();
            let ctx = ctx.clone();
            let label = self.label.clone();
            let results = Arc::clone(&self.results);
            branches.spawn(async move {
                let started = Instant::now();
                let mut count = 0usize;
                while let Some(mut result) = next_result(&mut stream, &ctx).await {
                    match result.status {
                        ResultStatus::Found => match results.merge(result.clone()).await {
                            Ok(merged) => result = merged,
                            Err(err) => error!(source = %label, "couldn't merge result: {:#}", err),
                        },
                        ResultStatus::NotFound => {
                            result.ensure_id();
                            debug!(source = %label, id = %result.id, "deleting removed content");
                            if let Err(err) = results.delete(&result.id).await {
                                error!(source = %label, "couldn't remove cached result: {:#}", err);
                            }
                        }
                        ResultStatus::Error => {}
                    }
                    if !forward(&tx, &ctx, result).await {
                        break;
                    }
                    count += 1;
                }
                debug!(source = %label, count, elapsed_ms = started.elapsed().as_millis() as u64, "remote search done");
            });
        }

        drop(tx);
        if branches.is_empty() {
            return rx;
        }

        // The output sender lives in the branches; the gate only reaps them.
        tokio::spawn(async move {
            drain(branches, &ctx, None).await;
        });

        rx
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Caching Builder
// ═══════════════════════════════════════════════════════════════════════

/// Wraps a provider's [`SearchBuilder`] so every source it builds also
/// feeds and reads the local cache.
///
/// A remote builder that fails is replaced by a single no-op source, so
/// an unreachable provider degrades to cache-only results instead of
/// dropping the account.
pub struct CachedSearchBuilder {
    remote: Arc<dyn SearchBuilder>,
    results: Arc<dyn ResultStore>,
    cache_locally: bool,
}

impl CachedSearchBuilder {
    pub fn new(
        remote: impl SearchBuilder + 'static,
        results: Arc<dyn ResultStore>,
        cache_locally: bool,
    ) -> Self {
        Self {
            remote: Arc::new(remote),
            results,
            cache_locally,
        }
    }
}

impl SearchBuilder for CachedSearchBuilder {
    fn build_search(&self, account: &AccountData) -> anyhow::Result<Vec<Arc<dyn Searchable>>> {
        let sources = match self.remote.build_search(account) {
            Ok(sources) => sources,
            Err(err) => {
                error!(account = %account.id, "could not set up a remote search: {:#}", err);
                vec![Arc::new(NoopSearchable::new(format!("{}:noop", account.account_type)))
                    as Arc<dyn Searchable>]
            }
        };

        if !self.cache_locally {
            return Ok(sources);
        }

        Ok(sources
            .into_iter()
            .map(|remote| {
                let label = remote.label().to_string();
                let local: Arc<dyn Searchable> = Arc::new(BatchSearchable::new(
                    format!("{}:cache", label),
                    CacheReader::for_account(Arc::clone(&self.results), account.id.clone()),
                ));
                Arc::new(CachedSearchable::new(
                    label,
                    Arc::clone(&self.results),
                    local,
                    remote,
                )) as Arc<dyn Searchable>
            })
            .collect())
    }
}
