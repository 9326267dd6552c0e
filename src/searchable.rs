//! The search source contract and its stock adapters.
//!
//! A [`Searchable`] streams zero or more results for one provider, account
//! and sub-service. Every source must close its stream once it is done or
//! once the search is cancelled, and must never block forever after
//! cancellation.
//!
//! | Adapter | Purpose |
//! |---------|---------|
//! | [`NoopSearchable`] | Yields nothing; stands in for a source that could not be built |
//! | [`BatchSearchable`] | Turns a request/response search into a stream |
//! | [`CacheReader`] | Batch search over one account's cached results |

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cloudsearch_core::{Query, ResultStore, SearchResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream::{closed_stream, forward, result_channel, ResultStream};

// ═══════════════════════════════════════════════════════════════════════
// Searchable Trait
// ═══════════════════════════════════════════════════════════════════════

/// One search source.
///
/// `search` returns immediately; the work happens on tasks spawned on the
/// current tokio runtime, which feed the returned stream.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use cloudsearch::searchable::Searchable;
/// use cloudsearch::stream::{forward, result_channel, ResultStream};
/// use cloudsearch_core::{Query, SearchResult};
/// use tokio_util::sync::CancellationToken;
///
/// struct Greeting;
///
/// impl Searchable for Greeting {
///     fn label(&self) -> &str { "greeting" }
///
///     fn search(&self, _query: Arc<Query>, ctx: CancellationToken) -> ResultStream {
///         let (tx, rx) = result_channel();
///         tokio::spawn(async move {
///             forward(&tx, &ctx, SearchResult::error("hello")).await;
///         });
///         rx
///     }
/// }
/// ```
pub trait Searchable: Send + Sync {
    /// Short name used in logs, e.g. `"gmail"` or `"local:notes"`.
    fn label(&self) -> &str;

    fn search(&self, query: Arc<Query>, ctx: CancellationToken) -> ResultStream;
}

/// A source that never finds anything.
pub struct NoopSearchable {
    label: String,
}

impl NoopSearchable {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Searchable for NoopSearchable {
    fn label(&self) -> &str {
        &self.label
    }

    fn search(&self, _query: Arc<Query>, _ctx: CancellationToken) -> ResultStream {
        closed_stream()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Batch Adapter
// ═══════════════════════════════════════════════════════════════════════

/// A provider search that answers a whole query at once.
#[async_trait]
pub trait BatchSearch: Send + Sync {
    async fn search_batch(&self, query: &Query, ctx: &CancellationToken)
        -> Result<Vec<SearchResult>>;
}

/// Streams the results of a [`BatchSearch`].
///
/// A failed batch becomes a single `Error`-status result carrying the
/// message, so the failure is visible to the caller without failing the
/// search.
pub struct BatchSearchable<B> {
    label: String,
    inner: Arc<B>,
}

impl<B: BatchSearch + 'static> BatchSearchable<B> {
    pub fn new(label: impl Into<String>, inner: B) -> Self {
        Self {
            label: label.into(),
            inner: Arc::new(inner),
        }
    }
}

impl<B: BatchSearch + 'static> Searchable for BatchSearchable<B> {
    fn label(&self) -> &str {
        &self.label
    }

    fn search(&self, query: Arc<Query>, ctx: CancellationToken) -> ResultStream {
        let (tx, rx) = result_channel();
        let inner = Arc::clone(&self.inner);
        let label = self.label.clone();

        tokio::spawn(async move {
            let batch = tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                batch = inner.search_batch(&query, &ctx) => batch,
            };
            match batch {
                Ok(results) => {
                    debug!(source = %label, count = results.len(), "batch search done");
                    for result in results {
                        if !forward(&tx, &ctx, result).await {
                            break;
                        }
                    }
                }
                Err(err) => {
                    warn!(source = %label, "search failed: {:#}", err);
                    let message = format!("{} search failed: {:#}", label, err);
                    forward(&tx, &ctx, SearchResult::error(message)).await;
                }
            }
        });

        rx
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Cache Reader
// ═══════════════════════════════════════════════════════════════════════

/// Serves one account's cached results for a query.
///
/// Wrap it in a [`BatchSearchable`] to use it as a source.
pub struct CacheReader {
    results: Arc<dyn ResultStore>,
    account_id: String,
}

impl CacheReader {
    pub fn for_account(results: Arc<dyn ResultStore>, account_id: impl Into<String>) -> Self {
        Self {
            results,
            account_id: account_id.into(),
        }
    }
}

#[async_trait]
impl BatchSearch for CacheReader {
    async fn search_batch(
        &self,
        query: &Query,
        _ctx: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        self.results.search_account(&self.account_id, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsearch_core::{
        AccountData, AccountType, ContentType, InMemoryResultStore, ResultStatus,
    };

    struct Fixed(Vec<SearchResult>);

    #[async_trait]
    impl BatchSearch for Fixed {
        async fn search_batch(
            &self,
            _query: &Query,
            _ctx: &CancellationToken,
        ) -> Result<Vec<SearchResult>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl BatchSearch for Failing {
        async fn search_batch(
            &self,
            _query: &Query,
            _ctx: &CancellationToken,
        ) -> Result<Vec<SearchResult>> {
            anyhow::bail!("provider unreachable")
        }
    }

    async fn collect(mut rx: ResultStream) -> Vec<SearchResult> {
        let mut out = Vec::new();
        while let Some(r) = rx.recv().await {
            out.push(r);
        }
        out
    }

    #[tokio::test]
    async fn test_noop_yields_nothing() {
        let noop = NoopSearchable::new("noop");
        let rx = noop.search(Arc::new(Query::new("x", "1")), CancellationToken::new());
        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_streams_results() {
        let account = AccountData::new(AccountType::dropbox(), "ext", "Test");
        let source = BatchSearchable::new(
            "fixed",
            Fixed(vec![
                SearchResult::new(&account, "1", ContentType::File, "a"),
                SearchResult::new(&account, "2", ContentType::File, "b"),
            ]),
        );
        let rx = source.search(Arc::new(Query::new("x", "1")), CancellationToken::new());
        assert_eq!(collect(rx).await.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_failure_becomes_error_result() {
        let source = BatchSearchable::new("broken", Failing);
        let rx = source.search(Arc::new(Query::new("x", "1")), CancellationToken::new());
        let results = collect(rx).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ResultStatus::Error);
        assert!(results[0].title.contains("provider unreachable"));
    }

    #[tokio::test]
    async fn test_cache_reader_scoped_to_account() {
        let store = Arc::new(InMemoryResultStore::new());
        let mine = AccountData::new(AccountType::dropbox(), "mine", "Mine");
        let theirs = AccountData::new(AccountType::dropbox(), "theirs", "Theirs");
        store
            .save(SearchResult::new(&mine, "1", ContentType::File, "budget"))
            .await
            .unwrap();
        store
            .save(SearchResult::new(&theirs, "2", ContentType::File, "budget"))
            .await
            .unwrap();

        let reader = BatchSearchable::new("cache", CacheReader::for_account(store, mine.id.clone()));
        let rx = reader.search(Arc::new(Query::new("budget", "1")), CancellationToken::new());
        let results = collect(rx).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].account_id, mine.id);
    }

    #[tokio::test]
    async fn test_cache_reader_not_crowded_out_by_other_accounts() {
        let store = Arc::new(InMemoryResultStore::new());
        let mine = AccountData::new(AccountType::dropbox(), "mine", "Mine");
        let theirs = AccountData::new(AccountType::dropbox(), "theirs", "Theirs");
        let mut weak = SearchResult::new(&mine, "mine-1", ContentType::File, "notes");
        weak.body = "budget".to_string();
        store.save(weak).await.unwrap();
        for i in 0..10 {
            store
                .save(SearchResult::new(&theirs, format!("t{}", i), ContentType::File, "budget"))
                .await
                .unwrap();
        }

        let mut query = Query::new("budget", "1");
        query.max_results = 10;
        let reader = BatchSearchable::new("cache", CacheReader::for_account(store, mine.id.clone()));
        let results = collect(reader.search(Arc::new(query), CancellationToken::new())).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].original_id, "mine-1");
    }
}
