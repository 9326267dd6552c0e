//! The search orchestrator.
//!
//! [`SearchEngine`] holds the live set of search sources, one or more per
//! linked account, and fans every query out to all of them at once:
//!
//! ```text
//!              ┌─▶ source 1 ─▶ worker ─┐
//!  Query ──────┼─▶ source 2 ─▶ worker ─┼─▶ filter chain ─▶ merged stream
//!              └─▶ source N ─▶ worker ─┘
//!                                 ▲
//!                    coordinator: closes the stream when every worker
//!                    is done, the caller cancels, or the timeout hits
//! ```
//!
//! [`SearchEngine::refresh`] rebuilds the live set from the account store,
//! renewing credentials that are about to expire, and swaps it in
//! atomically. Searches already running keep the snapshot they started
//! with. [`SearchEngine::watch_tokens`] repeats the credential renewal
//! on a fixed interval until its shutdown token fires.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use cloudsearch_core::filter::standard_filters;
use cloudsearch_core::query::DEFAULT_MAX_RESULTS;
use cloudsearch_core::{
    AccountData, AccountStore, FilterChain, FilterFactory, Query, ResultStore,
};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::Result;
use crate::registry::Registry;
use crate::searchable::Searchable;
use crate::stream::{drain, forward, next_result, result_channel, ResultSender, ResultStream};

/// Timing knobs of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on one search, whatever the caller does.
    pub search_timeout: Duration,
    /// Period of [`SearchEngine::watch_tokens`].
    pub token_watch_interval: Duration,
    /// Credentials expiring within this window are renewed on refresh.
    pub reauth_lookahead: chrono::Duration,
    pub max_results: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(15),
            token_watch_interval: Duration::from_secs(600),
            reauth_lookahead: chrono::Duration::minutes(30),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

type SourceSet = Arc<Vec<Arc<dyn Searchable>>>;

pub struct SearchEngine {
    accounts: Arc<dyn AccountStore>,
    results: Arc<dyn ResultStore>,
    registry: Arc<Registry>,
    filters: FilterFactory,
    settings: EngineSettings,
    live: Mutex<SourceSet>,
    refreshing: tokio::sync::Mutex<()>,
}

impl SearchEngine {
    /// An engine with the standard filter chain and no live sources yet.
    /// Call [`refresh`](SearchEngine::refresh) to load the accounts.
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        results: Arc<dyn ResultStore>,
        registry: Arc<Registry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            accounts,
            results,
            registry,
            filters: standard_filters(),
            settings,
            live: Mutex::new(Arc::new(Vec::new())),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the per-query filter chain factory.
    pub fn with_filters(mut self, filters: FilterFactory) -> Self {
        self.filters = filters;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Parse user input into a query with a fresh search id.
    pub fn query(&self, text: &str) -> Query {
        let mut query = Query::parse(text, uuid::Uuid::new_v4().to_string(), &*self.registry);
        query.max_results = self.settings.max_results;
        query
    }

    // ═══════════════════════════════════════════════════════════════════
    // Live source set
    // ═══════════════════════════════════════════════════════════════════

    /// Rebuild the live source set from the stored accounts.
    ///
    /// A failing account store aborts the refresh and leaves the current
    /// set in place. Accounts whose credentials cannot be renewed or whose
    /// sources cannot be built are logged and skipped. Returns the number
    /// of live sources.
    pub async fn refresh(&self) -> Result<usize> {
        let _guard = self.refreshing.lock().await;
        let started = Instant::now();
        let accounts = self.accounts.all().await?;

        let mut sources: Vec<Arc<dyn Searchable>> = Vec::new();
        let mut skipped = 0usize;
        for account in accounts {
            if !account.active {
                debug!(account = %account, "inactive, not searching");
                continue;
            }
            let account = if account.should_reauth(Utc::now(), self.settings.reauth_lookahead) {
                match self.reauthenticate(account).await {
                    Some(account) => account,
                    None => {
                        skipped += 1;
                        continue;
                    }
                }
            } else {
                account
            };

            match self.registry.search_builder_for(&account) {
                Ok(built) => sources.extend(built),
                Err(err) => {
                    warn!(account = %account, "skipping account: {}", err);
                    skipped += 1;
                }
            }
        }

        let count = sources.len();
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(sources);
        info!(
            sources = count,
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "refreshed search sources"
        );
        Ok(count)
    }

    /// Renew an account's credentials, persisting them when they change.
    /// `None` means the account cannot be searched right now.
    async fn reauthenticate(&self, account: AccountData) -> Option<AccountData> {
        let label = account.to_string();
        let auth = match self.registry.auth_builder_for(&account.account_type) {
            Ok(auth) => auth,
            Err(err) => {
                warn!(account = %label, "could not build authenticator: {}", err);
                return None;
            }
        };
        match auth.refresh_account_if_needed(account).await {
            Ok((mut account, changed)) => {
                if changed {
                    if let Err(err) = self.accounts.save(&mut account).await {
                        error!(account = %label, "could not persist refreshed credentials: {:#}", err);
                    }
                }
                Some(account)
            }
            Err(err) => {
                warn!(account = %label, "could not refresh credentials: {:#}", err);
                None
            }
        }
    }

    fn snapshot(&self) -> SourceSet {
        Arc::clone(&self.live.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn live_source_count(&self) -> usize {
        self.snapshot().len()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Search
    // ═══════════════════════════════════════════════════════════════════

    /// Fan `query` out to every live source and merge what survives the
    /// filter chain into one stream.
    ///
    /// The stream always closes: when every source is exhausted, when
    /// `ctx` is cancelled, or when the search timeout passes. Cancelling
    /// `ctx` is the caller's way to stop early; the engine works on a
    /// child token and never cancels the caller's.
    pub fn search(&self, query: Query, ctx: &CancellationToken) -> ResultStream {
        let query = Arc::new(query);
        let ctx = ctx.child_token();
        let sources = self.snapshot();
        let filters = Arc::new((self.filters)(&*query));
        let span = info_span!("search", search_id = %query.search_id);

        let (tx, rx) = result_channel();
        span.in_scope(|| {
            info!(sources = sources.len(), query = %query.raw_text, "searching sources")
        });
        if sources.is_empty() {
            return rx;
        }

        let mut workers = JoinSet::new();
        for source in sources.iter() {
            let stream = source.search(Arc::clone(&query), ctx.clone());
            let worker = pump(
                source.label().to_string(),
                stream,
                tx.clone(),
                ctx.clone(),
                Arc::clone(&query),
                Arc::clone(&filters),
            );
            workers.spawn(worker.instrument(span.clone()));
        }
        drop(tx);

        let timeout = self.settings.search_timeout;
        tokio::spawn(
            async move {
                let started = Instant::now();
                let completion = drain(workers, &ctx, Some(timeout)).await;
                // Release sources that are still running.
                ctx.cancel();
                info!(
                    completion = completion.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "closing search"
                );
            }
            .instrument(span),
        );

        rx
    }

    // ═══════════════════════════════════════════════════════════════════
    // Accounts
    // ═══════════════════════════════════════════════════════════════════

    /// Persist an account, then refresh the live set.
    pub async fn save_account(&self, account: &mut AccountData) -> Result<usize> {
        self.accounts.save(account).await?;
        self.refresh().await
    }

    /// Purge an account's cached results, delete it, then refresh.
    pub async fn delete_account(&self, id: &str) -> Result<usize> {
        let purged = self.results.delete_all_from_account(id).await?;
        debug!(account = id, purged, "purged cached results");
        self.accounts.delete(id).await?;
        self.refresh().await
    }

    pub async fn all_accounts(&self) -> Result<Vec<AccountData>> {
        Ok(self.accounts.all().await?)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Token watch
    // ═══════════════════════════════════════════════════════════════════

    /// One pass of the token watcher: renew every account holding a
    /// refresh token and rebuild the live set once if any changed.
    pub async fn refresh_tokens(&self) -> Result<bool> {
        let accounts = self.accounts.all().await?;
        let mut changed_any = false;

        for account in accounts.into_iter().filter(|a| a.has_refresh_token()) {
            let label = account.to_string();
            let auth = match self.registry.auth_builder_for(&account.account_type) {
                Ok(auth) => auth,
                Err(err) => {
                    warn!(account = %label, "auth building failed: {}", err);
                    continue;
                }
            };
            match auth.refresh_account_if_needed(account).await {
                Ok((mut account, true)) => {
                    debug!(account = %label, "credentials changed");
                    if let Err(err) = self.accounts.save(&mut account).await {
                        error!(account = %label, "could not persist refreshed credentials: {:#}", err);
                    }
                    changed_any = true;
                }
                Ok((_, false)) => {}
                Err(err) => warn!(account = %label, "refreshing account failed: {:#}", err),
            }
        }

        if changed_any {
            self.refresh().await?;
        }
        Ok(changed_any)
    }

    /// Run [`refresh_tokens`](SearchEngine::refresh_tokens) every
    /// `token_watch_interval`, starting immediately, until `shutdown` fires.
    pub async fn watch_tokens(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.token_watch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let pass = self.refresh_tokens();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = pass => {
                    if let Err(err) = outcome {
                        error!("token watch pass failed: {}", err);
                    }
                }
            }
        }
        debug!("token watcher stopped");
    }

    pub fn spawn_token_watcher(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.watch_tokens(shutdown).await })
    }
}

/// Worker: read one source, filter, forward into the merged stream.
async fn pump(
    label: String,
    mut stream: ResultStream,
    tx: ResultSender,
    ctx: CancellationToken,
    query: Arc<Query>,
    filters: Arc<FilterChain>,
) {
    let mut forwarded = 0usize;
    while let Some(result) = next_result(&mut stream, &ctx).await {
        let Some(result) = filters.apply(&query, result) else {
            continue;
        };
        if !forward(&tx, &ctx, result).await {
            break;
        }
        forwarded += 1;
    }
    debug!(source = %label, forwarded, "source done");
}
