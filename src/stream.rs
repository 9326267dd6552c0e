//! Channel plumbing shared by sources, the cached wrapper and the engine.
//!
//! A result stream is a bounded `mpsc` receiver. Producers forward through
//! [`forward`], which gives up as soon as the search is cancelled, and
//! consumers read through [`next_result`], which returns `None` on
//! cancellation even if the producer never closes its end.

use std::time::Duration;

use cloudsearch_core::SearchResult;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Receiving half of a result stream.
pub type ResultStream = mpsc::Receiver<SearchResult>;

/// Sending half of a result stream.
pub type ResultSender = mpsc::Sender<SearchResult>;

/// Buffered results per stream before producers wait on the consumer.
pub const RESULT_BUFFER: usize = 64;

pub fn result_channel() -> (ResultSender, ResultStream) {
    mpsc::channel(RESULT_BUFFER)
}

/// A stream that is already closed and yields nothing.
pub fn closed_stream() -> ResultStream {
    let (_tx, rx) = result_channel();
    rx
}

/// Send `result` unless `ctx` is cancelled first.
///
/// Returns `false` when the result was not delivered, either because the
/// search was cancelled or because the consumer went away. A cancelled
/// send is a silent drop.
pub async fn forward(tx: &ResultSender, ctx: &CancellationToken, result: SearchResult) -> bool {
    if ctx.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = ctx.cancelled() => false,
        sent = tx.send(result) => sent.is_ok(),
    }
}

/// Next result from `stream`, or `None` once it closes or `ctx` is cancelled.
pub async fn next_result(stream: &mut ResultStream, ctx: &CancellationToken) -> Option<SearchResult> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => None,
        next = stream.recv() => next,
    }
}

/// How a group of search tasks ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Finished,
    Cancelled,
    TimedOut,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::Finished => "finished",
            Completion::Cancelled => "cancelled",
            Completion::TimedOut => "timed out",
        }
    }
}

/// Wait for every task in `tasks`, for `ctx` to be cancelled, or for
/// `deadline` to pass, whichever comes first. Remaining tasks are aborted
/// before returning. Hitting the deadline cancels `ctx`.
pub async fn drain(
    mut tasks: JoinSet<()>,
    ctx: &CancellationToken,
    deadline: Option<Duration>,
) -> Completion {
    let timer = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    let completion = tokio::select! {
        biased;
        _ = ctx.cancelled() => Completion::Cancelled,
        _ = join_all(&mut tasks) => Completion::Finished,
        _ = timer => {
            ctx.cancel();
            Completion::TimedOut
        }
    };

    tasks.shutdown().await;
    completion
}

async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            if err.is_panic() {
                error!("search task panicked: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_stream_is_empty() {
        let mut rx = closed_stream();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_after_cancel_drops() {
        let (tx, mut rx) = result_channel();
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(!forward(&tx, &ctx, SearchResult::default()).await);
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_next_result_unblocks_on_cancel() {
        let (_tx, mut rx) = result_channel();
        let ctx = CancellationToken::new();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
            // cancelling twice is a no-op
            cancel.cancel();
        });
        assert!(next_result(&mut rx, &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_drain_finished() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {});
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
        });
        let ctx = CancellationToken::new();
        assert_eq!(drain(tasks, &ctx, None).await, Completion::Finished);
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_deadline_cancels_context() {
        let mut tasks = JoinSet::new();
        tasks.spawn(std::future::pending::<()>());
        let ctx = CancellationToken::new();
        let completion = drain(tasks, &ctx, Some(Duration::from_millis(20))).await;
        assert_eq!(completion, Completion::TimedOut);
        assert!(ctx.is_cancelled());
    }
}
