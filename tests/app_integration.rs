//! End-to-end engine tests over the SQLite stores and the local-folder
//! connector, without going through the binary.

use std::fs;
use std::time::Duration;

use cloudsearch::app::App;
use cloudsearch::config::Config;
use cloudsearch::connector_fs;
use cloudsearch::cloudsearch_core::{ContentType, ResultStatus, SearchResult};
use cloudsearch::stream::ResultStream;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config_for(tmp: &TempDir) -> Config {
    let mut config = Config::minimal();
    config.storage.path = tmp.path().join("data");
    config.search.timeout_secs = 5;
    config
}

fn write_tree(tmp: &TempDir) -> std::path::PathBuf {
    let files = tmp.path().join("files");
    fs::create_dir_all(files.join("reports")).unwrap();
    fs::write(files.join("reports/budget-2024.txt"), "numbers").unwrap();
    fs::write(files.join("reports/summary.md"), "the budget looks fine").unwrap();
    fs::write(files.join("todo.txt"), "buy milk").unwrap();
    files
}

async fn collect(mut rx: ResultStream) -> Vec<SearchResult> {
    let mut out = Vec::new();
    while let Some(r) = rx.recv().await {
        out.push(r);
    }
    out
}

#[tokio::test]
async fn test_search_caches_and_dedups() {
    let tmp = TempDir::new().unwrap();
    let files = write_tree(&tmp);
    let app = App::open(config_for(&tmp)).await.unwrap();

    let mut account = connector_fs::local_account(&files, "files").unwrap();
    assert_eq!(app.engine.save_account(&mut account).await.unwrap(), 1);

    let live = collect(app.engine.search(app.engine.query("budget mode:live"), &CancellationToken::new())).await;
    assert_eq!(live.len(), 2);
    assert!(live.iter().all(|r| r.status == ResultStatus::Found && !r.id.is_empty()));

    // Both branches answer with the same items; each id is emitted once.
    let all = collect(app.engine.search(app.engine.query("budget"), &CancellationToken::new())).await;
    assert_eq!(all.len(), 2);

    let cached = collect(app.engine.search(app.engine.query("budget mode:cache"), &CancellationToken::new())).await;
    assert_eq!(cached.len(), 2);
    assert!(cached.iter().all(|r| r.cached_at.is_some()));

    app.close().await;
}

#[tokio::test]
async fn test_accounts_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let files = write_tree(&tmp);

    let app = App::open(config_for(&tmp)).await.unwrap();
    let mut account = connector_fs::local_account(&files, "files").unwrap();
    app.engine.save_account(&mut account).await.unwrap();
    app.close().await;

    let app = App::open(config_for(&tmp)).await.unwrap();
    let accounts = app.engine.all_accounts().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].id, account.id);
    assert_eq!(app.engine.live_source_count(), 1);
    app.close().await;
}

#[tokio::test]
async fn test_missing_folder_degrades_to_cache() {
    let tmp = TempDir::new().unwrap();
    let files = write_tree(&tmp);
    let app = App::open(config_for(&tmp)).await.unwrap();

    let mut account = connector_fs::local_account(&files, "files").unwrap();
    app.engine.save_account(&mut account).await.unwrap();
    collect(app.engine.search(app.engine.query("todo"), &CancellationToken::new())).await;

    fs::remove_dir_all(&files).unwrap();
    // The builder fails now; the account keeps a no-op live source.
    assert_eq!(app.engine.refresh().await.unwrap(), 1);

    let results = collect(app.engine.search(app.engine.query("todo"), &CancellationToken::new())).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].original_id, "todo.txt");
    assert_eq!(results[0].content_type, ContentType::File);

    app.close().await;
}

#[tokio::test]
async fn test_delete_account_purges_cache() {
    let tmp = TempDir::new().unwrap();
    let files = write_tree(&tmp);
    let app = App::open(config_for(&tmp)).await.unwrap();

    let mut account = connector_fs::local_account(&files, "files").unwrap();
    app.engine.save_account(&mut account).await.unwrap();
    collect(app.engine.search(app.engine.query("budget"), &CancellationToken::new())).await;

    assert_eq!(app.engine.delete_account(&account.id).await.unwrap(), 0);
    assert!(app.engine.all_accounts().await.unwrap().is_empty());

    // Re-linking the same folder must not resurrect the purged cache.
    let mut again = connector_fs::local_account(&files, "files").unwrap();
    app.engine.save_account(&mut again).await.unwrap();
    assert_eq!(again.id, account.id);
    let cached = collect(app.engine.search(app.engine.query("budget mode:cache"), &CancellationToken::new())).await;
    assert!(cached.is_empty());

    app.close().await;
}

#[tokio::test]
async fn test_cancelled_search_closes_promptly() {
    let tmp = TempDir::new().unwrap();
    let files = write_tree(&tmp);
    let app = App::open(config_for(&tmp)).await.unwrap();
    let mut account = connector_fs::local_account(&files, "files").unwrap();
    app.engine.save_account(&mut account).await.unwrap();

    let ctx = CancellationToken::new();
    ctx.cancel();
    let rx = app.engine.search(app.engine.query("budget"), &ctx);
    let results = tokio::time::timeout(Duration::from_secs(2), collect(rx))
        .await
        .expect("stream should close after cancellation");
    assert!(results.len() <= 2);

    app.close().await;
}
