//! Account and type management commands.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::config::Config;
use crate::connector_fs;

pub async fn list_accounts(config: &Config) -> Result<()> {
    let app = App::open(config.clone()).await?;
    let accounts = app.engine.all_accounts().await?;

    if accounts.is_empty() {
        println!("No accounts linked.");
    } else {
        println!("{:<64}  {:<10} {:<7} NAME", "ID", "TYPE", "ACTIVE");
        for account in &accounts {
            println!(
                "{:<64}  {:<10} {:<7} {}",
                account.id, account.account_type, account.active, account.name
            );
        }
    }
    println!();
    println!("{} live source(s)", app.engine.live_source_count());

    app.close().await;
    Ok(())
}

pub async fn add_local(config: &Config, path: &Path, name: Option<String>) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context("Cannot derive a name from the path; pass --name")?,
    };
    let mut account = connector_fs::local_account(path, &name)?;

    let app = App::open(config.clone()).await?;
    let sources = app.engine.save_account(&mut account).await?;
    println!("Linked {} as {}", path.display(), account.id);
    println!("{} live source(s)", sources);

    app.close().await;
    Ok(())
}

pub async fn delete_account(config: &Config, id: &str) -> Result<()> {
    let app = App::open(config.clone()).await?;
    let known = app
        .engine
        .all_accounts()
        .await?
        .iter()
        .any(|a| a.id == id);
    if !known {
        app.close().await;
        anyhow::bail!("No account with id {}", id);
    }

    let sources = app.engine.delete_account(id).await?;
    println!("Deleted account {}", id);
    println!("{} live source(s)", sources);

    app.close().await;
    Ok(())
}

pub async fn list_types(config: &Config) -> Result<()> {
    let app = App::open(config.clone()).await?;
    let registry = app.engine.registry();

    println!("Account types:");
    for name in registry.supported_account_type_names() {
        println!("  {}", name);
    }
    println!("Content types:");
    for name in registry.supported_content_type_names() {
        println!("  {}", name);
    }

    app.close().await;
    Ok(())
}

/// Keep credentials fresh until Ctrl-C.
pub async fn run_watch(config: &Config) -> Result<()> {
    let app = App::open(config.clone()).await?;
    let interval = Duration::from_secs(app.config.tokens.watch_interval_secs);
    println!("Watching tokens every {}s. Press Ctrl-C to stop.", interval.as_secs());

    let shutdown = CancellationToken::new();
    let watcher = app.engine.spawn_token_watcher(shutdown.clone());
    tokio::signal::ctrl_c().await?;
    shutdown.cancel();
    watcher.await?;

    app.close().await;
    Ok(())
}
