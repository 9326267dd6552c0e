//! `cloudsearch search`: run one query and print results as they arrive.

use anyhow::{bail, Result};
use cloudsearch_core::{ResultStatus, SearchResult};
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::config::Config;

pub async fn run_search(
    config: &Config,
    text: &str,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    if text.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let mut config = config.clone();
    if let Some(secs) = timeout_secs {
        if secs == 0 {
            bail!("--timeout-secs must be > 0");
        }
        config.search.timeout_secs = secs;
    }

    let app = App::open(config).await?;
    let query = app.engine.query(text);

    // Ctrl-C stops the search; whatever arrived so far is still printed.
    let ctx = CancellationToken::new();
    let interrupt = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctx.cancel();
            }
        })
    };

    let mut stream = app.engine.search(query, &ctx);
    let mut count = 0usize;
    while let Some(result) = stream.recv().await {
        match result.status {
            ResultStatus::Found => {}
            ResultStatus::NotFound => continue,
            ResultStatus::Error => {
                eprintln!("Warning: {}", result.title);
                continue;
            }
        }
        count += 1;
        if json {
            println!("{}", serde_json::to_string(&result)?);
        } else {
            print_result(count, &result);
        }
    }
    interrupt.abort();

    if count == 0 && !json {
        println!("No results.");
    }

    app.close().await;
    Ok(())
}

fn print_result(index: usize, result: &SearchResult) {
    let title_display = if result.title.is_empty() {
        "(untitled)"
    } else {
        result.title.as_str()
    };
    let date = result
        .timestamp
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    println!(
        "{}. [{}] {} / {}",
        index, result.content_type, result.account_type, title_display
    );
    if !date.is_empty() {
        println!("    updated: {}", date);
    }
    if !result.permalink.is_empty() {
        println!("    url: {}", result.permalink);
    }
    if !result.body.is_empty() {
        println!("    excerpt: \"{}\"", result.body.replace('\n', " ").trim());
    }
    println!("    id: {}", result.id);
    println!();
}
