use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Linked accounts
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL,
            account_type TEXT NOT NULL,
            token TEXT NOT NULL DEFAULT '',
            refresh_token TEXT,
            token_type TEXT NOT NULL DEFAULT '',
            expiry INTEGER,
            name TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Cached results
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            account_type TEXT NOT NULL,
            original_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            permalink TEXT NOT NULL DEFAULT '',
            thumbnail TEXT NOT NULL DEFAULT '',
            timestamp INTEGER,
            status TEXT NOT NULL,
            involves_me INTEGER NOT NULL DEFAULT 0,
            unread INTEGER NOT NULL DEFAULT 0,
            favorited INTEGER NOT NULL DEFAULT 0,
            labels_json TEXT NOT NULL DEFAULT '[]',
            details_json TEXT NOT NULL DEFAULT '{"kind":"none"}',
            cached_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_account_id ON results(account_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_cached_at ON results(cached_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_timestamp ON results(timestamp DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
