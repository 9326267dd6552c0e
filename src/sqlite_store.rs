//! SQLite-backed [`AccountStore`] and [`ResultStore`].
//!
//! Both share one pool (see [`crate::db`]) and the schema created by
//! [`crate::migrate`]. Timestamps are stored as unix milliseconds; labels
//! and [`ResultDetails`] as JSON text.
//!
//! Cache search narrows candidates in SQL by account, account type, content
//! type, time bounds and a `LIKE` per term, then scores them with
//! [`match_score`], so both stores rank results identically to the
//! in-memory backends.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use cloudsearch_core::store::{match_score, prepare_account, prepare_result, rank_hits};
use cloudsearch_core::{
    AccountData, AccountStore, AccountType, Query, ResultDetails, ResultStore, SearchResult,
};

fn to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

// ═══════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════

pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace `result`. When `keep_favorite` is set, a favorite
    /// flag already stored for the id survives. Returns the stored flag.
    async fn upsert(&self, result: &SearchResult, keep_favorite: bool) -> Result<bool> {
        let labels_json = serde_json::to_string(&result.labels)?;
        let details_json = serde_json::to_string(&result.details)?;
        let favorited_update = if keep_favorite {
            "excluded.favorited OR results.favorited"
        } else {
            "excluded.favorited"
        };

        let sql = format!(
            r#"
            INSERT INTO results (id, account_id, account_type, original_id, content_type,
                                 title, body, permalink, thumbnail, timestamp, status,
                                 involves_me, unread, favorited, labels_json, details_json,
                                 cached_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                account_type = excluded.account_type,
                original_id = excluded.original_id,
                content_type = excluded.content_type,
                title = excluded.title,
                body = excluded.body,
                permalink = excluded.permalink,
                thumbnail = excluded.thumbnail,
                timestamp = excluded.timestamp,
                status = excluded.status,
                involves_me = excluded.involves_me,
                unread = excluded.unread,
                favorited = {},
                labels_json = excluded.labels_json,
                details_json = excluded.details_json,
                cached_at = excluded.cached_at
            RETURNING favorited
            "#,
            favorited_update
        );

        let favorited: bool = sqlx::query_scalar(&sql)
            .bind(&result.id)
            .bind(&result.account_id)
            .bind(result.account_type.as_str())
            .bind(&result.original_id)
            .bind(result.content_type.as_str())
            .bind(&result.title)
            .bind(&result.body)
            .bind(&result.permalink)
            .bind(&result.thumbnail)
            .bind(to_millis(result.timestamp))
            .bind(result.status.as_str())
            .bind(result.involves_me)
            .bind(result.unread)
            .bind(result.favorited)
            .bind(&labels_json)
            .bind(&details_json)
            .bind(to_millis(result.cached_at))
            .fetch_one(&self.pool)
            .await?;

        Ok(favorited)
    }

    /// Cached results matching `query`, optionally restricted to one
    /// account. SQL narrows the candidates, [`match_score`] decides.
    async fn search_where(
        &self,
        query: &Query,
        account_id: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let terms = query.terms();
        if terms.is_empty() && query.content_types.is_empty() {
            return Ok(Vec::new());
        }
        // SQLite LIKE only folds ASCII case.
        let like_terms: Vec<String> = terms
            .iter()
            .filter(|t| t.is_ascii())
            .map(|t| like_pattern(t))
            .collect();

        let mut sql = String::from("SELECT * FROM results WHERE 1 = 1");
        if account_id.is_some() {
            sql.push_str(" AND account_id = ?");
        }
        if !query.account_types.is_empty() {
            sql.push_str(&format!(
                " AND account_type IN ({})",
                placeholders(query.account_types.len())
            ));
        }
        if !query.content_types.is_empty() {
            sql.push_str(&format!(
                " AND content_type IN ({})",
                placeholders(query.content_types.len())
            ));
        }
        if query.after.is_some() {
            sql.push_str(" AND (timestamp IS NULL OR timestamp >= ?)");
        }
        if query.before.is_some() {
            sql.push_str(" AND (timestamp IS NULL OR timestamp <= ?)");
        }
        for _ in &like_terms {
            sql.push_str(
                " AND (title LIKE ? ESCAPE '\\' OR body LIKE ? ESCAPE '\\' \
                 OR permalink LIKE ? ESCAPE '\\')",
            );
        }

        let mut statement = sqlx::query(&sql);
        if let Some(account_id) = account_id {
            statement = statement.bind(account_id);
        }
        for tag in &query.account_types {
            statement = statement.bind(tag.as_str());
        }
        for tag in &query.content_types {
            statement = statement.bind(tag.as_str());
        }
        if let Some(after) = query.after {
            statement = statement.bind(after.timestamp_millis());
        }
        if let Some(before) = query.before {
            statement = statement.bind(before.timestamp_millis());
        }
        for pattern in &like_terms {
            statement = statement
                .bind(pattern.as_str())
                .bind(pattern.as_str())
                .bind(pattern.as_str());
        }

        let rows = statement.fetch_all(&self.pool).await?;
        let mut hits = Vec::new();
        for row in &rows {
            let mut result = result_from_row(row)?;
            if let Some(score) = match_score(query, &result) {
                result.cache_hit_score = score;
                hits.push(result);
            }
        }
        rank_hits(&mut hits, query.max_results);
        Ok(hits)
    }
}

/// `%term%` with LIKE wildcards in `term` escaped by `\`.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn result_from_row(row: &SqliteRow) -> Result<SearchResult> {
    let content_type: String = row.get("content_type");
    let status: String = row.get("status");
    let account_type: String = row.get("account_type");
    let labels_json: String = row.get("labels_json");
    let details_json: String = row.get("details_json");

    Ok(SearchResult {
        id: row.get("id"),
        account_id: row.get("account_id"),
        account_type: AccountType::new(account_type),
        original_id: row.get("original_id"),
        content_type: content_type.parse()?,
        title: row.get("title"),
        body: row.get("body"),
        permalink: row.get("permalink"),
        thumbnail: row.get("thumbnail"),
        timestamp: from_millis(row.get("timestamp")),
        status: status.parse()?,
        involves_me: row.get("involves_me"),
        unread: row.get("unread"),
        favorited: row.get("favorited"),
        labels: serde_json::from_str(&labels_json).context("Corrupt labels_json")?,
        details: serde_json::from_str::<ResultDetails>(&details_json)
            .context("Corrupt details_json")?,
        cached_at: from_millis(row.get("cached_at")),
        cache_hit_score: 0.0,
    })
}

/// `?, ?, ?` for `n` bind parameters.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn save(&self, result: SearchResult) -> Result<SearchResult> {
        let result = prepare_result(result, Utc::now())?;
        self.upsert(&result, false).await?;
        Ok(result)
    }

    async fn merge(&self, result: SearchResult) -> Result<SearchResult> {
        let mut result = prepare_result(result, Utc::now())?;
        result.favorited = self.upsert(&result, true).await?;
        Ok(result)
    }

    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>> {
        self.search_where(query, None).await
    }

    async fn search_account(&self, account_id: &str, query: &Query) -> Result<Vec<SearchResult>> {
        self.search_where(query, Some(account_id)).await
    }

    async fn get(&self, id: &str) -> Result<Option<SearchResult>> {
        let row = sqlx::query("SELECT * FROM results WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(result_from_row).transpose()
    }

    async fn find_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query("SELECT * FROM results WHERE cached_at < ? ORDER BY cached_at")
            .bind(cutoff.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(result_from_row).collect()
    }

    async fn delete_all_from_account(&self, account_id: &str) -> Result<u64> {
        let done = sqlx::query("DELETE FROM results WHERE account_id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM results WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Accounts
// ═══════════════════════════════════════════════════════════════════════

pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str) -> Result<Vec<AccountData>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(account_from_row).collect())
    }
}

fn account_from_row(row: &SqliteRow) -> AccountData {
    let account_type: String = row.get("account_type");
    AccountData {
        id: row.get("id"),
        external_id: row.get("external_id"),
        account_type: AccountType::new(account_type),
        token: row.get("token"),
        refresh_token: row.get("refresh_token"),
        token_type: row.get("token_type"),
        expiry: from_millis(row.get("expiry")),
        name: row.get("name"),
        email: row.get("email"),
        description: row.get("description"),
        active: row.get("active"),
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn all(&self) -> Result<Vec<AccountData>> {
        self.fetch("SELECT * FROM accounts ORDER BY id").await
    }

    async fn active(&self) -> Result<Vec<AccountData>> {
        self.fetch("SELECT * FROM accounts WHERE active = 1 ORDER BY id")
            .await
    }

    async fn save(&self, account: &mut AccountData) -> Result<()> {
        prepare_account(account)?;

        sqlx::query(
            r#"
            INSERT INTO accounts (id, external_id, account_type, token, refresh_token,
                                  token_type, expiry, name, email, description, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                external_id = excluded.external_id,
                account_type = excluded.account_type,
                token = excluded.token,
                refresh_token = excluded.refresh_token,
                token_type = excluded.token_type,
                expiry = excluded.expiry,
                name = excluded.name,
                email = excluded.email,
                description = excluded.description,
                active = excluded.active
            "#,
        )
        .bind(&account.id)
        .bind(&account.external_id)
        .bind(account.account_type.as_str())
        .bind(&account.token)
        .bind(&account.refresh_token)
        .bind(&account.token_type)
        .bind(to_millis(account.expiry))
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.description)
        .bind(account.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use chrono::TimeZone;
    use cloudsearch_core::{ContentType, ResultStatus};
    use tempfile::TempDir;

    async fn pool(dir: &TempDir) -> SqlitePool {
        let pool = db::connect_path(&dir.path().join("test.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn account(external_id: &str) -> AccountData {
        AccountData::new(AccountType::dropbox(), external_id, "Test")
    }

    #[tokio::test]
    async fn test_result_roundtrip_keeps_details() {
        let dir = TempDir::new().unwrap();
        let store = SqliteResultStore::new(pool(&dir).await);

        let mut result = SearchResult::new(&account("a"), "1", ContentType::Email, "Q3 budget");
        result.timestamp = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        result.labels = vec!["inbox".to_string()];
        result.details = ResultDetails::Message {
            sender: "jane@example.com".to_string(),
            recipients: vec!["me@example.com".to_string()],
            thread_id: Some("t1".to_string()),
        };

        let saved = store.save(result).await.unwrap();
        let loaded = store.get(&saved.id).await.unwrap().unwrap();
        // Stored at millisecond precision.
        assert_eq!(
            loaded.cached_at.map(|t| t.timestamp_millis()),
            saved.cached_at.map(|t| t.timestamp_millis())
        );
        let mut expected = saved.clone();
        expected.cached_at = loaded.cached_at;
        assert_eq!(loaded, expected);
        assert_eq!(loaded.status, ResultStatus::Found);
    }

    #[tokio::test]
    async fn test_merge_keeps_favorite() {
        let dir = TempDir::new().unwrap();
        let store = SqliteResultStore::new(pool(&dir).await);
        let acc = account("a");

        let mut first = SearchResult::new(&acc, "1", ContentType::File, "old title");
        first.favorited = true;
        store.save(first).await.unwrap();

        let merged = store
            .merge(SearchResult::new(&acc, "1", ContentType::File, "new title"))
            .await
            .unwrap();
        assert!(merged.favorited);
        let loaded = store.get(&merged.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "new title");
        assert!(loaded.favorited);
    }

    #[tokio::test]
    async fn test_search_scores_and_filters() {
        let dir = TempDir::new().unwrap();
        let store = SqliteResultStore::new(pool(&dir).await);
        let acc = account("a");

        let mut in_title = SearchResult::new(&acc, "1", ContentType::File, "budget.xls");
        in_title.timestamp = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut in_body = SearchResult::new(&acc, "2", ContentType::Document, "notes");
        in_body.body = "see the budget".to_string();
        in_body.timestamp = Some(Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap());
        store.save(in_title).await.unwrap();
        store.save(in_body).await.unwrap();
        store
            .save(SearchResult::new(&acc, "3", ContentType::File, "holiday.jpg"))
            .await
            .unwrap();

        let hits = store.search(&Query::new("budget", "1")).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].original_id, "1");
        assert!(hits[0].cache_hit_score > hits[1].cache_hit_score);

        let mut q = Query::new("budget", "1");
        q.after = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let hits = store.search(&q).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].original_id, "1");

        let mut q = Query::new("budget", "1");
        q.content_types = vec![ContentType::Document];
        let hits = store.search(&q).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].original_id, "2");

        let mut q = Query::new("budget", "1");
        q.max_results = 1;
        assert_eq!(store.search(&q).await.unwrap().len(), 1);

        assert!(store.search(&Query::new("", "1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_account_not_crowded_out() {
        let dir = TempDir::new().unwrap();
        let store = SqliteResultStore::new(pool(&dir).await);
        let quiet = account("quiet");
        let busy = account("busy");

        let mut weak = SearchResult::new(&quiet, "q", ContentType::File, "notes");
        weak.body = "budget draft".to_string();
        store.save(weak).await.unwrap();
        for i in 0..5 {
            store
                .save(SearchResult::new(&busy, format!("b{}", i), ContentType::File, "Budget"))
                .await
                .unwrap();
        }

        let mut q = Query::new("budget", "1");
        q.max_results = 5;
        let global = store.search(&q).await.unwrap();
        assert!(global.iter().all(|r| r.account_id == busy.id));

        let scoped = store.search_account(&quiet.id, &q).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].original_id, "q");
    }

    #[tokio::test]
    async fn test_search_treats_like_wildcards_literally() {
        let dir = TempDir::new().unwrap();
        let store = SqliteResultStore::new(pool(&dir).await);
        let acc = account("a");
        store
            .save(SearchResult::new(&acc, "1", ContentType::File, "growth 100%"))
            .await
            .unwrap();
        store
            .save(SearchResult::new(&acc, "2", ContentType::File, "growth 1000"))
            .await
            .unwrap();

        let hits = store.search(&Query::new("100%", "1")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].original_id, "1");
    }

    #[tokio::test]
    async fn test_merge_never_clears_favorite_and_save_does() {
        let dir = TempDir::new().unwrap();
        let store = SqliteResultStore::new(pool(&dir).await);
        let acc = account("a");

        let fresh = store
            .merge(SearchResult::new(&acc, "1", ContentType::File, "first"))
            .await
            .unwrap();
        assert!(!fresh.favorited);

        let mut starred = SearchResult::new(&acc, "1", ContentType::File, "starred");
        starred.favorited = true;
        assert!(store.merge(starred).await.unwrap().favorited);
        assert!(store
            .merge(SearchResult::new(&acc, "1", ContentType::File, "again"))
            .await
            .unwrap()
            .favorited);

        store
            .save(SearchResult::new(&acc, "1", ContentType::File, "reset"))
            .await
            .unwrap();
        assert!(!store.get(&fresh.id).await.unwrap().unwrap().favorited);
    }

    #[tokio::test]
    async fn test_delete_and_purge() {
        let dir = TempDir::new().unwrap();
        let store = SqliteResultStore::new(pool(&dir).await);
        let a = account("a");
        let b = account("b");

        let first = store
            .save(SearchResult::new(&a, "1", ContentType::File, "x"))
            .await
            .unwrap();
        store
            .save(SearchResult::new(&a, "2", ContentType::File, "y"))
            .await
            .unwrap();
        let other = store
            .save(SearchResult::new(&b, "1", ContentType::File, "z"))
            .await
            .unwrap();

        store.delete(&first.id).await.unwrap();
        assert!(store.get(&first.id).await.unwrap().is_none());
        assert_eq!(store.delete_all_from_account(&a.id).await.unwrap(), 1);
        assert!(store.get(&other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_older_than() {
        let dir = TempDir::new().unwrap();
        let store = SqliteResultStore::new(pool(&dir).await);
        let saved = store
            .save(SearchResult::new(&account("a"), "1", ContentType::File, "x"))
            .await
            .unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(store.find_older_than(past).await.unwrap().is_empty());
        let future = Utc::now() + chrono::Duration::hours(1);
        let old = store.find_older_than(future).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].id, saved.id);
    }

    #[tokio::test]
    async fn test_account_store() {
        let dir = TempDir::new().unwrap();
        let store = SqliteAccountStore::new(pool(&dir).await);

        let mut active = account("a");
        active.id.clear();
        active.refresh_token = Some("r".to_string());
        active.expiry = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        store.save(&mut active).await.unwrap();
        assert!(!active.id.is_empty());

        let mut inactive = account("b");
        inactive.active = false;
        store.save(&mut inactive).await.unwrap();

        assert_eq!(store.all().await.unwrap().len(), 2);
        let listed = store.active().await.unwrap();
        assert_eq!(listed, vec![active.clone()]);

        active.token = "rotated".to_string();
        store.save(&mut active).await.unwrap();
        assert_eq!(store.all().await.unwrap().len(), 2);

        store.delete(&inactive.id).await.unwrap();
        assert_eq!(store.all().await.unwrap().len(), 1);

        let mut invalid = AccountData::default();
        assert!(store.save(&mut invalid).await.is_err());
    }
}
