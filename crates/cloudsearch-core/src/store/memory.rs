//! In-memory store implementations for tests and embedding.
//!
//! Uses `HashMap`/`BTreeMap` behind `std::sync::RwLock`. Cache search is a
//! linear scan scored with [`match_score`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AccountData, SearchResult};
use crate::query::Query;

use super::{
    match_score, prepare_account, prepare_result, rank_hits, AccountStore, ResultStore,
};

/// In-memory result cache.
pub struct InMemoryResultStore {
    results: RwLock<HashMap<String, SearchResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scan(&self, query: &Query, account_id: Option<&str>) -> Vec<SearchResult> {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<SearchResult> = results
            .values()
            .filter(|r| account_id.map_or(true, |id| r.account_id == id))
            .filter_map(|r| {
                match_score(query, r).map(|score| {
                    let mut hit = r.clone();
                    hit.cache_hit_score = score;
                    hit
                })
            })
            .collect();
        rank_hits(&mut hits, query.max_results);
        hits
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save(&self, result: SearchResult) -> Result<SearchResult> {
        let result = prepare_result(result, Utc::now())?;
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(result.id.clone(), result.clone());
        Ok(result)
    }

    async fn merge(&self, result: SearchResult) -> Result<SearchResult> {
        let mut result = prepare_result(result, Utc::now())?;
        let mut results = self.results.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = results.get(&result.id) {
            result.favorited = result.favorited || existing.favorited;
        }
        results.insert(result.id.clone(), result.clone());
        Ok(result)
    }

    async fn search(&self, query: &Query) -> Result<Vec<SearchResult>> {
        Ok(self.scan(query, None))
    }

    async fn search_account(&self, account_id: &str, query: &Query) -> Result<Vec<SearchResult>> {
        Ok(self.scan(query, Some(account_id)))
    }

    async fn get(&self, id: &str) -> Result<Option<SearchResult>> {
        Ok(self
            .results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn find_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<SearchResult>> {
        Ok(self
            .results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.cached_at.is_some_and(|at| at < cutoff))
            .cloned()
            .collect())
    }

    async fn delete_all_from_account(&self, account_id: &str) -> Result<u64> {
        let mut results = self.results.write().unwrap_or_else(PoisonError::into_inner);
        let before = results.len();
        results.retain(|_, r| r.account_id != account_id);
        Ok((before - results.len()) as u64)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }
}

/// In-memory account store, ordered by id.
pub struct InMemoryAccountStore {
    accounts: RwLock<BTreeMap<String, AccountData>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Store pre-seeded with `accounts`. Accounts that fail validation are skipped.
    pub fn with_accounts(accounts: impl IntoIterator<Item = AccountData>) -> Self {
        let store = Self::new();
        {
            let mut map = store.accounts.write().unwrap_or_else(PoisonError::into_inner);
            for mut account in accounts {
                if prepare_account(&mut account).is_ok() {
                    map.insert(account.id.clone(), account);
                }
            }
        }
        store
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn all(&self) -> Result<Vec<AccountData>> {
        Ok(self
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn active(&self) -> Result<Vec<AccountData>> {
        Ok(self
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|a| a.active)
            .cloned()
            .collect())
    }

    async fn save(&self, account: &mut AccountData) -> Result<()> {
        prepare_account(account)?;
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }
}
