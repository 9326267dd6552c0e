//! Local-folder connector.
//!
//! A `Local` account points at a directory (its `external_id` is the root
//! path). Searching walks the tree and reports every file or folder whose
//! relative path, or whose text for small readable files, contains all
//! query terms.
//!
//! Local folders have no credentials, so the identity service is
//! [`StaticIdentity`] and the token watcher leaves these accounts alone.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use cloudsearch_core::{AccountData, AccountType, ContentType, Query, ResultDetails, SearchResult};

use crate::auth::{IdentityService, StaticIdentity};
use crate::config::LocalConfig;
use crate::registry::{AuthBuilder, SearchBuilder};
use crate::searchable::{BatchSearch, BatchSearchable, Searchable};

pub const LOCAL_ACCOUNT_TYPE: &str = "Local";

/// Longest body excerpt attached to a text match.
const SNIPPET_CHARS: usize = 160;

pub fn local_account_type() -> AccountType {
    AccountType::new(LOCAL_ACCOUNT_TYPE)
}

/// A new `Local` account for the directory at `root`.
pub fn local_account(root: &Path, name: &str) -> Result<AccountData> {
    if !root.is_dir() {
        bail!("Not a directory: {}", root.display());
    }
    let root = root.canonicalize()?;
    let mut account = AccountData::new(local_account_type(), root.to_string_lossy(), name);
    account.description = format!("Local folder {}", root.display());
    Ok(account)
}

/// Search builder for `Local` accounts.
pub fn search_builder(config: LocalConfig) -> impl SearchBuilder {
    move |account: &AccountData| -> Result<Vec<Arc<dyn Searchable>>> {
        let root = PathBuf::from(&account.external_id);
        if !root.is_dir() {
            bail!("Local folder does not exist: {}", root.display());
        }
        let folder = LocalFolder::new(account.clone(), root, &config)?;
        let source: Arc<dyn Searchable> =
            Arc::new(BatchSearchable::new(format!("local:{}", account.name), folder));
        Ok(vec![source])
    }
}

pub fn auth_builder() -> impl AuthBuilder {
    |_tag: &AccountType| -> Result<Arc<dyn IdentityService>> { Ok(Arc::new(StaticIdentity)) }
}

#[derive(Clone)]
pub struct LocalFolder {
    account: AccountData,
    root: PathBuf,
    excludes: GlobSet,
    follow_symlinks: bool,
    max_text_bytes: u64,
}

impl LocalFolder {
    pub fn new(account: AccountData, root: PathBuf, config: &LocalConfig) -> Result<Self> {
        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.clone());

        Ok(Self {
            account,
            root,
            excludes: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
            max_text_bytes: config.max_text_bytes,
        })
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    /// Excluded directories are pruned whole, not walked.
    fn is_excluded(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let rel = self.relative(entry.path());
        self.excludes.is_match(&rel)
            || (entry.file_type().is_dir() && self.excludes.is_match(format!("{}/", rel)))
    }

    /// Every readable entry below the root, excluded subtrees skipped.
    fn entries(&self) -> impl Iterator<Item = DirEntry> + '_ {
        WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry))
            .filter_map(|entry| entry.ok())
    }

    fn scan(&self, query: &Query, ctx: &CancellationToken) -> Result<Vec<SearchResult>> {
        if !self.root.is_dir() {
            bail!("Local folder does not exist: {}", self.root.display());
        }
        let terms = query.terms();
        let mut results = Vec::new();

        for entry in self.entries() {
            if ctx.is_cancelled() || results.len() >= query.max_results {
                break;
            }

            let path = entry.path();
            let rel_str = self.relative(path);
            let is_dir = entry.file_type().is_dir();
            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            let content_type = ContentType::kind_for(is_dir, "", &extension);
            if !query.content_types.is_empty() && !query.content_types.contains(&content_type) {
                continue;
            }

            let Ok(metadata) = entry.metadata() else { continue };
            let lowered_path = rel_str.to_lowercase();
            let snippet = if terms.iter().all(|t| lowered_path.contains(t.as_str())) {
                String::new()
            } else if !is_dir && metadata.len() <= self.max_text_bytes {
                match text_snippet(path, &terms) {
                    Some(snippet) => snippet,
                    None => continue,
                }
            } else {
                continue;
            };

            let mut result =
                SearchResult::new(&self.account, rel_str.clone(), content_type, file_name(path));
            result.body = snippet;
            result.permalink = format!("file://{}", path.display());
            result.timestamp = metadata.modified().ok().map(DateTime::<Utc>::from);
            result.details = ResultDetails::File {
                path: rel_str,
                size_bytes: metadata.len() as i64,
            };
            results.push(result);
        }

        Ok(results)
    }
}

#[async_trait]
impl BatchSearch for LocalFolder {
    async fn search_batch(&self, query: &Query, ctx: &CancellationToken) -> Result<Vec<SearchResult>> {
        if !query.can_handle(&self.account.account_type, &ContentType::FILE_TYPES) {
            return Ok(Vec::new());
        }

        let folder = self.clone();
        let query = query.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || folder.scan(&query, &ctx)).await?
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// The line holding the first term, if the file is text and contains
/// every term.
fn text_snippet(path: &Path, terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    let text = std::fs::read_to_string(path).ok()?;
    let lowered = text.to_lowercase();
    if !terms.iter().all(|t| lowered.contains(t.as_str())) {
        return None;
    }
    let line = text
        .lines()
        .find(|l| l.to_lowercase().contains(terms[0].as_str()))
        .unwrap_or_default()
        .trim();
    Some(line.chars().take(SNIPPET_CHARS).collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
