//! Query DSL: free text plus inline `key:value` tokens.
//!
//! ```text
//! type:File quarterly report service:dropbox before:2017-01-31 mode:cache
//! └───┬───┘ └──────┬───────┘ └──────┬──────┘ └────────┬───────┘ └───┬────┘
//!  content     residual text     account type      time bound      search mode
//! ```
//!
//! Recognized keys are `service`, `type`, `mode`, `before` and `after`.
//! `service` and `type` also accept the bracketed form `@[service:google]`.
//! Parsing never fails: unknown values are dropped, and a date token that
//! cannot be parsed is left in the residual text.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{AccountType, ContentType};

/// Default cap on results per query.
pub const DEFAULT_MAX_RESULTS: usize = 100;

/// Whether a query consults the local cache, the live providers, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchMode {
    #[default]
    All,
    Live,
    Cache,
}

impl SearchMode {
    pub const ALL_MODES: [SearchMode; 3] = [SearchMode::All, SearchMode::Live, SearchMode::Cache];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::All => "all",
            SearchMode::Live => "live",
            SearchMode::Cache => "cache",
        }
    }

    pub fn includes_cache(&self) -> bool {
        matches!(self, SearchMode::All | SearchMode::Cache)
    }

    pub fn includes_live(&self) -> bool {
        matches!(self, SearchMode::All | SearchMode::Live)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        SearchMode::ALL_MODES
            .iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| anyhow!("Unknown search mode: {}", s))
    }
}

/// Resolves raw token values to the tags known to the running system.
///
/// Implemented by the account-type registry; resolution is
/// case-insensitive and returns the canonical tag.
pub trait TypeCatalog {
    fn resolve_account_type(&self, raw: &str) -> Option<AccountType>;
    fn resolve_content_type(&self, raw: &str) -> Option<ContentType>;
}

/// A fixed catalog, handy when no registry is around.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    pub account_types: Vec<AccountType>,
    pub content_types: Vec<ContentType>,
}

impl TypeCatalog for StaticCatalog {
    fn resolve_account_type(&self, raw: &str) -> Option<AccountType> {
        self.account_types
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(raw))
            .cloned()
    }

    fn resolve_content_type(&self, raw: &str) -> Option<ContentType> {
        let parsed = raw.parse::<ContentType>().ok()?;
        self.content_types.contains(&parsed).then_some(parsed)
    }
}

/// A structured search request. Built once, then shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub raw_text: String,
    /// Free text left after stripping recognized tokens, whitespace-collapsed.
    pub text: String,
    pub mode: SearchMode,
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    /// Empty means any account type.
    pub account_types: Vec<AccountType>,
    /// Empty means any content type.
    pub content_types: Vec<ContentType>,
    pub max_results: usize,
    /// Correlation id for logs; unique per request.
    pub search_id: String,
}

static SERVICE_BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\[service:(\w+)\]").expect("valid regex"));
static SERVICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bservice:(\w+)").expect("valid regex"));
static TYPE_BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\[type:(\w+)\]").expect("valid regex"));
static TYPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\btype:(\w+)").expect("valid regex"));
static MODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bmode:(\w+)").expect("valid regex"));
static BEFORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bbefore:([-/0-9]+)").expect("valid regex"));
static AFTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bafter:([-/0-9]+)").expect("valid regex"));

impl Query {
    /// A plain free-text query with default settings and no tokens parsed.
    pub fn new(text: impl Into<String>, search_id: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw_text: text.clone(),
            text,
            mode: SearchMode::All,
            before: None,
            after: None,
            account_types: Vec::new(),
            content_types: Vec::new(),
            max_results: DEFAULT_MAX_RESULTS,
            search_id: search_id.into(),
        }
    }

    /// Parse free-text search input into a structured query.
    pub fn parse(raw: &str, search_id: impl Into<String>, catalog: &dyn TypeCatalog) -> Self {
        let mut stripped = raw.to_string();

        let mut account_types = Vec::new();
        for regex in [&*SERVICE_BRACKETED, &*SERVICE] {
            for value in take_values(regex, &mut stripped) {
                if let Some(tag) = catalog.resolve_account_type(&value) {
                    push_unique(&mut account_types, tag);
                }
            }
        }

        let mut content_types = Vec::new();
        for regex in [&*TYPE_BRACKETED, &*TYPE] {
            for value in take_values(regex, &mut stripped) {
                if let Some(tag) = catalog.resolve_content_type(&value) {
                    push_unique(&mut content_types, tag);
                }
            }
        }

        let mode = take_values(&MODE, &mut stripped)
            .iter()
            .find_map(|v| v.parse::<SearchMode>().ok())
            .unwrap_or_default();

        let before = take_date(&BEFORE, &mut stripped);
        let after = take_date(&AFTER, &mut stripped);

        Self {
            raw_text: raw.to_string(),
            text: collapse_whitespace(&stripped),
            mode,
            before,
            after,
            account_types,
            content_types,
            max_results: DEFAULT_MAX_RESULTS,
            search_id: search_id.into(),
        }
    }

    /// Whether a source of `account_type` producing `content_types` can
    /// contribute anything to this query.
    pub fn can_handle(&self, account_type: &AccountType, content_types: &[ContentType]) -> bool {
        (self.account_types.is_empty() || self.account_types.contains(account_type))
            && (self.content_types.is_empty()
                || self.content_types.iter().any(|c| content_types.contains(c)))
    }

    /// Lowercased residual terms.
    pub fn terms(&self) -> Vec<String> {
        self.text
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect()
    }
}

/// Collect every captured value of `regex` and strip all matches.
fn take_values(regex: &Regex, text: &mut String) -> Vec<String> {
    let values = regex
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect::<Vec<_>>();
    if !values.is_empty() {
        let replaced = regex.replace_all(text, " ").into_owned();
        *text = replaced;
    }
    values
}

/// Parse the first date token; strip the tokens only if it parsed.
fn take_date(regex: &Regex, text: &mut String) -> Option<DateTime<Utc>> {
    let raw = regex.captures(text).map(|c| c[1].to_string())?;
    let parsed = parse_date(&raw)?;
    let replaced = regex.replace_all(text, " ").into_owned();
    *text = replaced;
    Some(parsed)
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%m-%d-%Y"];

/// Permissive date parsing: common separated layouts, compact `YYYYMMDD`,
/// and unix timestamps in seconds or milliseconds. Midnight UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        return match raw.len() {
            8 => {
                let year = raw[0..4].parse().ok()?;
                let month = raw[4..6].parse().ok()?;
                let day = raw[6..8].parse().ok()?;
                NaiveDate::from_ymd_opt(year, month, day).map(midnight_utc)
            }
            10 => Utc.timestamp_opt(raw.parse().ok()?, 0).single(),
            13 => Utc.timestamp_millis_opt(raw.parse().ok()?).single(),
            _ => None,
        };
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(midnight_utc)
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}
