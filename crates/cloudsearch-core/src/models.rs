//! Core data models used throughout Cloudsearch.
//!
//! These types represent the linked accounts, the content found in them,
//! and the classification tags the query language filters on.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Tag identifying a kind of linked account (e.g. `"Dropbox"`, `"Google"`).
///
/// Account types are an open set: any tag registered with the registry is
/// valid, so this is a string newtype rather than an enum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountType(String);

impl AccountType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn dropbox() -> Self {
        Self::new("Dropbox")
    }

    pub fn google() -> Self {
        Self::new("Google")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Classification tag for a piece of content.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ContentType {
    Application,
    Calendar,
    Contact,
    Document,
    Email,
    Event,
    #[default]
    File,
    Folder,
    Image,
    Message,
    Post,
    Task,
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "svg"];
const VIDEO_EXTENSIONS: &[&str] = &["mpg", "mkv", "avi", "mp4"];

impl ContentType {
    pub const ALL: [ContentType; 13] = [
        ContentType::Application,
        ContentType::Calendar,
        ContentType::Contact,
        ContentType::Document,
        ContentType::Email,
        ContentType::Event,
        ContentType::File,
        ContentType::Folder,
        ContentType::Image,
        ContentType::Message,
        ContentType::Post,
        ContentType::Task,
        ContentType::Video,
    ];

    /// Content types produced by file-storage services.
    pub const FILE_TYPES: [ContentType; 5] = [
        ContentType::Image,
        ContentType::Video,
        ContentType::Folder,
        ContentType::Document,
        ContentType::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Application => "Application",
            ContentType::Calendar => "Calendar",
            ContentType::Contact => "Contact",
            ContentType::Document => "Document",
            ContentType::Email => "Email",
            ContentType::Event => "Event",
            ContentType::File => "File",
            ContentType::Folder => "Folder",
            ContentType::Image => "Image",
            ContentType::Message => "Message",
            ContentType::Post => "Post",
            ContentType::Task => "Task",
            ContentType::Video => "Video",
        }
    }

    /// Classify a file-like item: mime type first, then extension.
    pub fn kind_for(is_dir: bool, mime_type: &str, extension: &str) -> ContentType {
        if is_dir {
            return ContentType::Folder;
        }
        if !mime_type.is_empty() {
            if mime_type.contains("image") || mime_type.contains("drawing") {
                return ContentType::Image;
            } else if mime_type.contains("video") {
                return ContentType::Video;
            } else if mime_type.contains("folder") {
                return ContentType::Folder;
            } else if mime_type.contains("document") {
                return ContentType::Document;
            }
        }

        let ext = extension.trim_start_matches('.').to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            ContentType::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            ContentType::Video
        } else {
            ContentType::File
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = anyhow::Error;

    /// Case-insensitive: `"file"`, `"File"` and `"FILE"` all parse.
    fn from_str(s: &str) -> Result<Self> {
        ContentType::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| anyhow!("Unsupported content type: {}", s))
    }
}

/// Outcome a source reports for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultStatus {
    #[default]
    Found,
    /// A previously cached item no longer exists upstream.
    NotFound,
    /// The source failed; the message is carried in the result title.
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Found => "found",
            ResultStatus::NotFound => "not_found",
            ResultStatus::Error => "error",
        }
    }
}

impl FromStr for ResultStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "found" => Ok(ResultStatus::Found),
            "not_found" => Ok(ResultStatus::NotFound),
            "error" => Ok(ResultStatus::Error),
            other => Err(anyhow!("Unknown result status: {}", other)),
        }
    }
}

/// Content-type specific payload of a result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultDetails {
    #[default]
    None,
    File {
        path: String,
        size_bytes: i64,
    },
    Message {
        sender: String,
        recipients: Vec<String>,
        thread_id: Option<String>,
    },
}

/// One piece of content found by a source or reconstructed from the cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResult {
    /// Content-addressed id; empty until [`ensure_id`](SearchResult::ensure_id) runs.
    pub id: String,
    pub account_id: String,
    pub account_type: AccountType,
    /// Identifier of the item inside its provider.
    pub original_id: String,
    pub content_type: ContentType,
    pub title: String,
    pub body: String,
    pub permalink: String,
    pub thumbnail: String,
    /// The content's own modification time. `None` for content without one (contacts).
    pub timestamp: Option<DateTime<Utc>>,
    pub status: ResultStatus,
    pub involves_me: bool,
    pub unread: bool,
    pub favorited: bool,
    pub labels: Vec<String>,
    pub details: ResultDetails,
    pub cached_at: Option<DateTime<Utc>>,
    /// Relevance assigned by a cache lookup. Never persisted.
    #[serde(skip)]
    pub cache_hit_score: f64,
}

impl SearchResult {
    /// A found item belonging to `account`.
    pub fn new(
        account: &AccountData,
        original_id: impl Into<String>,
        content_type: ContentType,
        title: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account.id.clone(),
            account_type: account.account_type.clone(),
            original_id: original_id.into(),
            content_type,
            title: title.into(),
            ..Default::default()
        }
    }

    /// A marker telling the cache that an item is gone upstream.
    pub fn not_found(
        account: &AccountData,
        original_id: impl Into<String>,
        content_type: ContentType,
    ) -> Self {
        Self {
            status: ResultStatus::NotFound,
            ..Self::new(account, original_id, content_type, "")
        }
    }

    /// A source failure surfaced in-band.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            title: message.into(),
            status: ResultStatus::Error,
            ..Default::default()
        }
    }

    /// Assign the content-addressed id if it is still unset. Idempotent.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = content_id(&self.account_id, &self.original_id, self.content_type);
        }
    }

    /// Heuristic ordering weight: newer content first, upcoming events
    /// boosted, contacts doubled, folders demoted.
    pub fn relevance(&self, now: DateTime<Utc>) -> i64 {
        let base = self.timestamp.map(|t| t.timestamp() / 100_000).unwrap_or(0);
        match self.content_type {
            ContentType::Event => match self.timestamp {
                Some(ts) if ts > now => {
                    if ts < now + Duration::days(2) {
                        base * 10
                    } else if ts < now + Duration::days(5) {
                        base * 2
                    } else {
                        base / 5
                    }
                }
                _ => base / 100,
            },
            ContentType::Contact => base * 2,
            ContentType::Folder => base / 100,
            _ => base,
        }
    }
}

/// A linked external account: credentials plus identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountData {
    /// Content-addressed id, see [`account_id`].
    pub id: String,
    pub external_id: String,
    pub account_type: AccountType,
    pub token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expiry: Option<DateTime<Utc>>,
    pub name: String,
    pub email: String,
    pub description: String,
    pub active: bool,
}

impl AccountData {
    pub fn new(
        account_type: AccountType,
        external_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut account = Self {
            external_id: external_id.into(),
            account_type,
            name: name.into(),
            active: true,
            ..Default::default()
        };
        account.assign_id();
        account
    }

    /// Recompute the id from type and external id.
    ///
    /// Re-linking the same external identity always lands on the same id.
    pub fn assign_id(&mut self) {
        self.id = account_id(&self.account_type, &self.external_id);
    }

    /// Whether the credentials expire within `lookahead` of `now`.
    pub fn should_reauth(&self, now: DateTime<Utc>, lookahead: Duration) -> bool {
        self.expiry.is_some_and(|expiry| expiry < now + lookahead)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl fmt::Display for AccountData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.id, self.account_type)
    }
}

/// Content-addressed result id: `sha256("{account}_{original}_{type}")`.
pub fn content_id(account_id: &str, original_id: &str, content_type: ContentType) -> String {
    hex_digest(&format!("{}_{}_{}", account_id, original_id, content_type))
}

/// Content-addressed account id: `sha256("{type}_{external}")`.
pub fn account_id(account_type: &AccountType, external_id: &str) -> String {
    hex_digest(&format!("{}_{}", account_type, external_id))
}

fn hex_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn account() -> AccountData {
        AccountData::new(AccountType::dropbox(), "ext-1", "Jane")
    }

    #[test]
    fn test_content_id_is_deterministic() {
        let acc = account();
        let mut a = SearchResult::new(&acc, "file-9", ContentType::Document, "a.doc");
        let mut b = SearchResult::new(&acc, "file-9", ContentType::Document, "renamed.doc");
        a.ensure_id();
        b.ensure_id();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 64);

        let mut c = SearchResult::new(&acc, "file-9", ContentType::Image, "a.doc");
        c.ensure_id();
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_ensure_id_keeps_existing() {
        let mut r = SearchResult {
            id: "preset".to_string(),
            ..Default::default()
        };
        r.ensure_id();
        assert_eq!(r.id, "preset");
    }

    #[test]
    fn test_account_id_stable_across_relinks() {
        let first = AccountData::new(AccountType::google(), "user@example.com", "Work");
        let mut relinked = AccountData {
            token: "new-token".to_string(),
            name: "Work (again)".to_string(),
            account_type: AccountType::google(),
            external_id: "user@example.com".to_string(),
            ..Default::default()
        };
        relinked.assign_id();
        assert_eq!(first.id, relinked.id);

        let other_type = AccountData::new(AccountType::dropbox(), "user@example.com", "Work");
        assert_ne!(first.id, other_type.id);
    }

    #[test]
    fn test_should_reauth_window() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut acc = account();
        assert!(!acc.should_reauth(now, Duration::minutes(30)));

        acc.expiry = Some(now + Duration::minutes(10));
        assert!(acc.should_reauth(now, Duration::minutes(30)));

        acc.expiry = Some(now + Duration::hours(2));
        assert!(!acc.should_reauth(now, Duration::minutes(30)));
    }

    #[test]
    fn test_kind_for() {
        assert_eq!(ContentType::kind_for(true, "", "png"), ContentType::Folder);
        assert_eq!(ContentType::kind_for(false, "image/png", ""), ContentType::Image);
        assert_eq!(
            ContentType::kind_for(false, "application/vnd.google-apps.document", ""),
            ContentType::Document
        );
        assert_eq!(ContentType::kind_for(false, "", ".MP4"), ContentType::Video);
        assert_eq!(ContentType::kind_for(false, "", "rs"), ContentType::File);
    }

    #[test]
    fn test_content_type_parse_is_case_insensitive() {
        assert_eq!("email".parse::<ContentType>().unwrap(), ContentType::Email);
        assert_eq!("FOLDER".parse::<ContentType>().unwrap(), ContentType::Folder);
        assert!("spreadsheet".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_relevance_boosts_upcoming_events() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let soon = SearchResult {
            content_type: ContentType::Event,
            timestamp: Some(now + Duration::days(1)),
            ..Default::default()
        };
        let past = SearchResult {
            content_type: ContentType::Event,
            timestamp: Some(now - Duration::days(1)),
            ..Default::default()
        };
        assert!(soon.relevance(now) > past.relevance(now));

        let folder = SearchResult {
            content_type: ContentType::Folder,
            timestamp: Some(now),
            ..Default::default()
        };
        let doc = SearchResult {
            content_type: ContentType::Document,
            timestamp: Some(now),
            ..Default::default()
        };
        assert!(doc.relevance(now) > folder.relevance(now));
    }
}
