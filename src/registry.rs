//! Account type registry: strategy dispatch per account type tag.
//!
//! Each registered tag maps to a [`SearchBuilder`], which turns a linked
//! account into its search sources, and optionally an [`AuthBuilder`],
//! which produces the identity service used to refresh that account's
//! credentials.
//!
//! The registry is filled once at startup through `&mut self` methods and
//! then shared read-only behind an `Arc`, so lookups never lock.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use cloudsearch::auth::StaticIdentity;
//! use cloudsearch::registry::Registry;
//! use cloudsearch::searchable::{NoopSearchable, Searchable};
//! use cloudsearch_core::{AccountData, AccountType, ContentType};
//!
//! let mut registry = Registry::new();
//! registry.register_account_type(
//!     AccountType::dropbox(),
//!     |_account: &AccountData| -> anyhow::Result<Vec<Arc<dyn Searchable>>> {
//!         Ok(vec![Arc::new(NoopSearchable::new("dropbox"))])
//!     },
//!     |_tag: &AccountType| -> anyhow::Result<Arc<dyn cloudsearch::auth::IdentityService>> {
//!         Ok(Arc::new(StaticIdentity))
//!     },
//! );
//! registry.register_content_types([ContentType::File, ContentType::Folder]);
//! assert!(registry.is_account_type_supported(&AccountType::dropbox()));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cloudsearch_core::{AccountData, AccountType, ContentType, Query, TypeCatalog};

use crate::auth::IdentityService;
use crate::error::{Result, SearchError};
use crate::searchable::Searchable;

// ═══════════════════════════════════════════════════════════════════════
// Builder Traits
// ═══════════════════════════════════════════════════════════════════════

/// Builds the search sources for one account.
///
/// One account may yield several sources (mail and documents of the same
/// provider login, for instance).
pub trait SearchBuilder: Send + Sync {
    fn build_search(&self, account: &AccountData) -> anyhow::Result<Vec<Arc<dyn Searchable>>>;
}

impl<F> SearchBuilder for F
where
    F: Fn(&AccountData) -> anyhow::Result<Vec<Arc<dyn Searchable>>> + Send + Sync,
{
    fn build_search(&self, account: &AccountData) -> anyhow::Result<Vec<Arc<dyn Searchable>>> {
        self(account)
    }
}

/// Builds the identity service for an account type.
pub trait AuthBuilder: Send + Sync {
    fn build_auth(&self, account_type: &AccountType) -> anyhow::Result<Arc<dyn IdentityService>>;
}

impl<F> AuthBuilder for F
where
    F: Fn(&AccountType) -> anyhow::Result<Arc<dyn IdentityService>> + Send + Sync,
{
    fn build_auth(&self, account_type: &AccountType) -> anyhow::Result<Arc<dyn IdentityService>> {
        self(account_type)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

struct RegistryEntry {
    search: Arc<dyn SearchBuilder>,
    auth: Option<Arc<dyn AuthBuilder>>,
}

#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<AccountType, RegistryEntry>,
    content_types: BTreeSet<ContentType>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register both builders for `tag`. A later registration for the
    /// same tag replaces the earlier one.
    pub fn register_account_type(
        &mut self,
        tag: AccountType,
        search: impl SearchBuilder + 'static,
        auth: impl AuthBuilder + 'static,
    ) {
        self.entries.insert(
            tag,
            RegistryEntry {
                search: Arc::new(search),
                auth: Some(Arc::new(auth)),
            },
        );
    }

    /// Register a tag whose accounts have no credentials to refresh.
    pub fn register_search_only(&mut self, tag: AccountType, search: impl SearchBuilder + 'static) {
        self.entries.insert(
            tag,
            RegistryEntry {
                search: Arc::new(search),
                auth: None,
            },
        );
    }

    pub fn register_content_types(&mut self, tags: impl IntoIterator<Item = ContentType>) {
        self.content_types.extend(tags);
    }

    /// Build the search sources for `account`.
    ///
    /// Fails with [`SearchError::UnsupportedType`] for an unregistered tag
    /// and [`SearchError::SourceDegraded`] when the builder itself fails.
    pub fn search_builder_for(&self, account: &AccountData) -> Result<Vec<Arc<dyn Searchable>>> {
        let entry = self.entry(&account.account_type)?;
        entry
            .search
            .build_search(account)
            .map_err(|err| SearchError::degraded(account.to_string(), err))
    }

    /// Build the identity service for `account_type`.
    pub fn auth_builder_for(&self, account_type: &AccountType) -> Result<Arc<dyn IdentityService>> {
        let entry = self.entry(account_type)?;
        let auth = entry
            .auth
            .as_ref()
            .ok_or_else(|| SearchError::BuilderMissing(account_type.clone()))?;
        auth.build_auth(account_type)
            .map_err(|err| SearchError::degraded(account_type.to_string(), err))
    }

    /// Resolve a user-supplied name (case-insensitive) to a registered tag.
    pub fn parse_account_type(&self, name: &str) -> Result<AccountType> {
        self.resolve_account_type(name)
            .ok_or_else(|| SearchError::UnsupportedType(name.to_string()))
    }

    pub fn supported_account_type_names(&self) -> Vec<String> {
        self.entries.keys().map(|t| t.to_string()).collect()
    }

    pub fn supported_content_type_names(&self) -> Vec<String> {
        self.content_types.iter().map(|c| c.to_string()).collect()
    }

    pub fn supported_content_types(&self) -> Vec<ContentType> {
        self.content_types.iter().copied().collect()
    }

    pub fn is_account_type_supported(&self, tag: &AccountType) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, tag: &AccountType) -> Result<&RegistryEntry> {
        self.entries
            .get(tag)
            .ok_or_else(|| SearchError::UnsupportedType(tag.to_string()))
    }
}

impl TypeCatalog for Registry {
    fn resolve_account_type(&self, raw: &str) -> Option<AccountType> {
        self.entries
            .keys()
            .find(|t| t.as_str().eq_ignore_ascii_case(raw))
            .cloned()
    }

    fn resolve_content_type(&self, raw: &str) -> Option<ContentType> {
        let parsed = raw.parse::<ContentType>().ok()?;
        self.content_types.contains(&parsed).then_some(parsed)
    }
}

/// Parse free-text input against the account and content types of `registry`.
pub fn parse_query(text: &str, search_id: impl Into<String>, registry: &Registry) -> Query {
    Query::parse(text, search_id, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticIdentity;
    use crate::searchable::NoopSearchable;

    fn noop_search(label: &'static str) -> impl SearchBuilder {
        move |_account: &AccountData| -> anyhow::Result<Vec<Arc<dyn Searchable>>> {
            Ok(vec![Arc::new(NoopSearchable::new(label))])
        }
    }

    fn static_auth(_tag: &AccountType) -> anyhow::Result<Arc<dyn IdentityService>> {
        Ok(Arc::new(StaticIdentity))
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_account_type(AccountType::dropbox(), noop_search("dropbox"), static_auth);
        registry.register_account_type(AccountType::google(), noop_search("gmail"), static_auth);
        registry.register_content_types([ContentType::File, ContentType::Email]);
        registry
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = registry();
        registry.register_account_type(AccountType::dropbox(), noop_search("second"), static_auth);
        assert_eq!(registry.len(), 2);

        let account = AccountData::new(AccountType::dropbox(), "ext", "Test");
        let sources = registry.search_builder_for(&account).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].label(), "second");
    }

    #[test]
    fn test_unknown_tag_is_unsupported() {
        let registry = registry();
        let account = AccountData::new(AccountType::new("Slack"), "ext", "Test");
        assert!(matches!(
            registry.search_builder_for(&account),
            Err(SearchError::UnsupportedType(t)) if t == "Slack"
        ));
        assert!(matches!(
            registry.auth_builder_for(&AccountType::new("Slack")),
            Err(SearchError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_search_only_has_no_auth_builder() {
        let mut registry = registry();
        registry.register_search_only(AccountType::new("Local"), noop_search("local"));
        assert!(matches!(
            registry.auth_builder_for(&AccountType::new("Local")),
            Err(SearchError::BuilderMissing(t)) if t == AccountType::new("Local")
        ));
        assert!(registry.auth_builder_for(&AccountType::google()).is_ok());
    }

    #[test]
    fn test_failing_builder_degrades() {
        let mut registry = registry();
        registry.register_account_type(
            AccountType::dropbox(),
            |_account: &AccountData| -> anyhow::Result<Vec<Arc<dyn Searchable>>> {
                anyhow::bail!("token revoked")
            },
            static_auth,
        );
        let account = AccountData::new(AccountType::dropbox(), "ext", "Test");
        match registry.search_builder_for(&account) {
            Err(SearchError::SourceDegraded { reason, .. }) => {
                assert!(reason.contains("token revoked"))
            }
            other => panic!("expected degraded source, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn test_names_and_parsing() {
        let registry = registry();
        assert_eq!(
            registry.supported_account_type_names(),
            vec!["Dropbox".to_string(), "Google".to_string()]
        );
        assert_eq!(
            registry.supported_content_type_names(),
            vec!["Email".to_string(), "File".to_string()]
        );
        assert_eq!(
            registry.parse_account_type("google").unwrap(),
            AccountType::google()
        );
        assert!(matches!(
            registry.parse_account_type("myspace"),
            Err(SearchError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_parse_query_uses_registered_types() {
        let registry = registry();
        let q = parse_query(
            "type:File foo bar service:dropbox before:2017-01-1 service:invalid service:Google x",
            "1",
            &registry,
        );
        assert_eq!(q.content_types, vec![ContentType::File]);
        assert_eq!(
            q.account_types,
            vec![AccountType::dropbox(), AccountType::google()]
        );
        assert_eq!(q.text, "foo bar x");

        let q = parse_query("type:image cats", "2", &registry);
        assert!(q.content_types.is_empty());
    }
}
