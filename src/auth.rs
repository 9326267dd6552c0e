//! Identity services: per account type credential refresh.
//!
//! The OAuth callback flow that first links an account lives outside this
//! crate. What the engine needs afterwards is the ability to look up who
//! an account belongs to and to renew its token before it expires.

use anyhow::Result;
use async_trait::async_trait;
use cloudsearch_core::AccountData;

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Fill in identity fields (external id, name, email) from the provider.
    async fn fetch_identity_info(&self, account: &AccountData) -> Result<AccountData>;

    /// Renew the account's token if the provider says it is due.
    ///
    /// Returns the possibly updated account and whether anything changed.
    async fn refresh_account_if_needed(&self, account: AccountData) -> Result<(AccountData, bool)>;
}

/// Identity service for accounts whose credentials never expire.
pub struct StaticIdentity;

#[async_trait]
impl IdentityService for StaticIdentity {
    async fn fetch_identity_info(&self, account: &AccountData) -> Result<AccountData> {
        Ok(account.clone())
    }

    async fn refresh_account_if_needed(&self, account: AccountData) -> Result<(AccountData, bool)> {
        Ok((account, false))
    }
}
