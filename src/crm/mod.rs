pub mod auth;
pub mod mailbox;
pub mod writer;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{LicenseRecord, ProviderRecord};

/// Obtains a CRM bearer token, including any device verification the CRM demands.
#[async_trait]
pub trait CrmAuth: Send + Sync {
    async fn acquire(&self) -> Result<String>;
}

/// The three CRM writes that onboard one provider, in the order they must run.
#[async_trait]
pub trait CrmWriter: Send + Sync {
    /// Returns the new user's id.
    async fn create_user(&self, token: &str, provider: &ProviderRecord) -> Result<String>;

    async fn update_profile(
        &self,
        token: &str,
        user_id: &str,
        provider: &ProviderRecord,
    ) -> Result<()>;

    async fn create_licenses(
        &self,
        token: &str,
        user_id: &str,
        licenses: &[LicenseRecord],
    ) -> Result<()>;
}
