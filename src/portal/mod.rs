pub mod api;
pub mod browser;
pub mod roster;

use async_trait::async_trait;

use crate::error::Result;
use roster::{RosterEntry, RosterEntryId};

/// Obtains a portal bearer token. How the session is established stays behind this seam.
#[async_trait]
pub trait PortalAuth: Send + Sync {
    async fn acquire(&self) -> Result<String>;
}

/// The portal's roster and report endpoints.
#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn roster(&self, token: &str) -> Result<Vec<RosterEntry>>;
    async fn report(&self, token: &str, roster_entry_id: &RosterEntryId) -> Result<Vec<u8>>;
}
