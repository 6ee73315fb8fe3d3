use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::PortalApi;
use super::roster::{RosterEntry, RosterEntryId};
use crate::cli::PortalArgs;
use crate::common::{ensure_success, is_auth_status, join_url};
use crate::error::{PipelineError, Result};

const ROSTER_PAGE_SIZE: u32 = 10_000;

#[derive(Debug, Deserialize)]
struct RosterPage {
    #[serde(default)]
    items: Vec<RosterEntry>,
}

pub struct PortalClient {
    client: Client,
    api_base: String,
    customer_id: u64,
}

impl PortalClient {
    pub fn new(client: Client, args: &PortalArgs) -> Self {
        Self {
            client,
            api_base: args.api_base.clone(),
            customer_id: args.customer_id,
        }
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response> {
        if is_auth_status(resp.status()) {
            return Err(PipelineError::Authentication(format!(
                "portal rejected the bearer token ({})",
                resp.status()
            )));
        }
        ensure_success(resp, "portal").await
    }
}

#[async_trait]
impl PortalApi for PortalClient {
    async fn roster(&self, token: &str) -> Result<Vec<RosterEntry>> {
        let url = join_url(&self.api_base, "roster/practitioner/list");
        let page_size = ROSTER_PAGE_SIZE.to_string();
        let customer_id = self.customer_id.to_string();

        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("pageSize", page_size.as_str()),
                ("pageIndex", "0"),
                ("customerId", customer_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::transport("portal", e))?;
        let resp = self.check(resp).await?;

        let page: RosterPage = resp.json().await.map_err(|e| {
            PipelineError::transport("portal", format!("invalid roster payload: {e}"))
        })?;
        tracing::info!("Fetched {} roster entries", page.items.len());
        Ok(page.items)
    }

    async fn report(&self, token: &str, roster_entry_id: &RosterEntryId) -> Result<Vec<u8>> {
        let url = join_url(&self.api_base, "download/practitioner/report");
        let body = json!({
            "rosterEntryIds": [roster_entry_id],
            "customerId": self.customer_id,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::transport("portal", e))?;
        let resp = self.check(resp).await?;

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::transport("portal", e))?;
        tracing::info!(
            "Downloaded report for roster entry {} ({} bytes)",
            roster_entry_id,
            bytes.len()
        );
        Ok(bytes.to_vec())
    }
}
