use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};

use super::CrmAuth;
use super::mailbox::{OtpMailbox, PollPolicy, poll_for_code};
use crate::cli::CrmArgs;
use crate::common::{ensure_success, join_url, truncate_for_log};
use crate::error::{PipelineError, Result};

const DEVICE_TOKEN_HEADER: &str = "Devicetoken";

/// Password login followed by email device verification.
pub struct CrmLogin {
    client: Client,
    api_base: String,
    email: String,
    password: String,
    mailbox: Arc<dyn OtpMailbox>,
    poll: PollPolicy,
}

enum LoginOutcome {
    /// The account is already trusted on this device.
    Authenticated(String),
    VerificationRequired { device_token: String },
}

impl CrmLogin {
    pub fn new(
        client: Client,
        args: &CrmArgs,
        mailbox: Arc<dyn OtpMailbox>,
        poll: PollPolicy,
    ) -> Self {
        Self {
            client,
            api_base: args.api_base.clone(),
            email: args.email.clone(),
            password: args.password.clone(),
            mailbox,
            poll,
        }
    }

    async fn password_login(&self) -> Result<LoginOutcome> {
        tracing::info!("Logging in to CRM");
        let resp = self
            .client
            .post(join_url(&self.api_base, "auth/login"))
            .json(&json!({
                "data": { "email": self.email, "password": self.password }
            }))
            .send()
            .await
            .map_err(|e| PipelineError::transport("crm", e))?;

        // Verification-required comes back as an error envelope, often with a 4xx.
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| {
            PipelineError::Authentication(format!("unreadable CRM login response ({status}): {e}"))
        })?;
        parse_login(&body)
    }

    async fn request_code(&self, device_token: &str) -> Result<()> {
        tracing::info!("Requesting CRM verification code by email");
        let resp = self
            .client
            .post(join_url(&self.api_base, "verification/code"))
            .header(DEVICE_TOKEN_HEADER, format!("Bearer {device_token}"))
            .json(&json!({ "data": { "type": "email" } }))
            .send()
            .await
            .map_err(|e| PipelineError::transport("crm", e))?;
        ensure_success(resp, "crm").await?;
        Ok(())
    }

    async fn verify_device(&self, device_token: &str, code: &str) -> Result<String> {
        let resp = self
            .client
            .post(join_url(&self.api_base, "verification/device"))
            .header(DEVICE_TOKEN_HEADER, format!("Bearer {device_token}"))
            .json(&json!({ "data": { "verification_code": code } }))
            .send()
            .await
            .map_err(|e| PipelineError::transport("crm", e))?;
        let resp = ensure_success(resp, "crm").await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| PipelineError::transport("crm", e))?;

        auth_token(&body).ok_or_else(|| {
            PipelineError::Authentication(format!(
                "CRM device verification returned no auth token: {}",
                first_error_message(&body).unwrap_or_else(|| truncate_for_log(&body.to_string()))
            ))
        })
    }
}

#[async_trait]
impl CrmAuth for CrmLogin {
    async fn acquire(&self) -> Result<String> {
        let requested_at = Utc::now();
        let device_token = match self.password_login().await? {
            LoginOutcome::Authenticated(token) => return Ok(token),
            LoginOutcome::VerificationRequired { device_token } => device_token,
        };

        self.request_code(&device_token).await?;
        let code = poll_for_code(self.mailbox.as_ref(), requested_at, &self.poll).await?;
        let token = self.verify_device(&device_token, &code).await?;
        tracing::info!("CRM login complete");
        Ok(token)
    }
}

fn parse_login(body: &Value) -> Result<LoginOutcome> {
    if let Some(token) = auth_token(body) {
        return Ok(LoginOutcome::Authenticated(token));
    }
    let device_token = body
        .get("errors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(|e| e.pointer("/metadata/device_token").and_then(Value::as_str));
    match device_token {
        Some(t) => Ok(LoginOutcome::VerificationRequired {
            device_token: t.to_string(),
        }),
        None => Err(PipelineError::Authentication(format!(
            "CRM login rejected: {}",
            first_error_message(body).unwrap_or_else(|| "no device token in response".to_string())
        ))),
    }
}

fn auth_token(body: &Value) -> Option<String> {
    body.pointer("/data/auth_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn first_error_message(body: &Value) -> Option<String> {
    body.pointer("/errors/0/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}
