use std::ffi::OsStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use headless_chrome::util::Wait;
use headless_chrome::{Browser, LaunchOptions};
use serde_json::Value;

use super::PortalAuth;
use crate::cli::PortalArgs;
use crate::error::{PipelineError, Result};

const USERNAME_SELECTOR: &str = "input[name='Username']";
const PASSWORD_SELECTOR: &str = "input[name='Password']";

const DUMP_LOCAL_STORAGE_JS: &str = r#"
    (() => {
        const entries = [];
        for (let i = 0; i < localStorage.length; i++) {
            const key = localStorage.key(i);
            entries.push([key, localStorage.getItem(key)]);
        }
        return JSON.stringify(entries);
    })()
"#;

/// Signs in to the portal with a headless Chrome and lifts the identity token
/// the sign-in page leaves in localStorage.
///
/// Each call launches and tears down its own browser.
#[derive(Clone)]
pub struct BrowserLogin {
    login_url: String,
    username: String,
    password: String,
    id_token_key: String,
    form_timeout: Duration,
    login_timeout: Duration,
}

impl BrowserLogin {
    pub fn new(args: &PortalArgs) -> Self {
        Self {
            login_url: args.login_url.clone(),
            username: args.username.clone(),
            password: args.password.clone(),
            id_token_key: args.id_token_key.clone(),
            form_timeout: args.form_timeout(),
            login_timeout: args.login_timeout(),
        }
    }

    fn login_blocking(&self) -> anyhow::Result<Option<String>> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .args(vec![
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-dev-shm-usage"),
            ])
            .build()
            .map_err(|e| anyhow!("browser launch options: {e}"))?;
        let browser = Browser::new(options).context("launch browser")?;
        let context = browser.new_context().context("open isolated browser context")?;
        let tab = context.new_tab().context("open tab")?;

        tracing::info!("Opening portal sign-in page");
        tab.navigate_to(&self.login_url)
            .context("navigate to sign-in page")?;
        tab.wait_for_element_with_custom_timeout(USERNAME_SELECTOR, self.form_timeout)
            .context("sign-in form did not render")?
            .type_into(&self.username)
            .context("fill username")?;
        tab.find_element(PASSWORD_SELECTOR)
            .context("find password field")?
            .type_into(&self.password)
            .context("fill password")?;
        tab.press_key("Enter").context("submit sign-in form")?;

        tracing::info!("Waiting for portal sign-in to complete");
        let token_check = format!(
            "localStorage.getItem({}) !== null",
            serde_json::to_string(&self.id_token_key)?
        );
        Wait::new(self.login_timeout, Duration::from_millis(250))
            .until(|| {
                tab.evaluate(&token_check, false)
                    .ok()
                    .and_then(|r| r.value)
                    .and_then(|v| v.as_bool())
                    .filter(|present| *present)
            })
            .map_err(|_| anyhow!("identity token did not appear within {:?}", self.login_timeout))?;

        let dump = tab
            .evaluate(DUMP_LOCAL_STORAGE_JS, false)
            .context("read localStorage")?
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| anyhow!("localStorage dump was not a string"))?;
        let entries: Vec<(String, String)> =
            serde_json::from_str(&dump).context("parse localStorage dump")?;

        Ok(find_id_token(&entries))
    }
}

#[async_trait]
impl PortalAuth for BrowserLogin {
    async fn acquire(&self) -> Result<String> {
        let login = self.clone();
        let outcome = tokio::task::spawn_blocking(move || login.login_blocking())
            .await
            .map_err(|e| PipelineError::Authentication(format!("portal login task failed: {e}")))?;

        match outcome {
            Ok(Some(token)) => {
                tracing::info!("Portal sign-in succeeded");
                Ok(token)
            }
            Ok(None) => Err(PipelineError::Authentication(
                "portal sign-in finished but no identity token was stored".to_string(),
            )),
            Err(err) => {
                tracing::warn!("Portal sign-in failed: {err:#}");
                Err(PipelineError::Authentication(
                    "Failed to login and get token.".to_string(),
                ))
            }
        }
    }
}

/// Scans storage values (JSON where possible, raw strings otherwise) in storage
/// order and returns the secret of the first identity-token credential.
pub fn find_id_token(entries: &[(String, String)]) -> Option<String> {
    entries.iter().find_map(|(_, raw)| {
        let parsed: Value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
        let obj = parsed.as_object()?;
        if obj.get("credentialType").and_then(Value::as_str) != Some("IdToken") {
            return None;
        }
        obj.get("secret").and_then(Value::as_str).map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn id_token_secret_is_found_among_mixed_entries() {
        let entries = storage(&[
            ("plain", "just a string"),
            ("number", "42"),
            (
                "access",
                r#"{"credentialType":"AccessToken","secret":"not-this-one"}"#,
            ),
            (
                "id",
                r#"{"credentialType":"IdToken","secret":"eyJ.id.token","homeAccountId":"x"}"#,
            ),
        ]);
        assert_eq!(find_id_token(&entries).as_deref(), Some("eyJ.id.token"));
    }

    #[test]
    fn no_id_token_yields_none() {
        let entries = storage(&[
            ("a", "{broken json"),
            ("b", r#"{"credentialType":"RefreshToken","secret":"r"}"#),
            ("c", r#"{"credentialType":"IdToken"}"#),
        ]);
        assert_eq!(find_id_token(&entries), None);
        assert_eq!(find_id_token(&[]), None);
    }

    #[test]
    fn first_id_token_in_storage_order_wins() {
        let entries = storage(&[
            ("z-stale", r#"{"credentialType":"IdToken","secret":"first"}"#),
            ("a-fresh", r#"{"credentialType":"IdToken","secret":"second"}"#),
        ]);
        assert_eq!(find_id_token(&entries).as_deref(), Some("first"));

        let reversed: Vec<_> = entries.into_iter().rev().collect();
        assert_eq!(find_id_token(&reversed).as_deref(), Some("second"));
    }

    #[test]
    fn storage_dump_parses_as_ordered_pairs() {
        let dump = r#"[["b","{\"credentialType\":\"IdToken\",\"secret\":\"s\"}"],["a","x"]]"#;
        let entries: Vec<(String, String)> = serde_json::from_str(dump).unwrap();
        assert_eq!(entries[0].0, "b");
        assert_eq!(find_id_token(&entries).as_deref(), Some("s"));
    }
}
