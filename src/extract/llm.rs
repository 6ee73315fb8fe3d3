use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use super::RecordExtractor;
use super::dates::{normalize_date, normalize_opt};
use super::professions::ProfessionTable;
use crate::cli::LlmArgs;
use crate::common::{ensure_success, join_url, truncate_for_log};
use crate::error::{PipelineError, Result};
use crate::model::{ExtractedReport, LicenseRow, UserData};

const SYSTEM_PROMPT: &str = "\
You receive the text of a license verification report for exactly one medical practitioner.
Return that practitioner's details and every license listed in the report.

user_data:
- firstName, lastName: the practitioner's name as printed (lastName null if absent).
- npi: the National Provider Identifier.
- email: contact email, or null when the report has none.
- profession: the professional designation abbreviation as printed (e.g. MD, DO, NP, PA).
- group: the affiliated organization or health group, empty string if none.

licenses: one entry per license row, in report order.
- state: full state or board name as printed (e.g. ALABAMA).
- state_code: the two-letter USPS code for that state.
- license_number: the license number exactly as printed.
- issue_date, expiration_date: as MM-DD-YYYY, or null when not shown.

Do not invent licenses or values that are not in the report.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUserData {
    first_name: String,
    last_name: Option<String>,
    npi: String,
    email: Option<String>,
    profession: String,
    group: String,
}

#[derive(Debug, Deserialize)]
struct RawLicense {
    state: String,
    state_code: String,
    license_number: String,
    issue_date: Option<String>,
    expiration_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    user_data: RawUserData,
    licenses: Vec<RawLicense>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    refusal: Option<String>,
}

/// Structured extraction through the OpenAI chat completions API.
pub struct OpenAiExtractor {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    professions: Arc<ProfessionTable>,
}

impl OpenAiExtractor {
    pub fn new(client: Client, args: &LlmArgs, professions: Arc<ProfessionTable>) -> Self {
        Self {
            client,
            api_base: args.api_base.clone(),
            api_key: args.api_key.clone(),
            model: args.model.clone(),
            professions,
        }
    }

    fn request_body(&self, report_text: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": report_text },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "license_report",
                    "strict": true,
                    "schema": response_schema(),
                }
            }
        })
    }

    async fn complete(&self, report_text: &str) -> Result<RawReport> {
        let url = join_url(&self.api_base, "chat/completions");
        tracing::info!("Requesting structured extraction from {}", self.model);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(report_text))
            .send()
            .await
            .map_err(|e| PipelineError::transport("llm", e))?;
        let resp = ensure_success(resp, "llm").await?;

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Extraction(format!("invalid LLM response: {e}")))?;
        parse_completion(body)
    }
}

#[async_trait]
impl RecordExtractor for OpenAiExtractor {
    async fn extract(&self, report_text: &str, birth_date: &str) -> Result<ExtractedReport> {
        let raw = self.complete(report_text).await?;
        Ok(finish_report(raw, birth_date, &self.professions))
    }
}

fn parse_completion(body: ChatResponse) -> Result<RawReport> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Extraction("LLM returned no choices".to_string()))?;

    if let Some(refusal) = choice.message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(PipelineError::Extraction(format!(
            "LLM refused to extract: {}",
            truncate_for_log(&refusal)
        )));
    }
    if choice.finish_reason.as_deref() == Some("length") {
        return Err(PipelineError::Extraction(
            "LLM output was truncated".to_string(),
        ));
    }

    let content = choice
        .message
        .content
        .ok_or_else(|| PipelineError::Extraction("LLM returned empty content".to_string()))?;
    serde_json::from_str(&content).map_err(|e| {
        PipelineError::Extraction(format!(
            "LLM output does not match the report schema: {e}; got {}",
            truncate_for_log(&content)
        ))
    })
}

/// Profession mapping and date normalization applied to the raw LLM record.
fn finish_report(raw: RawReport, birth_date: &str, professions: &ProfessionTable) -> ExtractedReport {
    let u = raw.user_data;
    let user_data = UserData {
        first_name: u.first_name,
        last_name: u.last_name,
        npi: u.npi,
        email: u.email,
        profession: professions.map(&u.profession),
        group: u.group,
        birth_date: normalize_date(birth_date),
    };

    let licenses = raw
        .licenses
        .into_iter()
        .map(|l| LicenseRow {
            state: l.state,
            state_code: l.state_code,
            license_number: l.license_number,
            issue_date: normalize_opt(l.issue_date.as_deref()),
            expiration_date: normalize_opt(l.expiration_date.as_deref()),
        })
        .collect();

    ExtractedReport {
        user_data,
        licenses,
    }
}

fn response_schema() -> Value {
    let nullable_string = json!({ "type": ["string", "null"] });
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["user_data", "licenses"],
        "properties": {
            "user_data": {
                "type": "object",
                "additionalProperties": false,
                "required": ["firstName", "lastName", "npi", "email", "profession", "group"],
                "properties": {
                    "firstName": { "type": "string" },
                    "lastName": nullable_string,
                    "npi": { "type": "string" },
                    "email": nullable_string,
                    "profession": { "type": "string" },
                    "group": { "type": "string" },
                }
            },
            "licenses": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["state", "state_code", "license_number", "issue_date", "expiration_date"],
                    "properties": {
                        "state": { "type": "string" },
                        "state_code": { "type": "string" },
                        "license_number": { "type": "string" },
                        "issue_date": nullable_string,
                        "expiration_date": nullable_string,
                    }
                }
            }
        }
    })
}
