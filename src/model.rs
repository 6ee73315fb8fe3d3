use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub const DEFAULT_LICENSE_TYPE: &str = "Medical License";

/// Provider fields pulled out of a license report by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub first_name: String,
    pub last_name: Option<String>,
    pub npi: String,
    pub email: Option<String>,
    pub profession: String,
    pub group: String,
    /// Filled from the caller's birth date after normalization, never by the LLM.
    #[serde(default)]
    pub birth_date: Option<String>,
}

/// One license line of a report, dates already normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRow {
    pub state: String,
    pub state_code: String,
    pub license_number: String,
    pub issue_date: Option<String>,
    pub expiration_date: Option<String>,
}

/// Normalized output of the structured-record extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReport {
    pub user_data: UserData,
    pub licenses: Vec<LicenseRow>,
}

/// A provider ready to be written to the CRM.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRecord {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: String,
    pub phone_number: String,
    pub profession: String,
    pub npi: String,
    pub birth_date: Option<String>,
}

impl ProviderRecord {
    /// Refuses to build a record the CRM writer must never see.
    pub fn new(
        first_name: impl Into<String>,
        last_name: Option<String>,
        email: impl Into<String>,
        phone_number: impl Into<String>,
        profession: impl Into<String>,
        npi: impl Into<String>,
        birth_date: Option<String>,
    ) -> Result<Self> {
        let record = Self {
            first_name: first_name.into(),
            last_name: last_name.filter(|s| !s.trim().is_empty()),
            email: email.into(),
            phone_number: phone_number.into(),
            profession: profession.into(),
            npi: npi.into(),
            birth_date,
        };

        let mut missing = Vec::new();
        if record.first_name.trim().is_empty() {
            missing.push("firstName");
        }
        if record.email.trim().is_empty() {
            missing.push("email");
        }
        if record.profession.trim().is_empty() {
            missing.push("profession");
        }
        if record.npi.trim().is_empty() {
            missing.push("npi");
        }
        if !missing.is_empty() {
            return Err(PipelineError::Validation(format!(
                "provider record is missing {}",
                missing.join(", ")
            )));
        }
        if !is_ten_digit_phone(&record.phone_number) {
            return Err(PipelineError::Validation(
                "phoneNumber must be exactly 10 digits".to_string(),
            ));
        }
        Ok(record)
    }
}

/// A license as the CRM's batch-create mutation expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    pub state: String,
    pub license_number: String,
    pub license_type: String,
    pub issue_date: Option<String>,
    pub expiration_date: Option<String>,
}

impl From<&LicenseRow> for LicenseRecord {
    fn from(row: &LicenseRow) -> Self {
        Self {
            state: row.state_code.clone(),
            license_number: row.license_number.clone(),
            license_type: DEFAULT_LICENSE_TYPE.to_string(),
            issue_date: row.issue_date.clone(),
            expiration_date: row.expiration_date.clone(),
        }
    }
}

pub fn is_ten_digit_phone(phone: &str) -> bool {
    phone.len() == 10 && phone.chars().all(|c| c.is_ascii_digit())
}
