//! In-process stand-ins for the external collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::crm::{CrmAuth, CrmWriter};
use crate::error::{PipelineError, Result};
use crate::extract::{RecordExtractor, TextExtractor};
use crate::model::{ExtractedReport, LicenseRecord, LicenseRow, ProviderRecord, UserData};
use crate::pipeline::{UserDetails, Workflow};
use crate::portal::roster::{RosterEntry, RosterEntryId};
use crate::portal::{PortalApi, PortalAuth};

/// Implements every collaborator trait and records which ones were called.
#[derive(Default)]
pub struct Stub {
    calls: Mutex<Vec<&'static str>>,
    fail_at: Option<&'static str>,
    empty_roster: bool,
    pub uploaded: Mutex<Vec<LicenseRecord>>,
}

impl Stub {
    pub fn failing_at(name: &'static str) -> Self {
        Self {
            fail_at: Some(name),
            ..Self::default()
        }
    }

    pub fn with_empty_roster() -> Self {
        Self {
            empty_roster: true,
            ..Self::default()
        }
    }

    fn hit(&self, name: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(name);
        if self.fail_at != Some(name) {
            return Ok(());
        }
        Err(match name {
            "portal_auth" | "crm_auth" => {
                PipelineError::Authentication(format!("{name} refused the credentials"))
            }
            _ => PipelineError::ExternalService {
                service: "stub",
                status: Some(500),
                message: format!("{name} exploded"),
            },
        })
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortalAuth for Stub {
    async fn acquire(&self) -> Result<String> {
        self.hit("portal_auth")?;
        Ok("pdc-token".into())
    }
}

#[async_trait]
impl CrmAuth for Stub {
    async fn acquire(&self) -> Result<String> {
        self.hit("crm_auth")?;
        Ok("crm-token".into())
    }
}

#[async_trait]
impl PortalApi for Stub {
    async fn roster(&self, token: &str) -> Result<Vec<RosterEntry>> {
        self.hit("roster")?;
        assert_eq!(token, "pdc-token");
        if self.empty_roster {
            return Ok(Vec::new());
        }
        Ok(vec![
            serde_json::from_value(json!({
                "rosterEntryId": 9,
                "lastName": "Roe",
                "firstName": "Richard",
                "middleName": "",
                "suffix": "Jr",
                "displayBirthDate": "03/04/1980"
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "rosterEntryId": 42,
                "lastName": "Doe",
                "firstName": "Jane",
                "middleName": "",
                "displayBirthDate": "01/02/1990",
                "licenseState": "AL"
            }))
            .unwrap(),
        ])
    }

    async fn report(&self, _token: &str, id: &RosterEntryId) -> Result<Vec<u8>> {
        self.hit("report")?;
        assert_eq!(id, &RosterEntryId::Number(42));
        Ok(b"%PDF-1.5 fixed bytes".to_vec())
    }
}

impl TextExtractor for Stub {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String> {
        self.hit("text")?;
        assert!(pdf_bytes.starts_with(b"%PDF"));
        Ok("ALABAMA AL MD.50214 12-05-2024".into())
    }
}

#[async_trait]
impl RecordExtractor for Stub {
    async fn extract(&self, _text: &str, birth_date: &str) -> Result<ExtractedReport> {
        self.hit("records")?;
        assert_eq!(birth_date, "01/02/1990");
        Ok(ExtractedReport {
            user_data: UserData {
                first_name: "JANE".into(),
                last_name: Some("DOE".into()),
                npi: "1831480821".into(),
                email: None,
                profession: "12".into(),
                group: String::new(),
                birth_date: Some("1990-01-02T00:00:00".into()),
            },
            licenses: vec![LicenseRow {
                state: "ALABAMA".into(),
                state_code: "AL".into(),
                license_number: "MD.50214".into(),
                issue_date: Some("2024-12-05T00:00:00".into()),
                expiration_date: None,
            }],
        })
    }
}

#[async_trait]
impl CrmWriter for Stub {
    async fn create_user(&self, token: &str, provider: &ProviderRecord) -> Result<String> {
        self.hit("create_user")?;
        assert_eq!(token, "crm-token");
        assert_eq!(provider.first_name, "Jane");
        assert_eq!(provider.phone_number, "5551234567");
        Ok("U123".into())
    }

    async fn update_profile(&self, _token: &str, user_id: &str, _p: &ProviderRecord) -> Result<()> {
        self.hit("update_profile")?;
        assert_eq!(user_id, "U123");
        Ok(())
    }

    async fn create_licenses(
        &self,
        _token: &str,
        _user_id: &str,
        licenses: &[LicenseRecord],
    ) -> Result<()> {
        self.hit("create_licenses")?;
        self.uploaded.lock().unwrap().extend_from_slice(licenses);
        Ok(())
    }
}

pub fn workflow(stub: &Arc<Stub>) -> Workflow {
    Workflow::new(
        stub.clone(),
        stub.clone(),
        stub.clone(),
        stub.clone(),
        stub.clone(),
        stub.clone(),
    )
}

/// A request that matches the stub roster's "Doe, Jane" entry.
pub fn details() -> UserDetails {
    UserDetails {
        username: "Doe, Jane".into(),
        birth_date: "01/02/1990".into(),
        email: Some("jane@example.com".into()),
        phone: Some("5551234567".into()),
        ..UserDetails::default()
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_mock(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
