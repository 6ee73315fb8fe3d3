use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::crm::{CrmAuth, CrmWriter};
use crate::error::{PipelineError, Result};
use crate::extract::{RecordExtractor, TextExtractor};
use crate::model::{ExtractedReport, LicenseRecord, ProviderRecord, is_ten_digit_phone};
use crate::portal::roster::{NamedRosterEntry, RosterEntry, find_entry};
use crate::portal::{PortalApi, PortalAuth};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

const PROGRESS_BUFFER: usize = 32;

/// Caller input shared by `/get-pdf-data` and `/create-licence-entry`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserDetails {
    /// "Last, First Middle" exactly as the roster spells it.
    pub username: String,
    /// The roster's display birth date, e.g. `01/02/1990`.
    pub birth_date: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, rename = "pdcToken")]
    pub pdc_token: Option<String>,
    #[serde(default, rename = "crmToken")]
    pub crm_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Authenticate,
    FetchRoster,
    FindUser,
    RequestReport,
    ProcessPdf,
    ProcessData,
    AddProvider,
    PrepareLicenses,
    UploadLicenses,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub progress: u8,
    pub step: Stage,
    pub message: String,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Sending half of a progress stream. Percentages never go backwards.
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
    last: u8,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx, last: 0 }
    }

    async fn send(&mut self, progress: u8, step: Stage, message: String, user_id: Option<String>) {
        self.last = self.last.max(progress);
        let event = ProgressEvent {
            progress: self.last,
            step,
            message,
            user_id,
        };
        // A closed receiver means the client went away; the run carries on regardless.
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Progress receiver dropped at {step:?}");
        }
    }

    pub async fn emit(&mut self, progress: u8, step: Stage, message: &str) {
        tracing::info!("[{progress:>3}%] {message}");
        self.send(progress, step, message.to_string(), None).await;
    }

    async fn complete(&mut self, user_id: String) {
        self.send(
            100,
            Stage::Complete,
            "Process completed successfully!".to_string(),
            Some(user_id),
        )
        .await;
    }

    async fn fail(&mut self, err: &PipelineError) {
        let progress = self.last;
        self.send(progress, Stage::Error, format!("Error: {err}"), None)
            .await;
    }
}

/// Body of a successful `/get-pdf-data` call.
#[derive(Debug, Serialize)]
pub struct PdfData {
    pub data: ExtractedReport,
    /// The portal token this call had to acquire; `None` when the caller supplied one.
    pub token: Option<String>,
}

/// Sequences portal, extraction and CRM collaborators for one provider.
#[derive(Clone)]
pub struct Workflow {
    portal_auth: Arc<dyn PortalAuth>,
    crm_auth: Arc<dyn CrmAuth>,
    portal: Arc<dyn PortalApi>,
    text: Arc<dyn TextExtractor>,
    records: Arc<dyn RecordExtractor>,
    crm: Arc<dyn CrmWriter>,
}

impl Workflow {
    pub fn new(
        portal_auth: Arc<dyn PortalAuth>,
        crm_auth: Arc<dyn CrmAuth>,
        portal: Arc<dyn PortalApi>,
        text: Arc<dyn TextExtractor>,
        records: Arc<dyn RecordExtractor>,
        crm: Arc<dyn CrmWriter>,
    ) -> Self {
        Self {
            portal_auth,
            crm_auth,
            portal,
            text,
            records,
            crm,
        }
    }

    /// Fresh portal and CRM tokens, logging in to both.
    pub async fn tokens(&self) -> Result<(String, String)> {
        let portal = self.portal_auth.acquire().await?;
        let crm = self.crm_auth.acquire().await?;
        Ok((portal, crm))
    }

    pub async fn roster(&self, token: Option<String>) -> Result<Vec<NamedRosterEntry>> {
        let token = match token {
            Some(t) => t,
            None => self.portal_auth.acquire().await?,
        };
        let roster = self.portal.roster(&token).await?;
        Ok(roster.into_iter().map(RosterEntry::with_name).collect())
    }

    /// Locate the practitioner, download the report and extract its record.
    pub async fn pdf_data(&self, details: &UserDetails) -> Result<PdfData> {
        let (token, acquired) = match &details.pdc_token {
            Some(t) => (t.clone(), false),
            None => (self.portal_auth.acquire().await?, true),
        };
        let roster = self.portal.roster(&token).await?;
        let entry = locate(&roster, details)?;
        let pdf = self.portal.report(&token, &entry.roster_entry_id).await?;
        let text = self.extract_text(pdf).await?;
        let data = self.records.extract(&text, &details.birth_date).await?;
        Ok(PdfData {
            data,
            token: acquired.then_some(token),
        })
    }

    /// Run the onboarding pipeline on its own task and hand back its progress events.
    ///
    /// The stream ends after exactly one `complete` or `error` event.
    pub fn start(&self, details: UserDetails) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let workflow = self.clone();
        tokio::spawn(async move {
            let mut sink = ProgressSink::new(tx);
            workflow.run(&details, &mut sink).await;
        });
        rx
    }

    pub async fn run(&self, details: &UserDetails, sink: &mut ProgressSink) {
        match self.onboard(details, sink).await {
            Ok(user_id) => {
                tracing::info!("Onboarded {} as CRM user {user_id}", details.username);
                sink.complete(user_id).await;
            }
            Err(err @ PipelineError::Validation(_)) => {
                tracing::warn!("Rejected onboarding request for {}: {err}", details.username);
                sink.fail(&err).await;
            }
            Err(err) => {
                tracing::error!("Onboarding {} failed: {err}", details.username);
                sink.fail(&err).await;
            }
        }
    }

    async fn onboard(&self, details: &UserDetails, sink: &mut ProgressSink) -> Result<String> {
        let (email, phone) = validate_contact(details)?;

        sink.emit(5, Stage::Start, "Starting license retrieval process...")
            .await;

        sink.emit(10, Stage::Authenticate, "Authenticating with the portal and CRM...")
            .await;
        let portal_token = match &details.pdc_token {
            Some(t) => t.clone(),
            None => self.portal_auth.acquire().await?,
        };
        let crm_token = match &details.crm_token {
            Some(t) => t.clone(),
            None => self.crm_auth.acquire().await?,
        };

        sink.emit(20, Stage::FetchRoster, "Retrieving practitioner roster...")
            .await;
        let roster = self.portal.roster(&portal_token).await?;

        sink.emit(25, Stage::FindUser, "Locating user information...")
            .await;
        let entry = locate(&roster, details)?;

        sink.emit(35, Stage::RequestReport, "Requesting license report...")
            .await;
        let pdf = self.portal.report(&portal_token, &entry.roster_entry_id).await?;

        sink.emit(45, Stage::ProcessPdf, "Extracting license information from report...")
            .await;
        let text = self.extract_text(pdf).await?;

        sink.emit(50, Stage::ProcessPdf, "Processing license information...")
            .await;
        let report = self.records.extract(&text, &details.birth_date).await?;

        sink.emit(60, Stage::ProcessData, "Preparing provider information for CRM...")
            .await;
        let provider = ProviderRecord::new(
            entry.first_name.clone().unwrap_or_default(),
            entry.last_name.clone(),
            email,
            phone,
            report.user_data.profession.clone(),
            report.user_data.npi.clone(),
            report.user_data.birth_date.clone(),
        )?;

        sink.emit(75, Stage::AddProvider, "Adding provider to CRM...")
            .await;
        let user_id = self.crm.create_user(&crm_token, &provider).await?;
        self.crm
            .update_profile(&crm_token, &user_id, &provider)
            .await
            .map_err(|e| partial_write(&user_id, "update_profile", e))?;

        sink.emit(85, Stage::PrepareLicenses, "Preparing license data for upload...")
            .await;
        let licenses: Vec<LicenseRecord> = report.licenses.iter().map(LicenseRecord::from).collect();

        sink.emit(95, Stage::UploadLicenses, "Uploading licenses to CRM...")
            .await;
        self.crm
            .create_licenses(&crm_token, &user_id, &licenses)
            .await
            .map_err(|e| partial_write(&user_id, "create_licenses", e))?;

        Ok(user_id)
    }

    async fn extract_text(&self, pdf: Vec<u8>) -> Result<String> {
        let text = Arc::clone(&self.text);
        tokio::task::spawn_blocking(move || text.extract_text(&pdf))
            .await
            .map_err(|e| PipelineError::Extraction(format!("text extraction task failed: {e}")))?
    }
}

/// An empty roster means the token could not see the customer's practitioners.
fn locate<'a>(roster: &'a [RosterEntry], details: &UserDetails) -> Result<&'a RosterEntry> {
    if roster.is_empty() {
        return Err(PipelineError::Authentication(
            "Failed to retrieve roasters.".to_string(),
        ));
    }
    find_entry(roster, &details.username, &details.birth_date).ok_or_else(|| {
        PipelineError::Lookup(format!(
            "User not found in roster: {} ({})",
            details.username, details.birth_date
        ))
    })
}

fn validate_contact(details: &UserDetails) -> Result<(String, String)> {
    let email = details.email.as_deref().map(str::trim).unwrap_or_default();
    let phone = details.phone.as_deref().map(str::trim).unwrap_or_default();
    if !EMAIL_RE.is_match(email) || !is_ten_digit_phone(phone) {
        return Err(PipelineError::Validation(
            "Invalid email or phone number".to_string(),
        ));
    }
    Ok((email.to_string(), phone.to_string()))
}

fn partial_write(user_id: &str, stage: &'static str, err: PipelineError) -> PipelineError {
    PipelineError::PartialWrite {
        user_id: user_id.to_string(),
        stage,
        message: err.to_string(),
    }
}
