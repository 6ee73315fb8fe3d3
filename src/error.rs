use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure classes shared by every stage of the onboarding pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Portal or CRM login, device verification, or an expired bearer token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The verification email never arrived.
    #[error("timed out after {waited_secs}s waiting for the CRM verification code")]
    OtpTimeout { waited_secs: u64 },

    /// The requested practitioner is not on the roster.
    #[error("{0}")]
    Lookup(String),

    /// Non-2xx from the portal, CRM or LLM, or a transport failure reaching them.
    #[error("{service} request failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    ExternalService {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// PDF-to-text or LLM output that could not be turned into a record.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Malformed caller input or an incomplete provider record.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A CRM write failed after the user was created; the user is left without
    /// the remaining data and must be reconciled by hand.
    #[error("CRM user {user_id} was created but {stage} failed: {message}")]
    PartialWrite {
        user_id: String,
        stage: &'static str,
        message: String,
    },
}

impl PipelineError {
    pub fn transport(service: &'static str, err: impl std::fmt::Display) -> Self {
        PipelineError::ExternalService {
            service,
            status: None,
            message: err.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Authentication(_) | PipelineError::OtpTimeout { .. } => {
                StatusCode::UNAUTHORIZED
            }
            PipelineError::Lookup(_) => StatusCode::NOT_FOUND,
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::ExternalService { .. }
            | PipelineError::Extraction(_)
            | PipelineError::PartialWrite { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }
        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}
