use reqwest::{Response, StatusCode};

use crate::error::PipelineError;

pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub fn truncate_for_log(text: &str) -> String {
    let trimmed = text.trim();
    let max_len = 300usize;
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut cut = max_len;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &trimmed[..cut])
}

pub fn is_auth_status(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

/// Pass a 2xx response through; anything else becomes an `ExternalService` error
/// carrying a truncated copy of the body.
pub async fn ensure_success(
    resp: Response,
    service: &'static str,
) -> Result<Response, PipelineError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PipelineError::ExternalService {
        service,
        status: Some(status.as_u16()),
        message: truncate_for_log(&body),
    })
}
