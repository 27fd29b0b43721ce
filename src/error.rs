use axum::http::StatusCode;
use thiserror::Error;

/// Failure taxonomy shared by every satellite-sync operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No provider credentials. Never retried.
    #[error("satellite provider is not configured")]
    NotConfigured,

    /// The field boundary cannot form a polygon. Checked before any network call.
    #[error("field {field_id} has an unusable boundary ({points} points)")]
    InvalidGeometry { field_id: String, points: usize },

    /// Non-2xx answer from a provider endpoint.
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    pub fn decode(endpoint: &str, err: serde_json::Error) -> Self {
        SyncError::Decode(format!("{endpoint}: {err}"))
    }

    /// HTTP status used when this error is surfaced to a client.
    pub fn http_status(&self) -> StatusCode {
        match self {
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Provider { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            SyncError::NotConfigured => StatusCode::PRECONDITION_FAILED,
            SyncError::InvalidGeometry { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::Decode(_) | SyncError::Network(_) | SyncError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_status_is_mirrored() {
        let err = SyncError::Provider {
            status: 403,
            body: "forbidden".to_string(),
        };
        assert_eq!(err.http_status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_provider_success_status_becomes_bad_gateway() {
        let err = SyncError::Provider {
            status: 204,
            body: String::new(),
        };
        assert_eq!(err.http_status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_not_found_and_not_configured() {
        assert_eq!(
            SyncError::NotFound("field 7".into()).http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SyncError::NotConfigured.http_status(),
            StatusCode::PRECONDITION_FAILED
        );
    }

    #[test]
    fn test_storage_error_message_keeps_context() {
        let err: SyncError = anyhow::anyhow!("disk full")
            .context("Failed to write acquisition")
            .into();
        let msg = err.to_string();
        assert!(msg.contains("Failed to write acquisition"));
        assert!(msg.contains("disk full"));
    }
}
