use thiserror::Error;

/// Errors returned by calls to the gateway's management API.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The gateway answered 401; the session credential is no longer accepted.
    #[error("session is no longer valid")]
    SessionInvalid,

    /// No credential is held, so nothing was sent.
    #[error("not logged in to the gateway")]
    NotAuthenticated,

    #[error("gateway returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed gateway response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The gateway understood the request and refused it (`success: false`).
    #[error("{0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid)
    }

    /// True when the session is gone and retrying cannot help.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::SessionInvalid | Self::NotAuthenticated)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Pulls the FastAPI-style `{"detail": "..."}` message out of an error body,
/// falling back to the raw text.
pub(crate) fn extract_detail(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(detail) = value.get("detail").and_then(|d| d.as_str()) {
            return detail.to_string();
        }
        if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
    }
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed.to_string()
    }
}
