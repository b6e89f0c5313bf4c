//! The error envelope.
//!
//! Every failure leaves the process as
//! `{"error": {"kind", "message", "requestId", "details?"}}` with a
//! stable kind token. Stack traces and internal messages stay inside
//! unless the process runs in development mode.

use std::sync::atomic::{AtomicBool, Ordering};

use {
    axum::{
        http::{header, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
    },
    serde_json::json,
};

use crate::request_id::current_request_id;

/// Process-wide development switch, set once during state construction.
/// Internal error detail only crosses the wire while this is on.
static DEV_MODE: AtomicBool = AtomicBool::new(false);

pub(crate) fn set_development(enabled: bool) {
    DEV_MODE.store(enabled, Ordering::Relaxed);
}

fn development() -> bool {
    DEV_MODE.load(Ordering::Relaxed)
}

/// What the caller is allowed to see: internal messages are scrubbed
/// outside development mode.
fn visible_message(kind: ErrorKind, message: String, development: bool) -> String {
    if kind == ErrorKind::Internal && !development {
        "internal server error".to_string()
    } else {
        message
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    AuthExpired,
    NotFound,
    State,
    RateLimited,
    Upstream,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::AuthExpired => "auth_expired",
            Self::NotFound => "not_found",
            Self::State => "state",
            Self::RateLimited => "rate_limited",
            Self::Upstream => "upstream",
            Self::Internal => "internal",
        }
    }

    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Auth | Self::AuthExpired => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::State => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
    /// Extra response headers (rate-limit family).
    pub headers: Vec<(&'static str, String)>,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound, "resource not found")
    }

    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.token(), self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        // The log always keeps the real message, keyed by request id;
        // the body only carries it in development mode.
        if self.kind == ErrorKind::Internal {
            tracing::error!(request_id = ?current_request_id(), "internal error: {}", self.message);
        }
        let message = visible_message(self.kind, self.message, development());

        let mut body = json!({
            "error": {
                "kind": self.kind.token(),
                "message": message,
            }
        });
        if let Some(id) = current_request_id() {
            body["error"]["requestId"] = json!(id);
        }
        if let Some(details) = self.details {
            body["error"]["details"] = details;
        }

        let mut response = (status, Json(body)).into_response();
        for (name, value) in self.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, value);
            }
        }
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

// ── Conversions from crate errors ────────────────────────────────────────────

impl From<rijan_store::Error> for ApiError {
    fn from(e: rijan_store::Error) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<rijan_protocol::Error> for ApiError {
    fn from(e: rijan_protocol::Error) -> Self {
        use rijan_protocol::Error as P;
        match &e {
            P::InvalidRecipient { .. } => Self::validation(e.to_string()),
            P::NotConnected => Self::state("device is not connected"),
            P::SendRejected { .. } | P::Transport { .. } | P::Timeout => {
                Self::new(ErrorKind::Upstream, e.to_string())
            }
        }
    }
}

impl From<rijan_lifecycle::Error> for ApiError {
    fn from(e: rijan_lifecycle::Error) -> Self {
        use rijan_lifecycle::Error as L;
        match e {
            L::LockHeld => Self::state("device is owned by another instance"),
            L::NotRunning { .. } => Self::state(e.to_string()),
            L::NotConnected { .. } => Self::state(e.to_string()),
            L::NoQrAvailable => Self::state(e.to_string()),
            L::Qr(_) => Self::internal(e.to_string()),
            L::Store(inner) => inner.into(),
            L::Sessions(inner) => Self::internal(inner.to_string()),
            L::Protocol(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tokens_and_statuses() {
        assert_eq!(ErrorKind::Validation.token(), "validation");
        assert_eq!(ErrorKind::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::AuthExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::State.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn lock_held_maps_to_state_kind() {
        let err: ApiError = rijan_lifecycle::Error::LockHeld.into();
        assert_eq!(err.kind, ErrorKind::State);
        assert_eq!(err.message, "device is owned by another instance");
    }

    #[test]
    fn invalid_recipient_maps_to_validation() {
        let err: ApiError = rijan_protocol::Error::invalid_recipient("x", "bad").into();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn internal_detail_only_escapes_in_development() {
        let message = "sqlite disk I/O error at /data/rijan.db".to_string();
        assert_eq!(
            visible_message(ErrorKind::Internal, message.clone(), false),
            "internal server error"
        );
        assert_eq!(
            visible_message(ErrorKind::Internal, message.clone(), true),
            message
        );
        // Non-internal kinds are never scrubbed.
        assert_eq!(
            visible_message(ErrorKind::Validation, "bad recipient".into(), false),
            "bad recipient"
        );
    }
}
