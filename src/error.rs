use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error classification shared across every controller and transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Deserialization,
    Server,
    Cancelled,
    InvalidState,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Server => "SERVER_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::InvalidState => "INVALID_STATE",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Server | Self::Conflict
        )
    }
}

/// One error shape for everything that can go wrong talking to the backend.
///
/// Field-level validation errors keep their per-field grouping so the notice
/// layer can surface each entry as its own notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    /// Populated from the backend's `errors` map on validation failures.
    pub field_errors: BTreeMap<String, Vec<String>>,
    pub status: Option<u16>,
    pub retry_after_ms: Option<u64>,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field_errors: BTreeMap::new(),
            status: None,
            retry_after_ms: None,
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deserialization, message)
    }

    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// True when the backend rejected specific fields rather than the
    /// request as a whole.
    #[must_use]
    pub fn has_field_errors(&self) -> bool {
        !self.field_errors.is_empty()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Authentication => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Authorization => {
                "You don't have permission to perform this action.".into()
            }
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::Conflict => {
                "This action conflicts with a recent change. Please refresh and try again.".into()
            }
            ErrorKind::RateLimited => {
                if let Some(retry_after) = self.retry_after_ms {
                    let seconds = retry_after / 1000;
                    format!("Too many requests. Please wait {seconds} seconds and try again.")
                } else {
                    "Too many requests. Please wait a moment and try again.".into()
                }
            }
            ErrorKind::Deserialization => {
                "The server sent an unexpected response. Please try again.".into()
            }
            ErrorKind::Server => "The server hit a problem. Please try again shortly.".into(),
            ErrorKind::Cancelled => "The request was cancelled.".into(),
            ErrorKind::InvalidState | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }

    /// Maps a non-2xx response to an error, reading the backend envelope
    /// `{message?, errors?: {field: [messages]}}` when the body parses.
    ///
    /// Branch order: field `errors` beat the generic `message`, and an
    /// unparseable or empty body falls back to status text.
    #[must_use]
    pub fn from_status_body(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            400 => ErrorKind::Validation,
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Authorization,
            404 => ErrorKind::NotFound,
            408 => ErrorKind::Timeout,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        };

        let envelope = body.and_then(|b| serde_json::from_slice::<ErrorEnvelope>(b).ok());
        let Some(envelope) = envelope else {
            return Self::new(kind, format!("HTTP error {status}")).with_status(status);
        };

        if !envelope.errors.is_empty() {
            let mut error = Self::new(
                ErrorKind::Validation,
                envelope
                    .message
                    .unwrap_or_else(|| "Some fields need attention.".into()),
            );
            error.field_errors = envelope.errors;
            return error.with_status(status);
        }

        match envelope.message {
            Some(message) if !message.is_empty() => Self::new(kind, message).with_status(status),
            _ => Self::new(kind, format!("HTTP error {status}")).with_status(status),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if !self.field_errors.is_empty() {
            let fields: Vec<&str> = self.field_errors.keys().map(String::as_str).collect();
            write!(f, " (fields: {})", fields.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Backend error body. Both keys are optional and anything else is ignored.
#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: BTreeMap<String, Vec<String>>,
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("page_size must be between 1 and {max}, got {got}")]
    PageSizeOutOfRange { got: usize, max: usize },
    #[error("debounce must be no longer than {max_ms} ms, got {got_ms} ms")]
    DebounceTooLong { got_ms: u64, max_ms: u64 },
    #[error("base url is not a valid url: {0}")]
    InvalidBaseUrl(String),
    #[error("base url must use http or https, got {0}")]
    UnsupportedScheme(String),
    #[error("base url cannot carry a query or fragment: {0}")]
    BaseUrlNotClean(String),
    #[error("reconnect base delay must be shorter than the cap ({base_ms} ms >= {cap_ms} ms)")]
    BackoffInverted { base_ms: u64, cap_ms: u64 },
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::new(ErrorKind::InvalidState, e.to_string())
    }
}
