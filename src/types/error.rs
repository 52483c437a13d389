//! Error types for Marquee
//!
//! Every per-request failure ends up here and is turned into an HTTP status
//! plus a JSON body at the router boundary. Only `Config` and `Connection`
//! are fatal, and only during startup.

use hyper::StatusCode;
use serde::Serialize;

/// A single field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Main error type for Marquee operations
#[derive(Debug, thiserror::Error)]
pub enum MarqueeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store unreachable after {attempts} attempt(s): {last_error}")]
    Connection { attempts: u32, last_error: String },

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token invalid")]
    TokenInvalid,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Hashing error: {0}")]
    Hashing(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON body written for every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl MarqueeError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::TokenExpired => StatusCode::UNAUTHORIZED,
            Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Hashing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Connection { .. } => "DB_UNAVAILABLE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Hashing(_) => "INTERNAL_ERROR",
            Self::Database(_) => "DB_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Build the client-facing body.
    ///
    /// Internal failures (hashing, database, internal) get a generic message
    /// so driver or crypto details never reach the client.
    pub fn to_body(&self) -> ErrorBody {
        let error = match self {
            Self::Hashing(_) | Self::Database(_) | Self::Internal(_) | Self::Config(_) => {
                "Internal server error".to_string()
            }
            Self::Validation(_) => "Validation failed".to_string(),
            Self::TokenExpired => "Token expired".to_string(),
            Self::TokenInvalid => "Invalid token".to_string(),
            Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::Upstream(msg)
            | Self::Unavailable(msg) => msg.clone(),
            Self::Connection { .. } => "Database not available".to_string(),
        };

        let errors = match self {
            Self::Validation(fields) => Some(fields.clone()),
            _ => None,
        };

        ErrorBody {
            error,
            code: self.code(),
            errors,
        }
    }

    /// True for errors that must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Connection { .. })
    }
}

impl From<std::io::Error> for MarqueeError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for MarqueeError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("Invalid JSON: {}", err))
    }
}

impl From<hyper::Error> for MarqueeError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for MarqueeError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<reqwest::Error> for MarqueeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

/// Result type alias for Marquee operations
pub type Result<T> = std::result::Result<T, MarqueeError>;
