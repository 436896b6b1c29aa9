//! # Error Handling
//!
//! Centralized error types for warpgate core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Redirects and declared HTTP errors are ordinary variants here: handlers and
//! interceptors return them through `Result` and the dispatcher turns them into
//! responses.

use crate::api::ApiError;
use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for warpgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the warpgate runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Misuse of the registration API (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Router failed to match the requested path
    #[error("No route found for path: {path}")]
    RouteNotFound {
        /// The path that wasn't matched
        path: String,
    },

    /// Request could not be dispatched (e.g. unsupported method)
    #[error("Bad request: {reason}")]
    BadRequest {
        /// Why the request was rejected
        reason: String,
    },

    /// Redirect signal, answered with a `Location` header
    #[error("{status} redirect to {location}")]
    Redirect {
        /// 301, 302 or 303
        status: u16,
        /// Redirect target
        location: String,
    },

    /// Declared HTTP error raised by an interceptor or handler
    #[error("HTTP {status}")]
    Http {
        /// Status code surfaced verbatim
        status: u16,
    },

    /// Database error
    #[error("Database error: {message}")]
    Database {
        /// Error message from database
        message: String,
    },

    /// A scalar query returned more than one column
    #[error("Expect only one column, got {columns}")]
    MultiColumns {
        /// Number of columns actually returned
        columns: usize,
    },

    /// HTTP protocol error
    #[error("HTTP transport error: {0}")]
    Transport(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },

    /// Business error reported to JSON API clients
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Any other failure inside a handler
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

impl Error {
    /// 301 Moved Permanently
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::Redirect {
            status: 301,
            location: location.into(),
        }
    }

    /// 302 Found
    pub fn found(location: impl Into<String>) -> Self {
        Self::Redirect {
            status: 302,
            location: location.into(),
        }
    }

    /// 303 See Other
    pub fn see_other(location: impl Into<String>) -> Self {
        Self::Redirect {
            status: 303,
            location: location.into(),
        }
    }

    /// Declared HTTP error with an arbitrary status
    #[must_use]
    pub const fn http(status: u16) -> Self {
        Self::Http { status }
    }

    /// 400 Bad Request
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    /// 401 Unauthorized
    #[must_use]
    pub const fn unauthorized() -> Self {
        Self::http(401)
    }

    /// 403 Forbidden
    #[must_use]
    pub const fn forbidden() -> Self {
        Self::http(403)
    }

    /// 404 Not Found (raised by a handler, not by routing)
    #[must_use]
    pub const fn not_found() -> Self {
        Self::http(404)
    }

    /// 409 Conflict
    #[must_use]
    pub const fn conflict() -> Self {
        Self::http(409)
    }

    /// 500 Internal Server Error, declared
    #[must_use]
    pub const fn internal() -> Self {
        Self::http(500)
    }

    /// Shorthand for a database error with a message
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Whether this is a declared HTTP error (surfaced verbatim with its status)
    #[must_use]
    pub const fn is_declared(&self) -> bool {
        matches!(
            self,
            Self::RouteNotFound { .. } | Self::BadRequest { .. } | Self::Http { .. }
        )
    }

    /// Variant name, reported as `data` by the JSON API wrapper
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "Config",
            Self::RouteNotFound { .. } => "RouteNotFound",
            Self::BadRequest { .. } => "BadRequest",
            Self::Redirect { .. } => "Redirect",
            Self::Http { .. } => "Http",
            Self::Database { .. } => "Database",
            Self::MultiColumns { .. } => "MultiColumns",
            Self::Transport(_) => "Transport",
            Self::Json(_) => "Json",
            Self::Io(_) => "Io",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::Api(_) => "Api",
            Self::Internal(_) => "Internal",
        }
    }

    /// HTTP status this error maps to
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::RouteNotFound { .. } => 404,
            Self::BadRequest { .. } => 400,
            Self::Redirect { status, .. } | Self::Http { status } => *status,
            Self::PayloadTooLarge { .. } => 413,
            _ => 500,
        }
    }
}

/// Render `code reason` (e.g. `404 Not Found`), falling back to the bare code
/// for statuses without a standard reason phrase.
#[must_use]
pub fn status_line(code: u16) -> String {
    match StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("{code} {reason}"),
        None => code.to_string(),
    }
}
