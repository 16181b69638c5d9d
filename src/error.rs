//! Error types with HTTP status code and business code mapping.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, RETRY_AFTER};
use hyper::{Response, StatusCode};

use crate::rate_limit::Denial;

/// Business codes carried in the `code` field of every JSON response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Code {
    Success = 0,
    InvalidParam = 1001,
    Unauthorized = 1002,
    Forbidden = 1003,
    NotFound = 1004,
    Exists = 1005,
    RateLimited = 1006,
    ServerError = 5000,
}

impl Code {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Error type for tollgate operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    // Data errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Method not allowed")]
    MethodNotAllowed,

    // Admission control
    #[error("Too many requests, please try again later")]
    RateLimited(#[from] Denial),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // System errors
    #[error("Invalid address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map error to HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,

            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) | Error::AddrParse(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,

            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,

            // Config errors -> 500 (shouldn't happen at runtime)
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Map error to the business code reported to clients.
    pub fn code(&self) -> Code {
        match self {
            Error::Unauthorized => Code::Unauthorized,
            Error::Forbidden => Code::Forbidden,
            Error::NotFound(_) => Code::NotFound,
            Error::BadRequest(_)
            | Error::AddrParse(_)
            | Error::PayloadTooLarge
            | Error::MethodNotAllowed => Code::InvalidParam,
            Error::Conflict(_) => Code::Exists,
            Error::RateLimited(_) => Code::RateLimited,
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
                Code::ServerError
            }
        }
    }

    /// Convert error into HTTP response.
    ///
    /// Server-side details are logged and replaced with a generic message.
    /// Rate-limit denials that know their retry delay get a `Retry-After` header.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!("Internal error: {self}");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let mut response = crate::response::fail(status, self.code(), &message);

        if let Error::RateLimited(denial) = &self
            && let Some(wait) = denial.retry_after()
        {
            // Whole seconds, rounded up, never zero.
            let secs = wait.as_secs().saturating_add(u64::from(wait.subsec_nanos() > 0));
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }

        response
    }
}

/// Result type alias using tollgate's Error.
pub type Result<T> = std::result::Result<T, Error>;
