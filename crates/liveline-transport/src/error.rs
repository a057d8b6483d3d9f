use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure taxonomy shared by every network operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, DNS failure, reset or aborted transfer
    NetworkError,
    /// The request exceeded its deadline
    TimeoutError,
    AuthenticationError,
    RateLimitError,
    /// 5xx responses
    ServerError,
    /// 4xx responses other than auth and rate limiting
    ClientError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "network_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::RateLimitError => "rate_limit_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ClientError => "client_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutError, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownError, message)
    }

    /// Classify a non-2xx response
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => ErrorKind::AuthenticationError,
            408 => ErrorKind::TimeoutError,
            429 => ErrorKind::RateLimitError,
            400..=499 => ErrorKind::ClientError,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::UnknownError,
        };
        let body = body.into();
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };

        Self {
            kind,
            message,
            status: Some(status.as_u16()),
        }
    }

    /// Whether repeating the request may succeed.
    ///
    /// Authentication failures and malformed requests fail identically on
    /// every attempt; 404/409/410 are retryable because a fresh session
    /// usually clears them.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::AuthenticationError => false,
            ErrorKind::ClientError => !matches!(self.status, Some(400 | 405 | 413 | 415 | 422)),
            _ => true,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::timeout(e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::from_status(status, String::new());
        }
        if e.is_connect() || e.is_request() || e.is_body() {
            return Self::network(e.to_string());
        }
        if e.is_decode() {
            return Self::unknown(format!("Failed to decode response: {}", e));
        }
        Self::unknown(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TransportError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timed out")
    }
}
