//! Error handling for the Bread Lab client

use std::fmt;
use thiserror::Error;

/// Unified error type for the Bread Lab client
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The token is missing, expired or was rejected with a 401
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// The remote store has no such entity
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-success response from the remote store
    #[error("Request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    /// Input rejected before any remote call was made
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Local notification surface errors
    #[error("Notification error: {0}")]
    Notification(String),

    /// Some targets of a bulk operation failed
    #[error("{0}")]
    PartialFailure(String),
}

impl Error {
    /// Create a new authentication error
    pub fn unauthenticated<T: fmt::Display>(msg: T) -> Self {
        Error::Unauthenticated(msg.to_string())
    }

    /// Create a new not-found error
    pub fn not_found<T: fmt::Display>(msg: T) -> Self {
        Error::NotFound(msg.to_string())
    }

    /// Create a new validation error
    pub fn validation<T: fmt::Display>(msg: T) -> Self {
        Error::Validation(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new notification error
    pub fn notification<T: fmt::Display>(msg: T) -> Self {
        Error::Notification(msg.to_string())
    }

    /// Whether this error must force the session to log out
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Error::Unauthenticated(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_variants() {
        assert!(Error::unauthenticated("expired").is_unauthenticated());
        assert!(!Error::not_found("starter 3").is_unauthenticated());
        assert!(Error::not_found("starter 3").is_not_found());
        assert!(!Error::validation("empty").is_not_found());
    }

    #[test]
    fn api_error_message_names_status() {
        let err = Error::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Request failed with status 500: boom");
    }
}
