//! Error types for the tally system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for tally operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the tally system
#[derive(Error, Debug)]
pub enum Error {
    /// Count source errors (a poll attempt failed)
    #[error("Source error: {0}")]
    Source(String),

    /// Publisher errors (writing the output failed)
    #[error("Publish error: {0}")]
    Publish(String),

    /// Template errors (reading or validating the template failed)
    #[error("Template error: {0}")]
    Template(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source name that the cache does not track
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    /// HTTP client errors (from source APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Source-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Source kind
        provider: String,
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create a count source error
    pub fn count_source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Create a publish error
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a source-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Map an HTTP status and response body to the matching error kind
    ///
    /// Shared by the HTTP-backed sources so they classify failures the same way.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::auth(format!("{} returned HTTP {}: {}", provider, status, body)),
            429 => Self::rate_limited(format!("{} returned HTTP 429: {}", provider, body)),
            _ => Self::http(format!("{} returned HTTP {}: {}", provider, status, body)),
        }
    }
}
