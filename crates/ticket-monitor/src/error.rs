//! Error types for the monitor.
//!
//! Only `ConfigError` is fatal, and only at startup. Everything else is
//! caught at the poll-cycle boundary and logged.

use reqwest::StatusCode;
use thiserror::Error;

/// A calendar fetch attempt failed. Recoverable: the next cycle retries.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, proxy, TLS or timeout failure
    #[error("calendar request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("calendar endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error(transparent)]
    Malformed(#[from] calendar_types::ParseError),
}

/// Loading proxies failed. Never fatal: the pool degrades to direct.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read proxy file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy listing request failed: {0}")]
    Listing(#[from] reqwest::Error),

    #[error("proxy listing returned {0}")]
    ListingStatus(StatusCode),

    /// No usable proxy was loaded
    #[error("no proxies loaded")]
    Empty,
}

/// Delivering a notification failed. Logged, never retried for the same date.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Invalid startup configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    InvalidMonth(#[from] calendar_types::InvalidMonth),

    #[error("poll interval must be at least one second")]
    ZeroInterval,

    #[error("fetch attempts per cycle must be at least 1")]
    ZeroAttempts,

    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("unknown time zone {0:?}")]
    InvalidTimezone(String),

    #[error("USE_WEBSHARE is enabled but API_KEY_WEBSHARE is not set")]
    MissingWebshareKey,
}
