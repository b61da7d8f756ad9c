//! Error types for the Otakon unified cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache, migration and sync layers
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Tier Errors
    // =========================================================================
    /// Transient network failure talking to a tier (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Tier storage quota exhausted (retryable after eviction)
    #[error("Quota exceeded in {tier} tier: need {needed} bytes, {available} available")]
    QuotaExceeded {
        tier: String,
        needed: u64,
        available: u64,
    },

    /// Session rejected by the remote tier; requires re-authentication
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Content type tag not present in the policy table
    #[error("Unknown content type: {0}")]
    UnknownContentType(String),

    // =========================================================================
    // Migration / Sync Errors
    // =========================================================================
    /// Some keys failed to migrate; the migration itself still completed
    #[error("Migration for user {user_id} completed with {failed} failed keys")]
    MigrationPartialFailure { user_id: String, failed: usize },

    /// Migration already in progress
    #[error("Migration already in progress for user: {user_id}")]
    MigrationInProgress { user_id: String },

    /// Operation was cancelled (logout, navigation, superseded sync)
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // =========================================================================
    // Plumbing
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operation may succeed if simply attempted again.
    ///
    /// Quota errors are not included: they need an eviction first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Whether the caller must re-authenticate before retrying.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// Whether the error is a quota failure.
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::QuotaExceeded { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return Error::Network(e.to_string());
        }
        match e.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Error::Auth(e.to_string())
            }
            Some(status) if status.is_server_error() => Error::Network(e.to_string()),
            _ if e.is_decode() => Error::Internal(format!("Malformed remote response: {}", e)),
            _ => Error::Network(e.to_string()),
        }
    }
}
