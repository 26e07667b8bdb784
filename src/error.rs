//! Error types for media-dl
//!
//! This module provides the error taxonomy for the library:
//! - The top-level [`Error`] returned by every public operation
//! - [`QuotaError`] for requests denied by the quota ledger
//! - [`FetchError`] for categorized fetcher failures (network, content, policy)
//! - [`UserFacing`] for turning any terminal error into one chat message and a stable code

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
///
/// Each variant carries enough context to produce a user-facing message without
/// access to the request that caused it.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_file_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Request denied by the quota ledger before any transfer work
    #[error("quota denied: {0}")]
    Quota(#[from] QuotaError),

    /// No fetch strategy is registered for the URL
    #[error("no fetch strategy for host {host}")]
    NoStrategy {
        /// Hostname the lookup was made for
        host: String,
    },

    /// URL belongs to the primary streaming platform, which has its own entry point
    #[error("{host} is handled by the dedicated streaming downloader")]
    PrimaryPlatform {
        /// Hostname that matched the primary platform
        host: String,
    },

    /// The URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The content is genuinely unavailable (removed, private, geo-blocked)
    #[error("content unavailable: {0}")]
    ContentUnavailable(String),

    /// The content is refused by policy (live stream, HLS, playlist without balance)
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Network failure that exhausted the strategy chain without partial progress
    #[error("network failure: {message}")]
    TransientNetwork {
        /// Last network error message
        message: String,
    },

    /// The advertised source size is beyond the hard delivery ceiling
    #[error("source size {size} bytes exceeds the {ceiling} byte ceiling")]
    SizeExceeded {
        /// Advertised size of the source
        size: u64,
        /// Hard ceiling in effect
        ceiling: u64,
    },

    /// Every candidate strategy and format failed
    #[error("all download candidates failed: {last_error}")]
    DeliveryFailure {
        /// Error message from the last candidate attempted
        last_error: String,
        /// True when every candidate failed with an extraction failure
        extractor_stale: bool,
    },

    /// Transfer cancelled by the user
    #[error("transfer cancelled")]
    Cancelled,

    /// Chat transport failure
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found (user, resume token, cache entry)
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new requests
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// External tool execution failed (yt-dlp, ffmpeg, ffprobe)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Reasons the quota ledger denies a request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    /// The user is blocked by an administrator
    #[error("user is blocked")]
    UserBlocked,

    /// Free allowance and paid balance are both used up
    #[error("quota exhausted")]
    QuotaExhausted,

    /// Daily bandwidth cap reached
    #[error("daily bandwidth cap reached: used {used} of {cap} bytes")]
    BandwidthCapExceeded {
        /// Bytes transferred today
        used: u64,
        /// Configured daily cap
        cap: u64,
    },
}

/// Categorized failure reported by a fetcher
///
/// The category decides what the transfer engine does next: network failures are
/// retried in place and, once bytes exist on disk, turned into a resume snapshot;
/// content failures advance to the next candidate; unavailable and policy failures
/// stop the whole chain.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection reset, timeout, DNS failure, truncated read
    #[error("network failure after {bytes_written} bytes: {message}")]
    Network {
        /// Underlying error message
        message: String,
        /// Bytes already written to the working directory
        bytes_written: u64,
        /// Expected total size, when the source advertised one
        total: Option<u64>,
        /// Partially written file, if any
        partial: Option<PathBuf>,
    },

    /// Extraction or parsing failure, unsupported URL, access denied
    #[error("content failure: {message}")]
    Content {
        /// Underlying error message
        message: String,
        /// True when the extractor failed to understand the page
        extraction: bool,
    },

    /// The content does not exist or was removed
    #[error("content unavailable: {0}")]
    Unavailable(String),

    /// The content is refused by policy (e.g. live stream)
    #[error("policy violation: {0}")]
    Policy(String),

    /// The advertised total is above the hard ceiling
    #[error("source size {size} bytes exceeds the {ceiling} byte ceiling")]
    SizeExceeded {
        /// Advertised size
        size: u64,
        /// Hard ceiling
        ceiling: u64,
    },

    /// Cancellation was observed at a checkpoint
    #[error("transfer cancelled")]
    Cancelled,

    /// Local I/O failure in the working directory
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Build a network-class error with no bytes written
    pub fn network(message: impl Into<String>) -> Self {
        FetchError::Network {
            message: message.into(),
            bytes_written: 0,
            total: None,
            partial: None,
        }
    }

    /// Build a non-extraction content-class error
    pub fn content(message: impl Into<String>) -> Self {
        FetchError::Content {
            message: message.into(),
            extraction: false,
        }
    }

    /// Bytes already on disk when the error happened
    pub fn bytes_written(&self) -> u64 {
        match self {
            FetchError::Network { bytes_written, .. } => *bytes_written,
            _ => 0,
        }
    }
}

/// Structured notice shown to the user or sent to the archival sink
///
/// ```json
/// {
///   "code": "quota_exhausted",
///   "message": "You have no downloads left today.",
///   "details": null
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNotice {
    /// Machine-readable error code (e.g., "quota_exhausted", "no_strategy")
    pub code: String,

    /// Message suitable for sending to the end user
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Map errors to a user-facing message and a stable machine-readable code
pub trait UserFacing {
    /// Machine-readable error code
    fn error_code(&self) -> &str;

    /// Single message suitable for the chat
    fn user_message(&self) -> String;
}

impl UserFacing for Error {
    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Quota(e) => match e {
                QuotaError::UserBlocked => "user_blocked",
                QuotaError::QuotaExhausted => "quota_exhausted",
                QuotaError::BandwidthCapExceeded { .. } => "bandwidth_cap_exceeded",
            },
            Error::NoStrategy { .. } => "no_strategy",
            Error::PrimaryPlatform { .. } => "primary_platform",
            Error::InvalidUrl(_) => "invalid_url",
            Error::ContentUnavailable(_) => "content_unavailable",
            Error::PolicyViolation(_) => "policy_violation",
            Error::TransientNetwork { .. } => "transient_network",
            Error::SizeExceeded { .. } => "size_exceeded",
            Error::DeliveryFailure { .. } => "delivery_failure",
            Error::Cancelled => "cancelled",
            Error::Transport(_) => "transport_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Other(_) => "internal_error",
        }
    }

    fn user_message(&self) -> String {
        match self {
            Error::Quota(QuotaError::UserBlocked) => {
                "Your account is blocked. Contact an administrator.".to_string()
            }
            Error::Quota(QuotaError::QuotaExhausted) => {
                "You have no downloads left. Your free allowance renews daily, or you can buy credits."
                    .to_string()
            }
            Error::Quota(QuotaError::BandwidthCapExceeded { cap, .. }) => format!(
                "You reached today's bandwidth limit of {}. Try again tomorrow.",
                crate::utils::sizeof_fmt(*cap)
            ),
            Error::NoStrategy { host } => format!("Links from {} are not supported.", host),
            Error::PrimaryPlatform { .. } => {
                "Send this link directly to the bot to choose a quality.".to_string()
            }
            Error::InvalidUrl(_) => "That does not look like a valid link.".to_string(),
            Error::ContentUnavailable(_) => {
                "This content is unavailable (removed, private or restricted).".to_string()
            }
            Error::PolicyViolation(reason) => format!("This link cannot be downloaded: {}.", reason),
            Error::TransientNetwork { .. } => {
                "A network error interrupted the download. Please try again.".to_string()
            }
            Error::SizeExceeded { ceiling, .. } => format!(
                "The file is too large (limit {}).",
                crate::utils::sizeof_fmt(*ceiling)
            ),
            Error::DeliveryFailure { .. } => {
                "Download failed. Try again with /direct to fetch the raw file.".to_string()
            }
            Error::Cancelled => "Download cancelled.".to_string(),
            Error::ShuttingDown => "The service is restarting. Try again in a minute.".to_string(),
            _ => "Something went wrong. Please try again later.".to_string(),
        }
    }
}

impl From<&Error> for UserNotice {
    fn from(error: &Error) -> Self {
        let details = match error {
            Error::Quota(QuotaError::BandwidthCapExceeded { used, cap }) => {
                Some(serde_json::json!({ "used_bytes": used, "cap_bytes": cap }))
            }
            Error::SizeExceeded { size, ceiling } => {
                Some(serde_json::json!({ "size_bytes": size, "ceiling_bytes": ceiling }))
            }
            Error::DeliveryFailure {
                last_error,
                extractor_stale,
            } => Some(serde_json::json!({
                "last_error": last_error,
                "extractor_stale": extractor_stale,
            })),
            Error::NoStrategy { host } | Error::PrimaryPlatform { host } => {
                Some(serde_json::json!({ "host": host }))
            }
            _ => None,
        };

        UserNotice {
            code: error.error_code().to_string(),
            message: error.user_message(),
            details,
        }
    }
}
