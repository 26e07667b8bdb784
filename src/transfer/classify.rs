//! Sorting fetch failures into network, content and policy classes.
//!
//! Extractors only hand back text, so classification is by known substrings. The
//! HTTP client exposes typed errors, which are checked first.

use crate::error::FetchError;
use std::path::PathBuf;

/// Substrings of network-class failures
pub const NETWORK_PATTERNS: &[&str] = &[
    "Connection reset",
    "Connection refused",
    "Connection timed out",
    "timed out",
    "Unable to download",
    "urlopen error",
    "Network is unreachable",
    "No route to host",
    "Name or service not known",
    "Temporary failure in name resolution",
    "Read timed out",
    "Connection aborted",
    "RemoteDisconnected",
    "IncompleteRead",
    "ConnectionResetError",
    "socket.timeout",
    "HTTPSConnectionPool",
];

/// Substrings of extractor failures (site layout changed, extractor too old)
pub const EXTRACTION_PATTERNS: &[&str] = &[
    "Unable to extract",
    "unable to extract",
    "Unsupported URL",
    "ExtractorError",
    "Failed to parse JSON",
    "Requested format is not available",
];

/// Substrings of content that is gone for good
pub const UNAVAILABLE_PATTERNS: &[&str] = &[
    "Video unavailable",
    "This video is not available",
    "Private video",
    "This video has been removed",
    "account has been terminated",
    "HTTP Error 404",
    "HTTP Error 410",
];

/// Substrings of content refused by policy
pub const POLICY_PATTERNS: &[&str] = &[
    "is live",
    "live event",
    "does not pass filter (!is_live)",
    "Premieres in",
];

/// Failure class of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient network trouble
    Network,
    /// Extractor could not understand the page
    Extraction,
    /// Content removed or private
    Unavailable,
    /// Refused by policy
    Policy,
    /// Any other content failure (access denied, bad response)
    Content,
}

fn contains_any(message: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| message.contains(p))
}

/// Classify an error message
///
/// Policy and unavailability win over network noise in the same output, and network
/// wins over extraction so "Unable to download webpage: timed out" stays retryable.
pub fn classify_message(message: &str) -> ErrorClass {
    if contains_any(message, POLICY_PATTERNS) {
        ErrorClass::Policy
    } else if contains_any(message, UNAVAILABLE_PATTERNS) {
        ErrorClass::Unavailable
    } else if contains_any(message, NETWORK_PATTERNS) {
        ErrorClass::Network
    } else if contains_any(message, EXTRACTION_PATTERNS) {
        ErrorClass::Extraction
    } else {
        ErrorClass::Content
    }
}

/// Build a categorized error from a message and the transfer state at failure time
pub fn fetch_error_from_message(
    message: impl Into<String>,
    bytes_written: u64,
    total: Option<u64>,
    partial: Option<PathBuf>,
) -> FetchError {
    let message = message.into();
    match classify_message(&message) {
        ErrorClass::Network => FetchError::Network {
            message,
            bytes_written,
            total,
            partial,
        },
        ErrorClass::Extraction => FetchError::Content {
            message,
            extraction: true,
        },
        ErrorClass::Unavailable => FetchError::Unavailable(message),
        ErrorClass::Policy => FetchError::Policy(message),
        ErrorClass::Content => FetchError::Content {
            message,
            extraction: false,
        },
    }
}

/// Whether a reqwest error is network-class
pub fn is_network_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_timeout()
        || e.is_connect()
        || e.is_request()
        || e.is_body()
        || contains_any(&e.to_string(), NETWORK_PATTERNS)
}

/// Categorize an HTTP status returned by a source
pub fn fetch_error_from_status(status: reqwest::StatusCode, url: &str) -> FetchError {
    let message = format!("HTTP {} for {}", status, url);
    match status.as_u16() {
        404 | 410 | 451 => FetchError::Unavailable(message),
        408 | 429 | 500..=599 => FetchError::network(message),
        _ => FetchError::content(message),
    }
}
