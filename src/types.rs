//! Core types for media-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Chat-platform user identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for UserId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for UserId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for UserId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Chat identifier (private chat, group or channel)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one message in one chat
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Chat the message lives in
    pub chat: ChatId,
    /// Message id within the chat
    pub message_id: i64,
}

impl MessageRef {
    /// Create a message reference
    pub fn new(chat: i64, message_id: i64) -> Self {
        Self {
            chat: ChatId(chat),
            message_id,
        }
    }

    /// Transfer identifier derived from this status message
    pub fn transfer_id(&self) -> TransferId {
        TransferId(format!("{}_{}", self.chat.0, self.message_id))
    }
}

/// Identifier of an active transfer, derived from chat + status message
///
/// Used as the key of the cancellation set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub String);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short opaque key of a resume snapshot
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(pub String);

impl std::fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result cache key
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requesting user as seen by the chat platform
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Platform user id
    pub id: UserId,
    /// Display name
    pub first_name: Option<String>,
    /// Handle without the leading '@'
    pub username: Option<String>,
}

impl UserProfile {
    /// Profile with only an id
    pub fn new(id: i64) -> Self {
        Self {
            id: UserId(id),
            first_name: None,
            username: None,
        }
    }
}

/// Stored quality preference
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Best available video
    #[default]
    High,
    /// Up to 720p
    Medium,
    /// Up to 480p
    Low,
    /// Audio only
    Audio,
    /// Asked per request
    Custom,
}

impl Quality {
    /// Storage label
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::High => "high",
            Quality::Medium => "medium",
            Quality::Low => "low",
            Quality::Audio => "audio",
            Quality::Custom => "custom",
        }
    }

    /// Parse a storage label, defaulting to `High` for unknown values
    pub fn parse(value: &str) -> Self {
        match value {
            "medium" => Quality::Medium,
            "low" => Quality::Low,
            "audio" => Quality::Audio,
            "custom" => Quality::Custom,
            _ => Quality::High,
        }
    }
}

/// Output format preference
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Deliver as video
    #[default]
    Video,
    /// Deliver as audio
    Audio,
    /// Deliver as a raw document
    Document,
}

impl OutputFormat {
    /// Storage label
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Video => "video",
            OutputFormat::Audio => "audio",
            OutputFormat::Document => "document",
        }
    }

    /// Parse a storage label, defaulting to `Video` for unknown values
    pub fn parse(value: &str) -> Self {
        match value {
            "audio" => OutputFormat::Audio,
            "document" => OutputFormat::Document,
            _ => OutputFormat::Video,
        }
    }
}

/// Quality explicitly chosen for one request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedQuality {
    /// 1080p
    #[serde(rename = "1080")]
    P1080,
    /// 720p
    #[serde(rename = "720")]
    P720,
    /// 480p
    #[serde(rename = "480")]
    P480,
    /// 360p
    #[serde(rename = "360")]
    P360,
    /// Audio only
    Audio,
}

impl RequestedQuality {
    /// Label as shown on quality buttons
    pub fn label(&self) -> &'static str {
        match self {
            RequestedQuality::P1080 => "1080",
            RequestedQuality::P720 => "720",
            RequestedQuality::P480 => "480",
            RequestedQuality::P360 => "360",
            RequestedQuality::Audio => "audio",
        }
    }

    /// Parse a button label
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "1080" => Some(RequestedQuality::P1080),
            "720" => Some(RequestedQuality::P720),
            "480" => Some(RequestedQuality::P480),
            "360" => Some(RequestedQuality::P360),
            "audio" => Some(RequestedQuality::Audio),
            _ => None,
        }
    }

    /// Maximum video height, None for audio
    pub fn height(&self) -> Option<u32> {
        match self {
            RequestedQuality::P1080 => Some(1080),
            RequestedQuality::P720 => Some(720),
            RequestedQuality::P480 => Some(480),
            RequestedQuality::P360 => Some(360),
            RequestedQuality::Audio => None,
        }
    }
}

/// Per-user preferences read from the settings store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Preferred quality
    pub quality: Quality,
    /// Preferred output format
    pub format: OutputFormat,
    /// Embed subtitles when available
    pub subtitles: bool,
    /// Maximum characters of the title shown in captions (None = no title)
    pub title_length: Option<usize>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            quality: Quality::High,
            format: OutputFormat::Video,
            subtitles: false,
            title_length: Some(100),
        }
    }
}

/// Remaining balance after a deduction or credit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Free allowance remaining today
    pub free: i64,
    /// Paid balance remaining
    pub paid: i64,
}

/// Full quota record of one user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Platform user id
    pub user_id: UserId,
    /// Display name
    pub first_name: Option<String>,
    /// Handle without '@'
    pub username: Option<String>,
    /// Free allowance remaining today
    pub free: i64,
    /// Paid balance
    pub paid: i64,
    /// Bytes transferred today
    pub bandwidth_used: u64,
    /// Bytes transferred since the account was created
    pub total_bandwidth: u64,
    /// Blocked by an administrator
    pub is_blocked: bool,
}

impl QuotaRecord {
    /// Fresh record with the given free allowance
    pub fn new(user_id: UserId, free: i64) -> Self {
        Self {
            user_id,
            first_name: None,
            username: None,
            free,
            paid: 0,
            bandwidth_used: 0,
            total_bandwidth: 0,
            is_blocked: false,
        }
    }

    /// Current balance
    pub fn balance(&self) -> Balance {
        Balance {
            free: self.free,
            paid: self.paid,
        }
    }
}

/// Totals across every user
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Number of users
    pub users: u64,
    /// Users with a paid balance above zero
    pub paid_users: u64,
    /// Blocked users
    pub blocked_users: u64,
    /// Sum of free allowances
    pub total_free: i64,
    /// Sum of paid balances
    pub total_paid: i64,
    /// Bytes transferred today by everyone
    pub bandwidth_today: u64,
    /// Bytes transferred by everyone, ever
    pub bandwidth_lifetime: u64,
    /// Cache entries stored
    pub cache_entries: u64,
}

/// How a file is presented by the chat transport
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Playable video
    Video,
    /// Silent looping clip
    Animation,
    /// Audio track
    Audio,
    /// Still image
    Photo,
    /// Raw file
    Document,
}

/// Descriptive metadata of a delivered result
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Width in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Height in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Duration in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Title, when the container carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Transport-specific handles of a delivered result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDescriptor {
    /// Kind the transport accepted
    pub kind: MediaKind,
    /// One handle per delivered part, in order
    pub file_ids: Vec<String>,
}

/// Result cache value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Transport handles
    pub descriptor: ResultDescriptor,
    /// Dimensions and duration of the original
    pub metadata: MediaMetadata,
    /// Caption attached to the designated part
    pub caption: Option<String>,
}

/// Fetch strategy variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Plain HTTP GET of a media file
    DirectHttp,
    /// Multi-format streaming extractor for the primary platform
    Streaming,
    /// Generic extractor for any supported site
    Extractor,
    /// pixeldrain.com API
    Pixeldrain,
    /// krakenfiles.com download form
    Krakenfiles,
    /// reddit.com post JSON
    Reddit,
}

impl StrategyKind {
    /// Stable name used in logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::DirectHttp => "direct_http",
            StrategyKind::Streaming => "streaming",
            StrategyKind::Extractor => "extractor",
            StrategyKind::Pixeldrain => "pixeldrain",
            StrategyKind::Krakenfiles => "krakenfiles",
            StrategyKind::Reddit => "reddit",
        }
    }

    /// True when the strategy accepts format specifiers
    pub fn selects_formats(&self) -> bool {
        matches!(self, StrategyKind::Streaming | StrategyKind::Extractor)
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful delivery
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Transfer identifier
    pub transfer: TransferId,
    /// Cache key of the result
    pub fingerprint: Fingerprint,
    /// Served from the result cache
    pub cached: bool,
    /// Handles of delivered messages, one per part
    pub messages: Vec<MessageRef>,
    /// Bytes transferred from the source (0 on cache hit)
    pub bytes: u64,
    /// Strategy that produced the result (None on cache hit)
    pub strategy: Option<StrategyKind>,
    /// Balance after deduction (None when quotas do not apply)
    pub balance: Option<Balance>,
}

/// How a request ended, when it did not end in a user-facing error
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Result delivered
    Delivered(DeliveryResult),
    /// User cancelled; not shown as a failure
    Cancelled {
        /// Transfer that was cancelled
        transfer: TransferId,
    },
    /// Network failure after partial progress; the user may resume
    Resumable {
        /// Token for `handle_resume`
        token: ResumeToken,
        /// Bytes on disk
        downloaded: u64,
        /// Expected total, if known
        total: Option<u64>,
    },
}

/// Event emitted during the request lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A strategy attempt began
    TransferStarted {
        /// Transfer identifier
        transfer: TransferId,
        /// Strategy in use
        strategy: StrategyKind,
        /// Format specifier, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },

    /// Transfer progress update
    Progress {
        /// Transfer identifier
        transfer: TransferId,
        /// Bytes on disk
        downloaded: u64,
        /// Expected total, if known
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        /// Average speed in bytes per second
        speed_bps: u64,
    },

    /// Served from the result cache
    CacheHit {
        /// Transfer identifier
        transfer: TransferId,
        /// Cache key
        fingerprint: Fingerprint,
    },

    /// Result delivered to the user
    Delivered {
        /// Transfer identifier
        transfer: TransferId,
        /// Bytes transferred from the source
        bytes: u64,
        /// Number of parts uploaded
        parts: usize,
    },

    /// Request failed with a terminal error
    Failed {
        /// Transfer identifier
        transfer: TransferId,
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },

    /// Transfer cancelled by the user
    Cancelled {
        /// Transfer identifier
        transfer: TransferId,
    },

    /// A resume snapshot was recorded
    ResumeAvailable {
        /// Transfer identifier
        transfer: TransferId,
        /// Resume token
        token: ResumeToken,
    },

    /// The extractor was upgraded
    ExtractorUpgraded {
        /// Version before the upgrade
        from: String,
        /// Version after the upgrade
        to: String,
    },

    /// The archival sink could not be reached
    ArchiveFailed {
        /// Error message
        error: String,
    },

    /// Daily quota reset ran
    QuotaReset {
        /// Number of user records reset
        users: u64,
    },
}

/// Files produced by a successful fetch
#[derive(Clone, Debug, PartialEq)]
pub struct FetchedMedia {
    /// Produced files, non-empty
    pub files: Vec<PathBuf>,
    /// Strategy that produced them
    pub strategy: StrategyKind,
    /// Format specifier that succeeded
    pub format: Option<String>,
    /// Total bytes across files
    pub bytes: u64,
}
