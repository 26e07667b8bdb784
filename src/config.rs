//! Configuration types for media-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Delivery behavior (working area, size limits, progress cadence, archival sink)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Working directory for in-flight transfers (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Largest single file the chat transport accepts (default: 2000 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Hard ceiling as a multiple of `max_file_size` (default: 4)
    ///
    /// Sources advertising more than `max_file_size * hard_ceiling_multiple` bytes are
    /// aborted before any byte is written. Anything between the two is split after download.
    #[serde(default = "default_hard_ceiling_multiple")]
    pub hard_ceiling_multiple: u64,

    /// Fraction of `max_file_size` each split part aims for (default: 0.95)
    #[serde(default = "default_split_headroom")]
    pub split_headroom: f64,

    /// Minimum interval between progress message edits (default: 5 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,

    /// Total timeout for one HTTP transfer (default: 15 minutes)
    #[serde(default = "default_network_timeout", with = "duration_serde")]
    pub network_timeout: Duration,

    /// TCP connect timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// User-Agent sent by the HTTP fetchers
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Chat that receives a copy of every delivery and failure reports (None = disabled)
    #[serde(default)]
    pub archive_chat: Option<i64>,

    /// Accept HLS manifests (.m3u8) (default: false)
    #[serde(default)]
    pub allow_hls: bool,

    /// Paid balance a user needs above this value to download playlists (default: 5)
    #[serde(default = "default_playlist_min_paid")]
    pub playlist_min_paid: i64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            max_file_size: default_max_file_size(),
            hard_ceiling_multiple: default_hard_ceiling_multiple(),
            split_headroom: default_split_headroom(),
            progress_interval: default_progress_interval(),
            network_timeout: default_network_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
            archive_chat: None,
            allow_hls: false,
            playlist_min_paid: default_playlist_min_paid(),
        }
    }
}

impl DeliveryConfig {
    /// Hard ceiling in bytes above which a transfer is aborted early
    pub fn hard_ceiling(&self) -> u64 {
        self.max_file_size.saturating_mul(self.hard_ceiling_multiple)
    }
}

/// Quota accounting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Enforce quotas at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Free downloads granted per day (default: 5)
    #[serde(default = "default_free_daily")]
    pub free_daily: i64,

    /// Daily bandwidth cap per user in bytes (default: 2 GiB, None = unlimited)
    #[serde(default = "default_daily_bandwidth_cap")]
    pub daily_bandwidth_cap: Option<u64>,

    /// Users that bypass quota checks (owners, admins)
    #[serde(default)]
    pub exempt_users: Vec<i64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            free_daily: default_free_daily(),
            daily_bandwidth_cap: default_daily_bandwidth_cap(),
            exempt_users: vec![],
        }
    }
}

/// External extractor and media tools
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Path to yt-dlp (None = search PATH)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Path to ffmpeg (None = search PATH)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to ffprobe (None = search PATH)
    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    /// Netscape cookies file handed to the extractor
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,

    /// Preferred audio container for audio-only requests (default: "m4a")
    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    /// Upgrade the extractor once when every candidate fails to extract (default: true)
    #[serde(default = "default_true")]
    pub auto_upgrade: bool,

    /// Send unknown hosts to the generic extractor instead of failing (default: true)
    #[serde(default = "default_true")]
    pub extractor_fallback: bool,

    /// Parallel fragment downloads for segmented streams (default: 16)
    #[serde(default = "default_concurrent_fragments")]
    pub concurrent_fragments: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            ffprobe_path: None,
            cookies_file: None,
            audio_format: default_audio_format(),
            auto_upgrade: true,
            extractor_fallback: true,
            concurrent_fragments: default_concurrent_fragments(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Data storage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./media-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Daily quota reset schedule
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Local wall-clock time of the daily reset, "HH:MM" (default: "00:00")
    #[serde(default = "default_daily_reset_time")]
    pub daily_reset_time: String,

    /// Run the daily reset task (default: true)
    #[serde(default = "default_true")]
    pub daily_reset_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_reset_time: default_daily_reset_time(),
            daily_reset_enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Parse `daily_reset_time` into a wall-clock time
    pub fn reset_time(&self) -> Result<chrono::NaiveTime> {
        chrono::NaiveTime::parse_from_str(&self.daily_reset_time, "%H:%M").map_err(|e| {
            Error::Config {
                message: format!("invalid daily_reset_time '{}': {}", self.daily_reset_time, e),
                key: Some("daily_reset_time".to_string()),
            }
        })
    }
}

/// Main configuration for MediaDownloader
///
/// Sub-configs are flattened, so the JSON format is one flat object:
/// - [`delivery`](DeliveryConfig) - working area, size limits, archival sink
/// - [`quota`](QuotaConfig) - allowance and exemptions
/// - [`extractor`](ExtractorConfig) - yt-dlp and ffmpeg tooling
/// - [`scheduler`](SchedulerConfig) - daily reset
///
/// `retry` and `persistence` stay nested.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Delivery behavior
    #[serde(flatten)]
    pub delivery: DeliveryConfig,

    /// Quota accounting
    #[serde(flatten)]
    pub quota: QuotaConfig,

    /// Extractor and media tools
    #[serde(flatten)]
    pub extractor: ExtractorConfig,

    /// Daily reset schedule
    #[serde(flatten)]
    pub scheduler: SchedulerConfig,

    /// Retry behavior for transient network failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.delivery.max_file_size == 0 {
            return Err(Error::Config {
                message: "max_file_size must be greater than zero".to_string(),
                key: Some("max_file_size".to_string()),
            });
        }
        if self.delivery.hard_ceiling_multiple < 1 {
            return Err(Error::Config {
                message: "hard_ceiling_multiple must be at least 1".to_string(),
                key: Some("hard_ceiling_multiple".to_string()),
            });
        }
        // Parts must land strictly below the limit, so 1.0 is excluded
        if !(0.1..1.0).contains(&self.delivery.split_headroom) {
            return Err(Error::Config {
                message: "split_headroom must be at least 0.1 and below 1.0".to_string(),
                key: Some("split_headroom".to_string()),
            });
        }
        if self.quota.free_daily < 0 {
            return Err(Error::Config {
                message: "free_daily cannot be negative".to_string(),
                key: Some("free_daily".to_string()),
            });
        }
        self.scheduler.reset_time()?;
        Ok(())
    }

    /// Temporary directory
    pub fn temp_dir(&self) -> &PathBuf {
        &self.delivery.temp_dir
    }

    /// True when quotas apply to this user
    pub fn is_metered(&self, user_id: i64) -> bool {
        self.quota.enabled && !self.quota.exempt_users.contains(&user_id)
    }
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_max_file_size() -> u64 {
    2000 * 1024 * 1024
}

fn default_hard_ceiling_multiple() -> u64 {
    4
}

fn default_split_headroom() -> f64 {
    0.95
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_network_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string()
}

fn default_playlist_min_paid() -> i64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_free_daily() -> i64 {
    5
}

fn default_daily_bandwidth_cap() -> Option<u64> {
    Some(2 * 1024 * 1024 * 1024)
}

fn default_audio_format() -> String {
    "m4a".to_string()
}

fn default_concurrent_fragments() -> u32 {
    16
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./media-dl.db")
}

fn default_daily_reset_time() -> String {
    "00:00".to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
