//! Fetch strategies and the registry that picks them.
//!
//! - [`registry`] - Host suffix table mapping URLs to ordered strategy lists
//! - [`formats`] - Format candidate ordering for extractor-backed strategies
//! - [`http`] - Direct HTTP streaming with range resume
//! - [`ytdlp`] - yt-dlp subprocess fetcher (streaming platform and generic sites)
//! - [`pixeldrain`], [`krakenfiles`], [`reddit`] - Site-specific resolvers feeding [`http`]

pub mod formats;
pub mod http;
pub mod krakenfiles;
pub mod pixeldrain;
pub mod reddit;
pub mod registry;
pub mod ytdlp;

pub use formats::{FormatCandidate, QualitySelection};
pub use http::HttpFetcher;
pub use krakenfiles::KrakenfilesFetcher;
pub use pixeldrain::PixeldrainFetcher;
pub use reddit::RedditFetcher;
pub use registry::StrategyRegistry;
pub use ytdlp::YtDlpFetcher;

use crate::error::FetchError;
use crate::types::StrategyKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Progress sink and cancellation probe handed to a fetcher
///
/// Fetchers call [`on_progress`](TransferObserver::on_progress) at every chunk boundary
/// and every progress line. An error return (cancellation, size ceiling) must abort the
/// fetch immediately and be propagated unchanged.
pub trait TransferObserver: Send + Sync {
    /// Report progress; `Err` means stop now
    fn on_progress(&self, downloaded: u64, total: Option<u64>) -> Result<(), FetchError>;

    /// Cheap cancellation probe for loops without byte progress
    fn is_cancelled(&self) -> bool;
}

/// One fetch attempt
pub struct FetchJob<'a> {
    /// Source URL
    pub url: &'a str,
    /// Format selector, None for unconstrained
    pub format: Option<&'a str>,
    /// Directory the produced files must land in
    pub output_dir: &'a Path,
    /// Progress sink and cancellation probe
    pub observer: &'a dyn TransferObserver,
    /// Extract an audio track only
    pub audio_only: bool,
    /// Allow the extractor to expand playlists
    pub allow_playlist: bool,
    /// Partial file left by an interrupted attempt
    pub resume_from: Option<&'a Path>,
}

/// A fetch strategy implementation
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Strategy this fetcher implements
    fn kind(&self) -> StrategyKind;

    /// Fetch into `job.output_dir` and return the produced files
    async fn fetch(&self, job: &FetchJob<'_>) -> Result<Vec<PathBuf>, FetchError>;
}

/// List non-empty regular files in a directory, skipping extractor temp files
pub(crate) async fn produced_files(dir: &Path) -> Result<Vec<PathBuf>, FetchError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".part") || name.ends_with(".ytdl") || name.starts_with('.') {
            continue;
        }
        let meta = entry.metadata().await?;
        if meta.is_file() && meta.len() > 0 {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
