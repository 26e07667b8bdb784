//! ffprobe/ffmpeg-backed media toolchain

use super::parser::parse_ffprobe_output;
use super::traits::MediaTools;
use crate::config::ExtractorConfig;
use crate::types::MediaMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Media toolchain using external `ffprobe` and `ffmpeg` binaries
///
/// Cuts use stream copy (`-c copy`), so splitting never re-encodes.
#[derive(Clone, Debug)]
pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegTools {
    /// Create with explicit binary paths
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }

    /// Use configured paths, falling back to a PATH search
    ///
    /// Returns `None` unless both binaries are found.
    pub fn from_config(config: &ExtractorConfig) -> Option<Self> {
        let ffmpeg = config
            .ffmpeg_path
            .clone()
            .or_else(|| which::which("ffmpeg").ok())?;
        let ffprobe = config
            .ffprobe_path
            .clone()
            .or_else(|| which::which("ffprobe").ok())?;
        Some(Self::new(ffmpeg, ffprobe))
    }
}

#[async_trait]
impl MediaTools for FfmpegTools {
    async fn probe(&self, path: &Path) -> crate::Result<MediaMetadata> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            // ffprobe refuses files it cannot demux; those are not media
            tracing::debug!(
                path = %path.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "ffprobe could not read file, treating as non-media"
            );
            return Ok(MediaMetadata::default());
        }

        parse_ffprobe_output(&output.stdout)
    }

    async fn cut(
        &self,
        source: &Path,
        start_secs: f64,
        length_secs: f64,
        dest: &Path,
    ) -> crate::Result<()> {
        let output = Command::new(&self.ffmpeg)
            .args(["-y", "-v", "error", "-ss"])
            .arg(format!("{:.3}", start_secs))
            .arg("-i")
            .arg(source)
            .arg("-t")
            .arg(format!("{:.3}", length_secs))
            .args(["-map", "0", "-c", "copy", "-avoid_negative_ts", "make_zero"])
            .arg(dest)
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute ffmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(crate::Error::ExternalTool(format!(
                "ffmpeg cut of {} failed: {}",
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn can_cut(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
