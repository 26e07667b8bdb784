//! No-op media toolchain for graceful degradation

use super::traits::MediaTools;
use crate::types::MediaMetadata;
use async_trait::async_trait;
use std::path::Path;

/// Media toolchain used when ffmpeg/ffprobe are unavailable
///
/// Probing yields empty metadata, so captions carry no resolution or duration and
/// oversized results are split by byte ranges.
///
/// ```
/// use media_dl::media::{MediaTools, NoOpMediaTools};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tools = NoOpMediaTools;
/// let metadata = tools.probe(Path::new("video.mp4")).await?;
/// assert!(metadata.duration_secs.is_none());
/// assert!(!tools.can_cut());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpMediaTools;

#[async_trait]
impl MediaTools for NoOpMediaTools {
    async fn probe(&self, _path: &Path) -> crate::Result<MediaMetadata> {
        Ok(MediaMetadata::default())
    }

    async fn cut(
        &self,
        _source: &Path,
        _start_secs: f64,
        _length_secs: f64,
        _dest: &Path,
    ) -> crate::Result<()> {
        Err(crate::Error::ExternalTool(
            "Cutting media requires ffmpeg. \
             Configure ffmpeg_path in config or ensure ffmpeg is in PATH."
                .into(),
        ))
    }

    fn can_cut(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
