//! Media toolchain trait

use crate::types::MediaMetadata;
use async_trait::async_trait;
use std::path::Path;

/// Probe and cut media files
///
/// Implementations can shell out to external binaries or provide stub behavior
/// when no toolchain is installed.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Read dimensions, duration and title of a file
    ///
    /// Files that are not media return empty metadata rather than an error.
    async fn probe(&self, path: &Path) -> crate::Result<MediaMetadata>;

    /// Copy `length_secs` seconds starting at `start_secs` into `dest` without re-encoding
    async fn cut(
        &self,
        source: &Path,
        start_secs: f64,
        length_secs: f64,
        dest: &Path,
    ) -> crate::Result<()>;

    /// Whether [`cut`](MediaTools::cut) is available
    fn can_cut(&self) -> bool;

    /// Implementation name for logs
    fn name(&self) -> &'static str;
}
