//! Media inspection and container-level splitting
//!
//! The orchestrator needs two things from the media toolchain: metadata for captions and
//! upload hints, and a lossless cut to split results above the transport's single-file
//! limit. Both sit behind the [`MediaTools`] trait:
//!
//! - [`FfmpegTools`]: Uses external `ffprobe`/`ffmpeg` binaries
//! - [`NoOpMediaTools`]: Stub when the binaries are unavailable; results without a
//!   duration fall back to byte-range parts
//!
//! ## Usage
//!
//! ```no_run
//! use media_dl::media::{FfmpegTools, MediaTools, split_file};
//! use media_dl::config::ExtractorConfig;
//! use std::path::Path;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tools = FfmpegTools::from_config(&ExtractorConfig::default())
//!     .expect("ffmpeg not found");
//!
//! let source = Path::new("video.mp4");
//! let metadata = tools.probe(source).await?;
//! let parts = split_file(&tools, source, &metadata, 2000 * 1024 * 1024, 0.95).await?;
//! println!("{} part(s)", parts.len());
//! # Ok(())
//! # }
//! ```

mod ffmpeg;
mod noop;
pub(crate) mod parser;
mod split;
mod traits;

pub use ffmpeg::FfmpegTools;
pub use noop::NoOpMediaTools;
pub use parser::parse_ffprobe_output;
pub use split::{SplitPlan, plan_parts, split_file};
pub use traits::MediaTools;
