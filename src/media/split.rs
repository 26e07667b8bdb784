//! Splitting results above the transport's single-file limit

use super::traits::MediaTools;
use crate::types::MediaMetadata;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Re-cut rounds with one more part before falling back to byte ranges
const MAX_CUT_ROUNDS: usize = 4;

/// How a file is divided for delivery
#[derive(Clone, Debug, PartialEq)]
pub enum SplitPlan {
    /// Fits the limit as is
    Whole,
    /// Duration-proportional container cuts, as `(start_secs, length_secs)`
    ByDuration(Vec<(f64, f64)>),
    /// Fixed-size byte ranges
    ByBytes {
        /// Bytes per part (the last one may be shorter)
        part_size: u64,
        /// Number of parts
        parts: u64,
    },
}

/// Bytes per part: `limit * headroom`, kept strictly below `limit`
fn part_target(limit: u64, headroom: f64) -> u64 {
    ((limit as f64 * headroom) as u64).clamp(1, limit.saturating_sub(1).max(1))
}

/// Decide how to divide a file of `size` bytes
///
/// Each part aims at `limit * headroom` bytes, and always below `limit`. Media with a known duration is cut into
/// equal time slices when a cutter is available; everything else is split by bytes.
pub fn plan_parts(
    size: u64,
    duration_secs: Option<f64>,
    limit: u64,
    headroom: f64,
    can_cut: bool,
) -> SplitPlan {
    if size <= limit {
        return SplitPlan::Whole;
    }

    let target = part_target(limit, headroom);
    let parts = size.div_ceil(target);

    match duration_secs {
        Some(duration) if can_cut && duration > 0.0 => {
            SplitPlan::ByDuration(time_slices(duration, parts as usize))
        }
        _ => SplitPlan::ByBytes {
            part_size: target,
            parts,
        },
    }
}

fn time_slices(duration: f64, parts: usize) -> Vec<(f64, f64)> {
    let slice = duration / parts as f64;
    (0..parts)
        .map(|i| {
            let start = slice * i as f64;
            let length = if i + 1 == parts {
                duration - start
            } else {
                slice
            };
            (start, length)
        })
        .collect()
}

/// Split `source` into deliverable parts, each below `limit`
///
/// Returns the source itself when it already fits. Container cuts land on keyframes,
/// so a part can overshoot its share; when that pushes a part to the limit, the file is
/// re-cut with one more part. Parts are written next to the source.
pub async fn split_file(
    tools: &dyn MediaTools,
    source: &Path,
    metadata: &MediaMetadata,
    limit: u64,
    headroom: f64,
) -> crate::Result<Vec<PathBuf>> {
    let size = tokio::fs::metadata(source).await?.len();

    match plan_parts(size, metadata.duration_secs, limit, headroom, tools.can_cut()) {
        SplitPlan::Whole => Ok(vec![source.to_path_buf()]),
        SplitPlan::ByBytes { part_size, parts } => {
            tracing::info!(file = %source.display(), size, parts, "Splitting by byte ranges");
            split_bytes(source, part_size).await
        }
        SplitPlan::ByDuration(slices) => {
            let duration = metadata.duration_secs.unwrap_or_default();
            let mut count = slices.len();

            for round in 0..MAX_CUT_ROUNDS {
                tracing::info!(file = %source.display(), size, parts = count, round, "Splitting by duration");
                let parts = cut_parts(tools, source, &time_slices(duration, count)).await?;

                let mut oversized = false;
                for part in &parts {
                    if tokio::fs::metadata(part).await?.len() >= limit {
                        oversized = true;
                        break;
                    }
                }
                if !oversized {
                    return Ok(parts);
                }

                tracing::debug!(file = %source.display(), parts = count, "A part reached the limit, re-cutting with one more");
                remove_parts(&parts).await;
                count += 1;
            }

            tracing::warn!(file = %source.display(), "Container cuts kept overshooting, splitting by byte ranges");
            split_bytes(source, part_target(limit, headroom)).await
        }
    }
}

async fn cut_parts(
    tools: &dyn MediaTools,
    source: &Path,
    slices: &[(f64, f64)],
) -> crate::Result<Vec<PathBuf>> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "media".to_string());
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let dir = source.parent().unwrap_or_else(|| Path::new("."));

    let mut parts = Vec::with_capacity(slices.len());
    for (i, (start, length)) in slices.iter().enumerate() {
        let dest = dir.join(format!("{}.part{}{}", stem, i + 1, ext));
        if let Err(e) = tools.cut(source, *start, *length, &dest).await {
            remove_parts(&parts).await;
            return Err(e);
        }
        parts.push(dest);
    }
    Ok(parts)
}

async fn split_bytes(source: &Path, part_size: u64) -> crate::Result<Vec<PathBuf>> {
    let name = source
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let dir = source.parent().unwrap_or_else(|| Path::new("."));

    let mut input = tokio::fs::File::open(source).await?;
    let mut parts = Vec::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let dest = dir.join(format!("{}.{:03}", name, parts.len() + 1));
        let mut output = tokio::fs::File::create(&dest).await?;
        let mut written = 0u64;

        while written < part_size {
            let want = buffer.len().min((part_size - written) as usize);
            let n = input.read(&mut buffer[..want]).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buffer[..n]).await?;
            written += n as u64;
        }
        output.flush().await?;

        if written == 0 {
            drop(output);
            tokio::fs::remove_file(&dest).await.ok();
            break;
        }
        parts.push(dest);
        if written < part_size {
            break;
        }
    }

    Ok(parts)
}

async fn remove_parts(parts: &[PathBuf]) {
    for part in parts {
        if let Err(e) = tokio::fs::remove_file(part).await {
            tracing::debug!(part = %part.display(), error = %e, "Failed to remove split part");
        }
    }
}
