//! Upload with media kind fallback and caption building.

use super::MediaDownloader;
use crate::error::{Error, Result};
use crate::retry::download_with_retry;
use crate::transport::{FileSource, SentFile, TransportError, Upload};
use crate::types::{ChatId, MediaKind, MediaMetadata, OutputFormat};
use crate::utils;
use std::path::PathBuf;

const VIDEO_KINDS: &[MediaKind] = &[
    MediaKind::Video,
    MediaKind::Animation,
    MediaKind::Audio,
    MediaKind::Photo,
];
const AUDIO_KINDS: &[MediaKind] = &[MediaKind::Audio, MediaKind::Document];
const DOCUMENT_KINDS: &[MediaKind] = &[MediaKind::Document];

/// Kinds to try, in order, for an output format
pub(crate) fn kinds_for(format: OutputFormat) -> &'static [MediaKind] {
    match format {
        OutputFormat::Video => VIDEO_KINDS,
        OutputFormat::Audio => AUDIO_KINDS,
        OutputFormat::Document => DOCUMENT_KINDS,
    }
}

/// Caption for a delivered file: title, dimensions and duration, then the source link
///
/// The title is cut to `title_length` characters; `None` or zero leaves it out.
pub fn build_caption(url: &str, metadata: &MediaMetadata, title_length: Option<usize>) -> String {
    let mut lines = Vec::new();

    if let (Some(limit), Some(title)) = (title_length, metadata.title.as_deref())
        && limit > 0
        && !title.trim().is_empty()
    {
        lines.push(truncate_chars(title.trim(), limit));
    }

    let mut details = Vec::new();
    if let (Some(width), Some(height)) = (metadata.width, metadata.height) {
        details.push(format!("{}x{}", width, height));
    }
    if let Some(duration) = metadata.duration_secs
        && duration > 0.0
    {
        details.push(utils::timeof_fmt(duration));
    }
    if !details.is_empty() {
        lines.push(details.join(" | "));
    }

    lines.push(url.to_string());
    lines.join("\n")
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

impl MediaDownloader {
    /// Send one upload, waiting out rate limits
    pub(crate) async fn send_upload(&self, chat: ChatId, upload: Upload) -> Result<SentFile> {
        let transport = &self.transport;
        download_with_retry(&self.config.retry, || {
            let upload = upload.clone();
            async move { transport.send_file(chat, upload, None).await.map_err(Error::from) }
        })
        .await
    }

    /// Upload the parts of one file, falling back through `kinds` on rejection
    ///
    /// Once a kind is accepted, later parts start from it. The caption goes on the
    /// first part only.
    pub(crate) async fn upload_parts(
        &self,
        chat: ChatId,
        parts: &[PathBuf],
        kinds: &[MediaKind],
        caption: &str,
        metadata: &MediaMetadata,
    ) -> Result<(MediaKind, Vec<SentFile>)> {
        // Per-part durations differ from the original
        let part_metadata = if parts.len() > 1 {
            MediaMetadata {
                duration_secs: None,
                ..metadata.clone()
            }
        } else {
            metadata.clone()
        };

        let mut accepted = 0usize;
        let mut sent = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let mut delivered = None;
            let mut last_rejection = String::from("no media kind available");

            for (offset, &kind) in kinds.iter().enumerate().skip(accepted) {
                let upload = Upload {
                    kind,
                    source: FileSource::Path(part.clone()),
                    caption: (index == 0).then(|| caption.to_string()),
                    metadata: part_metadata.clone(),
                };
                match self.send_upload(chat, upload).await {
                    Ok(file) => {
                        accepted = offset;
                        delivered = Some(file);
                        break;
                    }
                    Err(Error::Transport(TransportError::Rejected { kind, reason })) => {
                        tracing::warn!(file = %part.display(), kind = ?kind, reason = %reason, "Upload rejected, trying next kind");
                        last_rejection = format!("{:?} rejected: {}", kind, reason);
                    }
                    Err(e) => return Err(e),
                }
            }

            match delivered {
                Some(file) => sent.push(file),
                None => {
                    return Err(Error::DeliveryFailure {
                        last_error: last_rejection,
                        extractor_stale: false,
                    });
                }
            }
        }

        let kind = kinds.get(accepted).copied().unwrap_or(MediaKind::Document);
        Ok((kind, sent))
    }
}
