//! Format candidate selection for extractor-backed strategies.
//!
//! Candidates are tried in order and the first one producing a non-empty file wins:
//! explicit request quality, stored preference, safe fallbacks, then unconstrained.

use crate::types::{OutputFormat, Quality, RequestedQuality, UserSettings};
use serde::{Deserialize, Serialize};

/// mp4/m4a without AV1 or VP9 so every client can play it
const SAFE_MP4: &str =
    "bestvideo[ext=mp4][vcodec!*=av01][vcodec!*=vp09]+bestaudio[ext=m4a]/bestvideo+bestaudio";

/// H.264/AAC, falling back to any single-file stream
const SAFE_AVC: &str = "bestvideo[vcodec^=avc]+bestaudio[acodec^=mp4a]/best[vcodec^=avc]/best";

/// One format specifier handed to the extractor
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatCandidate {
    /// Extractor format selector expression
    Spec(String),
    /// Let the extractor pick
    Unconstrained,
}

impl FormatCandidate {
    /// Selector string, None for unconstrained
    pub fn as_spec(&self) -> Option<&str> {
        match self {
            FormatCandidate::Spec(spec) => Some(spec),
            FormatCandidate::Unconstrained => None,
        }
    }

    /// Build from an optional selector string
    pub fn from_spec(spec: Option<String>) -> Self {
        match spec {
            Some(spec) => FormatCandidate::Spec(spec),
            None => FormatCandidate::Unconstrained,
        }
    }
}

/// Format selector capped at a video height
pub fn height_capped(height: u32) -> String {
    format!(
        "bestvideo[ext=mp4][height<={h}]+bestaudio[ext=m4a]/bestvideo[height<={h}]+bestaudio/best",
        h = height
    )
}

/// Audio-only selectors, preferred container first
pub fn audio_candidates(audio_format: &str) -> Vec<FormatCandidate> {
    let preferred = if audio_format.is_empty() {
        "m4a"
    } else {
        audio_format
    };
    vec![
        FormatCandidate::Spec(format!("bestaudio[ext={}]", preferred)),
        FormatCandidate::Spec("bestaudio[ext=mp3]".to_string()),
        FormatCandidate::Spec("bestaudio[ext=opus]".to_string()),
        FormatCandidate::Spec("bestaudio[ext=webm]".to_string()),
        FormatCandidate::Spec("bestaudio".to_string()),
    ]
}

/// Generic safe fallbacks followed by the unconstrained candidate
pub fn fallback_candidates() -> Vec<FormatCandidate> {
    vec![
        FormatCandidate::Spec(SAFE_MP4.to_string()),
        FormatCandidate::Spec(SAFE_AVC.to_string()),
        FormatCandidate::Unconstrained,
    ]
}

/// Quality and output format of one request
///
/// Combines the user's stored preference with an optional explicit choice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualitySelection {
    /// Stored quality preference
    pub stored: Quality,
    /// Stored format preference
    pub format: OutputFormat,
    /// Quality chosen for this request
    pub explicit: Option<RequestedQuality>,
}

impl QualitySelection {
    /// Combine settings with an explicit choice
    pub fn new(settings: &UserSettings, explicit: Option<RequestedQuality>) -> Self {
        Self {
            stored: settings.quality,
            format: settings.format,
            explicit,
        }
    }

    /// Quality component of the cache fingerprint
    pub fn cache_label(&self) -> String {
        match self.explicit {
            Some(explicit) => format!("{}:{}", self.stored.as_str(), explicit.label()),
            None => self.stored.as_str().to_string(),
        }
    }

    /// Format the result is delivered as
    pub fn output_format(&self) -> OutputFormat {
        if self.is_audio() {
            OutputFormat::Audio
        } else {
            self.format
        }
    }

    /// Whether only an audio track is wanted
    pub fn is_audio(&self) -> bool {
        match self.explicit {
            Some(explicit) => explicit == RequestedQuality::Audio,
            None => self.stored == Quality::Audio || self.format == OutputFormat::Audio,
        }
    }

    /// Ordered, de-duplicated candidate list
    pub fn candidates(&self, audio_format: &str) -> Vec<FormatCandidate> {
        let mut ordered: Vec<FormatCandidate> = Vec::new();

        match self.explicit {
            Some(RequestedQuality::Audio) => ordered.extend(audio_candidates(audio_format)),
            Some(explicit) => {
                if let Some(height) = explicit.height() {
                    ordered.push(FormatCandidate::Spec(height_capped(height)));
                }
            }
            None => {}
        }

        if self.explicit != Some(RequestedQuality::Audio) {
            match (self.stored, self.format) {
                (Quality::Audio, _) | (_, OutputFormat::Audio) if self.explicit.is_none() => {
                    ordered.extend(audio_candidates(audio_format))
                }
                (Quality::Medium, _) => ordered.push(FormatCandidate::Spec(height_capped(720))),
                (Quality::Low, _) => ordered.push(FormatCandidate::Spec(height_capped(480))),
                _ => {}
            }
        }

        ordered.extend(fallback_candidates());

        let mut seen = std::collections::HashSet::new();
        ordered.retain(|candidate| seen.insert(candidate.clone()));
        ordered
    }
}
