//! Parser for ffprobe JSON output

use crate::types::MediaMetadata;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    #[serde(default, alias = "TITLE")]
    title: Option<String>,
}

fn parse_duration(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output
///
/// Duration comes from the container, then from the first stream that has one.
/// Dimensions come from the first video stream.
pub fn parse_ffprobe_output(stdout: &[u8]) -> crate::Result<MediaMetadata> {
    let output: ProbeOutput = serde_json::from_slice(stdout)?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let duration_secs = output
        .format
        .as_ref()
        .and_then(|f| parse_duration(f.duration.as_deref()))
        .or_else(|| {
            output
                .streams
                .iter()
                .find_map(|s| parse_duration(s.duration.as_deref()))
        });

    let title = output
        .format
        .and_then(|f| f.tags)
        .and_then(|t| t.title)
        .filter(|t| !t.trim().is_empty());

    Ok(MediaMetadata {
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        duration_secs,
        title,
    })
}
