//! Utility functions for sizes, durations, filenames and URL inspection

use std::path::Path;

/// Extensions treated as directly downloadable media
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "m4v", "flv", "3gp", "mp3", "m4a", "aac", "ogg", "opus",
    "flac", "wav", "gif", "jpg", "jpeg", "png", "webp", "zip", "rar", "7z", "pdf", "apk",
];

/// Human-readable byte size (e.g. "1.5 MiB")
pub fn sizeof_fmt(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Human-readable duration: "m:ss" or "h:mm:ss"
pub fn timeof_fmt(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Whether a URL path ends in a known media/file extension
pub fn is_direct_media_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            MEDIA_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Whether the URL points at an HLS manifest
pub fn is_hls_url(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase().ends_with(".m3u8"))
        .unwrap_or(false)
}

/// Whether the URL points at a playlist or channel rather than one item
pub fn is_playlist_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let path = parsed.path();
    path.starts_with("/playlist")
        || path.starts_with("/channel/")
        || parsed.query_pairs().any(|(key, _)| key == "list")
}

/// Strip characters that are unsafe in filenames
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// File extension for a Content-Type header value
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    let ext = match mime.as_str() {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "video/quicktime" => "mov",
        "audio/mpeg" => "mp3",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/ogg" => "ogg",
        "image/gif" => "gif",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        _ => return None,
    };
    Some(ext)
}

/// Extract a filename (with extension) from an HTTP response
///
/// Tries the Content-Disposition header first, then the last URL path segment,
/// then falls back to "download". A missing extension is filled in from Content-Type.
pub fn extract_filename_from_response(response: &reqwest::Response, url: &str) -> String {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let disposition = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    filename_from_parts(disposition.as_deref(), content_type.as_deref(), url)
}

fn filename_from_parts(disposition: Option<&str>, content_type: Option<&str>, url: &str) -> String {
    let mut name = disposition.and_then(filename_from_disposition);

    // Fall back to the last URL path segment
    if name.is_none()
        && let Ok(parsed_url) = url::Url::parse(url)
        && let Some(mut segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && !last_segment.is_empty()
    {
        let decoded = urlencoding::decode(last_segment)
            .map(|d| d.to_string())
            .unwrap_or_else(|_| last_segment.to_string());
        name = Some(decoded);
    }

    let mut name = sanitize_filename(&name.unwrap_or_else(|| "download".to_string()));

    if Path::new(&name).extension().is_none()
        && let Some(ext) = content_type.and_then(extension_for_content_type)
    {
        name = format!("{}.{}", name, ext);
    }
    name
}

fn filename_from_disposition(value: &str) -> Option<String> {
    // attachment; filename="file.mp4" or filename*=UTF-8''file.mp4
    let mut plain = None;
    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'encoded-filename takes precedence
            if let Some(idx) = encoded.rfind('\'')
                && let Ok(decoded) = urlencoding::decode(&encoded[idx + 1..])
            {
                return Some(decoded.to_string());
            }
        } else if let Some(raw) = part.strip_prefix("filename=") {
            plain = Some(raw.trim_matches('"').to_string());
        }
    }
    plain.filter(|n| !n.is_empty())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_formatted_in_binary_units() {
        assert_eq!(sizeof_fmt(512), "512 B");
        assert_eq!(sizeof_fmt(1536), "1.5 KiB");
        assert_eq!(sizeof_fmt(50 * 1024 * 1024), "50.0 MiB");
        assert_eq!(sizeof_fmt(2 * 1024 * 1024 * 1024), "2.0 GiB");
    }

    #[test]
    fn durations_are_formatted_as_clock() {
        assert_eq!(timeof_fmt(5.0), "0:05");
        assert_eq!(timeof_fmt(205.4), "3:25");
        assert_eq!(timeof_fmt(3723.0), "1:02:03");
    }

    #[test]
    fn direct_media_detection_ignores_case_and_query() {
        assert!(is_direct_media_path("/files/Clip.MP4"));
        assert!(is_direct_media_path("/a/b/song.mp3"));
        assert!(!is_direct_media_path("/watch"));
        assert!(!is_direct_media_path("/page.html"));
    }

    #[test]
    fn hls_and_playlist_detection() {
        assert!(is_hls_url("https://cdn.example.com/live/index.M3U8?x=1"));
        assert!(!is_hls_url("https://cdn.example.com/video.mp4"));
        assert!(is_playlist_url(
            "https://www.youtube.com/watch?v=abc&list=PL123"
        ));
        assert!(is_playlist_url("https://www.youtube.com/playlist?list=PL123"));
        assert!(is_playlist_url("https://www.youtube.com/channel/UC123"));
        assert!(!is_playlist_url("https://www.youtube.com/watch?v=abc"));
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_filename("a/b\\c:d.mp4"), "a_b_c_d.mp4");
        assert_eq!(sanitize_filename("  ..  "), "download");
    }

    #[test]
    fn filename_prefers_rfc5987_disposition() {
        let name = filename_from_parts(
            Some("attachment; filename=\"plain.mp4\"; filename*=UTF-8''caf%C3%A9.mp4"),
            None,
            "https://example.com/x",
        );
        assert_eq!(name, "café.mp4");
    }

    #[test]
    fn filename_falls_back_to_url_and_content_type() {
        let name = filename_from_parts(None, Some("video/mp4"), "https://example.com/api/file/abc");
        assert_eq!(name, "abc.mp4");

        let name = filename_from_parts(None, None, "https://example.com/");
        assert_eq!(name, "download");

        let name = filename_from_parts(None, Some("image/png"), "https://example.com/my%20pic");
        assert_eq!(name, "my pic.png");
    }
}
