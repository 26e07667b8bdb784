//! yt-dlp subprocess fetcher.
//!
//! Serves both the primary streaming platform ([`StrategyKind::Streaming`]) and the
//! generic extractor fallback ([`StrategyKind::Extractor`]). Progress is read from a
//! machine-readable progress template on stdout; failures are classified from stderr.

use super::{FetchJob, Fetcher, produced_files};
use crate::config::ExtractorConfig;
use crate::error::FetchError;
use crate::transfer::classify::fetch_error_from_message;
use crate::types::StrategyKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Prefix of progress lines emitted through `--progress-template`
const PROGRESS_PREFIX: &str = "media-dl-progress";

/// How often cancellation is polled while the extractor is silent
const CANCEL_POLL: Duration = Duration::from_millis(500);

/// Marker printed when `--match-filter !is_live` skips a live stream
const LIVE_FILTER_MARKER: &str = "does not pass filter";

/// Output filename template (title truncated so paths stay short)
const OUTPUT_TEMPLATE: &str = "%(title).70s [%(id)s].%(ext)s";

/// Fetcher that drives the yt-dlp binary
#[derive(Clone, Debug)]
pub struct YtDlpFetcher {
    binary_path: PathBuf,
    kind: StrategyKind,
    ffmpeg_path: Option<PathBuf>,
    cookies_file: Option<PathBuf>,
    audio_format: String,
    concurrent_fragments: u32,
}

impl YtDlpFetcher {
    /// Create a fetcher with an explicit binary path
    pub fn new(binary_path: PathBuf, kind: StrategyKind, config: &ExtractorConfig) -> Self {
        Self {
            binary_path,
            kind,
            ffmpeg_path: config.ffmpeg_path.clone(),
            cookies_file: config.cookies_file.clone(),
            audio_format: config.audio_format.clone(),
            concurrent_fragments: config.concurrent_fragments,
        }
    }

    /// Use the configured binary, or find `yt-dlp` in PATH
    pub fn from_config(kind: StrategyKind, config: &ExtractorConfig) -> Option<Self> {
        config
            .ytdlp_path
            .clone()
            .or_else(|| which::which("yt-dlp").ok())
            .map(|path| Self::new(path, kind, config))
    }

    /// Path of the binary in use
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Command-line arguments for one attempt
    pub(crate) fn build_args(&self, job: &FetchJob<'_>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--progress-template".into(),
            format!(
                "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s",
                PROGRESS_PREFIX
            ),
            "--match-filter".into(),
            "!is_live".into(),
            "--continue".into(),
            "--no-mtime".into(),
            "--concurrent-fragments".into(),
            self.concurrent_fragments.max(1).to_string(),
        ];

        args.push(if job.allow_playlist {
            "--yes-playlist".into()
        } else {
            "--no-playlist".into()
        });

        if let Some(format) = job.format {
            args.push("-f".into());
            args.push(format.to_string());
        }

        if job.audio_only {
            args.push("-x".into());
            args.push("--audio-format".into());
            args.push(self.audio_format.clone());
        } else {
            args.push("--merge-output-format".into());
            args.push("mp4".into());
        }

        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }

        if let Some(ffmpeg) = &self.ffmpeg_path {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.display().to_string());
        }

        args.push("-o".into());
        args.push(job.output_dir.join(OUTPUT_TEMPLATE).display().to_string());
        args.push("--".into());
        args.push(job.url.to_string());
        args
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<Vec<PathBuf>, FetchError> {
        if job.observer.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let args = self.build_args(job);
        tracing::debug!(binary = %self.binary_path.display(), url = %job.url, format = ?job.format, "Spawning extractor");

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::content(format!("Failed to execute yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::content("yt-dlp stdout unavailable"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::content("yt-dlp stderr unavailable"))?;

        // Drain stderr concurrently so a chatty extractor never blocks on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            stderr.read_to_string(&mut buf).await.ok();
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut ticker = tokio::time::interval(CANCEL_POLL);
        let mut downloaded = 0u64;
        let mut total = None;
        let mut skipped_live = false;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some((bytes, size)) = parse_progress(&line) {
                            downloaded = bytes;
                            total = size.or(total);
                            if let Err(e) = job.observer.on_progress(downloaded, total) {
                                child.kill().await.ok();
                                return Err(e);
                            }
                        } else if line.contains(LIVE_FILTER_MARKER) {
                            skipped_live = true;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "Extractor stdout closed with error");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if job.observer.is_cancelled() {
                        child.kill().await.ok();
                        return Err(FetchError::Cancelled);
                    }
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        let files = produced_files(job.output_dir).await?;

        if status.success() {
            if !files.is_empty() {
                return Ok(files);
            }
            if skipped_live || stderr.contains(LIVE_FILTER_MARKER) {
                return Err(FetchError::Policy("live streams cannot be downloaded".into()));
            }
            return Err(FetchError::content(format!(
                "no output produced for format {}",
                job.format.unwrap_or("best")
            )));
        }

        let message = last_error_line(&stderr)
            .unwrap_or_else(|| format!("yt-dlp exited with {}", status));
        Err(fetch_error_from_message(message, downloaded, total, None))
    }
}

/// Parse one progress-template line into (downloaded, total)
pub(crate) fn parse_progress(line: &str) -> Option<(u64, Option<u64>)> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split_whitespace();
    let downloaded = parse_bytes(fields.next()?)?;
    let total = fields.next().and_then(parse_bytes);
    let estimate = fields.next().and_then(parse_bytes);
    Some((downloaded, total.or(estimate)))
}

// Fields are integers, floats (estimates) or "NA"
fn parse_bytes(field: &str) -> Option<u64> {
    field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}

/// The most specific error line in extractor stderr
fn last_error_line(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|l| l.to_string())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::TransferObserver;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Progress(Mutex<Vec<(u64, Option<u64>)>>);

    impl TransferObserver for Progress {
        fn on_progress(&self, downloaded: u64, total: Option<u64>) -> Result<(), FetchError> {
            self.0.lock().unwrap().push((downloaded, total));
            Ok(())
        }

        fn is_cancelled(&self) -> bool {
            false
        }
    }

    fn fetcher(binary: PathBuf) -> YtDlpFetcher {
        YtDlpFetcher::new(binary, StrategyKind::Streaming, &ExtractorConfig::default())
    }

    fn job<'a>(
        url: &'a str,
        format: Option<&'a str>,
        dir: &'a Path,
        observer: &'a Progress,
    ) -> FetchJob<'a> {
        FetchJob {
            url,
            format,
            output_dir: dir,
            observer,
            audio_only: false,
            allow_playlist: false,
            resume_from: None,
        }
    }

    #[test]
    fn progress_lines_parse_with_missing_totals() {
        assert_eq!(
            parse_progress("media-dl-progress 1024 4096 NA"),
            Some((1024, Some(4096)))
        );
        assert_eq!(
            parse_progress("media-dl-progress 10 NA 2000.5"),
            Some((10, Some(2000)))
        );
        assert_eq!(parse_progress("media-dl-progress 10 NA NA"), Some((10, None)));
        assert_eq!(parse_progress("[download] Destination: x.mp4"), None);
    }

    #[test]
    fn args_carry_format_playlist_and_live_filter() {
        let observer = Progress::default();
        let dir = Path::new("/work/attempt-0");
        let mut j = job("https://youtu.be/abc", Some("bestaudio"), dir, &observer);
        j.audio_only = true;

        let args = fetcher(PathBuf::from("yt-dlp")).build_args(&j);

        let pos = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[pos + 1], "bestaudio");
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"!is_live".to_string()));
        let pos = args.iter().position(|a| a == "--audio-format").unwrap();
        assert_eq!(args[pos + 1], "m4a");
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
        assert!(args.iter().any(|a| a.starts_with("/work/attempt-0/")));
    }

    #[test]
    fn unconstrained_candidate_passes_no_format() {
        let observer = Progress::default();
        let mut j = job("https://x.test/v", None, Path::new("/w"), &observer);
        j.allow_playlist = true;
        let args = fetcher(PathBuf::from("yt-dlp")).build_args(&j);
        assert!(!args.contains(&"-f".to_string()));
        assert!(args.contains(&"--yes-playlist".to_string()));
        assert!(args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn error_line_prefers_error_prefix() {
        let stderr = "WARNING: something\nERROR: Video unavailable\n[debug] trailing\n";
        assert_eq!(last_error_line(stderr).unwrap(), "ERROR: Video unavailable");
        assert_eq!(last_error_line("just noise\n").unwrap(), "just noise");
        assert_eq!(last_error_line(""), None);
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_reports_progress_and_returns_files() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let binary = script(
            bin_dir.path(),
            r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
dir=$(dirname "$out")
echo "media-dl-progress 2 4 NA"
echo "media-dl-progress 4 4 NA"
printf 'data' > "$dir/clip.mp4"
"#,
        );

        let observer = Progress::default();
        let files = fetcher(binary)
            .fetch(&job("https://x.test/v", None, out_dir.path(), &observer))
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name().unwrap(), "clip.mp4");
        assert_eq!(
            *observer.0.lock().unwrap(),
            vec![(2, Some(4)), (4, Some(4))]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_successful_run_is_a_content_failure() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let binary = script(bin_dir.path(), "exit 0\n");

        let observer = Progress::default();
        let err = fetcher(binary)
            .fetch(&job("https://x.test/v", Some("best"), out_dir.path(), &observer))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Content {
                extraction: false,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn live_filter_skip_is_a_policy_failure() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let binary = script(
            bin_dir.path(),
            "echo '[youtube] abc: Live stream does not pass filter (!is_live), skipping ..'\n",
        );

        let observer = Progress::default();
        let err = fetcher(binary)
            .fetch(&job("https://x.test/v", None, out_dir.path(), &observer))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Policy(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn network_failure_keeps_progress_for_resume() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let binary = script(
            bin_dir.path(),
            "echo 'media-dl-progress 512 2048 NA'\necho 'ERROR: Connection reset by peer' >&2\nexit 1\n",
        );

        let observer = Progress::default();
        let err = fetcher(binary)
            .fetch(&job("https://x.test/v", None, out_dir.path(), &observer))
            .await
            .unwrap_err();
        match err {
            FetchError::Network {
                bytes_written,
                total,
                ..
            } => {
                assert_eq!(bytes_written, 512);
                assert_eq!(total, Some(2048));
            }
            other => panic!("expected network failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn extraction_failure_is_flagged() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let binary = script(
            bin_dir.path(),
            "echo 'ERROR: [instagram] abc: Unable to extract shared data' >&2\nexit 1\n",
        );

        let observer = Progress::default();
        let err = fetcher(binary)
            .fetch(&job("https://x.test/v", None, out_dir.path(), &observer))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Content {
                extraction: true,
                ..
            }
        ));
    }

    #[test]
    fn from_config_prefers_explicit_path() {
        let config = ExtractorConfig {
            ytdlp_path: Some(PathBuf::from("/opt/yt-dlp")),
            ..Default::default()
        };
        let fetcher = YtDlpFetcher::from_config(StrategyKind::Extractor, &config).unwrap();
        assert_eq!(fetcher.binary_path(), Path::new("/opt/yt-dlp"));
        assert_eq!(fetcher.kind(), StrategyKind::Extractor);
    }
}
