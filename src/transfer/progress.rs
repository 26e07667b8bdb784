//! Progress counters shared between a transfer and its status reporter.

use crate::transport::{ChatTransport, Markup, edit_quietly};
use crate::types::{Event, MessageRef, TransferId};
use crate::utils::sizeof_fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Sentinel for "total unknown"
const UNKNOWN_TOTAL: u64 = 0;

/// Lock-free progress counters of one request
#[derive(Debug)]
pub struct ProgressState {
    downloaded: AtomicU64,
    total: AtomicU64,
    started: Instant,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressState {
    /// Fresh counters, clock started now
    pub fn new() -> Self {
        Self {
            downloaded: AtomicU64::new(0),
            total: AtomicU64::new(UNKNOWN_TOTAL),
            started: Instant::now(),
        }
    }

    /// Record the latest observation
    pub fn update(&self, downloaded: u64, total: Option<u64>) {
        self.downloaded.store(downloaded, Ordering::Relaxed);
        if let Some(total) = total {
            self.total.store(total, Ordering::Relaxed);
        }
    }

    /// Bytes on disk
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Expected total, if the source advertised one
    pub fn total(&self) -> Option<u64> {
        match self.total.load(Ordering::Relaxed) {
            UNKNOWN_TOTAL => None,
            total => Some(total),
        }
    }

    /// Average speed since the clock started
    pub fn speed_bps(&self) -> u64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.downloaded() as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// Status text for a progress edit
pub fn format_progress(downloaded: u64, total: Option<u64>, speed_bps: u64) -> String {
    let speed = format!("{}/s", sizeof_fmt(speed_bps));
    match total {
        Some(total) if total > 0 => {
            let percent = (downloaded as f64 / total as f64 * 100.0).min(100.0);
            format!(
                "Downloading: {:.1}%\n{} / {}\nSpeed: {}",
                percent,
                sizeof_fmt(downloaded),
                sizeof_fmt(total),
                speed
            )
        }
        _ => format!("Downloading: {}\nSpeed: {}", sizeof_fmt(downloaded), speed),
    }
}

/// Parameters for spawning a progress reporter background task
pub struct ProgressReporterParams {
    /// Transfer the reporter belongs to
    pub transfer: TransferId,
    /// Status message to edit
    pub status: MessageRef,
    /// Transport used for edits
    pub transport: Arc<dyn ChatTransport>,
    /// Counters written by the transfer
    pub progress: Arc<ProgressState>,
    /// Minimum time between edits
    pub interval: Duration,
    /// Event broadcast sender
    pub event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Stops the reporter
    pub cancel_token: tokio_util::sync::CancellationToken,
}

/// Spawn a task that edits the status message at most once per interval
///
/// Edits are skipped while nothing changed. The transfer never waits on the reporter.
pub fn spawn_progress_reporter(params: ProgressReporterParams) -> tokio::task::JoinHandle<()> {
    let ProgressReporterParams {
        transfer,
        status,
        transport,
        progress,
        interval,
        event_tx,
        cancel_token,
    } = params;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing has been downloaded yet
        ticker.tick().await;
        let mut last_reported = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let downloaded = progress.downloaded();
                    if downloaded == 0 || last_reported == Some(downloaded) {
                        continue;
                    }
                    last_reported = Some(downloaded);

                    let total = progress.total();
                    let speed_bps = progress.speed_bps();
                    tracing::debug!(transfer = %transfer, downloaded, total = ?total, speed_bps, "Transfer progress");

                    event_tx
                        .send(Event::Progress {
                            transfer: transfer.clone(),
                            downloaded,
                            total,
                            speed_bps,
                        })
                        .ok();

                    let text = format_progress(downloaded, total, speed_bps);
                    edit_quietly(transport.as_ref(), status, &text, Markup::Cancel(transfer.clone())).await;
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}
