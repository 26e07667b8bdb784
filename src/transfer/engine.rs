//! Strategy × format candidate chain.
//!
//! Candidates are tried strictly in order and the first attempt producing a
//! non-empty file wins. Each attempt gets its own subdirectory so leftovers of a
//! failed candidate never leak into the next one.

use super::progress::ProgressState;
use super::session::{AttemptState, TransferSession};
use crate::config::{Config, RetryConfig};
use crate::coordinator::ResumeCoordinator;
use crate::error::{Error, FetchError, Result};
use crate::retry::download_with_retry;
use crate::strategy::{
    FetchJob, Fetcher, FormatCandidate, HttpFetcher, KrakenfilesFetcher, PixeldrainFetcher,
    QualitySelection, RedditFetcher, YtDlpFetcher,
};
use crate::types::{Event, FetchedMedia, StrategyKind, TransferId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where an interrupted transfer picks up
#[derive(Clone, Debug, PartialEq)]
pub struct ResumePoint {
    /// Strategy pinned from the interrupted attempt
    pub strategy: StrategyKind,
    /// Format pinned from the interrupted attempt
    pub format: Option<String>,
    /// Attempt directory holding the partial output
    pub attempt_dir: PathBuf,
    /// Partially written file, if the fetcher reported one
    pub partial: Option<PathBuf>,
}

/// Input of one chain run
pub struct TransferRequest<'a> {
    /// Transfer identifier (cancellation key)
    pub transfer: &'a TransferId,
    /// Source URL
    pub url: &'a str,
    /// Ordered strategies from the registry
    pub strategies: &'a [StrategyKind],
    /// Quality/format of the request
    pub selection: &'a QualitySelection,
    /// Request working directory
    pub work_dir: &'a Path,
    /// Let extractors expand playlists
    pub allow_playlist: bool,
    /// Counters shared with the progress reporter
    pub progress: Arc<ProgressState>,
    /// Pinned attempt when resuming
    pub resume: Option<ResumePoint>,
}

/// State captured when a network failure interrupts a transfer after partial progress
#[derive(Clone, Debug, PartialEq)]
pub struct Interruption {
    /// Where to pick up
    pub point: ResumePoint,
    /// Bytes on disk
    pub downloaded: u64,
    /// Expected total, if known
    pub total: Option<u64>,
    /// Error that interrupted the transfer
    pub message: String,
}

/// Why a chain did not produce a result
#[derive(Debug)]
pub enum ChainError {
    /// Cancellation observed
    Cancelled,
    /// A fatal failure stopped the chain
    Fatal(Error),
    /// Network failure after partial progress; resumable
    Interrupted(Interruption),
    /// Every candidate failed
    Exhausted {
        /// Message of the last failure
        last_error: String,
        /// Every attempted candidate failed to extract
        extractor_stale: bool,
        /// Every attempted candidate failed with a network error
        network_only: bool,
    },
}

/// Drives fetchers through the candidate chain
pub struct TransferEngine {
    fetchers: HashMap<StrategyKind, Arc<dyn Fetcher>>,
    retry: RetryConfig,
    audio_format: String,
    ceiling: u64,
    coordinator: Arc<ResumeCoordinator>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl TransferEngine {
    /// Engine with no fetchers registered
    pub fn new(
        retry: RetryConfig,
        audio_format: impl Into<String>,
        ceiling: u64,
        coordinator: Arc<ResumeCoordinator>,
        event_tx: tokio::sync::broadcast::Sender<Event>,
    ) -> Self {
        Self {
            fetchers: HashMap::new(),
            retry,
            audio_format: audio_format.into(),
            ceiling,
            coordinator,
            event_tx,
        }
    }

    /// Engine with every built-in fetcher
    ///
    /// The extractor strategies are only registered when yt-dlp is configured or on PATH.
    pub fn from_config(
        config: &Config,
        coordinator: Arc<ResumeCoordinator>,
        event_tx: tokio::sync::broadcast::Sender<Event>,
    ) -> Result<Self> {
        let mut engine = Self::new(
            config.retry.clone(),
            config.extractor.audio_format.clone(),
            config.delivery.hard_ceiling(),
            coordinator,
            event_tx,
        );

        let http = HttpFetcher::new(&config.delivery)?;
        engine.register(Arc::new(PixeldrainFetcher::new(http.clone())));
        engine.register(Arc::new(KrakenfilesFetcher::new(http.clone())));
        engine.register(Arc::new(RedditFetcher::new(http.clone())));
        engine.register(Arc::new(http));

        for kind in [StrategyKind::Streaming, StrategyKind::Extractor] {
            match YtDlpFetcher::from_config(kind, &config.extractor) {
                Some(fetcher) => engine.register(Arc::new(fetcher)),
                None => {
                    tracing::warn!(strategy = %kind, "yt-dlp not found, extractor strategy disabled")
                }
            }
        }

        Ok(engine)
    }

    /// Register a fetcher under its own strategy kind, replacing any previous one
    pub fn register(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(fetcher.kind(), fetcher);
    }

    /// Whether a strategy has a fetcher
    pub fn supports(&self, kind: StrategyKind) -> bool {
        self.fetchers.contains_key(&kind)
    }

    /// Ordered (strategy, candidate) attempts for a request
    pub fn plan(&self, request: &TransferRequest<'_>) -> Vec<(StrategyKind, FormatCandidate)> {
        if let Some(point) = &request.resume {
            return vec![(point.strategy, FormatCandidate::from_spec(point.format.clone()))];
        }

        let mut attempts = Vec::new();
        for &strategy in request.strategies {
            if strategy.selects_formats() {
                for candidate in request.selection.candidates(&self.audio_format) {
                    attempts.push((strategy, candidate));
                }
            } else {
                attempts.push((strategy, FormatCandidate::Unconstrained));
            }
        }
        attempts
    }

    /// Run the chain until one attempt succeeds, a fatal failure stops it, or it is exhausted
    pub async fn run(&self, request: TransferRequest<'_>) -> std::result::Result<FetchedMedia, ChainError> {
        let attempts = self.plan(&request);
        let mut last_error = String::from("no fetch strategy available");
        let mut attempted = 0usize;
        let mut extraction_failures = 0usize;
        let mut network_failures = 0usize;

        for (index, (strategy, candidate)) in attempts.into_iter().enumerate() {
            if self.coordinator.is_cancelled(request.transfer) {
                return Err(ChainError::Cancelled);
            }

            let Some(fetcher) = self.fetchers.get(&strategy) else {
                tracing::warn!(transfer = %request.transfer, strategy = %strategy, "No fetcher registered, skipping");
                last_error = format!("no fetcher registered for {}", strategy);
                continue;
            };

            let attempt_dir = match &request.resume {
                Some(point) => point.attempt_dir.clone(),
                None => request.work_dir.join(format!("attempt-{}", index)),
            };
            tokio::fs::create_dir_all(&attempt_dir)
                .await
                .map_err(|e| ChainError::Fatal(Error::Io(e)))?;

            let format = candidate.as_spec().map(str::to_string);
            tracing::info!(
                transfer = %request.transfer,
                strategy = %strategy,
                format = format.as_deref().unwrap_or("best"),
                "Starting fetch attempt"
            );
            self.event_tx
                .send(Event::TransferStarted {
                    transfer: request.transfer.clone(),
                    strategy,
                    format: format.clone(),
                })
                .ok();

            let session = TransferSession::new(
                request.transfer.clone(),
                request.url,
                strategy,
                attempt_dir.clone(),
                self.ceiling,
                self.coordinator.clone(),
                request.progress.clone(),
            );
            let resume_from = request.resume.as_ref().and_then(|p| p.partial.clone());
            let job = FetchJob {
                url: request.url,
                format: format.as_deref(),
                output_dir: &attempt_dir,
                observer: &session,
                audio_only: request.selection.is_audio(),
                allow_playlist: request.allow_playlist,
                resume_from: resume_from.as_deref(),
            };

            attempted += 1;
            let fetcher: &dyn Fetcher = fetcher.as_ref();
            let job_ref = &job;
            let outcome = download_with_retry(&self.retry, move || fetcher.fetch(job_ref)).await;

            let outcome = match outcome {
                Ok(files) if files.is_empty() => Err(FetchError::content(format!(
                    "{} produced no output for format {}",
                    strategy,
                    format.as_deref().unwrap_or("best")
                ))),
                other => other,
            };

            match outcome {
                Ok(files) => {
                    session.finish(Ok(()));
                    let mut bytes = 0u64;
                    for file in &files {
                        bytes += tokio::fs::metadata(file)
                            .await
                            .map(|m| m.len())
                            .unwrap_or(0);
                    }
                    tracing::info!(transfer = %request.transfer, strategy = %strategy, files = files.len(), bytes, "Fetch attempt succeeded");
                    return Ok(FetchedMedia {
                        files,
                        strategy,
                        format,
                        bytes,
                    });
                }
                Err(e) => match session.finish(Err(&e)) {
                    AttemptState::Cancelled => {
                        tracing::info!(transfer = %request.transfer, "Transfer cancelled");
                        return Err(ChainError::Cancelled);
                    }
                    AttemptState::FailedFatal => {
                        tracing::warn!(transfer = %request.transfer, strategy = %strategy, error = %e, "Fatal fetch failure, stopping chain");
                        return Err(ChainError::Fatal(fatal_error(e)));
                    }
                    _ => {
                        if let FetchError::Network {
                            message,
                            bytes_written,
                            total,
                            partial,
                        } = &e
                            && *bytes_written > 0
                        {
                            tracing::warn!(transfer = %request.transfer, strategy = %strategy, downloaded = bytes_written, error = %message, "Transfer interrupted after partial progress");
                            return Err(ChainError::Interrupted(Interruption {
                                point: ResumePoint {
                                    strategy,
                                    format,
                                    attempt_dir,
                                    partial: partial.clone(),
                                },
                                downloaded: *bytes_written,
                                total: *total,
                                message: message.clone(),
                            }));
                        }

                        match &e {
                            FetchError::Content {
                                extraction: true, ..
                            } => extraction_failures += 1,
                            FetchError::Network { .. } => network_failures += 1,
                            _ => {}
                        }
                        tracing::warn!(transfer = %request.transfer, strategy = %strategy, format = format.as_deref().unwrap_or("best"), error = %e, "Fetch candidate failed, advancing");
                        last_error = e.to_string();
                    }
                },
            }
        }

        Err(ChainError::Exhausted {
            last_error,
            extractor_stale: attempted > 0 && extraction_failures == attempted,
            network_only: attempted > 0 && network_failures == attempted,
        })
    }
}

fn fatal_error(e: FetchError) -> Error {
    match e {
        FetchError::Unavailable(message) => Error::ContentUnavailable(message),
        FetchError::Policy(message) => Error::PolicyViolation(message),
        FetchError::SizeExceeded { size, ceiling } => Error::SizeExceeded { size, ceiling },
        other => Error::Other(other.to_string()),
    }
}
