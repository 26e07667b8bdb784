//! One fetch attempt: state machine, size ceiling and cancellation checkpoint.

use super::progress::ProgressState;
use crate::coordinator::ResumeCoordinator;
use crate::error::FetchError;
use crate::strategy::TransferObserver;
use crate::types::{StrategyKind, TransferId};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// State of one attempt
///
/// `Pending -> Downloading -> {Succeeded, FailedRetryable, FailedFatal, Cancelled}`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptState {
    /// Created, no progress observed yet
    Pending,
    /// At least one progress observation
    Downloading,
    /// Produced at least one non-empty file
    Succeeded,
    /// Failed; the chain advances to the next candidate
    FailedRetryable,
    /// Failed; the chain stops
    FailedFatal,
    /// Cancellation observed
    Cancelled,
}

impl AttemptState {
    /// Terminal state for a fetch error
    pub fn for_error(error: &FetchError) -> Self {
        match error {
            FetchError::Cancelled => AttemptState::Cancelled,
            FetchError::Unavailable(_) | FetchError::Policy(_) | FetchError::SizeExceeded { .. } => {
                AttemptState::FailedFatal
            }
            FetchError::Network { .. } | FetchError::Content { .. } | FetchError::Io(_) => {
                AttemptState::FailedRetryable
            }
        }
    }

    /// Whether the attempt has ended
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptState::Pending | AttemptState::Downloading)
    }
}

/// Transient state of one strategy attempt
///
/// Acts as the fetcher's [`TransferObserver`]: every progress call is a checkpoint
/// for cancellation and the hard size ceiling.
#[derive(Debug)]
pub struct TransferSession {
    transfer: TransferId,
    url: String,
    strategy: StrategyKind,
    work_dir: PathBuf,
    ceiling: u64,
    coordinator: Arc<ResumeCoordinator>,
    progress: Arc<ProgressState>,
    state: Mutex<AttemptState>,
}

impl TransferSession {
    /// Start a pending attempt
    pub fn new(
        transfer: TransferId,
        url: impl Into<String>,
        strategy: StrategyKind,
        work_dir: PathBuf,
        ceiling: u64,
        coordinator: Arc<ResumeCoordinator>,
        progress: Arc<ProgressState>,
    ) -> Self {
        Self {
            transfer,
            url: url.into(),
            strategy,
            work_dir,
            ceiling,
            coordinator,
            progress,
            state: Mutex::new(AttemptState::Pending),
        }
    }

    /// Current state
    pub fn state(&self) -> AttemptState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, next: AttemptState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.is_terminal() {
            return;
        }
        if *state != next {
            tracing::debug!(transfer = %self.transfer, strategy = %self.strategy, from = ?*state, to = ?next, "Attempt state change");
            *state = next;
        }
    }

    /// Record the attempt outcome
    pub fn finish(&self, outcome: Result<(), &FetchError>) -> AttemptState {
        let next = match outcome {
            Ok(()) => AttemptState::Succeeded,
            Err(e) => AttemptState::for_error(e),
        };
        self.set_state(next);
        self.state()
    }

    /// Source URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Strategy in use
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Working directory of this attempt
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Bytes reported so far
    pub fn downloaded(&self) -> u64 {
        self.progress.downloaded()
    }

    /// Expected total, if known
    pub fn total(&self) -> Option<u64> {
        self.progress.total()
    }
}

impl TransferObserver for TransferSession {
    fn on_progress(&self, downloaded: u64, total: Option<u64>) -> Result<(), FetchError> {
        if self.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if let Some(size) = total
            && size > self.ceiling
        {
            tracing::warn!(transfer = %self.transfer, size, ceiling = self.ceiling, "Source exceeds hard size ceiling");
            return Err(FetchError::SizeExceeded {
                size,
                ceiling: self.ceiling,
            });
        }
        self.set_state(AttemptState::Downloading);
        self.progress.update(downloaded, total);
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.coordinator.is_cancelled(&self.transfer)
    }
}
