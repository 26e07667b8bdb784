//! Resume and cancellation bookkeeping shared by every in-flight request.
//!
//! Both tables are process-local and lost on restart. Locks are held only for a
//! single map operation, so the transfer engine can poll [`ResumeCoordinator::is_cancelled`]
//! from its streaming loop without contention.

use crate::strategy::QualitySelection;
use crate::types::{Fingerprint, MessageRef, ResumeToken, StrategyKind, TransferId, UserProfile};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// Length of the hex resume token
const TOKEN_LEN: usize = 10;

/// State of a transfer interrupted by a network failure after partial progress
#[derive(Clone, Debug)]
pub struct ResumeSnapshot {
    /// Source URL
    pub url: String,
    /// Requesting user
    pub user: UserProfile,
    /// Status message the request is reported on
    pub status: MessageRef,
    /// Bytes on disk when the failure happened
    pub downloaded: u64,
    /// Expected total, if known
    pub total: Option<u64>,
    /// Quality/format the request was made with
    pub selection: QualitySelection,
    /// Cache key of the request
    pub fingerprint: Fingerprint,
    /// Strategy in use when the failure happened
    pub strategy: StrategyKind,
    /// Format specifier in use
    pub format: Option<String>,
    /// Partially written file
    pub partial: Option<PathBuf>,
    /// Working directory holding the partial output
    pub work_dir: PathBuf,
}

/// Derive the resume token of a logical request
///
/// Deterministic in (url, chat, message) so a resume button stays stable across edits.
pub fn resume_token(url: &str, status: &MessageRef) -> ResumeToken {
    let digest = md5::compute(format!("{}\n{}\n{}", url, status.chat.0, status.message_id));
    let hex = format!("{:x}", digest);
    ResumeToken(hex[..TOKEN_LEN].to_string())
}

/// Holds resume snapshots and the cancellation set
#[derive(Debug, Default)]
pub struct ResumeCoordinator {
    snapshots: Mutex<HashMap<ResumeToken, ResumeSnapshot>>,
    cancelled: Mutex<HashSet<TransferId>>,
    active: Mutex<HashSet<TransferId>>,
}

// A poisoned lock only means another task panicked mid-insert; the maps stay usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ResumeCoordinator {
    /// Create an empty coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot, replacing any previous one under the same token
    pub fn snapshot(&self, token: ResumeToken, state: ResumeSnapshot) {
        tracing::debug!(token = %token, url = %state.url, downloaded = state.downloaded, "Resume snapshot stored");
        lock(&self.snapshots).insert(token, state);
    }

    /// Remove and return a snapshot (single consumption)
    pub fn take_snapshot(&self, token: &ResumeToken) -> Option<ResumeSnapshot> {
        lock(&self.snapshots).remove(token)
    }

    /// Drop a snapshot superseded by a new request for the same logical transfer
    pub fn discard_snapshot(&self, token: &ResumeToken) -> Option<ResumeSnapshot> {
        let removed = lock(&self.snapshots).remove(token);
        if removed.is_some() {
            tracing::debug!(token = %token, "Superseded resume snapshot discarded");
        }
        removed
    }

    /// Number of stored snapshots
    pub fn snapshot_count(&self) -> usize {
        lock(&self.snapshots).len()
    }

    /// Flag a transfer for cancellation
    ///
    /// Returns true when the transfer is currently running.
    pub fn cancel(&self, transfer: &TransferId) -> bool {
        lock(&self.cancelled).insert(transfer.clone());
        lock(&self.active).contains(transfer)
    }

    /// Whether a transfer has been flagged
    pub fn is_cancelled(&self, transfer: &TransferId) -> bool {
        lock(&self.cancelled).contains(transfer)
    }

    /// Remove a cancellation flag
    pub fn clear_cancellation(&self, transfer: &TransferId) {
        lock(&self.cancelled).remove(transfer);
    }

    /// Mark a transfer as running
    pub fn register_active(&self, transfer: &TransferId) {
        lock(&self.active).insert(transfer.clone());
    }

    /// Mark a transfer as finished and drop its cancellation flag
    pub fn unregister_active(&self, transfer: &TransferId) {
        lock(&self.active).remove(transfer);
        self.clear_cancellation(transfer);
    }

    /// Flag every running transfer (used on shutdown)
    pub fn cancel_all(&self) -> usize {
        let active: Vec<TransferId> = lock(&self.active).iter().cloned().collect();
        let mut cancelled = lock(&self.cancelled);
        for transfer in &active {
            cancelled.insert(transfer.clone());
        }
        active.len()
    }
}
