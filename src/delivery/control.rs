//! Request control: cancel, resume and graceful shutdown.

use super::MediaDownloader;
use super::request::Delivery;
use crate::error::{Error, Result, UserFacing};
use crate::transfer::ResumePoint;
use crate::transport::{Markup, edit_quietly};
use crate::types::{DeliveryOutcome, ResumeToken, TransferId};
use crate::utils;
use std::sync::atomic::Ordering;

impl MediaDownloader {
    /// Ask a running transfer to stop
    ///
    /// Returns true when the transfer was running. The engine observes the flag at its
    /// next checkpoint; the request then ends with [`DeliveryOutcome::Cancelled`].
    /// Flags for transfers that are not running are dropped immediately so they cannot
    /// cancel a later request that reuses the id.
    pub fn cancel(&self, transfer: &TransferId) -> bool {
        let running = self.coordinator.cancel(transfer);
        if running {
            tracing::info!(transfer = %transfer, "Cancellation requested");
        } else {
            self.coordinator.clear_cancellation(transfer);
            tracing::debug!(transfer = %transfer, "Cancel for a transfer that is not running");
        }
        running
    }

    /// Continue an interrupted transfer from its snapshot
    ///
    /// The snapshot is consumed: a token resumes at most once. The interrupted strategy
    /// and format are pinned and the partial file is handed back to the fetcher.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or already used tokens, and quota errors when the
    /// user ran out while the transfer was paused. A quota refusal puts the snapshot
    /// back, so the same token works once the balance is topped up.
    pub async fn handle_resume(&self, token: &ResumeToken) -> Result<DeliveryOutcome> {
        self.ensure_accepting()?;

        let snapshot = self
            .coordinator
            .take_snapshot(token)
            .ok_or_else(|| Error::NotFound(format!("resume token {}", token)))?;

        let reservation = if self.config.is_metered(snapshot.user.id.0) {
            match self
                .ledger
                .reserve(snapshot.user.id, self.config.quota.daily_bandwidth_cap)
                .await
            {
                Ok(reservation) => Some(reservation),
                Err(e) => {
                    tracing::info!(token = %token, code = e.error_code(), "Resume refused, snapshot kept");
                    edit_quietly(
                        self.transport.as_ref(),
                        snapshot.status,
                        &e.user_message(),
                        Markup::Resume(token.clone()),
                    )
                    .await;
                    self.coordinator.snapshot(token.clone(), snapshot);
                    return Err(e);
                }
            }
        } else {
            None
        };

        tracing::info!(
            token = %token,
            url = %snapshot.url,
            strategy = %snapshot.strategy,
            downloaded = snapshot.downloaded,
            "Resuming transfer"
        );

        let title_length = self.settings_or_default(&snapshot.user).await.title_length;
        let point = ResumePoint {
            strategy: snapshot.strategy,
            format: snapshot.format,
            attempt_dir: snapshot.work_dir,
            partial: snapshot.partial,
        };
        let allow_playlist = utils::is_playlist_url(&snapshot.url);
        let delivery = Delivery {
            transfer: snapshot.status.transfer_id(),
            user: snapshot.user,
            url: snapshot.url,
            status: snapshot.status,
            token: token.clone(),
            selection: snapshot.selection,
            fingerprint: snapshot.fingerprint,
            title_length,
            reservation,
        };

        self.run_transfer(delivery, vec![point.strategy], allow_playlist, Some(point))
            .await
    }

    /// Stop accepting requests and cancel every running transfer
    ///
    /// Running requests end through their normal cancellation path, so their working
    /// directories are cleaned up.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");
        self.accepting_new.store(false, Ordering::SeqCst);

        let cancelled = self.coordinator.cancel_all();
        tracing::info!(cancelled, "Running transfers flagged for cancellation");
    }

    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }
}
