//! Request intake: admission, cache lookup, transfer stage, delivery and billing.

use super::MediaDownloader;
use super::upload::{build_caption, kinds_for};
use crate::coordinator::{ResumeSnapshot, resume_token};
use crate::error::{Error, QuotaError, Result, UserFacing};
use crate::maintenance::UpgradeOutcome;
use crate::media::split_file;
use crate::store::{Reservation, fingerprint};
use crate::strategy::QualitySelection;
use crate::transfer::{
    ChainError, Interruption, ProgressReporterParams, ProgressState, ResumePoint,
    TransferRequest, spawn_progress_reporter,
};
use crate::transport::{FileSource, Markup, Upload, edit_quietly};
use crate::types::{
    Balance, CacheEntry, DeliveryOutcome, DeliveryResult, Event, FetchedMedia, Fingerprint,
    MediaMetadata, MessageRef, RequestedQuality, ResultDescriptor, ResumeToken, StrategyKind,
    TransferId, UserProfile, UserSettings,
};
use crate::utils;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A link sent by a user
#[derive(Clone, Debug, PartialEq)]
pub struct MediaRequest {
    /// Requesting user
    pub user: UserProfile,
    /// The user's message carrying the link; replies go to its chat
    pub origin: MessageRef,
    /// Source URL
    pub url: String,
    /// Quality picked for this request, overriding the stored preference
    pub quality: Option<RequestedQuality>,
}

impl MediaRequest {
    /// Request using the user's stored quality preference
    pub fn new(user: UserProfile, origin: MessageRef, url: impl Into<String>) -> Self {
        Self {
            user,
            origin,
            url: url.into(),
            quality: None,
        }
    }

    /// Override the stored quality for this request only
    pub fn with_quality(mut self, quality: RequestedQuality) -> Self {
        self.quality = Some(quality);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Planned,
    DirectOnly,
}

struct Admission {
    strategies: Vec<StrategyKind>,
    allow_playlist: bool,
    reservation: Option<Reservation>,
}

/// State carried through one request after its status message exists
pub(crate) struct Delivery {
    pub(crate) user: UserProfile,
    pub(crate) url: String,
    pub(crate) status: MessageRef,
    pub(crate) transfer: TransferId,
    pub(crate) token: ResumeToken,
    pub(crate) selection: QualitySelection,
    pub(crate) fingerprint: Fingerprint,
    pub(crate) title_length: Option<usize>,
    /// Unit held for this request; None for exempt users
    pub(crate) reservation: Option<Reservation>,
}

impl MediaDownloader {
    /// Handle a link: serve it from the cache or fetch, upload and bill it
    ///
    /// Quota denials and unsupported links are answered in the chat and returned as
    /// errors before any status message or transfer exists. Failures after that point
    /// are reported on the status message.
    ///
    /// Admission reserves one unit of the user's balance, so concurrent requests cannot
    /// both pass on a balance only one of them can pay for. The unit is returned when
    /// the request ends without a delivery.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use media_dl::*;
    /// # async fn example(downloader: MediaDownloader) -> Result<()> {
    /// let request = MediaRequest::new(
    ///     UserProfile::new(42),
    ///     MessageRef::new(42, 1001),
    ///     "https://pixeldrain.com/u/abc123",
    /// );
    /// match downloader.handle_request(request).await? {
    ///     DeliveryOutcome::Delivered(result) => println!("sent {} parts", result.messages.len()),
    ///     DeliveryOutcome::Resumable { token, .. } => println!("resume with {}", token),
    ///     DeliveryOutcome::Cancelled { .. } => {}
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn handle_request(&self, request: MediaRequest) -> Result<DeliveryOutcome> {
        self.process(request, Route::Planned).await
    }

    /// Handle a link with the raw HTTP strategy only
    ///
    /// Used when the extractor chain failed and the user retries the plain file.
    /// Primary-platform links are still refused.
    pub async fn handle_direct(&self, request: MediaRequest) -> Result<DeliveryOutcome> {
        self.process(request, Route::DirectOnly).await
    }

    async fn process(&self, request: MediaRequest, route: Route) -> Result<DeliveryOutcome> {
        let chat = request.origin.chat;
        let url = request.url.trim().to_string();
        tracing::info!(user_id = %request.user.id, chat = chat.0, url = %url, route = ?route, "Request received");

        let admission = match self.admit(&request.user, &url, route).await {
            Ok(admission) => admission,
            Err(e) => {
                tracing::info!(user_id = %request.user.id, code = e.error_code(), error = %e, "Request refused");
                if let Err(send_err) = self
                    .transport
                    .send_message(chat, &e.user_message(), Markup::None)
                    .await
                {
                    tracing::warn!(chat = chat.0, error = %send_err, "Failed to send refusal");
                }
                return Err(e);
            }
        };

        let settings = self.settings_or_default(&request.user).await;
        let selection = QualitySelection::new(&settings, request.quality);
        let fingerprint = fingerprint(&url, &selection.cache_label(), selection.output_format());

        // A new request for the same link from the same message supersedes an old snapshot
        let token = resume_token(&url, &request.origin);
        if let Some(stale) = self.coordinator.discard_snapshot(&token) {
            remove_work_dir(&self.config.temp_dir().join(&stale.status.transfer_id().0)).await;
        }

        let status = match self
            .transport
            .send_message(chat, "Processing...", Markup::None)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                self.release_reservation(admission.reservation).await;
                return Err(e.into());
            }
        };

        let delivery = Delivery {
            reservation: admission.reservation,
            user: request.user,
            url,
            status,
            transfer: status.transfer_id(),
            token,
            selection,
            fingerprint,
            title_length: settings.title_length,
        };

        match self.cache.get(&delivery.fingerprint).await {
            Ok(Some(entry)) => {
                if let Some(result) = self.deliver_cached(&delivery, entry).await {
                    return Ok(DeliveryOutcome::Delivered(result));
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(fingerprint = %delivery.fingerprint, error = %e, "Cache lookup failed, treating as miss");
            }
        }

        self.run_transfer(delivery, admission.strategies, admission.allow_playlist, None)
            .await
    }

    /// Checks that run before anything is shown to the user
    async fn admit(&self, user: &UserProfile, url: &str, route: Route) -> Result<Admission> {
        self.ensure_accepting()?;

        let record = self
            .ledger
            .ensure_user(user, self.config.quota.free_daily)
            .await?;

        let metered = self.config.is_metered(user.id.0);
        if metered {
            self.ledger
                .check_quota(user.id, self.config.quota.daily_bandwidth_cap)
                .await?;
        } else if record.is_blocked {
            return Err(QuotaError::UserBlocked.into());
        }

        let strategies = match route {
            Route::Planned => self.registry.plan(url)?,
            Route::DirectOnly => {
                let parsed = url::Url::parse(url)
                    .map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
                if self.registry.is_primary_platform(url) {
                    return Err(Error::PrimaryPlatform {
                        host: parsed.host_str().unwrap_or_default().to_string(),
                    });
                }
                vec![StrategyKind::DirectHttp]
            }
        };

        if utils::is_hls_url(url) && !self.config.delivery.allow_hls {
            return Err(Error::PolicyViolation(
                "HLS streams are not supported".to_string(),
            ));
        }

        let allow_playlist = utils::is_playlist_url(url);
        if allow_playlist && metered && record.paid <= self.config.delivery.playlist_min_paid {
            return Err(Error::PolicyViolation(format!(
                "playlists need a paid balance above {}",
                self.config.delivery.playlist_min_paid
            )));
        }

        // Last step, so no later refusal has to hand the unit back
        let reservation = if metered {
            Some(
                self.ledger
                    .reserve(user.id, self.config.quota.daily_bandwidth_cap)
                    .await?,
            )
        } else {
            None
        };

        Ok(Admission {
            strategies,
            allow_playlist,
            reservation,
        })
    }

    pub(crate) async fn settings_or_default(&self, user: &UserProfile) -> UserSettings {
        match self.settings.user_settings(user.id).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Failed to read settings, using defaults");
                UserSettings::default()
            }
        }
    }

    /// Re-send a cached result; None when a handle went stale and the entry was dropped
    async fn deliver_cached(&self, delivery: &Delivery, entry: CacheEntry) -> Option<DeliveryResult> {
        if entry.descriptor.file_ids.is_empty() {
            self.drop_cache_entry(&delivery.fingerprint).await;
            return None;
        }

        let mut messages = Vec::with_capacity(entry.descriptor.file_ids.len());
        for (index, file_id) in entry.descriptor.file_ids.iter().enumerate() {
            let upload = Upload {
                kind: entry.descriptor.kind,
                source: FileSource::Cached(file_id.clone()),
                caption: if index == 0 { entry.caption.clone() } else { None },
                metadata: entry.metadata.clone(),
            };
            match self.send_upload(delivery.status.chat, upload).await {
                Ok(sent) => messages.push(sent.message),
                Err(e) => {
                    tracing::warn!(fingerprint = %delivery.fingerprint, error = %e, "Cached handle rejected, fetching again");
                    self.drop_cache_entry(&delivery.fingerprint).await;
                    return None;
                }
            }
        }

        tracing::info!(transfer = %delivery.transfer, fingerprint = %delivery.fingerprint, parts = messages.len(), "Served from cache");
        self.emit_event(Event::CacheHit {
            transfer: delivery.transfer.clone(),
            fingerprint: delivery.fingerprint.clone(),
        });

        let balance = self.bill(delivery, 0).await;
        self.archive_delivery(&delivery.user, &delivery.url, &messages);
        edit_quietly(self.transport.as_ref(), delivery.status, "Done.", Markup::None).await;
        self.emit_event(Event::Delivered {
            transfer: delivery.transfer.clone(),
            bytes: 0,
            parts: messages.len(),
        });

        Some(DeliveryResult {
            transfer: delivery.transfer.clone(),
            fingerprint: delivery.fingerprint.clone(),
            cached: true,
            messages,
            bytes: 0,
            strategy: None,
            balance,
        })
    }

    async fn drop_cache_entry(&self, key: &Fingerprint) {
        if let Err(e) = self.cache.delete(key).await {
            tracing::warn!(fingerprint = %key, error = %e, "Failed to delete stale cache entry");
        }
    }

    /// Run the fetch chain under a progress reporter and turn its outcome into a reply
    pub(crate) async fn run_transfer(
        &self,
        delivery: Delivery,
        strategies: Vec<StrategyKind>,
        allow_playlist: bool,
        resume: Option<ResumePoint>,
    ) -> Result<DeliveryOutcome> {
        let work_dir = self.config.temp_dir().join(&delivery.transfer.0);
        self.coordinator.register_active(&delivery.transfer);

        edit_quietly(
            self.transport.as_ref(),
            delivery.status,
            "Starting download...",
            Markup::Cancel(delivery.transfer.clone()),
        )
        .await;

        let progress = Arc::new(ProgressState::new());
        let stop_reporter = CancellationToken::new();
        let reporter = spawn_progress_reporter(ProgressReporterParams {
            transfer: delivery.transfer.clone(),
            status: delivery.status,
            transport: self.transport.clone(),
            progress: progress.clone(),
            interval: self.config.delivery.progress_interval,
            event_tx: self.event_tx.clone(),
            cancel_token: stop_reporter.clone(),
        });

        let fetched = self
            .fetch_with_upgrade(&delivery, &strategies, allow_playlist, &work_dir, progress, resume)
            .await;

        stop_reporter.cancel();
        if let Err(e) = reporter.await {
            tracing::debug!(transfer = %delivery.transfer, error = %e, "Progress reporter ended abnormally");
        }

        let outcome = match fetched {
            Ok(media) => self
                .deliver_fetched(&delivery, media)
                .await
                .map(DeliveryOutcome::Delivered),
            Err(ChainError::Cancelled) => {
                tracing::info!(transfer = %delivery.transfer, "Request cancelled by user");
                edit_quietly(
                    self.transport.as_ref(),
                    delivery.status,
                    &Error::Cancelled.user_message(),
                    Markup::None,
                )
                .await;
                self.emit_event(Event::Cancelled {
                    transfer: delivery.transfer.clone(),
                });
                Ok(DeliveryOutcome::Cancelled {
                    transfer: delivery.transfer.clone(),
                })
            }
            Err(ChainError::Interrupted(interruption)) => {
                Ok(self.offer_resume(&delivery, interruption).await)
            }
            Err(ChainError::Fatal(e)) => Err(e),
            Err(ChainError::Exhausted { last_error, .. }) => Err(Error::DeliveryFailure {
                last_error,
                extractor_stale: false,
            }),
        };

        self.coordinator.unregister_active(&delivery.transfer);
        if !matches!(outcome, Ok(DeliveryOutcome::Delivered(_))) {
            self.release_reservation(delivery.reservation).await;
        }
        if !matches!(outcome, Ok(DeliveryOutcome::Resumable { .. })) {
            remove_work_dir(&work_dir).await;
        }

        if let Err(e) = &outcome {
            self.report_failure(&delivery, e).await;
        }
        outcome
    }

    /// Run the chain; when every candidate failed to extract, upgrade the extractor
    /// once and run the chain again
    async fn fetch_with_upgrade(
        &self,
        delivery: &Delivery,
        strategies: &[StrategyKind],
        allow_playlist: bool,
        work_dir: &Path,
        progress: Arc<ProgressState>,
        resume: Option<ResumePoint>,
    ) -> std::result::Result<FetchedMedia, ChainError> {
        let mut retried = false;
        loop {
            let request = TransferRequest {
                transfer: &delivery.transfer,
                url: &delivery.url,
                strategies,
                selection: &delivery.selection,
                work_dir,
                allow_playlist,
                progress: progress.clone(),
                resume: resume.clone(),
            };

            match self.engine.run(request).await {
                Err(ChainError::Exhausted {
                    last_error,
                    extractor_stale,
                    network_only,
                }) => {
                    if extractor_stale && !retried && self.upgrade_extractor().await {
                        retried = true;
                        tracing::info!(transfer = %delivery.transfer, "Retrying chain with the upgraded extractor");
                        continue;
                    }
                    let error = if network_only {
                        Error::TransientNetwork {
                            message: last_error,
                        }
                    } else {
                        Error::DeliveryFailure {
                            last_error,
                            extractor_stale,
                        }
                    };
                    return Err(ChainError::Fatal(error));
                }
                other => return other,
            }
        }
    }

    /// True when a newer extractor is now installed
    async fn upgrade_extractor(&self) -> bool {
        match self.maintenance.upgrade_once().await {
            Ok(UpgradeOutcome::Upgraded { from, to }) => {
                self.emit_event(Event::ExtractorUpgraded { from, to });
                true
            }
            Ok(UpgradeOutcome::Unchanged(version)) => {
                tracing::info!(version = %version, "Extractor already current, not retrying");
                false
            }
            Ok(UpgradeOutcome::AlreadyAttempted) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Extractor upgrade failed");
                false
            }
        }
    }

    async fn offer_resume(&self, delivery: &Delivery, interruption: Interruption) -> DeliveryOutcome {
        let Interruption {
            point,
            downloaded,
            total,
            message,
        } = interruption;

        self.coordinator.snapshot(
            delivery.token.clone(),
            ResumeSnapshot {
                url: delivery.url.clone(),
                user: delivery.user.clone(),
                status: delivery.status,
                downloaded,
                total,
                selection: delivery.selection.clone(),
                fingerprint: delivery.fingerprint.clone(),
                strategy: point.strategy,
                format: point.format,
                partial: point.partial,
                work_dir: point.attempt_dir,
            },
        );

        let progress = match total {
            Some(total) => format!(
                "{} of {}",
                utils::sizeof_fmt(downloaded),
                utils::sizeof_fmt(total)
            ),
            None => utils::sizeof_fmt(downloaded),
        };
        let text = format!(
            "Download interrupted after {} ({}). Tap Resume to continue.",
            progress, message
        );
        edit_quietly(
            self.transport.as_ref(),
            delivery.status,
            &text,
            Markup::Resume(delivery.token.clone()),
        )
        .await;

        self.emit_event(Event::ResumeAvailable {
            transfer: delivery.transfer.clone(),
            token: delivery.token.clone(),
        });

        DeliveryOutcome::Resumable {
            token: delivery.token.clone(),
            downloaded,
            total,
        }
    }

    /// Split, upload, cache and bill fetched files
    async fn deliver_fetched(&self, delivery: &Delivery, media: FetchedMedia) -> Result<DeliveryResult> {
        edit_quietly(self.transport.as_ref(), delivery.status, "Uploading...", Markup::None).await;

        let kinds = kinds_for(delivery.selection.output_format());
        let mut messages = Vec::new();
        let mut file_ids = Vec::new();
        let mut cacheable = true;
        let mut delivered_kind = None;
        let mut first: Option<(MediaMetadata, String)> = None;

        for file in &media.files {
            let metadata = match self.media.probe(file).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!(file = %file.display(), error = %e, "Probe failed, uploading without metadata");
                    MediaMetadata::default()
                }
            };
            let parts = split_file(
                self.media.as_ref(),
                file,
                &metadata,
                self.config.delivery.max_file_size,
                self.config.delivery.split_headroom,
            )
            .await?;

            let caption = build_caption(&delivery.url, &metadata, delivery.title_length);
            let (kind, sent) = self
                .upload_parts(delivery.status.chat, &parts, kinds, &caption, &metadata)
                .await?;

            match delivered_kind {
                None => delivered_kind = Some(kind),
                Some(previous) if previous != kind => cacheable = false,
                Some(_) => {}
            }
            for part in sent {
                match part.file_id {
                    Some(id) => file_ids.push(id),
                    None => cacheable = false,
                }
                messages.push(part.message);
            }
            if first.is_none() {
                first = Some((metadata, caption));
            }
        }

        if cacheable
            && let (Some(kind), Some((metadata, caption))) = (delivered_kind, first)
        {
            let entry = CacheEntry {
                descriptor: ResultDescriptor { kind, file_ids },
                metadata,
                caption: Some(caption),
            };
            if let Err(e) = self.cache.put(&delivery.fingerprint, &entry).await {
                tracing::warn!(fingerprint = %delivery.fingerprint, error = %e, "Failed to cache result");
            }
        }

        let balance = self.bill(delivery, media.bytes).await;
        self.archive_delivery(&delivery.user, &delivery.url, &messages);

        edit_quietly(
            self.transport.as_ref(),
            delivery.status,
            &format!("Done. {} delivered.", utils::sizeof_fmt(media.bytes)),
            Markup::None,
        )
        .await;

        tracing::info!(
            transfer = %delivery.transfer,
            user_id = %delivery.user.id,
            strategy = %media.strategy,
            bytes = media.bytes,
            parts = messages.len(),
            "Delivered"
        );
        self.emit_event(Event::Delivered {
            transfer: delivery.transfer.clone(),
            bytes: media.bytes,
            parts: messages.len(),
        });

        Ok(DeliveryResult {
            transfer: delivery.transfer.clone(),
            fingerprint: delivery.fingerprint.clone(),
            cached: false,
            messages,
            bytes: media.bytes,
            strategy: Some(media.strategy),
            balance,
        })
    }

    /// Commit the admission reservation with the delivered bytes, or only meter
    /// bandwidth for exempt users
    ///
    /// The unit was withdrawn at admission, so a failed commit only loses the
    /// bandwidth figures.
    async fn bill(&self, delivery: &Delivery, bytes: u64) -> Option<Balance> {
        let Some(reservation) = delivery.reservation else {
            if let Err(e) = self.ledger.record_bandwidth(delivery.user.id, bytes).await {
                tracing::warn!(user_id = %delivery.user.id, bytes, error = %e, "Failed to record bandwidth");
            }
            return None;
        };

        match self.ledger.commit(reservation, bytes).await {
            Ok(balance) => {
                tracing::debug!(user_id = %delivery.user.id, free = balance.free, paid = balance.paid, "Quota deducted");
                Some(balance)
            }
            Err(e) => {
                tracing::warn!(user_id = %delivery.user.id, bytes, error = %e, "Failed to commit quota reservation");
                None
            }
        }
    }

    /// Hand back a unit held for a request that delivered nothing
    pub(crate) async fn release_reservation(&self, reservation: Option<Reservation>) {
        let Some(reservation) = reservation else {
            return;
        };
        match self.ledger.release(reservation).await {
            Ok(balance) => {
                tracing::debug!(user_id = %reservation.user, free = balance.free, paid = balance.paid, "Quota reservation released");
            }
            Err(e) => {
                tracing::warn!(user_id = %reservation.user, error = %e, "Failed to release quota reservation");
            }
        }
    }

    async fn report_failure(&self, delivery: &Delivery, error: &Error) {
        tracing::error!(
            transfer = %delivery.transfer,
            user_id = %delivery.user.id,
            url = %delivery.url,
            code = error.error_code(),
            error = %error,
            "Request failed"
        );
        edit_quietly(
            self.transport.as_ref(),
            delivery.status,
            &error.user_message(),
            Markup::None,
        )
        .await;
        self.emit_event(Event::Failed {
            transfer: delivery.transfer.clone(),
            code: error.error_code().to_string(),
            error: error.to_string(),
        });
        self.archive_failure(&delivery.user, &delivery.url, error);
    }
}

async fn remove_work_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove working directory");
        }
    }
}
