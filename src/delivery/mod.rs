//! Delivery orchestrator split into focused submodules.
//!
//! The `MediaDownloader` struct and its methods are organized by domain:
//! - [`request`] - Request intake, cache lookup, transfer stage and billing
//! - [`upload`] - Upload with media kind fallback and caption building
//! - [`archive`] - Best-effort copies and diagnostics to the archival sink
//! - [`control`] - Cancel, resume and graceful shutdown
//! - [`admin`] - Administrative operations delegated to the stores

mod admin;
mod archive;
mod control;
mod request;
mod upload;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use request::MediaRequest;
pub use upload::build_caption;

use crate::config::Config;
use crate::coordinator::ResumeCoordinator;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::maintenance::ExtractorMaintenance;
use crate::media::{FfmpegTools, MediaTools, NoOpMediaTools};
use crate::store::{QuotaLedger, ResultCache, SettingsStore};
use crate::strategy::{Fetcher, StrategyRegistry};
use crate::transfer::TransferEngine;
use crate::transport::ChatTransport;
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Collaborators of a [`MediaDownloader`]
///
/// [`MediaDownloader::new`] builds these from configuration; tests and embedders with
/// their own stores use [`MediaDownloader::with_components`].
pub struct Components {
    /// Per-user consumption budget
    pub ledger: Arc<dyn QuotaLedger>,
    /// Delivered results by fingerprint
    pub cache: Arc<dyn ResultCache>,
    /// Per-user preferences
    pub settings: Arc<dyn SettingsStore>,
    /// Chat platform
    pub transport: Arc<dyn ChatTransport>,
    /// Probe and cut
    pub media: Arc<dyn MediaTools>,
    /// Extractor self-upgrade
    pub maintenance: Arc<ExtractorMaintenance>,
    /// URL to strategy table
    pub registry: StrategyRegistry,
    /// One fetcher per strategy kind
    pub fetchers: Vec<Arc<dyn Fetcher>>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct MediaDownloader {
    pub(crate) ledger: Arc<dyn QuotaLedger>,
    pub(crate) cache: Arc<dyn ResultCache>,
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) transport: Arc<dyn ChatTransport>,
    pub(crate) media: Arc<dyn MediaTools>,
    pub(crate) maintenance: Arc<ExtractorMaintenance>,
    pub(crate) registry: Arc<StrategyRegistry>,
    pub(crate) engine: Arc<TransferEngine>,
    pub(crate) coordinator: Arc<ResumeCoordinator>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    pub(crate) config: Arc<Config>,
    /// Set to false during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl MediaDownloader {
    /// Create a downloader backed by SQLite and the external toolchain
    ///
    /// This initializes all core components:
    /// - Opens/creates the SQLite database and runs migrations
    /// - Discovers yt-dlp, ffmpeg and ffprobe (configured paths first, then PATH)
    /// - Sets up the event broadcast channel
    pub async fn new(config: Config, transport: Arc<dyn ChatTransport>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(config.temp_dir()).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create temp directory '{}': {}",
                    config.temp_dir().display(),
                    e
                ),
            ))
        })?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        let media: Arc<dyn MediaTools> = match FfmpegTools::from_config(&config.extractor) {
            Some(tools) => Arc::new(tools),
            None => {
                tracing::warn!("ffmpeg/ffprobe not found, oversized results will be split by bytes");
                Arc::new(NoOpMediaTools)
            }
        };
        tracing::info!(media_tools = media.name(), can_cut = media.can_cut(), "Media tools initialized");

        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        let coordinator = Arc::new(ResumeCoordinator::new());
        let engine = TransferEngine::from_config(&config, coordinator.clone(), event_tx.clone())?;

        Ok(Self {
            ledger: db.clone(),
            cache: db.clone(),
            settings: db,
            transport,
            media,
            maintenance: Arc::new(ExtractorMaintenance::from_config(&config.extractor)),
            registry: Arc::new(StrategyRegistry::new(config.extractor.extractor_fallback)),
            engine: Arc::new(engine),
            coordinator,
            event_tx,
            config: Arc::new(config),
            accepting_new: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Create a downloader from explicit collaborators
    pub fn with_components(config: Config, components: Components) -> Self {
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        let coordinator = Arc::new(ResumeCoordinator::new());

        let mut engine = TransferEngine::new(
            config.retry.clone(),
            config.extractor.audio_format.clone(),
            config.delivery.hard_ceiling(),
            coordinator.clone(),
            event_tx.clone(),
        );
        for fetcher in components.fetchers {
            engine.register(fetcher);
        }

        Self {
            ledger: components.ledger,
            cache: components.cache,
            settings: components.settings,
            transport: components.transport,
            media: components.media,
            maintenance: components.maintenance,
            registry: Arc::new(components.registry),
            engine: Arc::new(engine),
            coordinator,
            event_tx,
            config: Arc::new(config),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Subscribe to lifecycle events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// A subscriber that falls behind by more than 1000 events receives
    /// `RecvError::Lagged`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_dl::{MediaDownloader, Config};
    /// # use std::sync::Arc;
    /// # async fn example(transport: Arc<dyn media_dl::ChatTransport>) -> media_dl::Result<()> {
    /// let downloader = MediaDownloader::new(Config::default(), transport).await?;
    ///
    /// let mut events = downloader.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         tracing::info!(?event, "media event");
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Resume/cancellation tables shared with the transfer engine
    pub fn coordinator(&self) -> &ResumeCoordinator {
        &self.coordinator
    }

    /// Whether new requests are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    /// Emit an event to all subscribers
    ///
    /// Dropped silently when nobody is listening.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
