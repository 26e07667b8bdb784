//! # media-dl
//!
//! Core of a chat-driven media fetching proxy: a user sends a link, the library fetches the
//! media behind it and delivers it back through a chat platform.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Transport-agnostic** - The chat platform is a trait; bring your own bot client
//! - **Metered** - Every delivery is billed against a per-user daily allowance or paid balance
//! - **Cache-first** - A result delivered once is re-sent from the platform's file handles
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::*;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn ChatTransport>) -> Result<()> {
//! let downloader = MediaDownloader::new(Config::default(), transport).await?;
//!
//! // Subscribe to events
//! let mut events = downloader.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let request = MediaRequest::new(
//!     UserProfile::new(42),
//!     MessageRef::new(42, 1),
//!     "https://example.com/clip.mp4",
//! );
//! match downloader.handle_request(request).await? {
//!     DeliveryOutcome::Delivered(result) => println!("sent {} bytes", result.bytes),
//!     other => println!("not delivered: {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Cancellation flags and resume snapshots
pub mod coordinator;
/// SQLite persistence layer
pub mod db;
/// Delivery orchestrator
pub mod delivery;
/// Error types
pub mod error;
/// Extractor self-upgrade
pub mod maintenance;
/// Probe, cut and split
pub mod media;
/// Retry logic with exponential backoff
pub mod retry;
/// Daily quota reset task
pub mod scheduler_task;
/// Quota ledger, result cache and settings store traits
pub mod store;
/// Fetch strategies and the URL to strategy registry
pub mod strategy;
/// Transfer engine
pub mod transfer;
/// Chat platform abstraction
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::ResumeCoordinator;
pub use db::Database;
pub use delivery::{Components, MediaDownloader, MediaRequest};
pub use error::{Error, FetchError, QuotaError, Result, UserFacing, UserNotice};
pub use scheduler_task::DailyResetTask;
pub use store::{
    ChargedPool, CreditSource, MemoryStore, QuotaLedger, Reservation, ResultCache, SettingsStore,
};
pub use strategy::{Fetcher, StrategyRegistry};
pub use transport::{ChatTransport, FileSource, Markup, SentFile, TransportError, Upload};
pub use types::{
    Balance, ChatId, DeliveryOutcome, DeliveryResult, Event, Fingerprint, MediaKind,
    MessageRef, OutputFormat, Quality, RequestedQuality, ResumeToken, StrategyKind,
    TransferId, UserId, UserProfile, UserSettings,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method,
/// which stops new requests and cancels running transfers.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{ChatTransport, Config, MediaDownloader, run_with_shutdown};
/// use std::sync::Arc;
///
/// # async fn example(transport: Arc<dyn ChatTransport>) -> media_dl::Result<()> {
/// let downloader = MediaDownloader::new(Config::default(), transport).await?;
///
/// // Run with automatic signal handling
/// run_with_shutdown(downloader).await;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(downloader: MediaDownloader) {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
