//! Transfer Engine: runs fetch strategies against a scoped working directory.
//!
//! - [`classify`] - Network/content/policy classification of fetch failures
//! - [`session`] - Per-attempt state machine, size ceiling and cancellation checks
//! - [`progress`] - Shared progress counters and the throttled status reporter
//! - [`engine`] - Strategy × format candidate chain with retry and resume capture

pub mod classify;
pub mod engine;
pub mod progress;
pub mod session;

pub use engine::{ChainError, Interruption, ResumePoint, TransferEngine, TransferRequest};
pub use progress::{ProgressReporterParams, ProgressState, spawn_progress_reporter};
pub use session::{AttemptState, TransferSession};
