//! Custom assertions for integration tests

use media_dl::Event;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

/// Wait for the first event matching `pred`
///
/// Returns `None` when the timeout elapses or the channel closes first.
pub async fn wait_for_event<F>(events: &mut Receiver<Event>, timeout: Duration, mut pred: F) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Files left in a directory (missing directories count as empty)
pub fn entries_in(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
