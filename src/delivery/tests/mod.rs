use super::test_helpers::{Harness, ScriptedFetcher, Step};
use crate::types::{Event, StrategyKind};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

mod archive;
mod cache;
mod direct;
mod upgrade;

const CLIP_URL: &str = "https://files.example/media/clip.mp4";
const PAGE_URL: &str = "https://videos.example/watch/1";

fn direct_fetcher(steps: Vec<Step>) -> std::sync::Arc<ScriptedFetcher> {
    ScriptedFetcher::new(StrategyKind::DirectHttp, steps)
}

/// Wait for the first event matching `pred`, skipping the rest
async fn wait_for<F>(rx: &mut Receiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not received in time")
}

/// Poll until `check` passes or a second elapses
async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn harness_with_clip(bytes: usize) -> (Harness, std::sync::Arc<ScriptedFetcher>) {
    let fetcher = direct_fetcher(vec![Step::Produce("clip.mp4", bytes)]);
    (Harness::new(vec![fetcher.clone()]), fetcher)
}
