use super::*;
use crate::delivery::test_helpers::FakeUpdater;
use crate::error::Error;
use crate::strategy::QualitySelection;
use crate::types::{DeliveryOutcome, MediaMetadata, UserSettings};

fn candidate_count() -> usize {
    QualitySelection::new(&UserSettings::default(), None)
        .candidates("m4a")
        .len()
}

#[tokio::test]
async fn stale_extractor_is_upgraded_and_the_chain_retried_once() {
    let n = candidate_count();
    let mut steps = vec![Step::Extraction; n];
    steps.push(Step::Produce("v.mp4", 30));
    let extractor = ScriptedFetcher::new(StrategyKind::Extractor, steps);
    let h = Harness::build(
        vec![extractor.clone()],
        |_| {},
        MediaMetadata::default(),
        FakeUpdater::new("2024.01.01", Some("2024.06.01")),
    );
    h.seed(1, 5, 0);
    let mut events = h.downloader.subscribe();

    let outcome = h
        .downloader
        .handle_request(h.request(1, PAGE_URL))
        .await
        .unwrap();

    assert!(matches!(outcome, DeliveryOutcome::Delivered(_)));
    assert_eq!(extractor.calls().len(), n + 1);
    assert_eq!(h.updater.upgrades(), 1);

    let upgraded = wait_for(&mut events, |e| matches!(e, Event::ExtractorUpgraded { .. })).await;
    let Event::ExtractorUpgraded { from, to } = upgraded else {
        unreachable!()
    };
    assert_eq!((from.as_str(), to.as_str()), ("2024.01.01", "2024.06.01"));
}

#[tokio::test]
async fn unchanged_extractor_is_not_retried() {
    let n = candidate_count();
    let extractor = ScriptedFetcher::new(StrategyKind::Extractor, vec![Step::Extraction; n]);
    let h = Harness::new(vec![extractor.clone()]);
    h.seed(1, 5, 0);

    let err = h
        .downloader
        .handle_request(h.request(1, PAGE_URL))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::DeliveryFailure {
            extractor_stale: true,
            ..
        }
    ));
    assert_eq!(extractor.calls().len(), n);
    assert_eq!(h.updater.upgrades(), 1);
    assert_eq!(h.balance(1).await, (5, 0));

    let (last, _) = h.transport.last_edit().unwrap();
    assert!(last.contains("/direct"), "failure suggests the direct route");
}

#[tokio::test]
async fn upgrade_is_attempted_once_per_process() {
    let n = candidate_count();
    let extractor =
        ScriptedFetcher::new(StrategyKind::Extractor, vec![Step::Extraction; n * 2]);
    let h = Harness::new(vec![extractor]);
    h.seed(1, 5, 0);

    for _ in 0..2 {
        h.downloader
            .handle_request(h.request(1, PAGE_URL))
            .await
            .unwrap_err();
    }
    assert_eq!(h.updater.upgrades(), 1);
}

#[tokio::test]
async fn mixed_failures_do_not_trigger_an_upgrade() {
    let n = candidate_count();
    let mut steps = vec![Step::Empty];
    steps.extend(vec![Step::Extraction; n - 1]);
    let extractor = ScriptedFetcher::new(StrategyKind::Extractor, steps);
    let h = Harness::new(vec![extractor]);
    h.seed(1, 5, 0);

    let err = h
        .downloader
        .handle_request(h.request(1, PAGE_URL))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::DeliveryFailure {
            extractor_stale: false,
            ..
        }
    ));
    assert_eq!(h.updater.upgrades(), 0);
}
