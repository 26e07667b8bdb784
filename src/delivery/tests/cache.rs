use super::*;
use crate::store::ResultCache;
use crate::transport::FileSource;
use crate::types::{DeliveryOutcome, RequestedQuality};

#[tokio::test]
async fn repeated_link_is_served_from_cache_for_another_user() {
    let (h, fetcher) = harness_with_clip(400);
    h.seed(1, 0, 3);
    h.seed(2, 1, 0);
    let mut events = h.downloader.subscribe();

    h.downloader
        .handle_request(h.request(1, CLIP_URL))
        .await
        .unwrap();
    let outcome = h
        .downloader
        .handle_request(h.request(2, CLIP_URL))
        .await
        .unwrap();

    let DeliveryOutcome::Delivered(result) = outcome else {
        panic!("expected delivery");
    };
    assert!(result.cached);
    assert_eq!(result.bytes, 0);
    assert_eq!(result.strategy, None);
    assert_eq!(fetcher.calls().len(), 1, "cache hit must not fetch again");

    let files = h.transport.files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].1.source, FileSource::Cached("file-1".to_string()));
    assert_eq!(files[1].1.caption, files[0].1.caption);

    // A cache hit still costs one unit
    assert_eq!(h.balance(1).await, (0, 2));
    assert_eq!(h.balance(2).await, (0, 0));

    wait_for(&mut events, |e| matches!(e, Event::CacheHit { .. })).await;
}

#[tokio::test]
async fn expired_handle_drops_the_entry_and_fetches_again() {
    let fetcher = direct_fetcher(vec![
        Step::Produce("clip.mp4", 100),
        Step::Produce("clip.mp4", 100),
    ]);
    let h = Harness::new(vec![fetcher.clone()]);
    h.seed(1, 5, 0);

    h.downloader
        .handle_request(h.request(1, CLIP_URL))
        .await
        .unwrap();
    h.transport.expire_handles();

    let outcome = h
        .downloader
        .handle_request(h.request(1, CLIP_URL))
        .await
        .unwrap();

    let DeliveryOutcome::Delivered(result) = outcome else {
        panic!("expected delivery");
    };
    assert!(!result.cached);
    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(h.store.count().await.unwrap(), 1, "entry replaced by the new upload");
    assert_eq!(h.balance(1).await, (3, 0));
}

#[tokio::test]
async fn another_quality_is_another_entry() {
    let fetcher = direct_fetcher(vec![
        Step::Produce("clip.mp4", 100),
        Step::Produce("clip.m4a", 50),
    ]);
    let h = Harness::new(vec![fetcher.clone()]);
    h.seed(1, 5, 0);

    h.downloader
        .handle_request(h.request(1, CLIP_URL))
        .await
        .unwrap();
    h.downloader
        .handle_request(h.request(1, CLIP_URL).with_quality(RequestedQuality::Audio))
        .await
        .unwrap();

    assert_eq!(fetcher.calls().len(), 2);
    assert_eq!(h.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn admin_purge_forces_a_refetch() {
    let fetcher = direct_fetcher(vec![
        Step::Produce("clip.mp4", 100),
        Step::Produce("clip.mp4", 100),
    ]);
    let h = Harness::new(vec![fetcher.clone()]);
    h.seed(1, 5, 0);

    let DeliveryOutcome::Delivered(first) = h
        .downloader
        .handle_request(h.request(1, CLIP_URL))
        .await
        .unwrap()
    else {
        panic!("expected delivery");
    };
    assert!(h.downloader.purge_cache(&first.fingerprint).await.unwrap());

    h.downloader
        .handle_request(h.request(1, CLIP_URL))
        .await
        .unwrap();
    assert_eq!(fetcher.calls().len(), 2);
}
