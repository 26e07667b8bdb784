use super::*;
use crate::error::Error;
use crate::types::DeliveryOutcome;

#[tokio::test]
async fn direct_route_only_uses_plain_http() {
    let extractor =
        ScriptedFetcher::new(StrategyKind::Extractor, vec![Step::Produce("page.mp4", 10)]);
    let direct = direct_fetcher(vec![Step::Produce("page.bin", 10)]);
    let h = Harness::new(vec![extractor.clone(), direct.clone()]);
    h.seed(1, 5, 0);

    let outcome = h
        .downloader
        .handle_direct(h.request(1, PAGE_URL))
        .await
        .unwrap();

    let DeliveryOutcome::Delivered(result) = outcome else {
        panic!("expected delivery");
    };
    assert_eq!(result.strategy, Some(StrategyKind::DirectHttp));
    assert!(extractor.calls().is_empty());
    assert_eq!(direct.calls().len(), 1);
}

#[tokio::test]
async fn direct_route_refuses_the_primary_platform() {
    let direct = direct_fetcher(vec![Step::Produce("v.mp4", 10)]);
    let h = Harness::new(vec![direct.clone()]);
    h.seed(1, 5, 0);

    let err = h
        .downloader
        .handle_direct(h.request(1, "https://www.youtube.com/watch?v=abc"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PrimaryPlatform { .. }));
    assert!(direct.calls().is_empty());
    assert_eq!(h.balance(1).await, (5, 0));
}

#[tokio::test]
async fn primary_platform_goes_to_the_streaming_strategy() {
    let streaming =
        ScriptedFetcher::new(StrategyKind::Streaming, vec![Step::Produce("v.mp4", 10)]);
    let h = Harness::new(vec![streaming.clone()]);
    h.seed(1, 5, 0);

    h.downloader
        .handle_request(h.request(1, "https://youtu.be/abc"))
        .await
        .unwrap();

    assert_eq!(streaming.calls().len(), 1);
}

#[tokio::test]
async fn malformed_link_is_invalid() {
    let h = Harness::new(vec![]);
    h.seed(1, 5, 0);

    let err = h
        .downloader
        .handle_direct(h.request(1, "not a link"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));
}
