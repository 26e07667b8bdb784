use super::*;
use crate::types::ChatId;

const ARCHIVE: i64 = -100_500;

#[tokio::test]
async fn deliveries_are_copied_to_the_archive_chat() {
    let fetcher = direct_fetcher(vec![Step::Produce("clip.mp4", 100)]);
    let h = Harness::with_config(vec![fetcher], |config| {
        config.delivery.archive_chat = Some(ARCHIVE)
    });
    h.seed(1, 5, 0);

    h.downloader
        .handle_request(h.request(1, CLIP_URL))
        .await
        .unwrap();

    assert!(eventually(|| h.transport.copies().len() == 1).await);
    let (to, _) = h.transport.copies()[0];
    assert_eq!(to, ChatId(ARCHIVE));
    assert!(
        h.transport
            .texts()
            .iter()
            .any(|(chat, text)| *chat == ChatId(ARCHIVE) && text.starts_with("#id1"))
    );
}

#[tokio::test]
async fn unreachable_archive_never_fails_the_delivery() {
    let fetcher = direct_fetcher(vec![Step::Produce("clip.mp4", 100)]);
    let h = Harness::with_config(vec![fetcher], |config| {
        config.delivery.archive_chat = Some(ARCHIVE)
    });
    h.seed(1, 5, 0);
    h.transport.fail_chat(ARCHIVE);
    let mut events = h.downloader.subscribe();

    assert!(
        h.downloader
            .handle_request(h.request(1, CLIP_URL))
            .await
            .is_ok()
    );
    wait_for(&mut events, |e| matches!(e, Event::ArchiveFailed { .. })).await;
    assert_eq!(h.balance(1).await, (4, 0));
}

#[tokio::test]
async fn failures_are_reported_to_the_archive_chat() {
    let fetcher = direct_fetcher(vec![Step::Unavailable]);
    let h = Harness::with_config(vec![fetcher], |config| {
        config.delivery.archive_chat = Some(ARCHIVE)
    });
    h.seed(1, 5, 0);

    h.downloader
        .handle_request(h.request(1, CLIP_URL))
        .await
        .unwrap_err();

    assert!(
        eventually(|| h
            .transport
            .texts()
            .iter()
            .any(|(chat, text)| *chat == ChatId(ARCHIVE) && text.contains("[content_unavailable]")))
        .await
    );
}

#[tokio::test]
async fn no_archive_chat_means_no_copies() {
    let (h, _) = harness_with_clip(100);
    h.seed(1, 5, 0);

    h.downloader
        .handle_request(h.request(1, CLIP_URL))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.transport.copies().is_empty());
}
