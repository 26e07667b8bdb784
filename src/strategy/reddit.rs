//! Reddit posts: read the post listing JSON and stream the hosted media.
//!
//! Handles hosted videos (`reddit_video.fallback_url`), direct image/gif links and
//! galleries. Anything else is reported as a content failure so the chain moves on
//! to the generic extractor.

use super::{FetchJob, Fetcher, HttpFetcher};
use crate::error::FetchError;
use crate::transfer::classify::{fetch_error_from_status, is_network_reqwest_error};
use crate::types::StrategyKind;
use crate::utils;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

/// Resolves Reddit post links to media URLs
#[derive(Clone, Debug)]
pub struct RedditFetcher {
    http: HttpFetcher,
}

impl RedditFetcher {
    /// Create a resolver that streams through `http`
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    /// Follow share-link and short-link redirects to the canonical post URL
    async fn canonical_url(&self, url: &str) -> Result<url::Url, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::content(e.to_string()))?;
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        let needs_redirect = parsed.path().contains("/s/") || host.ends_with("redd.it");
        if !needs_redirect {
            return Ok(parsed);
        }

        let response = self
            .http
            .client()
            .get(url)
            .send()
            .await
            .map_err(request_error)?;
        let resolved = response.url().clone();
        tracing::info!(url = %url, resolved = %resolved, "Resolved Reddit share link");
        Ok(resolved)
    }

    /// Media URLs of a post, in display order
    async fn media_urls(&self, url: &str) -> Result<Vec<String>, FetchError> {
        let mut post = self.canonical_url(url).await?;
        if !post.path().contains("/comments/") {
            return Err(FetchError::content(format!("not a Reddit post: {}", post)));
        }
        post.set_query(None);
        post.set_fragment(None);
        let listing_url = format!("{}.json", post.as_str().trim_end_matches('/'));

        let response = self
            .http
            .client()
            .get(&listing_url)
            .send()
            .await
            .map_err(request_error)?;
        if !response.status().is_success() {
            return Err(fetch_error_from_status(response.status(), &listing_url));
        }
        let listing: Value = response
            .json()
            .await
            .map_err(|e| FetchError::content(format!("unexpected Reddit listing: {}", e)))?;

        let urls = media_from_listing(&listing);
        if urls.is_empty() {
            return Err(FetchError::content("no hosted media in Reddit post"));
        }
        Ok(urls)
    }
}

fn request_error(e: reqwest::Error) -> FetchError {
    if is_network_reqwest_error(&e) {
        FetchError::network(e.to_string())
    } else {
        FetchError::content(e.to_string())
    }
}

/// Extract media URLs from a post listing (`[post_listing, comments]`)
pub(crate) fn media_from_listing(listing: &Value) -> Vec<String> {
    let Some(post) = listing
        .get(0)
        .and_then(|l| l.pointer("/data/children/0/data"))
    else {
        return Vec::new();
    };

    for key in ["secure_media", "media"] {
        if let Some(video) = post
            .pointer(&format!("/{}/reddit_video/fallback_url", key))
            .and_then(Value::as_str)
        {
            return vec![unescape(video)];
        }
    }

    if post.get("is_gallery").and_then(Value::as_bool) == Some(true) {
        let metadata = post.get("media_metadata");
        let items = post
            .pointer("/gallery_data/items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        return items
            .iter()
            .filter_map(|item| item.get("media_id").and_then(Value::as_str))
            .filter_map(|id| {
                metadata?
                    .get(id)?
                    .pointer("/s/u")
                    .or_else(|| metadata?.get(id)?.pointer("/s/gif"))
                    .and_then(Value::as_str)
                    .map(unescape)
            })
            .collect();
    }

    post.get("url_overridden_by_dest")
        .or_else(|| post.get("url"))
        .and_then(Value::as_str)
        .filter(|u| {
            url::Url::parse(u)
                .map(|parsed| utils::is_direct_media_path(parsed.path()))
                .unwrap_or(false)
        })
        .map(|u| vec![unescape(u)])
        .unwrap_or_default()
}

// Listing URLs are HTML-escaped
fn unescape(url: &str) -> String {
    url.replace("&amp;", "&")
}

#[async_trait]
impl Fetcher for RedditFetcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Reddit
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<Vec<PathBuf>, FetchError> {
        if job.observer.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let urls = self.media_urls(job.url).await?;
        tracing::debug!(url = %job.url, items = urls.len(), "Resolved Reddit media");

        let mut files = Vec::with_capacity(urls.len());
        for media in &urls {
            // Only a single-item post can resume its partial file
            let resume = if urls.len() == 1 { job.resume_from } else { None };
            files.push(
                self.http
                    .download(media, job.output_dir, job.observer, resume)
                    .await?,
            );
        }
        Ok(files)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::TransferObserver;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Silent;

    impl TransferObserver for Silent {
        fn on_progress(&self, _: u64, _: Option<u64>) -> Result<(), FetchError> {
            Ok(())
        }

        fn is_cancelled(&self) -> bool {
            false
        }
    }

    fn listing(post: Value) -> Value {
        json!([{ "data": { "children": [{ "data": post }] } }, {}])
    }

    #[test]
    fn hosted_video_uses_fallback_url() {
        let value = listing(json!({
            "secure_media": { "reddit_video": { "fallback_url": "https://v.redd.it/x/DASH_720.mp4?source=fallback&amp;a=1" } },
            "url": "https://v.redd.it/x"
        }));
        assert_eq!(
            media_from_listing(&value),
            vec!["https://v.redd.it/x/DASH_720.mp4?source=fallback&a=1"]
        );
    }

    #[test]
    fn gallery_keeps_display_order() {
        let value = listing(json!({
            "is_gallery": true,
            "gallery_data": { "items": [{ "media_id": "b" }, { "media_id": "a" }] },
            "media_metadata": {
                "a": { "s": { "u": "https://preview.redd.it/a.jpg?width=1&amp;s=1" } },
                "b": { "s": { "u": "https://preview.redd.it/b.jpg" } }
            }
        }));
        assert_eq!(
            media_from_listing(&value),
            vec![
                "https://preview.redd.it/b.jpg",
                "https://preview.redd.it/a.jpg?width=1&s=1"
            ]
        );
    }

    #[test]
    fn link_posts_to_pages_have_no_media() {
        let value = listing(json!({ "url_overridden_by_dest": "https://example.com/article" }));
        assert!(media_from_listing(&value).is_empty());
        let value = listing(json!({ "url_overridden_by_dest": "https://i.redd.it/cat.gif" }));
        assert_eq!(media_from_listing(&value), vec!["https://i.redd.it/cat.gif"]);
    }

    #[tokio::test]
    async fn post_listing_is_fetched_and_media_streamed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/pics/comments/abc/title.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(json!({
                "url_overridden_by_dest": format!("{}/media/pic.png", server.uri())
            }))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/pic.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNG".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/r/pics/comments/abc/title/?utm=share", server.uri());
        let job = FetchJob {
            url: &url,
            format: None,
            output_dir: dir.path(),
            observer: &Silent,
            audio_only: false,
            allow_playlist: false,
            resume_from: None,
        };

        let files = RedditFetcher::new(HttpFetcher::with_client(reqwest::Client::new()))
            .fetch(&job)
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name().unwrap(), "pic.png");
    }

    #[tokio::test]
    async fn non_post_url_is_a_content_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job = FetchJob {
            url: "https://www.reddit.com/r/pics/",
            format: None,
            output_dir: dir.path(),
            observer: &Silent,
            audio_only: false,
            allow_playlist: false,
            resume_from: None,
        };
        let err = RedditFetcher::new(HttpFetcher::with_client(reqwest::Client::new()))
            .fetch(&job)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Content { .. }));
    }
}
