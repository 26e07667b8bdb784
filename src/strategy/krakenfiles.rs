//! krakenfiles pages: scrape the download form, trade its token for a file URL.

use super::{FetchJob, Fetcher, HttpFetcher};
use crate::error::FetchError;
use crate::transfer::classify::{fetch_error_from_status, is_network_reqwest_error};
use crate::types::StrategyKind;
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

// Literal patterns; compilation cannot fail at runtime
#[allow(clippy::expect_used)]
static FORM_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<form\b[^>]*\bid\s*=\s*["']dl-form["'][^>]*>"#).expect("form regex is valid")
});
#[allow(clippy::expect_used)]
static INPUT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<input\b[^>]*\bid\s*=\s*["']dl-token["'][^>]*>"#)
        .expect("token input regex is valid")
});
#[allow(clippy::expect_used)]
static ACTION_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\baction\s*=\s*["']([^"']+)["']"#).expect("action regex is valid")
});
#[allow(clippy::expect_used)]
static VALUE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bvalue\s*=\s*["']([^"']+)["']"#).expect("value regex is valid")
});

/// Download form scraped from a krakenfiles page
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DownloadForm {
    pub(crate) action: String,
    pub(crate) token: String,
}

/// Resolves krakenfiles view pages
#[derive(Clone, Debug)]
pub struct KrakenfilesFetcher {
    http: HttpFetcher,
}

impl KrakenfilesFetcher {
    /// Create a resolver that streams through `http`
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    async fn resolve(&self, url: &str) -> Result<String, FetchError> {
        let client = self.http.client();

        let page = client.get(url).send().await.map_err(request_error)?;
        if !page.status().is_success() {
            return Err(fetch_error_from_status(page.status(), url));
        }
        let html = page.text().await.map_err(request_error)?;
        let form = parse_form(&html).ok_or_else(|| FetchError::Content {
            message: "download form not found on krakenfiles page".into(),
            extraction: true,
        })?;

        let base = url::Url::parse(url).map_err(|e| FetchError::content(e.to_string()))?;
        let post_url = base
            .join(&form.action)
            .map_err(|e| FetchError::content(format!("bad form action {}: {}", form.action, e)))?;

        let response = client
            .post(post_url.clone())
            .form(&[("token", form.token.as_str())])
            .send()
            .await
            .map_err(request_error)?;
        if !response.status().is_success() {
            return Err(fetch_error_from_status(response.status(), post_url.as_str()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::content(format!("unexpected krakenfiles response: {}", e)))?;
        body.get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| FetchError::content("krakenfiles response has no download url"))
    }
}

fn request_error(e: reqwest::Error) -> FetchError {
    if is_network_reqwest_error(&e) {
        FetchError::network(e.to_string())
    } else {
        FetchError::content(e.to_string())
    }
}

/// Find the `dl-form` action and `dl-token` value in a page
pub(crate) fn parse_form(html: &str) -> Option<DownloadForm> {
    let form = FORM_TAG.find(html)?.as_str();
    let action = ACTION_ATTR.captures(form)?.get(1)?.as_str().to_string();
    let input = INPUT_TAG.find(html)?.as_str();
    let token = VALUE_ATTR.captures(input)?.get(1)?.as_str().to_string();
    Some(DownloadForm { action, token })
}

#[async_trait]
impl Fetcher for KrakenfilesFetcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Krakenfiles
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<Vec<PathBuf>, FetchError> {
        if job.observer.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let direct = self.resolve(job.url).await?;
        tracing::debug!(url = %job.url, direct = %direct, "Resolved krakenfiles link");
        let path = self
            .http
            .download(&direct, job.output_dir, job.observer, job.resume_from)
            .await?;
        Ok(vec![path])
    }
}
