//! pixeldrain share links, rewritten to the file API and streamed over HTTP.

use super::{FetchJob, Fetcher, HttpFetcher};
use crate::error::FetchError;
use crate::types::StrategyKind;
use async_trait::async_trait;
use std::path::PathBuf;

const DEFAULT_API_BASE: &str = "https://pixeldrain.com";

/// Resolves `/u/{id}` and `/file/{id}` share links
#[derive(Clone, Debug)]
pub struct PixeldrainFetcher {
    http: HttpFetcher,
    api_base: String,
}

impl PixeldrainFetcher {
    /// Create a resolver that streams through `http`
    pub fn new(http: HttpFetcher) -> Self {
        Self::with_api_base(http, DEFAULT_API_BASE)
    }

    /// Create a resolver against a different API host
    pub fn with_api_base(http: HttpFetcher, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Direct download URL for a share link
    pub fn download_url(&self, url: &str) -> Result<String, FetchError> {
        let id = file_id(url).ok_or_else(|| {
            FetchError::Unavailable(format!("not a pixeldrain file link: {}", url))
        })?;
        Ok(format!("{}/api/file/{}?download", self.api_base, id))
    }
}

fn file_id(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["u", id, ..] | ["file", id, ..] | ["api", "file", id, ..] => Some(id.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Fetcher for PixeldrainFetcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pixeldrain
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<Vec<PathBuf>, FetchError> {
        let direct = self.download_url(job.url)?;
        tracing::debug!(url = %job.url, direct = %direct, "Resolved pixeldrain link");
        let path = self
            .http
            .download(&direct, job.output_dir, job.observer, job.resume_from)
            .await?;
        Ok(vec![path])
    }
}
