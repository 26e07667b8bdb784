//! Direct HTTP download with chunked streaming and range resume.

use super::{FetchJob, Fetcher, TransferObserver};
use crate::config::DeliveryConfig;
use crate::error::{Error, FetchError, Result};
use crate::transfer::classify::{self, is_network_reqwest_error};
use crate::types::StrategyKind;
use crate::utils::extract_filename_from_response;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Streams a URL into the working directory
///
/// Also used by the site resolvers once they have a direct file URL.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client from the delivery settings
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.network_timeout)
            .build()
            .map_err(Error::Network)?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Underlying client, shared with the site resolvers
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Stream `url` into `output_dir`, resuming `resume_from` when the server allows it
    ///
    /// Progress is reported before the first byte (so an oversized source aborts with
    /// nothing written) and after every chunk.
    pub async fn download(
        &self,
        url: &str,
        output_dir: &Path,
        observer: &dyn TransferObserver,
        resume_from: Option<&Path>,
    ) -> std::result::Result<PathBuf, FetchError> {
        if observer.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let offset = match resume_from {
            Some(path) => tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0),
            None => 0,
        };

        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await.map_err(|e| {
            if is_network_reqwest_error(&e) {
                FetchError::Network {
                    message: e.to_string(),
                    bytes_written: offset,
                    total: None,
                    partial: resume_from.map(Path::to_path_buf),
                }
            } else {
                FetchError::content(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify::fetch_error_from_status(status, url));
        }

        let resumed = offset > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT;
        let total = response
            .content_length()
            .map(|len| if resumed { len + offset } else { len });

        let (path, mut file, mut downloaded) = match (resumed, resume_from) {
            (true, Some(partial)) => {
                tracing::info!(url = %url, offset, "Resuming partial download");
                let file = tokio::fs::OpenOptions::new()
                    .append(true)
                    .open(partial)
                    .await?;
                (partial.to_path_buf(), file, offset)
            }
            _ => {
                if let Some(partial) = resume_from {
                    tracing::info!(url = %url, "Server ignored range request, restarting");
                    tokio::fs::remove_file(partial).await.ok();
                }
                let name = extract_filename_from_response(&response, url);
                let path = output_dir.join(name);
                let file = tokio::fs::File::create(&path).await?;
                (path, file, 0)
            }
        };

        // Size ceiling and cancellation are checked before any byte is written
        observer.on_progress(downloaded, total)?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    file.flush().await.ok();
                    return Err(FetchError::Network {
                        message: e.to_string(),
                        bytes_written: downloaded,
                        total,
                        partial: Some(path),
                    });
                }
            };

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Err(e) = observer.on_progress(downloaded, total) {
                // Dropping the stream closes the connection
                drop(stream);
                file.flush().await.ok();
                return Err(e);
            }
        }

        file.flush().await?;

        if let Some(expected) = total
            && downloaded < expected
        {
            return Err(FetchError::Network {
                message: format!("IncompleteRead({} bytes read, {} expected)", downloaded, expected),
                bytes_written: downloaded,
                total,
                partial: Some(path),
            });
        }

        tracing::debug!(url = %url, bytes = downloaded, path = %path.display(), "HTTP download complete");
        Ok(path)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectHttp
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> std::result::Result<Vec<PathBuf>, FetchError> {
        let path = self
            .download(job.url, job.output_dir, job.observer, job.resume_from)
            .await?;
        Ok(vec![path])
    }
}
