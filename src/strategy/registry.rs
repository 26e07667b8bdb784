//! Host suffix table mapping a URL to an ordered list of fetch strategies.

use crate::error::{Error, Result};
use crate::types::StrategyKind;
use crate::utils;

/// Hosts of the primary streaming platform
///
/// These never go through the table; they have a dedicated multi-format strategy.
const PRIMARY_PLATFORM_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// Maps URL authorities to candidate strategies
#[derive(Clone, Debug)]
pub struct StrategyRegistry {
    table: Vec<(String, Vec<StrategyKind>)>,
    extractor_fallback: bool,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StrategyRegistry {
    /// Registry with the built-in site table
    pub fn new(extractor_fallback: bool) -> Self {
        let table = vec![
            ("pixeldrain.com", vec![StrategyKind::Pixeldrain]),
            ("krakenfiles.com", vec![StrategyKind::Krakenfiles]),
            (
                "reddit.com",
                vec![StrategyKind::Reddit, StrategyKind::Extractor],
            ),
            ("redd.it", vec![StrategyKind::Reddit, StrategyKind::Extractor]),
            ("instagram.com", vec![StrategyKind::Extractor]),
            ("threads.net", vec![StrategyKind::Extractor]),
            ("tiktok.com", vec![StrategyKind::Extractor]),
        ];
        Self {
            table: table
                .into_iter()
                .map(|(suffix, kinds)| (suffix.to_string(), kinds))
                .collect(),
            extractor_fallback,
        }
    }

    /// Registry with a custom table (first match wins)
    pub fn with_table(table: Vec<(String, Vec<StrategyKind>)>, extractor_fallback: bool) -> Self {
        Self {
            table,
            extractor_fallback,
        }
    }

    /// Whether the URL belongs to the primary streaming platform
    pub fn is_primary_platform(&self, url: &str) -> bool {
        host_of(url)
            .map(|host| is_primary_host(&host))
            .unwrap_or(false)
    }

    /// Resolve a URL through the site table
    ///
    /// Primary-platform URLs are rejected with a guidance error. Unmatched URLs whose
    /// path ends in a media extension get `[DirectHttp]`; other unmatched URLs go to the
    /// generic extractor when enabled, otherwise fail with `NoStrategy`.
    pub fn resolve(&self, url: &str) -> Result<Vec<StrategyKind>> {
        let parsed = url::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        let host = parsed
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .ok_or_else(|| Error::InvalidUrl(format!("{}: missing host", url)))?;

        if is_primary_host(&host) {
            return Err(Error::PrimaryPlatform { host });
        }

        if let Some((suffix, kinds)) = self
            .table
            .iter()
            .find(|(suffix, _)| host_matches(&host, suffix))
        {
            tracing::debug!(host = %host, suffix = %suffix, strategies = ?kinds, "Strategy table match");
            return Ok(kinds.clone());
        }

        if utils::is_direct_media_path(parsed.path()) {
            return Ok(vec![StrategyKind::DirectHttp]);
        }

        if self.extractor_fallback {
            return Ok(vec![StrategyKind::Extractor]);
        }

        Err(Error::NoStrategy { host })
    }

    /// Strategy list for a request: the dedicated streaming strategy for the primary
    /// platform, the table otherwise
    pub fn plan(&self, url: &str) -> Result<Vec<StrategyKind>> {
        if self.is_primary_platform(url) {
            return Ok(vec![StrategyKind::Streaming]);
        }
        self.resolve(url)
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

fn host_matches(host: &str, suffix: &str) -> bool {
    host == suffix
        || (host.len() > suffix.len()
            && host.ends_with(suffix)
            && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
}

fn is_primary_host(host: &str) -> bool {
    PRIMARY_PLATFORM_HOSTS
        .iter()
        .any(|suffix| host_matches(host, suffix))
}
