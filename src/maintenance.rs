//! Extractor self-upgrade
//!
//! When every candidate of a chain fails with an extraction failure the extractor is
//! probably out of date with the site. The orchestrator asks [`ExtractorMaintenance`]
//! for an upgrade, which runs at most once per process. The extractor is an external
//! binary, so a new version takes effect for the next spawned process and no restart
//! is needed.

use crate::config::ExtractorConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;

/// Version query and in-place upgrade of the extraction tool
#[async_trait]
pub trait ExtractorUpdater: Send + Sync {
    /// Installed version string
    async fn version(&self) -> crate::Result<String>;

    /// Upgrade in place
    async fn upgrade(&self) -> crate::Result<()>;
}

/// Upgrades yt-dlp through its built-in updater (`yt-dlp -U`)
#[derive(Clone, Debug)]
pub struct YtDlpUpdater {
    binary_path: PathBuf,
}

impl YtDlpUpdater {
    /// Create with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Use the configured path, falling back to a PATH search
    pub fn from_config(config: &ExtractorConfig) -> Option<Self> {
        config
            .ytdlp_path
            .clone()
            .or_else(|| which::which("yt-dlp").ok())
            .map(Self::new)
    }

    /// Binary being managed
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }
}

#[async_trait]
impl ExtractorUpdater for YtDlpUpdater {
    async fn version(&self) -> crate::Result<String> {
        let output = Command::new(&self.binary_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(crate::Error::ExternalTool(format!(
                "yt-dlp --version failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn upgrade(&self) -> crate::Result<()> {
        let output = Command::new(&self.binary_path)
            .arg("-U")
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            return Err(crate::Error::ExternalTool(format!(
                "yt-dlp -U failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::debug!(output = %String::from_utf8_lossy(&output.stdout).trim(), "yt-dlp updater finished");
        Ok(())
    }
}

/// Result of an upgrade request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// An upgrade already ran (or is disabled) in this process
    AlreadyAttempted,
    /// The updater ran but the version did not change
    Unchanged(String),
    /// A new version is installed
    Upgraded {
        /// Version before
        from: String,
        /// Version after
        to: String,
    },
}

/// Runs the extractor upgrade at most once per process
pub struct ExtractorMaintenance {
    updater: Option<Arc<dyn ExtractorUpdater>>,
    attempted: AtomicBool,
}

impl ExtractorMaintenance {
    /// Maintenance backed by `updater`
    pub fn new(updater: Arc<dyn ExtractorUpdater>) -> Self {
        Self {
            updater: Some(updater),
            attempted: AtomicBool::new(false),
        }
    }

    /// Maintenance that never upgrades
    pub fn disabled() -> Self {
        Self {
            updater: None,
            attempted: AtomicBool::new(true),
        }
    }

    /// Build from configuration
    ///
    /// Disabled when `auto_upgrade` is off or yt-dlp cannot be found.
    pub fn from_config(config: &ExtractorConfig) -> Self {
        if !config.auto_upgrade {
            return Self::disabled();
        }
        match YtDlpUpdater::from_config(config) {
            Some(updater) => Self::new(Arc::new(updater)),
            None => Self::disabled(),
        }
    }

    /// Whether the single upgrade has been used up
    pub fn attempted(&self) -> bool {
        self.attempted.load(Ordering::SeqCst)
    }

    /// Upgrade unless an upgrade already ran in this process
    ///
    /// The guard flips before the updater runs, so concurrent callers never start a second
    /// upgrade and a failed upgrade is not retried.
    pub async fn upgrade_once(&self) -> crate::Result<UpgradeOutcome> {
        let Some(updater) = &self.updater else {
            return Ok(UpgradeOutcome::AlreadyAttempted);
        };
        if self.attempted.swap(true, Ordering::SeqCst) {
            return Ok(UpgradeOutcome::AlreadyAttempted);
        }

        let before = updater.version().await?;
        tracing::info!(version = %before, "Extractor looks stale, upgrading");
        updater.upgrade().await?;
        let after = updater.version().await?;

        if after == before {
            tracing::info!(version = %after, "Extractor already up to date");
            Ok(UpgradeOutcome::Unchanged(after))
        } else {
            tracing::info!(from = %before, to = %after, "Extractor upgraded");
            Ok(UpgradeOutcome::Upgraded {
                from: before,
                to: after,
            })
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_helpers::FakeUpdater;

    #[tokio::test]
    async fn upgrade_runs_only_once_per_process() {
        let updater = Arc::new(FakeUpdater::new("2024.01.01", Some("2024.06.01")));
        let maintenance = ExtractorMaintenance::new(updater.clone());

        assert_eq!(
            maintenance.upgrade_once().await.unwrap(),
            UpgradeOutcome::Upgraded {
                from: "2024.01.01".into(),
                to: "2024.06.01".into()
            }
        );
        assert_eq!(
            maintenance.upgrade_once().await.unwrap(),
            UpgradeOutcome::AlreadyAttempted
        );
        assert_eq!(updater.upgrades(), 1);
    }

    #[tokio::test]
    async fn unchanged_version_is_reported() {
        let maintenance = ExtractorMaintenance::new(Arc::new(FakeUpdater::new("1.0", None)));
        assert_eq!(
            maintenance.upgrade_once().await.unwrap(),
            UpgradeOutcome::Unchanged("1.0".into())
        );
        assert!(maintenance.attempted());
    }

    #[tokio::test]
    async fn disabled_maintenance_never_upgrades() {
        let maintenance = ExtractorMaintenance::disabled();
        assert_eq!(
            maintenance.upgrade_once().await.unwrap(),
            UpgradeOutcome::AlreadyAttempted
        );

        let config = ExtractorConfig {
            auto_upgrade: false,
            ytdlp_path: Some(PathBuf::from("/usr/bin/yt-dlp")),
            ..Default::default()
        };
        assert!(ExtractorMaintenance::from_config(&config).attempted());
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_upgrade() {
        let updater = Arc::new(FakeUpdater::new("1.0", Some("2.0")));
        let maintenance = Arc::new(ExtractorMaintenance::new(updater.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = maintenance.clone();
                tokio::spawn(async move { m.upgrade_once().await.unwrap() })
            })
            .collect();

        let mut upgraded = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), UpgradeOutcome::Upgraded { .. }) {
                upgraded += 1;
            }
        }
        assert_eq!(upgraded, 1);
        assert_eq!(updater.upgrades(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ytdlp_version_is_read_from_stdout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("yt-dlp");
        std::fs::write(&script, "#!/bin/sh\necho 2025.03.31\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let updater = YtDlpUpdater::new(script);
        assert_eq!(updater.version().await.unwrap(), "2025.03.31");
    }
}
