//! Daily quota reset
//!
//! Background task that restores every user's free allowance once a day at the configured
//! wall-clock time (`scheduler.daily_reset_time`, local time). With
//! `scheduler.daily_reset_enabled` off the task returns immediately.
//!
//! # Example
//!
//! ```no_run
//! use media_dl::{Config, MediaDownloader};
//! use media_dl::scheduler_task::DailyResetTask;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn media_dl::ChatTransport>) -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Arc::new(MediaDownloader::new(Config::default(), transport).await?);
//! let task = DailyResetTask::new(downloader.clone())?;
//!
//! // Runs until the downloader shuts down
//! tokio::spawn(task.run());
//! # Ok(())
//! # }
//! ```

use crate::MediaDownloader;
use crate::error::Result;
use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

/// Longest single sleep, so shutdown is noticed promptly
const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Time from `now` until the next occurrence of `at`
///
/// When `now` is exactly `at`, the next occurrence is a day later.
pub fn duration_until_next(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let mut next = now.date().and_time(at);
    if next <= now {
        next += TimeDelta::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Task that resets free allowances once a day
pub struct DailyResetTask {
    downloader: Arc<MediaDownloader>,
    at: NaiveTime,
    enabled: bool,
}

impl DailyResetTask {
    /// Creates the task from the downloader's scheduler configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `daily_reset_time` is not `HH:MM`.
    pub fn new(downloader: Arc<MediaDownloader>) -> Result<Self> {
        let config = downloader.get_config();
        let at = config.scheduler.reset_time()?;
        let enabled = config.scheduler.daily_reset_enabled;
        Ok(Self {
            downloader,
            at,
            enabled,
        })
    }

    /// Runs until the downloader stops accepting requests
    ///
    /// Sleeps in slices of at most a minute, checking for shutdown between slices, and
    /// resets every quota when the configured time is reached. Returns at once when the
    /// daily reset is disabled.
    pub async fn run(self) {
        if !self.enabled {
            info!("Daily reset disabled, task not started");
            return;
        }
        info!(at = %self.at, "Daily reset task started");
        let mut due = Local::now().naive_local() + self.until_next();

        while self.downloader.is_accepting() {
            let now = Local::now().naive_local();
            if now >= due {
                self.reset().await;
                due = now + self.until_next_from(now);
                continue;
            }

            let remaining = (due - now).to_std().unwrap_or(Duration::ZERO);
            sleep(remaining.min(POLL_INTERVAL)).await;
        }

        info!("Daily reset task stopped");
    }

    fn until_next(&self) -> TimeDelta {
        self.until_next_from(Local::now().naive_local())
    }

    fn until_next_from(&self, now: NaiveDateTime) -> TimeDelta {
        TimeDelta::from_std(duration_until_next(now, self.at)).unwrap_or(TimeDelta::days(1))
    }

    async fn reset(&self) {
        match self.downloader.reset_all_quotas().await {
            Ok(users) => debug!(users, "Scheduled quota reset complete"),
            Err(e) => warn!(error = %e, "Scheduled quota reset failed"),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_helpers::Harness;
    use crate::types::Event;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn next_reset_later_today() {
        let midday = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert_eq!(
            duration_until_next(at(9, 30), midday),
            Duration::from_secs(2 * 3600 + 30 * 60)
        );
    }

    #[test]
    fn next_reset_tomorrow_once_passed() {
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        assert_eq!(
            duration_until_next(at(23, 0), midnight),
            Duration::from_secs(3600)
        );
        assert_eq!(
            duration_until_next(at(0, 0), midnight),
            Duration::from_secs(24 * 3600)
        );
    }

    #[test]
    fn invalid_reset_time_is_rejected() {
        let h = Harness::with_config(vec![], |config| {
            config.scheduler.daily_reset_time = "25:99".into()
        });
        assert!(DailyResetTask::new(Arc::new(h.downloader.clone())).is_err());
    }

    #[tokio::test]
    async fn task_exits_on_shutdown() {
        let h = Harness::new(vec![]);
        let downloader = Arc::new(h.downloader.clone());
        downloader.shutdown().await;

        let task = DailyResetTask::new(downloader).unwrap();
        let handle = tokio::spawn(task.run());

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "reset task should exit on shutdown");
    }

    #[tokio::test]
    async fn disabled_task_returns_without_resetting() {
        let h = Harness::with_config(vec![], |config| {
            config.scheduler.daily_reset_enabled = false
        });
        h.seed(1, 0, 2);
        let mut events = h.downloader.subscribe();

        let task = DailyResetTask::new(Arc::new(h.downloader.clone())).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), task.run()).await;

        assert!(result.is_ok(), "disabled task should return immediately");
        assert!(h.downloader.is_accepting());
        assert_eq!(h.balance(1).await, (0, 2));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn reset_restores_allowances_and_broadcasts() {
        let h = Harness::new(vec![]);
        h.seed(1, 0, 2);
        let mut events = h.downloader.subscribe();

        let task = DailyResetTask::new(Arc::new(h.downloader.clone())).unwrap();
        task.reset().await;

        assert_eq!(h.balance(1).await, (5, 2));
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::QuotaReset { users: 1 }
        ));
    }
}
