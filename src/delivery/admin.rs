//! Administrative operations delegated to the stores.

use super::MediaDownloader;
use crate::error::{Error, Result};
use crate::store::CreditSource;
use crate::types::{AggregateStats, Balance, Event, Fingerprint, QuotaRecord, UserId, UserSettings};

impl MediaDownloader {
    /// Add paid units to a user and record the payment
    pub async fn credit(&self, user: UserId, amount: i64, source: &CreditSource) -> Result<Balance> {
        if amount <= 0 {
            return Err(Error::Other(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }
        self.ledger.credit(user, amount, source).await
    }

    /// Restore one user's free allowance and clear today's bandwidth
    pub async fn reset_user_quota(&self, user: UserId) -> Result<Balance> {
        let balance = self
            .ledger
            .reset_user(user, self.config.quota.free_daily)
            .await?;
        tracing::info!(user_id = %user, free = balance.free, "User quota reset");
        Ok(balance)
    }

    /// Restore every user's free allowance (the daily reset)
    pub async fn reset_all_quotas(&self) -> Result<u64> {
        let users = self.ledger.reset_daily(self.config.quota.free_daily).await?;
        tracing::info!(users, free = self.config.quota.free_daily, "Daily quota reset");
        self.emit_event(Event::QuotaReset { users });
        Ok(users)
    }

    /// Refuse every further request from a user
    pub async fn block_user(&self, user: UserId) -> Result<()> {
        self.ledger.set_blocked(user, true).await?;
        tracing::info!(user_id = %user, "User blocked");
        Ok(())
    }

    /// Lift a block
    pub async fn unblock_user(&self, user: UserId) -> Result<()> {
        self.ledger.set_blocked(user, false).await?;
        tracing::info!(user_id = %user, "User unblocked");
        Ok(())
    }

    /// Remove a user with their payments and settings
    pub async fn delete_user(&self, user: UserId) -> Result<bool> {
        let removed = self.ledger.delete_user(user).await?;
        if removed {
            tracing::info!(user_id = %user, "User deleted");
        }
        Ok(removed)
    }

    /// Quota record of one user
    pub async fn user_stats(&self, user: UserId) -> Result<Option<QuotaRecord>> {
        self.ledger.get_user(user).await
    }

    /// One page of users, ordered by id (pages start at 1)
    pub async fn list_users(&self, page: u32, per_page: u32) -> Result<Vec<QuotaRecord>> {
        self.ledger.list_users(page, per_page).await
    }

    /// Users with a paid balance, largest first
    pub async fn paid_users(&self) -> Result<Vec<QuotaRecord>> {
        self.ledger.paid_users().await
    }

    /// Totals across users, plus the number of cached results
    pub async fn aggregate_stats(&self) -> Result<AggregateStats> {
        let mut stats = self.ledger.aggregate_stats().await?;
        stats.cache_entries = self.cache.count().await?;
        Ok(stats)
    }

    /// Forget one cached result
    pub async fn purge_cache(&self, key: &Fingerprint) -> Result<bool> {
        self.cache.delete(key).await
    }

    /// Forget every cached result
    pub async fn clear_cache(&self) -> Result<u64> {
        let removed = self.cache.clear().await?;
        tracing::info!(removed, "Result cache cleared");
        Ok(removed)
    }

    /// Stored preferences of a user (defaults when none were saved)
    pub async fn user_settings(&self, user: UserId) -> Result<UserSettings> {
        self.settings.user_settings(user).await
    }

    /// Replace a user's preferences
    pub async fn save_settings(&self, user: UserId, settings: &UserSettings) -> Result<()> {
        self.settings.save_settings(user, settings).await
    }
}
