//! In-memory store implementing every store trait
//!
//! Each user record sits behind its own lock; the outer map lock is only held to look up
//! or insert a record, never across a read-modify-write of a balance.

use super::{ChargedPool, CreditSource, QuotaLedger, Reservation, ResultCache, SettingsStore};
use crate::Result;
use crate::error::{Error, QuotaError};
use crate::types::{
    AggregateStats, Balance, CacheEntry, Fingerprint, QuotaRecord, UserId, UserProfile,
    UserSettings,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Recorded credit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRecord {
    /// Credited user
    pub user_id: UserId,
    /// Amount credited
    pub amount: i64,
    /// Origin of the credit
    pub source: CreditSource,
}

type UserSlot = Arc<Mutex<QuotaRecord>>;

/// Process-local store for tests and single-instance deployments
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<BTreeMap<UserId, UserSlot>>,
    payments: Mutex<Vec<PaymentRecord>>,
    cache: Mutex<HashMap<Fingerprint, CacheEntry>>,
    settings: Mutex<HashMap<UserId, UserSettings>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a full record
    pub fn insert_user(&self, record: QuotaRecord) {
        lock(&self.users).insert(record.user_id, Arc::new(Mutex::new(record)));
    }

    /// Payments recorded so far
    pub fn payments(&self) -> Vec<PaymentRecord> {
        lock(&self.payments).clone()
    }

    fn slot(&self, user: UserId) -> Option<UserSlot> {
        lock(&self.users).get(&user).cloned()
    }

    fn require(&self, user: UserId) -> Result<UserSlot> {
        self.slot(user)
            .ok_or_else(|| Error::NotFound(format!("user {}", user)))
    }

    fn snapshot(&self) -> Vec<QuotaRecord> {
        let slots: Vec<UserSlot> = lock(&self.users).values().cloned().collect();
        slots.iter().map(|slot| lock(slot).clone()).collect()
    }
}

#[async_trait]
impl QuotaLedger for MemoryStore {
    async fn ensure_user(&self, profile: &UserProfile, free_default: i64) -> Result<QuotaRecord> {
        let slot = lock(&self.users)
            .entry(profile.id)
            .or_insert_with(|| Arc::new(Mutex::new(QuotaRecord::new(profile.id, free_default))))
            .clone();
        let mut record = lock(&slot);
        record.first_name = profile.first_name.clone();
        record.username = profile.username.clone();
        Ok(record.clone())
    }

    async fn get_user(&self, user: UserId) -> Result<Option<QuotaRecord>> {
        Ok(self.slot(user).map(|slot| lock(&slot).clone()))
    }

    async fn check_quota(&self, user: UserId, bandwidth_cap: Option<u64>) -> Result<QuotaRecord> {
        let slot = self.require(user)?;
        let record = lock(&slot).clone();
        admission(&record, bandwidth_cap)?;
        Ok(record)
    }

    async fn deduct(&self, user: UserId, bytes: u64) -> Result<Balance> {
        let slot = self.require(user)?;
        let mut record = lock(&slot);
        if record.free > 0 {
            record.free -= 1;
        } else if record.paid > 0 {
            record.paid -= 1;
        } else {
            return Err(QuotaError::QuotaExhausted.into());
        }
        record.bandwidth_used = record.bandwidth_used.saturating_add(bytes);
        record.total_bandwidth = record.total_bandwidth.saturating_add(bytes);
        Ok(record.balance())
    }

    async fn reserve(&self, user: UserId, bandwidth_cap: Option<u64>) -> Result<Reservation> {
        let slot = self.require(user)?;
        let mut record = lock(&slot);
        admission(&record, bandwidth_cap)?;
        let pool = if record.free > 0 {
            record.free -= 1;
            ChargedPool::Free
        } else {
            record.paid -= 1;
            ChargedPool::Paid
        };
        Ok(Reservation { user, pool })
    }

    async fn commit(&self, reservation: Reservation, bytes: u64) -> Result<Balance> {
        let slot = self.require(reservation.user)?;
        let mut record = lock(&slot);
        record.bandwidth_used = record.bandwidth_used.saturating_add(bytes);
        record.total_bandwidth = record.total_bandwidth.saturating_add(bytes);
        Ok(record.balance())
    }

    async fn release(&self, reservation: Reservation) -> Result<Balance> {
        let slot = self.require(reservation.user)?;
        let mut record = lock(&slot);
        match reservation.pool {
            ChargedPool::Free => record.free = record.free.saturating_add(1),
            ChargedPool::Paid => record.paid = record.paid.saturating_add(1),
        }
        Ok(record.balance())
    }

    async fn record_bandwidth(&self, user: UserId, bytes: u64) -> Result<()> {
        let slot = self.require(user)?;
        let mut record = lock(&slot);
        record.bandwidth_used = record.bandwidth_used.saturating_add(bytes);
        record.total_bandwidth = record.total_bandwidth.saturating_add(bytes);
        Ok(())
    }

    async fn credit(&self, user: UserId, amount: i64, source: &CreditSource) -> Result<Balance> {
        let slot = self.require(user)?;
        let balance = {
            let mut record = lock(&slot);
            record.paid = record.paid.saturating_add(amount);
            record.balance()
        };
        lock(&self.payments).push(PaymentRecord {
            user_id: user,
            amount,
            source: source.clone(),
        });
        Ok(balance)
    }

    async fn reset_daily(&self, free_default: i64) -> Result<u64> {
        let slots: Vec<UserSlot> = lock(&self.users).values().cloned().collect();
        for slot in &slots {
            let mut record = lock(slot);
            record.free = free_default;
            record.bandwidth_used = 0;
        }
        Ok(slots.len() as u64)
    }

    async fn reset_user(&self, user: UserId, free_default: i64) -> Result<Balance> {
        let slot = self.require(user)?;
        let mut record = lock(&slot);
        record.free = free_default;
        record.bandwidth_used = 0;
        Ok(record.balance())
    }

    async fn set_blocked(&self, user: UserId, blocked: bool) -> Result<()> {
        let slot = self.require(user)?;
        lock(&slot).is_blocked = blocked;
        Ok(())
    }

    async fn delete_user(&self, user: UserId) -> Result<bool> {
        let removed = lock(&self.users).remove(&user).is_some();
        if removed {
            lock(&self.payments).retain(|p| p.user_id != user);
            lock(&self.settings).remove(&user);
        }
        Ok(removed)
    }

    async fn list_users(&self, page: u32, per_page: u32) -> Result<Vec<QuotaRecord>> {
        let skip = page.saturating_sub(1) as usize * per_page as usize;
        Ok(self
            .snapshot()
            .into_iter()
            .skip(skip)
            .take(per_page as usize)
            .collect())
    }

    async fn paid_users(&self) -> Result<Vec<QuotaRecord>> {
        let mut users: Vec<QuotaRecord> =
            self.snapshot().into_iter().filter(|r| r.paid > 0).collect();
        users.sort_by(|a, b| b.paid.cmp(&a.paid).then(a.user_id.cmp(&b.user_id)));
        Ok(users)
    }

    async fn aggregate_stats(&self) -> Result<AggregateStats> {
        let mut stats = AggregateStats::default();
        for record in self.snapshot() {
            stats.users += 1;
            if record.paid > 0 {
                stats.paid_users += 1;
            }
            if record.is_blocked {
                stats.blocked_users += 1;
            }
            stats.total_free += record.free;
            stats.total_paid += record.paid;
            stats.bandwidth_today += record.bandwidth_used;
            stats.bandwidth_lifetime += record.total_bandwidth;
        }
        Ok(stats)
    }
}

/// Shared admission rule of every ledger implementation
pub(crate) fn admission(record: &QuotaRecord, bandwidth_cap: Option<u64>) -> Result<()> {
    if record.is_blocked {
        return Err(QuotaError::UserBlocked.into());
    }
    if record.free.saturating_add(record.paid) <= 0 {
        return Err(QuotaError::QuotaExhausted.into());
    }
    if let Some(cap) = bandwidth_cap
        && record.bandwidth_used >= cap
    {
        return Err(QuotaError::BandwidthCapExceeded {
            used: record.bandwidth_used,
            cap,
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl ResultCache for MemoryStore {
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>> {
        Ok(lock(&self.cache).get(key).cloned())
    }

    async fn put(&self, key: &Fingerprint, entry: &CacheEntry) -> Result<()> {
        lock(&self.cache).insert(key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &Fingerprint) -> Result<bool> {
        Ok(lock(&self.cache).remove(key).is_some())
    }

    async fn count(&self) -> Result<u64> {
        Ok(lock(&self.cache).len() as u64)
    }

    async fn clear(&self) -> Result<u64> {
        let mut cache = lock(&self.cache);
        let removed = cache.len() as u64;
        cache.clear();
        Ok(removed)
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn user_settings(&self, user: UserId) -> Result<UserSettings> {
        Ok(lock(&self.settings).get(&user).cloned().unwrap_or_default())
    }

    async fn save_settings(&self, user: UserId, settings: &UserSettings) -> Result<()> {
        lock(&self.settings).insert(user, settings.clone());
        Ok(())
    }
}
