//! Narrow store interfaces used by the orchestrator
//!
//! The quota ledger, result cache and settings store are injected as trait objects so
//! the SQLite [`Database`](crate::db::Database) and the in-memory [`MemoryStore`] are
//! interchangeable.
//!
//! - [`QuotaLedger`] - Per-user allowance, reservations, bandwidth counters, payments and admin actions
//! - [`ResultCache`] - Fingerprint-keyed delivered results
//! - [`SettingsStore`] - Per-user quality/format/caption preferences

use crate::Result;
use crate::types::{
    AggregateStats, Balance, CacheEntry, Fingerprint, OutputFormat, QuotaRecord, UserId,
    UserProfile, UserSettings,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod memory;

pub use memory::{MemoryStore, PaymentRecord};
pub(crate) use memory::admission;

/// Where a credit came from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditSource {
    /// Payment method ("stars", "manual", ...)
    pub method: String,
    /// External reference (charge id, admin note)
    pub reference: String,
}

impl CreditSource {
    /// Credit granted by an administrator
    pub fn manual(reference: impl Into<String>) -> Self {
        Self {
            method: "manual".to_string(),
            reference: reference.into(),
        }
    }
}

/// Balance a reserved unit was taken from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargedPool {
    /// Daily free allowance
    Free,
    /// Paid balance
    Paid,
}

/// One unit held for a request in flight
///
/// Taken at admission; committed with the delivered bytes or released when nothing
/// was delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// User the unit belongs to
    pub user: UserId,
    /// Balance the unit came from, and is returned to on release
    pub pool: ChargedPool,
}

/// Per-user consumption budget
///
/// Deduction and reservation are atomic per user: two concurrent requests against a
/// balance of one never both succeed. Neither `free` nor `paid` ever goes below zero.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Create the user with `free_default` allowance, or refresh the stored names
    async fn ensure_user(&self, profile: &UserProfile, free_default: i64) -> Result<QuotaRecord>;

    /// Read a user record
    async fn get_user(&self, user: UserId) -> Result<Option<QuotaRecord>>;

    /// Read-only admission check
    ///
    /// Fails with [`QuotaError`](crate::error::QuotaError) when the user is blocked, has
    /// no balance left, or reached the daily bandwidth cap.
    async fn check_quota(&self, user: UserId, bandwidth_cap: Option<u64>) -> Result<QuotaRecord>;

    /// Consume one unit (free first, then paid) and meter `bytes`
    async fn deduct(&self, user: UserId, bytes: u64) -> Result<Balance>;

    /// Admission check and unit withdrawal as one step
    ///
    /// Fails like [`check_quota`](Self::check_quota); on success one unit (free first,
    /// then paid) is held until [`commit`](Self::commit) or [`release`](Self::release).
    async fn reserve(&self, user: UserId, bandwidth_cap: Option<u64>) -> Result<Reservation>;

    /// Settle a reservation: the unit stays spent and `bytes` are metered
    async fn commit(&self, reservation: Reservation, bytes: u64) -> Result<Balance>;

    /// Return a reserved unit to the balance it came from
    async fn release(&self, reservation: Reservation) -> Result<Balance>;

    /// Meter `bytes` without touching the balance (exempt users)
    async fn record_bandwidth(&self, user: UserId, bytes: u64) -> Result<()>;

    /// Add to the paid balance and record the payment
    ///
    /// Not idempotent per source; callers deduplicate payments.
    async fn credit(&self, user: UserId, amount: i64, source: &CreditSource) -> Result<Balance>;

    /// Reset every user's free allowance and daily bandwidth; returns the number reset
    async fn reset_daily(&self, free_default: i64) -> Result<u64>;

    /// Reset one user's free allowance and daily bandwidth
    async fn reset_user(&self, user: UserId, free_default: i64) -> Result<Balance>;

    /// Block or unblock a user
    async fn set_blocked(&self, user: UserId, blocked: bool) -> Result<()>;

    /// Delete a user and their payments; false when absent
    async fn delete_user(&self, user: UserId) -> Result<bool>;

    /// One page of users ordered by id (page is 1-based)
    async fn list_users(&self, page: u32, per_page: u32) -> Result<Vec<QuotaRecord>>;

    /// Users with a paid balance, largest first
    async fn paid_users(&self) -> Result<Vec<QuotaRecord>>;

    /// Totals across every user (`cache_entries` is left at zero)
    async fn aggregate_stats(&self) -> Result<AggregateStats>;
}

/// Content-addressed store of delivered results
///
/// At most one entry per fingerprint; no automatic expiry.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Look up an entry
    async fn get(&self, key: &Fingerprint) -> Result<Option<CacheEntry>>;

    /// Insert or replace
    async fn put(&self, key: &Fingerprint, entry: &CacheEntry) -> Result<()>;

    /// Remove an entry; false on miss
    async fn delete(&self, key: &Fingerprint) -> Result<bool>;

    /// Number of entries
    async fn count(&self) -> Result<u64>;

    /// Remove every entry; returns how many were removed
    async fn clear(&self) -> Result<u64>;
}

/// Per-user preferences
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Stored settings, defaulted when absent
    async fn user_settings(&self, user: UserId) -> Result<UserSettings>;

    /// Store settings
    async fn save_settings(&self, user: UserId, settings: &UserSettings) -> Result<()>;
}

/// Cache key of a (url, quality, format) request
///
/// SHA-256 over length-prefixed components, so no two distinct triples share an input.
pub fn fingerprint(url: &str, quality: &str, format: OutputFormat) -> Fingerprint {
    let mut hasher = Sha256::new();
    for part in [url, quality, format.as_str()] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    Fingerprint(format!("{:x}", hasher.finalize()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint("https://a.example/v", "high", OutputFormat::Video);
        let b = fingerprint("https://a.example/v", "high", OutputFormat::Video);
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 64);
    }

    #[test]
    fn any_differing_component_changes_the_fingerprint() {
        let urls = ["https://a.example/v", "https://a.example/w", "https://b.example/v"];
        let qualities = ["high", "medium", "high:720", "audio"];
        let formats = [OutputFormat::Video, OutputFormat::Audio, OutputFormat::Document];

        let mut seen = HashSet::new();
        for url in urls {
            for quality in qualities {
                for format in formats {
                    assert!(seen.insert(fingerprint(url, quality, format)));
                }
            }
        }
        assert_eq!(seen.len(), urls.len() * qualities.len() * formats.len());
    }

    #[test]
    fn component_boundaries_are_not_ambiguous() {
        assert_ne!(
            fingerprint("https://a.example/vhigh", "", OutputFormat::Video),
            fingerprint("https://a.example/v", "high", OutputFormat::Video)
        );
    }
}
