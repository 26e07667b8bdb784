//! Database layer for media-dl
//!
//! Handles SQLite persistence for quota records, payments, user settings and the result
//! cache. [`Database`] implements every store trait in [`crate::store`].
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`quota`] - Quota ledger, payments and admin queries
//! - [`cache`] - Result cache
//! - [`settings`] - Per-user preferences

use crate::types::{QuotaRecord, UserId};
use sqlx::{FromRow, sqlite::SqlitePool};

mod cache;
mod migrations;
mod quota;
mod settings;

/// User record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    /// Platform user id
    pub user_id: i64,
    /// Display name
    pub first_name: Option<String>,
    /// Handle without '@'
    pub username: Option<String>,
    /// Free allowance remaining today
    pub free: i64,
    /// Paid balance
    pub paid: i64,
    /// Bytes transferred today
    pub bandwidth_used: i64,
    /// Bytes transferred since the account was created
    pub total_bandwidth: i64,
    /// Blocked by an administrator
    pub is_blocked: bool,
}

impl From<UserRow> for QuotaRecord {
    fn from(row: UserRow) -> Self {
        QuotaRecord {
            user_id: UserId(row.user_id),
            first_name: row.first_name,
            username: row.username,
            free: row.free,
            paid: row.paid,
            bandwidth_used: row.bandwidth_used.max(0) as u64,
            total_bandwidth: row.total_bandwidth.max(0) as u64,
            is_blocked: row.is_blocked,
        }
    }
}

/// Payment record from database
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    /// Unique database ID
    pub id: i64,
    /// Credited user
    pub user_id: i64,
    /// Amount credited
    pub amount: i64,
    /// Payment method
    pub method: String,
    /// External reference
    pub reference: String,
    /// Payment status ("completed")
    pub status: String,
    /// Unix timestamp of the credit
    pub created_at: i64,
}

/// Result cache record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct CacheRow {
    /// Fingerprint
    pub fingerprint: String,
    /// JSON-encoded [`ResultDescriptor`](crate::types::ResultDescriptor)
    pub descriptor: String,
    /// JSON-encoded [`MediaMetadata`](crate::types::MediaMetadata)
    pub metadata: String,
    /// Caption attached to the designated part
    pub caption: Option<String>,
    /// Unix timestamp when the entry was written
    pub created_at: i64,
}

/// Database handle for media-dl
pub struct Database {
    pool: SqlitePool,
}

/// Clamp a byte count into SQLite's signed integer range
pub(crate) fn to_sql_bytes(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
