//! Quota ledger, payments and admin queries.

use crate::error::{DatabaseError, QuotaError};
use crate::store::{ChargedPool, CreditSource, QuotaLedger, Reservation, admission};
use crate::types::{AggregateStats, Balance, QuotaRecord, UserId, UserProfile};
use crate::{Error, Result};
use async_trait::async_trait;

use super::{Database, PaymentRow, UserRow, to_sql_bytes};

const USER_COLUMNS: &str =
    "user_id, first_name, username, free, paid, bandwidth_used, total_bandwidth, is_blocked";

impl Database {
    /// Payments recorded for a user, newest first
    pub async fn payments_for(&self, user: UserId) -> Result<Vec<PaymentRow>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, user_id, amount, method, reference, status, created_at
            FROM payments
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list payments: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Whether a user row exists
    async fn user_exists(&self, user: UserId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE user_id = ?")
            .bind(user)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to look up user: {}",
                    e
                )))
            })?;
        Ok(found.is_some())
    }

    /// Withdraw one unit from `pool` when the user passes admission; None otherwise
    ///
    /// The guard and the decrement are one statement, so concurrent reservations
    /// serialize on the row.
    async fn take_unit(
        &self,
        user: UserId,
        pool: ChargedPool,
        bandwidth_cap: Option<i64>,
    ) -> Result<bool> {
        let (column, guard) = match pool {
            ChargedPool::Free => ("free", "free > 0"),
            ChargedPool::Paid => ("paid", "free <= 0 AND paid > 0"),
        };
        let result = sqlx::query(&format!(
            r#"
            UPDATE users SET {column} = {column} - 1, updated_at = ?
            WHERE user_id = ? AND is_blocked = 0 AND {guard}
                AND (? IS NULL OR bandwidth_used < ?)
            "#
        ))
        .bind(chrono::Utc::now().timestamp())
        .bind(user)
        .bind(bandwidth_cap)
        .bind(bandwidth_cap)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reserve quota: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a signed unit change to one balance and meter `bytes`
    async fn settle(
        &self,
        reservation: Reservation,
        refund: i64,
        bytes: u64,
        context: &str,
    ) -> Result<Balance> {
        let column = match reservation.pool {
            ChargedPool::Free => "free",
            ChargedPool::Paid => "paid",
        };
        let bytes = to_sql_bytes(bytes);
        let row: Option<(i64, i64)> = sqlx::query_as(&format!(
            r#"
            UPDATE users SET
                {column} = {column} + ?,
                bandwidth_used = bandwidth_used + ?,
                total_bandwidth = total_bandwidth + ?,
                updated_at = ?
            WHERE user_id = ?
            RETURNING free, paid
            "#
        ))
        .bind(refund)
        .bind(bytes)
        .bind(bytes)
        .bind(chrono::Utc::now().timestamp())
        .bind(reservation.user)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("{}: {}", context, e)))
        })?;

        row.map(|(free, paid)| Balance { free, paid })
            .ok_or_else(|| Error::NotFound(format!("user {}", reservation.user)))
    }

    /// Fetch a user or fail with NotFound
    async fn require_user(&self, user: UserId) -> Result<QuotaRecord> {
        self.get_user(user)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", user)))
    }
}

#[async_trait]
impl QuotaLedger for Database {
    async fn ensure_user(&self, profile: &UserProfile, free_default: i64) -> Result<QuotaRecord> {
        let now = chrono::Utc::now().timestamp();

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (user_id, first_name, username, free, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                first_name = excluded.first_name,
                username = excluded.username,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(profile.id)
        .bind(&profile.first_name)
        .bind(&profile.username)
        .bind(free_default.max(0))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert user: {}",
                e
            )))
        })?;

        Ok(row.into())
    }

    async fn get_user(&self, user: UserId) -> Result<Option<QuotaRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE user_id = ?",
            USER_COLUMNS
        ))
        .bind(user)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get user: {}",
                e
            )))
        })?;

        Ok(row.map(QuotaRecord::from))
    }

    async fn check_quota(&self, user: UserId, bandwidth_cap: Option<u64>) -> Result<QuotaRecord> {
        let record = self.require_user(user).await?;
        admission(&record, bandwidth_cap)?;
        Ok(record)
    }

    async fn deduct(&self, user: UserId, bytes: u64) -> Result<Balance> {
        let bytes = to_sql_bytes(bytes);
        let now = chrono::Utc::now().timestamp();

        // Single statement: the balance test and the decrement cannot interleave with
        // another deduction
        let row: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE users SET
                free = CASE WHEN free > 0 THEN free - 1 ELSE free END,
                paid = CASE WHEN free > 0 THEN paid ELSE paid - 1 END,
                bandwidth_used = bandwidth_used + ?,
                total_bandwidth = total_bandwidth + ?,
                updated_at = ?
            WHERE user_id = ? AND (free > 0 OR paid > 0)
            RETURNING free, paid
            "#,
        )
        .bind(bytes)
        .bind(bytes)
        .bind(now)
        .bind(user)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to deduct quota: {}",
                e
            )))
        })?;

        match row {
            Some((free, paid)) => Ok(Balance { free, paid }),
            None if self.user_exists(user).await? => Err(QuotaError::QuotaExhausted.into()),
            None => Err(Error::NotFound(format!("user {}", user))),
        }
    }

    async fn reserve(&self, user: UserId, bandwidth_cap: Option<u64>) -> Result<Reservation> {
        let cap = bandwidth_cap.map(to_sql_bytes);
        for pool in [ChargedPool::Free, ChargedPool::Paid] {
            if self.take_unit(user, pool, cap).await? {
                tracing::debug!(user_id = %user, ?pool, "Quota reserved");
                return Ok(Reservation { user, pool });
            }
        }

        // Nothing withdrawn: report why, defaulting to an empty balance when a concurrent
        // change makes the record look admissible again
        let record = self.require_user(user).await?;
        admission(&record, bandwidth_cap)?;
        Err(QuotaError::QuotaExhausted.into())
    }

    async fn commit(&self, reservation: Reservation, bytes: u64) -> Result<Balance> {
        self.settle(reservation, 0, bytes, "Failed to commit reservation")
            .await
    }

    async fn release(&self, reservation: Reservation) -> Result<Balance> {
        self.settle(reservation, 1, 0, "Failed to release reservation")
            .await
    }

    async fn record_bandwidth(&self, user: UserId, bytes: u64) -> Result<()> {
        let bytes = to_sql_bytes(bytes);
        let result = sqlx::query(
            r#"
            UPDATE users SET
                bandwidth_used = bandwidth_used + ?,
                total_bandwidth = total_bandwidth + ?,
                updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(bytes)
        .bind(bytes)
        .bind(chrono::Utc::now().timestamp())
        .bind(user)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record bandwidth: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {}", user)));
        }
        Ok(())
    }

    async fn credit(&self, user: UserId, amount: i64, source: &CreditSource) -> Result<Balance> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let row: Option<(i64, i64)> = sqlx::query_as(
            "UPDATE users SET paid = paid + ?, updated_at = ? WHERE user_id = ? RETURNING free, paid",
        )
        .bind(amount)
        .bind(now)
        .bind(user)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to credit user: {}",
                e
            )))
        })?;

        let Some((free, paid)) = row else {
            return Err(Error::NotFound(format!("user {}", user)));
        };

        sqlx::query(
            r#"
            INSERT INTO payments (user_id, amount, method, reference, status, created_at)
            VALUES (?, ?, ?, ?, 'completed', ?)
            "#,
        )
        .bind(user)
        .bind(amount)
        .bind(&source.method)
        .bind(&source.reference)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record payment: {}",
                e
            )))
        })?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit credit: {}",
                e
            )))
        })?;

        tracing::info!(user_id = %user, amount, method = %source.method, "Credited paid balance");
        Ok(Balance { free, paid })
    }

    async fn reset_daily(&self, free_default: i64) -> Result<u64> {
        let result =
            sqlx::query("UPDATE users SET free = ?, bandwidth_used = 0, updated_at = ?")
                .bind(free_default.max(0))
                .bind(chrono::Utc::now().timestamp())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to reset daily quotas: {}",
                        e
                    )))
                })?;

        Ok(result.rows_affected())
    }

    async fn reset_user(&self, user: UserId, free_default: i64) -> Result<Balance> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE users SET free = ?, bandwidth_used = 0, updated_at = ?
            WHERE user_id = ?
            RETURNING free, paid
            "#,
        )
        .bind(free_default.max(0))
        .bind(chrono::Utc::now().timestamp())
        .bind(user)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset user: {}",
                e
            )))
        })?;

        row.map(|(free, paid)| Balance { free, paid })
            .ok_or_else(|| Error::NotFound(format!("user {}", user)))
    }

    async fn set_blocked(&self, user: UserId, blocked: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET is_blocked = ?, updated_at = ? WHERE user_id = ?")
            .bind(blocked)
            .bind(chrono::Utc::now().timestamp())
            .bind(user)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update block flag: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user {}", user)));
        }
        Ok(())
    }

    async fn delete_user(&self, user: UserId) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        // payments go with the user through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete user: {}",
                    e
                )))
            })?;

        sqlx::query("DELETE FROM user_settings WHERE user_id = ?")
            .bind(user)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete user settings: {}",
                    e
                )))
            })?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit user deletion: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self, page: u32, per_page: u32) -> Result<Vec<QuotaRecord>> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(per_page);
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users ORDER BY user_id LIMIT ? OFFSET ?",
            USER_COLUMNS
        ))
        .bind(i64::from(per_page))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list users: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(QuotaRecord::from).collect())
    }

    async fn paid_users(&self) -> Result<Vec<QuotaRecord>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE paid > 0 ORDER BY paid DESC, user_id",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list paid users: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(QuotaRecord::from).collect())
    }

    async fn aggregate_stats(&self) -> Result<AggregateStats> {
        let (users, paid_users, blocked_users, total_free, total_paid, today, lifetime): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN paid > 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN is_blocked THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(free), 0),
                COALESCE(SUM(paid), 0),
                COALESCE(SUM(bandwidth_used), 0),
                COALESCE(SUM(total_bandwidth), 0)
            FROM users
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to aggregate stats: {}",
                e
            )))
        })?;

        Ok(AggregateStats {
            users: users.max(0) as u64,
            paid_users: paid_users.max(0) as u64,
            blocked_users: blocked_users.max(0) as u64,
            total_free,
            total_paid,
            bandwidth_today: today.max(0) as u64,
            bandwidth_lifetime: lifetime.max(0) as u64,
            cache_entries: 0,
        })
    }
}
