//! Opening the database and bringing its schema up to date.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// One schema step: version, name for logs, statements run in order
struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

/// Schema history; versions are applied in order and never edited once released
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users and payments",
        statements: &[
            r#"
            CREATE TABLE users (
                user_id INTEGER PRIMARY KEY,
                first_name TEXT,
                username TEXT,
                free INTEGER NOT NULL DEFAULT 0 CHECK (free >= 0),
                paid INTEGER NOT NULL DEFAULT 0 CHECK (paid >= 0),
                bandwidth_used INTEGER NOT NULL DEFAULT 0,
                total_bandwidth INTEGER NOT NULL DEFAULT 0,
                is_blocked INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE payments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                amount INTEGER NOT NULL,
                method TEXT NOT NULL,
                reference TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'completed',
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX idx_payments_user ON payments(user_id, created_at DESC)",
        ],
    },
    Migration {
        version: 2,
        name: "user settings",
        statements: &[r#"
            CREATE TABLE user_settings (
                user_id INTEGER PRIMARY KEY,
                quality TEXT NOT NULL DEFAULT 'high',
                format TEXT NOT NULL DEFAULT 'video',
                subtitles INTEGER NOT NULL DEFAULT 0,
                title_length INTEGER,
                updated_at INTEGER NOT NULL
            )
            "#],
    },
    Migration {
        version: 3,
        name: "result cache",
        statements: &[r#"
            CREATE TABLE result_cache (
                fingerprint TEXT PRIMARY KEY,
                descriptor TEXT NOT NULL,
                metadata TEXT NOT NULL,
                caption TEXT,
                created_at INTEGER NOT NULL
            )
            "#],
    },
];

fn connection_failed(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::ConnectionFailed(format!("{}: {}", context, e)))
}

fn migration_failed(context: String) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::MigrationFailed(format!("{}: {}", context, e)))
}

impl Database {
    /// Open (or create) the database at `path` and apply pending migrations
    ///
    /// Missing parent directories are created.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )))
            })?;
        }

        // Foreign keys for payment cleanup, WAL so readers never block the deduct path
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(connection_failed("Invalid database path"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(connection_failed("Failed to open database"))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(connection_failed("Failed to acquire connection"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_failed("Failed to create schema_version".into()))?;

        let applied: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read schema version: {}",
                    e
                )))
            })?;
        let applied = applied.unwrap_or(0);

        for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
            Self::apply(&mut conn, migration).await?;
        }
        Ok(())
    }

    /// Apply one migration and its version row in a single transaction
    async fn apply(conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
        let version = migration.version;
        tracing::info!(version, name = migration.name, "Applying database migration");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(migration_failed(format!("v{} begin", version)))?;

        let result = async {
            for statement in migration.statements {
                sqlx::query(statement)
                    .execute(&mut *conn)
                    .await
                    .map_err(migration_failed(format!("v{} ({})", version, migration.name)))?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *conn)
                .await
                .map_err(migration_failed(format!("v{} record", version)))?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = result {
            if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::warn!(version, error = %rollback, "Rollback after failed migration failed");
            }
            return Err(e);
        }

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(migration_failed(format!("v{} commit", version)))?;
        Ok(())
    }

    /// Close the connection pool, waiting for open connections
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// The underlying pool, for ad-hoc queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
