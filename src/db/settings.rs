//! Per-user preferences.

use crate::error::DatabaseError;
use crate::store::SettingsStore;
use crate::types::{OutputFormat, Quality, UserId, UserSettings};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::FromRow;

use super::Database;

#[derive(Debug, FromRow)]
struct SettingsRow {
    quality: String,
    format: String,
    subtitles: bool,
    title_length: Option<i64>,
}

impl From<SettingsRow> for UserSettings {
    fn from(row: SettingsRow) -> Self {
        UserSettings {
            quality: Quality::parse(&row.quality),
            format: OutputFormat::parse(&row.format),
            subtitles: row.subtitles,
            title_length: row.title_length.map(|n| n.max(0) as usize),
        }
    }
}

#[async_trait]
impl SettingsStore for Database {
    async fn user_settings(&self, user: UserId) -> Result<UserSettings> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT quality, format, subtitles, title_length FROM user_settings WHERE user_id = ?",
        )
        .bind(user)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get user settings: {}",
                e
            )))
        })?;

        Ok(row.map(UserSettings::from).unwrap_or_default())
    }

    async fn save_settings(&self, user: UserId, settings: &UserSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, quality, format, subtitles, title_length, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                quality = excluded.quality,
                format = excluded.format,
                subtitles = excluded.subtitles,
                title_length = excluded.title_length,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user)
        .bind(settings.quality.as_str())
        .bind(settings.format.as_str())
        .bind(settings.subtitles)
        .bind(settings.title_length.map(|n| i64::try_from(n).unwrap_or(i64::MAX)))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save user settings: {}",
                e
            )))
        })?;

        Ok(())
    }
}
