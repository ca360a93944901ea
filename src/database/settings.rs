use std::time::Duration;

use sqlx::Row;

use crate::config::Config;
use crate::database::error::DatabaseResult;
use crate::database::warehouse::Warehouse;
use crate::models::settings::{Setting, SettingValue};

/// Settings repository. Values are stored as text with a `value_type` tag
/// and parsed back into [`SettingValue`] on read; unknown or corrupt rows
/// fall back to defaults instead of breaking the scheduler.
impl Warehouse {
    /// Seed default settings on first startup. Existing rows are left alone
    /// so operator changes survive restarts.
    pub async fn seed_settings(&self, config: &Config) -> DatabaseResult<()> {
        let defaults: &[(&str, SettingValue, &str)] = &[
            (
                "collect_interval",
                SettingValue::Duration(Duration::from_secs(config.collect_interval)),
                "Interval between activity stats collections",
            ),
            (
                "size_update_interval",
                SettingValue::Duration(Duration::from_secs(config.size_update_interval)),
                "Interval between database size refreshes",
            ),
            (
                "db_check_interval",
                SettingValue::Duration(Duration::from_secs(config.db_check_interval)),
                "Interval between database topology syncs",
            ),
            (
                "retention_months",
                SettingValue::Int(config.retention_months),
                "Months of statistics history to keep",
            ),
            (
                "audit_retention_days",
                SettingValue::Int(90),
                "Days of audit events to keep",
            ),
            (
                "logs_retention_days",
                SettingValue::Int(30),
                "Days of system log to keep",
            ),
        ];

        for (key, value, description) in defaults {
            sqlx::query(
                "INSERT INTO settings (key, value, value_type, description) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value.storage_value())
            .bind(value.type_tag())
            .bind(description)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    pub async fn all_settings(&self) -> DatabaseResult<Vec<Setting>> {
        let rows = sqlx::query(
            "SELECT key, value, value_type, description, updated_at FROM settings ORDER BY key",
        )
        .fetch_all(self.pool())
        .await?;

        let mut settings = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("key");
            let raw: String = row.get("value");
            let value_type: String = row.get("value_type");
            let value = match SettingValue::parse(&value_type, &raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "unparsable setting, exposing as string");
                    SettingValue::Str(raw)
                }
            };
            settings.push(Setting {
                key,
                value,
                value_type,
                description: row.get("description"),
                updated_at: row.get("updated_at"),
            });
        }
        Ok(settings)
    }

    pub async fn get_setting(&self, key: &str) -> DatabaseResult<Option<SettingValue>> {
        let row = sqlx::query("SELECT value, value_type FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;

        let Some(row) = row else { return Ok(None) };
        let raw: String = row.get("value");
        let value_type: String = row.get("value_type");
        Ok(SettingValue::parse(&value_type, &raw).ok())
    }

    /// Integer-valued setting with a fallback. Used by the scheduler, which
    /// re-reads intervals every iteration so changes apply without restart.
    pub async fn int_setting(&self, key: &str, default: i64) -> i64 {
        match self.get_setting(key).await {
            Ok(Some(value)) => value.as_int().unwrap_or(default),
            Ok(None) => default,
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to read setting, using default");
                default
            }
        }
    }

    /// Apply pre-validated updates; values keep their declared type tag.
    pub async fn update_settings(&self, updates: &[(&str, i64)]) -> DatabaseResult<()> {
        let mut tx = self.pool().begin().await?;
        for (key, value) in updates {
            sqlx::query("UPDATE settings SET value = $1, updated_at = now() WHERE key = $2")
                .bind(value.to_string())
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!(
            keys = %updates.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(", "),
            "settings updated"
        );
        Ok(())
    }
}
