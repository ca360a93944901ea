use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;

use crate::database::encryption::SecretBox;
use crate::database::error::{DatabaseError, DatabaseResult};

/// The local PostgreSQL warehouse: partitioned statistics history, target
/// topology, the encrypted target registry, users, settings, audit and
/// system logs.
///
/// Cheap to clone; the pool and the secret box are shared.
#[derive(Clone)]
pub struct Warehouse {
    pool: PgPool,
    secrets: Arc<SecretBox>,
}

impl Warehouse {
    /// Connect the warehouse pool and ensure the schema exists.
    pub async fn connect(dsn: &str, secrets: SecretBox) -> DatabaseResult<Self> {
        let options = PgConnectOptions::from_str(dsn)
            .map_err(|e| DatabaseError::ConnectionFailed(format!("invalid DSN: {}", e)))?
            .application_name("pgfleet");

        let pool = PgPoolOptions::new()
            .min_connections(2)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let warehouse = Self {
            pool,
            secrets: Arc::new(secrets),
        };
        warehouse.ensure_schema().await?;
        warehouse.ensure_partitions().await?;
        Ok(warehouse)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn secrets(&self) -> &SecretBox {
        &self.secrets
    }

    /// Liveness round-trip, used by the health endpoint.
    pub async fn ping(&self) -> DatabaseResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("warehouse pool closed");
    }

    async fn ensure_schema(&self) -> DatabaseResult<()> {
        let statements: &[&str] = &[
            "CREATE EXTENSION IF NOT EXISTS pgcrypto",
            r#"
            CREATE TABLE IF NOT EXISTS statistics (
                id          bigserial,
                server_name text        NOT NULL,
                ts          timestamptz NOT NULL DEFAULT now(),
                datname     text        NOT NULL,
                numbackends integer,
                xact_commit bigint,
                db_size     bigint,
                disk_free   bigint,
                disk_total  bigint
            ) PARTITION BY RANGE (ts)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS db_info (
                server_name   text        NOT NULL,
                datname       text        NOT NULL,
                oid           bigint      NOT NULL,
                creation_time timestamptz,
                first_seen    timestamptz NOT NULL DEFAULT now(),
                last_seen     timestamptz NOT NULL DEFAULT now(),
                PRIMARY KEY (server_name, datname)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ssh_keys (
                id              uuid        PRIMARY KEY,
                name            text        NOT NULL UNIQUE,
                fingerprint     text        NOT NULL UNIQUE,
                key_type        text        NOT NULL,
                public_key      text        NOT NULL,
                private_key_enc text        NOT NULL,
                created_by      text        NOT NULL,
                created_at      timestamptz NOT NULL DEFAULT now(),
                has_passphrase  boolean     NOT NULL DEFAULT false,
                description     text
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                name                   text        PRIMARY KEY,
                host                   text        NOT NULL,
                port                   integer     NOT NULL DEFAULT 5432,
                pg_user                text        NOT NULL,
                password_enc           text,
                ssh_user               text        NOT NULL,
                ssh_password_enc       text,
                ssh_port               integer     NOT NULL DEFAULT 22,
                ssh_auth_type          text        NOT NULL DEFAULT 'password',
                ssh_key_id             uuid        REFERENCES ssh_keys(id),
                ssh_key_passphrase_enc text,
                created_at             timestamptz NOT NULL DEFAULT now(),
                updated_at             timestamptz NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS users (
                login         text        PRIMARY KEY,
                password_hash text        NOT NULL,
                role          text        NOT NULL DEFAULT 'viewer',
                email         text,
                is_active     boolean     NOT NULL DEFAULT true,
                created_at    timestamptz NOT NULL DEFAULT now(),
                updated_at    timestamptz NOT NULL DEFAULT now(),
                last_login    timestamptz
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_sessions (
                id          bigserial   PRIMARY KEY,
                timestamp   timestamptz NOT NULL DEFAULT now(),
                event_type  text        NOT NULL,
                username    text        NOT NULL,
                ip_address  text,
                user_agent  text,
                jti         text,
                details     text
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key         text        PRIMARY KEY,
                value       text        NOT NULL,
                value_type  text        NOT NULL DEFAULT 'string',
                description text,
                updated_at  timestamptz NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS system_log (
                timestamp timestamptz NOT NULL DEFAULT now(),
                level     text        NOT NULL,
                source    text        NOT NULL,
                message   text        NOT NULL,
                details   text
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_stats_server_ts ON statistics (server_name, ts DESC)",
            "CREATE INDEX IF NOT EXISTS idx_stats_server_db_ts ON statistics (server_name, datname, ts DESC)",
            "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_sessions (timestamp DESC)",
            "CREATE INDEX IF NOT EXISTS idx_audit_username ON audit_sessions (username)",
            "CREATE INDEX IF NOT EXISTS idx_audit_event_type ON audit_sessions (event_type)",
            "CREATE INDEX IF NOT EXISTS idx_system_log_timestamp ON system_log (timestamp DESC)",
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        tracing::info!("warehouse schema ensured");
        Ok(())
    }

    /// Create partitions for the current month and the next two.
    pub async fn ensure_partitions(&self) -> DatabaseResult<()> {
        let now = Utc::now();
        for offset in 0..3 {
            let (year, month) = add_months(now.year(), now.month(), offset);
            let name = partition_name(year, month);

            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_class WHERE relname = $1)")
                    .bind(&name)
                    .fetch_one(&self.pool)
                    .await?;
            if exists {
                continue;
            }

            let start = month_start(year, month);
            let (next_year, next_month) = add_months(year, month, 1);
            let end = month_start(next_year, next_month);

            // Partition names are built internally, never from user input.
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} PARTITION OF statistics FOR VALUES FROM ('{}') TO ('{}')",
                name,
                start.to_rfc3339(),
                end.to_rfc3339(),
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
            tracing::info!(partition = %name, "created statistics partition");
        }
        Ok(())
    }

    /// Drop partitions whose month is older than `retention_months`.
    /// Returns the names of the dropped partitions.
    pub async fn cleanup_old_partitions(&self, retention_months: i64) -> DatabaseResult<Vec<String>> {
        let now = Utc::now();
        let cutoff = add_months(now.year(), now.month(), -(retention_months as i32));

        let rows = sqlx::query(
            r"SELECT relname FROM pg_class WHERE relname ~ '^statistics_\d{4}_\d{2}$' AND relkind = 'r'",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut dropped = Vec::new();
        for row in rows {
            let name: String = row.get("relname");
            let Some((year, month)) = parse_partition_name(&name) else {
                continue;
            };
            if (year, month) < cutoff {
                let ddl = format!("DROP TABLE IF EXISTS {}", name);
                sqlx::query(&ddl).execute(&self.pool).await?;
                tracing::info!(partition = %name, "dropped expired statistics partition");
                dropped.push(name);
            }
        }
        Ok(dropped)
    }

    /// Delete audit rows older than `days`. Returns the number removed.
    pub async fn purge_audit(&self, days: i64) -> DatabaseResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let result = sqlx::query("DELETE FROM audit_sessions WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete system-log rows older than `days`. Returns the number removed.
    pub async fn purge_system_log(&self, days: i64) -> DatabaseResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let result = sqlx::query("DELETE FROM system_log WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Cascade for target deletion: erase all collected history of a server.
    pub async fn delete_server_data(&self, server_name: &str) -> DatabaseResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM statistics WHERE server_name = $1")
            .bind(server_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM db_info WHERE server_name = $1")
            .bind(server_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(server = %server_name, "collected data removed");
        Ok(())
    }
}

/// `statistics_YYYY_MM`
pub fn partition_name(year: i32, month: u32) -> String {
    format!("statistics_{}_{:02}", year, month)
}

/// First instant of a calendar month in UTC.
pub fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}

/// Calendar month arithmetic; `delta` may be negative.
pub fn add_months(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year * 12 + month as i32 - 1 + delta;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

/// Parse `statistics_YYYY_MM` back into `(year, month)`. Unparsable names
/// are skipped by retention.
pub fn parse_partition_name(name: &str) -> Option<(i32, u32)> {
    let rest = name.strip_prefix("statistics_")?;
    let (year, month) = rest.split_once('_')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_months_wraps_years() {
        assert_eq!(add_months(2026, 12, 1), (2027, 1));
        assert_eq!(add_months(2026, 12, 2), (2027, 2));
        assert_eq!(add_months(2026, 1, -1), (2025, 12));
        assert_eq!(add_months(2026, 6, -18), (2024, 12));
        assert_eq!(add_months(2026, 6, 0), (2026, 6));
    }

    #[test]
    fn test_partition_name_round_trip() {
        assert_eq!(partition_name(2026, 8), "statistics_2026_08");
        assert_eq!(parse_partition_name("statistics_2026_08"), Some((2026, 8)));
        assert_eq!(parse_partition_name("statistics_2026_13"), None);
        assert_eq!(parse_partition_name("statistics_26_08"), None);
        assert_eq!(parse_partition_name("statistics_other"), None);
        assert_eq!(parse_partition_name("db_info"), None);
    }

    #[test]
    fn test_month_bounds_cover_december() {
        let start = month_start(2026, 12);
        let (ny, nm) = add_months(2026, 12, 1);
        let end = month_start(ny, nm);
        assert_eq!(start.to_rfc3339(), "2026-12-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2027-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_retention_cutoff_keeps_window() {
        // Dec 2026, retention 12 months: cutoff Dec 2025; Nov 2025 expires.
        let cutoff = add_months(2026, 12, -12);
        assert_eq!(cutoff, (2025, 12));
        assert!((2025, 11) < cutoff);
        assert!((2025, 12) >= cutoff);
        assert!((2026, 1) >= cutoff);
    }
}
