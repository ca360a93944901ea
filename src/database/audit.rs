use sqlx::Row;

use crate::database::error::DatabaseResult;
use crate::database::warehouse::Warehouse;
use crate::models::audit::{AuditEvent, AuditQuery, LogLevel, LogQuery, SystemLogEntry};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 500;

/// Totals shown on the log browser.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemLogStats {
    pub total: i64,
    pub errors_today: i64,
    pub warnings_today: i64,
}

impl Warehouse {
    // ------------------------------------------------------------------ //
    //  Audit events
    // ------------------------------------------------------------------ //

    pub async fn record_audit_event(
        &self,
        event_type: &str,
        username: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        jti: Option<&str>,
        details: Option<&str>,
    ) {
        let result = sqlx::query(
            "INSERT INTO audit_sessions \
             (event_type, username, ip_address, user_agent, jti, details) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event_type)
        .bind(username)
        .bind(ip_address)
        .bind(user_agent)
        .bind(jti)
        .bind(details)
        .execute(self.pool())
        .await;

        // Auditing must never fail the request it describes.
        if let Err(e) = result {
            tracing::error!(error = %e, event_type, "failed to write audit event");
        }
    }

    pub async fn list_audit_events(
        &self,
        query: &AuditQuery,
    ) -> DatabaseResult<(Vec<AuditEvent>, i64)> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let offset = query.offset.unwrap_or(0).max(0);

        let total: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM audit_sessions \
             WHERE ($1::text IS NULL OR event_type = $1) \
               AND ($2::text IS NULL OR username = $2)",
        )
        .bind(&query.event_type)
        .bind(&query.username)
        .fetch_one(self.pool())
        .await?;

        let rows = sqlx::query(
            "SELECT id, timestamp, event_type, username, ip_address, user_agent, jti, details \
             FROM audit_sessions \
             WHERE ($1::text IS NULL OR event_type = $1) \
               AND ($2::text IS NULL OR username = $2) \
             ORDER BY timestamp DESC LIMIT $3 OFFSET $4",
        )
        .bind(&query.event_type)
        .bind(&query.username)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let events = rows
            .into_iter()
            .map(|row| AuditEvent {
                id: row.get("id"),
                timestamp: row.get("timestamp"),
                event_type: row.get("event_type"),
                username: row.get("username"),
                ip_address: row.get("ip_address"),
                user_agent: row.get("user_agent"),
                jti: row.get("jti"),
                details: row.get("details"),
            })
            .collect();

        Ok((events, total))
    }

    // ------------------------------------------------------------------ //
    //  System log
    // ------------------------------------------------------------------ //

    /// Record an operational event. Failures are swallowed: the system log
    /// is an observer, not a dependency.
    pub async fn log_system(
        &self,
        level: LogLevel,
        source: &str,
        message: &str,
        details: Option<&str>,
    ) {
        let result = sqlx::query(
            "INSERT INTO system_log (level, source, message, details) VALUES ($1, $2, $3, $4)",
        )
        .bind(level.to_string())
        .bind(source)
        .bind(message)
        .bind(details)
        .execute(self.pool())
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, source, "failed to write system_log");
        }
    }

    pub async fn list_system_logs(
        &self,
        query: &LogQuery,
    ) -> DatabaseResult<(Vec<SystemLogEntry>, i64)> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let offset = query.offset.unwrap_or(0).max(0);
        let level = query.level.map(|l| l.to_string());
        let search = query.search.as_ref().map(|s| format!("%{}%", s));

        let filter = "WHERE ($1::text IS NULL OR level = $1) \
               AND ($2::text IS NULL OR source = $2) \
               AND ($3::text IS NULL OR message ILIKE $3 OR details ILIKE $3) \
               AND ($4::timestamptz IS NULL OR timestamp >= $4) \
               AND ($5::timestamptz IS NULL OR timestamp <= $5)";

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT count(*) FROM system_log {}", filter))
                .bind(&level)
                .bind(&query.source)
                .bind(&search)
                .bind(query.date_from)
                .bind(query.date_to)
                .fetch_one(self.pool())
                .await?;

        let rows = sqlx::query(&format!(
            "SELECT timestamp, level, source, message, details FROM system_log {} \
             ORDER BY timestamp DESC LIMIT $6 OFFSET $7",
            filter
        ))
        .bind(&level)
        .bind(&query.source)
        .bind(&search)
        .bind(query.date_from)
        .bind(query.date_to)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let entries = rows
            .into_iter()
            .map(|row| {
                let level: String = row.get("level");
                SystemLogEntry {
                    timestamp: row.get("timestamp"),
                    level: match level.as_str() {
                        "warning" => LogLevel::Warning,
                        "error" => LogLevel::Error,
                        _ => LogLevel::Info,
                    },
                    source: row.get("source"),
                    message: row.get("message"),
                    details: row.get("details"),
                }
            })
            .collect();

        Ok((entries, total))
    }

    pub async fn system_log_stats(&self) -> DatabaseResult<SystemLogStats> {
        let row = sqlx::query(
            "SELECT count(*) AS total, \
             count(*) FILTER (WHERE level = 'error' AND timestamp >= date_trunc('day', now())) AS errors_today, \
             count(*) FILTER (WHERE level = 'warning' AND timestamp >= date_trunc('day', now())) AS warnings_today \
             FROM system_log",
        )
        .fetch_one(self.pool())
        .await?;

        Ok(SystemLogStats {
            total: row.get("total"),
            errors_today: row.get("errors_today"),
            warnings_today: row.get("warnings_today"),
        })
    }
}
