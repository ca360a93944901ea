use std::collections::HashMap;

use serde::Serialize;
use sqlx::Row;
use uuid::Uuid;

use crate::models::server::{Server, SshAuthType};
use crate::models::stats::ActivityRow;
use crate::services::remote::describe_remote_error;
use crate::state::AppContext;

/// Live status of one target, as shown on the server list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub name: String,
    pub host: String,
    pub pg_port: u16,
    pub pg_user: String,
    pub ssh_user: String,
    pub ssh_port: u16,
    pub ssh_auth_type: SshAuthType,
    pub ssh_key_id: Option<Uuid>,
    pub has_password: bool,
    pub has_ssh_password: bool,
    pub version: Option<String>,
    pub connections: Option<HashMap<String, i64>>,
    pub uptime_hours: Option<f64>,
    pub data_dir: Option<String>,
    pub free_space: Option<i64>,
    pub total_space: Option<i64>,
    pub status: String,
}

impl ServerStatus {
    fn pending(server: &Server) -> Self {
        Self {
            name: server.name.clone(),
            host: server.host.clone(),
            pg_port: server.pg_port,
            pg_user: server.pg_user.clone(),
            ssh_user: server.ssh_user.clone(),
            ssh_port: server.ssh_port,
            ssh_auth_type: server.ssh_auth_type,
            ssh_key_id: server.ssh_key_id,
            has_password: server.has_password(),
            has_ssh_password: server.has_ssh_password(),
            version: None,
            connections: None,
            uptime_hours: None,
            data_dir: None,
            free_space: None,
            total_space: None,
            status: "pending".to_string(),
        }
    }
}

/// Cache key for the short-TTL status cache.
pub fn status_cache_key(server: &Server) -> String {
    format!("{}:{}", server.host, server.pg_port)
}

/// Probe one target: version, backend states, uptime, data directory, and
/// disk usage over SSH. Successful results are cached briefly so that UI
/// polling does not hammer the fleet.
pub async fn server_status(ctx: &AppContext, server: &Server) -> ServerStatus {
    let cache_key = status_cache_key(server);
    if let Some(cached) = ctx.status_cache.get(&cache_key) {
        tracing::debug!(server = %server.name, "status served from cache");
        return cached;
    }

    let mut status = ServerStatus::pending(server);

    match probe_postgres(ctx, server, &mut status).await {
        Ok(()) => status.status = "ok".to_string(),
        Err(e) => {
            let message = e.to_string();
            tracing::error!(server = %server.name, error = %message, "status probe failed");
            status.status = format!("PostgreSQL: {}", truncate(&message, 80));
            return status;
        }
    }

    if let Some(data_dir) = status.data_dir.clone() {
        match ctx.ssh.df_bytes(server, &data_dir).await {
            Ok((free, total)) => {
                status.free_space = Some(free);
                status.total_space = Some(total);
            }
            Err(e) => {
                tracing::warn!(server = %server.name, error = %e, "ssh disk probe failed");
                status.status = format!("ok (SSH: {})", truncate(&e.to_string(), 80));
            }
        }
    }

    // Only healthy results are worth caching.
    if status.status.starts_with("ok") {
        ctx.status_cache.insert(cache_key, status.clone());
    }
    status
}

async fn probe_postgres(
    ctx: &AppContext,
    server: &Server,
    status: &mut ServerStatus,
) -> Result<(), crate::database::error::DatabaseError> {
    let pool = ctx.remote.get_pool(server, None)?;

    let version: String = sqlx::query_scalar("SELECT current_setting('server_version')")
        .fetch_one(&pool)
        .await
        .map_err(|e| describe_remote_error(&e))?;
    status.version = Some(version);

    let rows = sqlx::query(
        "SELECT COALESCE(state, 'unknown') AS state, count(*) AS backends \
         FROM pg_stat_activity GROUP BY state",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| describe_remote_error(&e))?;
    status.connections = Some(
        rows.into_iter()
            .map(|row| (row.get::<String, _>("state"), row.get::<i64, _>("backends")))
            .collect(),
    );

    let uptime_secs: f64 = sqlx::query_scalar(
        "SELECT extract(epoch FROM now() - pg_postmaster_start_time())::float8",
    )
    .fetch_one(&pool)
    .await
    .map_err(|e| describe_remote_error(&e))?;
    status.uptime_hours = Some((uptime_secs / 3600.0 * 100.0).round() / 100.0);

    let data_dir: String = sqlx::query_scalar("SELECT current_setting('data_directory')")
        .fetch_one(&pool)
        .await
        .map_err(|e| describe_remote_error(&e))?;
    status.data_dir = Some(data_dir);

    Ok(())
}

/// Live `pg_stat_activity` snapshot, bypassing the warehouse entirely.
pub async fn current_activity(
    ctx: &AppContext,
    server: &Server,
) -> Result<Vec<ActivityRow>, crate::database::error::DatabaseError> {
    let pool = ctx.remote.get_pool(server, None)?;
    let rows = sqlx::query(
        "SELECT pid, usename, datname, query, state \
         FROM pg_stat_activity WHERE state IS NOT NULL",
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| describe_remote_error(&e))?;

    Ok(rows
        .into_iter()
        .map(|row| ActivityRow {
            pid: row.get("pid"),
            usename: row.get("usename"),
            datname: row.get("datname"),
            query: row.get("query"),
            state: row.get("state"),
        })
        .collect())
}

fn truncate(message: &str, limit: usize) -> &str {
    match message.char_indices().nth(limit) {
        Some((idx, _)) => &message[..idx],
        None => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 80), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("приветпривет", 6), "привет");
    }
}
