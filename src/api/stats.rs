use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::server::Server;
use crate::models::stats::{DatabasePresence, DbTimelinePoint, TimelinePoint};
use crate::services::remote::describe_remote_error;
use crate::services::status;
use crate::state::AppContext;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl RangeQuery {
    /// Default window is the last seven days.
    fn resolve(&self) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
        let to = self.to.unwrap_or_else(Utc::now);
        let from = self.from.unwrap_or(to - Duration::days(7));
        if from > to {
            return Err(AppError::validation("'from' must not be after 'to'"));
        }
        Ok((from, to))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatsResponse {
    pub last_stat_update: Option<DateTime<Utc>>,
    pub total_connections: i64,
    pub total_size_bytes: i64,
    pub databases: Vec<DatabasePresence>,
    pub timeline: Vec<TimelinePoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatsResponse {
    pub last_stat_update: Option<DateTime<Utc>>,
    pub total_connections: i64,
    pub total_commits: i64,
    pub total_size_bytes: i64,
    pub max_connections: i64,
    pub min_connections: i64,
    pub creation_time: Option<DateTime<Utc>>,
    pub timeline: Vec<DbTimelinePoint>,
}

async fn lookup_server(ctx: &AppContext, name: &str) -> AppResult<Server> {
    ctx.warehouse
        .get_server(name)
        .await?
        .ok_or_else(|| AppError::not_found("Server not found"))
}

/// Live `pg_stat_activity` snapshot, not history.
pub async fn current_activity(
    State(ctx): State<AppContext>,
    _user: AuthUser,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let server = lookup_server(&ctx, &name).await?;
    let queries = status::current_activity(&ctx, &server).await?;
    Ok(Json(json!({ "queries": queries })))
}

/// Historical per-server statistics with adaptive bucketing.
pub async fn server_stats(
    State(ctx): State<AppContext>,
    _user: AuthUser,
    Path(name): Path<String>,
    Query(range): Query<RangeQuery>,
) -> AppResult<Json<ServerStatsResponse>> {
    let server = lookup_server(&ctx, &name).await?;
    let (from, to) = range.resolve()?;

    let summary = ctx
        .warehouse
        .server_stats_summary(&server.name, from, to)
        .await?;
    let databases = ctx
        .warehouse
        .databases_in_range(&server.name, from, to)
        .await?;
    let timeline = ctx.warehouse.server_timeline(&server.name, from, to).await?;

    Ok(Json(ServerStatsResponse {
        last_stat_update: summary.last_update,
        total_connections: summary.total_connections,
        total_size_bytes: summary.total_size_bytes,
        databases,
        timeline,
    }))
}

/// Latest known state of one database; falls back to a live size probe when
/// the warehouse has no sized sample yet.
pub async fn database_summary(
    State(ctx): State<AppContext>,
    _user: AuthUser,
    Path((name, db)): Path<(String, String)>,
) -> AppResult<Json<serde_json::Value>> {
    let server = lookup_server(&ctx, &name).await?;
    let sample = ctx.warehouse.latest_db_sample(&server.name, &db).await?;

    let (connections, commits, mut size_bytes, last_update) = match sample {
        Some(sample) => (
            sample.connections,
            sample.commits,
            sample.size_bytes,
            Some(sample.ts),
        ),
        None => (0, None, None, None),
    };

    if size_bytes.is_none() {
        size_bytes = live_database_size(&ctx, &server, &db).await;
    }

    Ok(Json(json!({
        "connections": connections,
        "commits": commits,
        "sizeBytes": size_bytes,
        "lastUpdate": last_update,
    })))
}

/// Historical per-database statistics with adaptive bucketing.
pub async fn database_stats(
    State(ctx): State<AppContext>,
    _user: AuthUser,
    Path((name, db)): Path<(String, String)>,
    Query(range): Query<RangeQuery>,
) -> AppResult<Json<DatabaseStatsResponse>> {
    let server = lookup_server(&ctx, &name).await?;
    let (from, to) = range.resolve()?;

    let summary = ctx
        .warehouse
        .database_stats_summary(&server.name, &db, from, to)
        .await?;
    let info = ctx.warehouse.get_db_info(&server.name, &db).await?;
    let timeline = ctx
        .warehouse
        .database_timeline(&server.name, &db, from, to)
        .await?;

    Ok(Json(DatabaseStatsResponse {
        last_stat_update: summary.last_update,
        total_connections: summary.total_connections,
        total_commits: summary.total_commits,
        total_size_bytes: summary.total_size_bytes,
        max_connections: summary.max_connections,
        min_connections: summary.min_connections,
        creation_time: info.and_then(|i| i.creation_time),
        timeline,
    }))
}

async fn live_database_size(ctx: &AppContext, server: &Server, datname: &str) -> Option<i64> {
    let pool = ctx.remote.get_pool(server, None).ok()?;
    sqlx::query_scalar("SELECT pg_database_size($1)")
        .bind(datname)
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            tracing::warn!(
                server = %server.name,
                datname,
                error = %describe_remote_error(&e),
                "live size probe failed"
            );
        })
        .ok()
}
