use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use futures::future::join_all;
use serde_json::json;
use tokio::net::TcpStream;

use crate::api::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::server::{CreateServerRequest, UpdateServerRequest};
use crate::services::status::{self, status_cache_key, ServerStatus};
use crate::state::AppContext;

/// Quick TCP probe used to reject typo'd registrations early.
async fn is_host_reachable(host: &str, port: u16) -> bool {
    tokio::time::timeout(
        Duration::from_secs(2),
        TcpStream::connect((host, port)),
    )
    .await
    .map(|r| r.is_ok())
    .unwrap_or(false)
}

/// All registered servers with their live status.
pub async fn list(
    State(ctx): State<AppContext>,
    _user: AuthUser,
) -> AppResult<Json<Vec<ServerStatus>>> {
    let servers = ctx.warehouse.list_servers().await?;
    let statuses = join_all(servers.iter().map(|s| status::server_status(&ctx, s))).await;
    Ok(Json(statuses))
}

pub async fn create(
    State(ctx): State<AppContext>,
    _user: AuthUser,
    Json(request): Json<CreateServerRequest>,
) -> AppResult<Json<ServerStatus>> {
    request.validate()?;

    if !is_host_reachable(&request.host, request.pg_port).await {
        return Err(AppError::validation(format!(
            "server {}:{} is unreachable, check the address and port",
            request.host, request.pg_port
        )));
    }

    let server = ctx.warehouse.create_server(request).await?;
    Ok(Json(status::server_status(&ctx, &server).await))
}

pub async fn update(
    State(ctx): State<AppContext>,
    _user: AuthUser,
    Path(name): Path<String>,
    Json(patch): Json<UpdateServerRequest>,
) -> AppResult<Json<ServerStatus>> {
    let old = ctx
        .warehouse
        .get_server(&name)
        .await?
        .ok_or_else(|| AppError::not_found("Server not found"))?;

    // Stale pools and cached status would keep pointing at the old
    // coordinates.
    ctx.status_cache.invalidate(&status_cache_key(&old));
    if patch.changes_connection(&old) {
        ctx.remote.close_pools(&old).await;
    }

    let updated = ctx
        .warehouse
        .update_server(&name, patch)
        .await?
        .ok_or_else(|| AppError::not_found("Server not found"))?;

    Ok(Json(status::server_status(&ctx, &updated).await))
}

/// Delete a target and cascade: collected statistics, topology rows, remote
/// pools, status cache.
pub async fn remove(
    State(ctx): State<AppContext>,
    _user: AuthUser,
    Path(name): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let server = ctx
        .warehouse
        .get_server(&name)
        .await?
        .ok_or_else(|| AppError::not_found("Server not found"))?;

    ctx.status_cache.invalidate(&status_cache_key(&server));
    ctx.remote.close_pools(&server).await;
    ctx.warehouse.delete_server(&name).await?;
    ctx.warehouse.delete_server_data(&name).await?;

    Ok(Json(json!({ "message": format!("Server {} deleted", name) })))
}
