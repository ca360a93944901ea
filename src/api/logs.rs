use axum::extract::{Query, State};
use axum::Json;
use serde_json::json;

use crate::api::AdminUser;
use crate::database::audit::SystemLogStats;
use crate::error::AppResult;
use crate::models::audit::{AuditQuery, LogQuery};
use crate::state::AppContext;

pub async fn audit(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let (items, total) = ctx.warehouse.list_audit_events(&query).await?;
    Ok(Json(json!({
        "items": items,
        "total": total,
        "limit": query.limit,
        "offset": query.offset,
    })))
}

pub async fn system(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
    Query(query): Query<LogQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let (items, total) = ctx.warehouse.list_system_logs(&query).await?;
    Ok(Json(json!({
        "items": items,
        "total": total,
        "limit": query.limit,
        "offset": query.offset,
    })))
}

pub async fn stats(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
) -> AppResult<Json<SystemLogStats>> {
    Ok(Json(ctx.warehouse.system_log_stats().await?))
}
