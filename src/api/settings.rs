use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::api::{client_meta, AdminUser};
use crate::error::AppResult;
use crate::models::settings::{Setting, SettingsUpdate};
use crate::state::AppContext;

async fn settings_map(ctx: &AppContext) -> AppResult<BTreeMap<String, Setting>> {
    let settings = ctx.warehouse.all_settings().await?;
    Ok(settings.into_iter().map(|s| (s.key.clone(), s)).collect())
}

pub async fn get_all(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
) -> AppResult<Json<BTreeMap<String, Setting>>> {
    Ok(Json(settings_map(&ctx).await?))
}

/// Update tunables within their declared bounds; the change set lands in
/// the audit trail.
pub async fn update(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    headers: HeaderMap,
    Json(request): Json<SettingsUpdate>,
) -> AppResult<Json<BTreeMap<String, Setting>>> {
    let updates = request.validated_updates()?;
    let before = settings_map(&ctx).await?;

    ctx.warehouse.update_settings(&updates).await?;

    let changes: Vec<String> = updates
        .iter()
        .filter_map(|(key, new_value)| {
            let old = before.get(*key)?.value.storage_value();
            let new = new_value.to_string();
            (old != new).then(|| format!("{}: {} -> {}", key, old, new))
        })
        .collect();

    if !changes.is_empty() {
        let (ip, user_agent) = client_meta(&headers);
        ctx.warehouse
            .record_audit_event(
                "settings_update",
                &admin.login,
                ip.as_deref(),
                user_agent.as_deref(),
                None,
                Some(&changes.join("; ")),
            )
            .await;
    }

    Ok(Json(settings_map(&ctx).await?))
}
