use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use crate::api::AdminUser;
use crate::error::{AppError, AppResult};
use crate::models::user::{CreateUserRequest, UpdateUserRequest, User};
use crate::services::auth::AuthService;
use crate::state::AppContext;

pub async fn list(State(ctx): State<AppContext>, _admin: AdminUser) -> AppResult<Json<Vec<User>>> {
    Ok(Json(ctx.warehouse.list_users().await?))
}

pub async fn create(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
    Json(request): Json<CreateUserRequest>,
) -> AppResult<Json<User>> {
    if request.login.trim().is_empty() {
        return Err(AppError::validation("login must not be empty"));
    }
    if request.password.len() < 8 {
        return Err(AppError::validation(
            "password must be at least 8 characters",
        ));
    }

    let hash = AuthService::hash_password(&request.password)?;
    let user = ctx
        .warehouse
        .create_user(&request.login, &hash, request.role, request.email.as_deref())
        .await?;
    Ok(Json(user))
}

pub async fn update(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(login): Path<String>,
    Json(patch): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    // Locking yourself out is always a mistake.
    if login == admin.login && patch.is_active == Some(false) {
        return Err(AppError::validation("you cannot deactivate your own account"));
    }

    let password_hash = match &patch.password {
        Some(password) if password.len() < 8 => {
            return Err(AppError::validation(
                "password must be at least 8 characters",
            ))
        }
        Some(password) => Some(AuthService::hash_password(password)?),
        None => None,
    };

    ctx.warehouse
        .update_user(&login, patch, password_hash)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("User not found"))
}

pub async fn remove(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(login): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    if login == admin.login {
        return Err(AppError::validation("you cannot delete your own account"));
    }
    if !ctx.warehouse.delete_user(&login).await? {
        return Err(AppError::not_found("User not found"));
    }
    Ok(Json(json!({ "message": format!("User {} deleted", login) })))
}
