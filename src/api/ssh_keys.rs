use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::api::{AdminUser, AuthUser};
use crate::database::ssh_keys::NewSshKey;
use crate::error::{AppError, AppResult};
use crate::models::ssh_key::{GenerateKeyRequest, ImportKeyRequest, SshKey, UpdateKeyRequest};
use crate::services::ssh::keygen;
use crate::state::AppContext;

pub async fn list(
    State(ctx): State<AppContext>,
    _user: AuthUser,
) -> AppResult<Json<Vec<SshKey>>> {
    Ok(Json(ctx.warehouse.list_keys().await?))
}

pub async fn get_one(
    State(ctx): State<AppContext>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SshKey>> {
    ctx.warehouse
        .get_key(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("SSH key not found"))
}

/// Generate a new key pair and store it. RSA generation is CPU-bound, so it
/// runs on the blocking pool.
pub async fn generate(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Json(request): Json<GenerateKeyRequest>,
) -> AppResult<Json<SshKey>> {
    if request.name.trim().is_empty() {
        return Err(AppError::validation("key name must not be empty"));
    }

    let key_type = request.key_type;
    let key_size = request.key_size;
    let passphrase = request.passphrase.clone();
    let material = tokio::task::spawn_blocking(move || {
        keygen::generate_key_pair(key_type, key_size, passphrase.as_deref())
    })
    .await
    .map_err(|e| AppError::internal(format!("keygen task failed: {}", e)))??;

    let key = ctx
        .warehouse
        .create_key(NewSshKey {
            name: request.name,
            fingerprint: material.fingerprint,
            key_type: material.key_type,
            public_key: material.public_key,
            private_key_pem: material.private_key_pem,
            has_passphrase: material.has_passphrase,
            created_by: admin.login,
            description: request.description,
        })
        .await?;
    Ok(Json(key))
}

/// Import an existing private key. The PEM must parse with the provided
/// passphrase; duplicates are rejected by fingerprint.
pub async fn import(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Json(request): Json<ImportKeyRequest>,
) -> AppResult<Json<SshKey>> {
    if request.name.trim().is_empty() {
        return Err(AppError::validation("key name must not be empty"));
    }

    let material =
        keygen::validate_private_key(&request.private_key, request.passphrase.as_deref())?;

    let key = ctx
        .warehouse
        .create_key(NewSshKey {
            name: request.name,
            fingerprint: material.fingerprint,
            key_type: material.key_type,
            public_key: material.public_key,
            private_key_pem: material.private_key_pem,
            has_passphrase: material.has_passphrase,
            created_by: admin.login,
            description: request.description,
        })
        .await?;
    Ok(Json(key))
}

pub async fn update(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateKeyRequest>,
) -> AppResult<Json<SshKey>> {
    ctx.warehouse
        .update_key(id, patch)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("SSH key not found"))
}

pub async fn remove(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    if !ctx.warehouse.delete_key(id).await? {
        return Err(AppError::not_found("SSH key not found"));
    }
    Ok(Json(json!({ "message": "SSH key deleted" })))
}
