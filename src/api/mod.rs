pub mod auth;
pub mod logs;
pub mod servers;
pub mod settings;
pub mod ssh_keys;
pub mod stats;
pub mod users;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::error::AppError;
use crate::models::user::{User, UserRole};
use crate::services::auth::TOKEN_TYPE_ACCESS;
use crate::state::AppContext;

pub fn router(ctx: AppContext) -> Router {
    let mut router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/token", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/servers", get(servers::list).post(servers::create))
        .route(
            "/servers/{name}",
            put(servers::update).delete(servers::remove),
        )
        .route("/server_stats/{name}", get(stats::current_activity))
        .route("/server/{name}/stats", get(stats::server_stats))
        .route("/server/{name}/db/{db}", get(stats::database_summary))
        .route("/server/{name}/db/{db}/stats", get(stats::database_stats))
        .route("/ssh-keys", get(ssh_keys::list))
        .route("/ssh-keys/generate", post(ssh_keys::generate))
        .route("/ssh-keys/import", post(ssh_keys::import))
        .route(
            "/ssh-keys/{id}",
            get(ssh_keys::get_one)
                .put(ssh_keys::update)
                .delete(ssh_keys::remove),
        )
        .route("/settings", get(settings::get_all).put(settings::update))
        .route("/users", get(users::list).post(users::create))
        .route("/users/{login}", put(users::update).delete(users::remove))
        .route("/audit", get(logs::audit))
        .route("/logs", get(logs::system))
        .route("/logs/stats", get(logs::stats));

    if !ctx.config.allowed_origins.is_empty() {
        router = router.layer(cors_layer(&ctx.config.allowed_origins));
    }
    router.with_state(ctx)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(list))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "pgfleet API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(
    axum::extract::State(ctx): axum::extract::State<AppContext>,
) -> Json<serde_json::Value> {
    let database = match ctx.warehouse.ping().await {
        Ok(()) => "ok",
        Err(_) => "error",
    };
    Json(json!({ "status": "ok", "database": database }))
}

/// Bearer token from the `Authorization` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_owned)
}

/// One cookie value from the `Cookie` header.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookies.split(';') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix(name).and_then(|s| s.strip_prefix('=')) {
            return Some(value.to_owned());
        }
    }
    None
}

/// Best-effort request metadata for audit rows.
pub(crate) fn client_meta(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_owned());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    (ip, user_agent)
}

/// Authenticated caller: a valid, unrevoked access token belonging to an
/// active user.
pub struct AuthUser(pub User);

impl FromRequestParts<AppContext> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::auth("Not authenticated"))?;
        let claims = ctx.auth.decode_token(&token)?;
        if claims.token_type != TOKEN_TYPE_ACCESS {
            return Err(AppError::auth("Invalid token type"));
        }

        let user = ctx
            .warehouse
            .get_user(&claims.sub)
            .await?
            .ok_or_else(|| AppError::auth("Invalid credentials"))?;
        if !user.is_active {
            return Err(AppError::auth("User is deactivated"));
        }
        Ok(AuthUser(user))
    }
}

/// Authenticated caller with the `admin` role.
pub struct AdminUser(pub User);

impl FromRequestParts<AppContext> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, ctx).await?;
        if user.role != UserRole::Admin {
            return Err(AppError::forbidden("Administrator role required"));
        }
        Ok(AdminUser(user))
    }
}
