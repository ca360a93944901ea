use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{AppendHeaders, IntoResponse};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;

use crate::api::{bearer_token, client_meta, cookie_value};
use crate::error::{AppError, AppResult};
use crate::services::auth::{AuthService, REFRESH_TOKEN_DAYS, TOKEN_TYPE_REFRESH};
use crate::state::AppContext;

const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

fn refresh_cookie(token: &str) -> String {
    format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; Secure; SameSite=Strict",
        REFRESH_COOKIE,
        token,
        REFRESH_TOKEN_DAYS * 24 * 60 * 60
    )
}

fn clear_refresh_cookie() -> String {
    format!(
        "{}=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=Strict",
        REFRESH_COOKIE
    )
}

/// Origin allow-list check for the cookie-bearing endpoints.
fn check_origin(ctx: &AppContext, headers: &HeaderMap) -> AppResult<()> {
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    if ctx.config.allowed_origins.iter().any(|o| o == origin) {
        return Ok(());
    }
    tracing::warn!(origin, "request rejected by origin check");
    Err(AppError::forbidden("Invalid origin"))
}

/// Password login. The access token travels in the JSON body, the refresh
/// token in an HttpOnly cookie.
pub async fn login(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> AppResult<impl IntoResponse> {
    let (ip, user_agent) = client_meta(&headers);

    let user = ctx.warehouse.get_user(&form.username).await?;
    let authenticated = user
        .as_ref()
        .filter(|u| u.is_active)
        .filter(|u| AuthService::verify_password(&form.password, &u.password_hash));

    let Some(user) = authenticated else {
        tracing::warn!(user = %form.username, "failed login attempt");
        ctx.warehouse
            .record_audit_event(
                "login_failed",
                &form.username,
                ip.as_deref(),
                user_agent.as_deref(),
                None,
                Some("invalid login or password"),
            )
            .await;
        return Err(AppError::auth("Invalid credentials"));
    };

    let (access_token, access_claims) = ctx.auth.create_access_token(&user.login)?;
    let (refresh_token, _) = ctx.auth.create_refresh_token(&user.login)?;

    ctx.warehouse
        .record_audit_event(
            "login_success",
            &user.login,
            ip.as_deref(),
            user_agent.as_deref(),
            Some(&access_claims.jti),
            None,
        )
        .await;
    ctx.warehouse.update_last_login(&user.login).await?;
    tracing::info!(user = %user.login, "login successful");

    Ok((
        AppendHeaders([(header::SET_COOKIE, refresh_cookie(&refresh_token))]),
        Json(json!({ "access_token": access_token, "token_type": "bearer" })),
    ))
}

/// Rotate the refresh token and mint a new access token. The old refresh
/// JTI is revoked so a replayed cookie dies immediately.
pub async fn refresh(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    check_origin(&ctx, &headers)?;

    let Some(token) = cookie_value(&headers, REFRESH_COOKIE) else {
        return Err(AppError::auth("Refresh token missing"));
    };

    let claims = match ctx.auth.decode_token(&token) {
        Ok(claims) => claims,
        Err(e) => {
            return Ok((
                AppendHeaders([(header::SET_COOKIE, clear_refresh_cookie())]),
                Err::<Json<serde_json::Value>, _>(e),
            )
                .into_response());
        }
    };
    if claims.token_type != TOKEN_TYPE_REFRESH {
        return Err(AppError::auth("Invalid token type"));
    }

    let user = ctx
        .warehouse
        .get_user(&claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::auth("Invalid credentials"))?;

    ctx.auth.revoke(&claims.jti, claims.exp);

    let (access_token, access_claims) = ctx.auth.create_access_token(&user.login)?;
    let (new_refresh, _) = ctx.auth.create_refresh_token(&user.login)?;

    let (ip, user_agent) = client_meta(&headers);
    ctx.warehouse
        .record_audit_event(
            "token_refresh",
            &user.login,
            ip.as_deref(),
            user_agent.as_deref(),
            Some(&access_claims.jti),
            None,
        )
        .await;

    Ok((
        AppendHeaders([(header::SET_COOKIE, refresh_cookie(&new_refresh))]),
        Json(json!({ "access_token": access_token, "token_type": "bearer" })),
    )
        .into_response())
}

/// Revoke both tokens and clear the refresh cookie.
pub async fn logout(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let mut username = String::from("unknown");

    if let Some(token) = bearer_token(&headers) {
        if let Ok(claims) = ctx.auth.decode_token(&token) {
            username = claims.sub.clone();
            ctx.auth.revoke(&claims.jti, claims.exp);
        }
    }
    if let Some(token) = cookie_value(&headers, REFRESH_COOKIE) {
        if let Ok(claims) = ctx.auth.decode_token(&token) {
            username = claims.sub.clone();
            ctx.auth.revoke(&claims.jti, claims.exp);
        }
    }

    let (ip, user_agent) = client_meta(&headers);
    ctx.warehouse
        .record_audit_event(
            "logout",
            &username,
            ip.as_deref(),
            user_agent.as_deref(),
            None,
            None,
        )
        .await;

    Ok((
        AppendHeaders([(header::SET_COOKIE, clear_refresh_cookie())]),
        Json(json!({ "message": "logged out" })),
    ))
}
