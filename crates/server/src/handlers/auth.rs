//! Auth handlers
//!
//! The refresh token travels in an httpOnly, SameSite=Strict cookie; any
//! refresh failure clears it so an invalid cookie cannot be replayed.

use axum::{
    extract::State,
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{CurrentUser, REFRESH_TTL_SECS};
use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::{Error, Result};
use crate::models::User;

const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub user: User,
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    info!("POST /auth/register");

    let (email, password) = require_credentials(req.email, req.password)?;
    let (token, user) = state
        .auth
        .register(email, password, req.display_name, req.avatar_url)
        .await?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { token, user })))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response> {
    info!("POST /auth/login");

    let (email, password) = require_credentials(req.email, req.password)?;
    let (access_token, refresh_token, user) = state.auth.login(&email, &password).await?;

    let mut response = Json(TokenResponse { access_token, user }).into_response();
    set_refresh_cookie(&mut response, &refresh_token)?;
    Ok(response)
}

/// POST /auth/refresh
///
/// Requires both a bearer token (route middleware) and the refresh cookie.
/// On success the cookie is rotated; on any failure it is cleared.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    info!("POST /auth/refresh");

    let Some(token) = refresh_cookie_from(&headers) else {
        return Error::Unauthorized("Missing refresh token".to_string()).into_response();
    };

    match state.auth.refresh(&token).await {
        Ok((access_token, refresh_token, user)) => {
            let mut response = Json(TokenResponse { access_token, user }).into_response();
            if set_refresh_cookie(&mut response, &refresh_token).is_err() {
                return Error::Internal("Failed to set refresh cookie".to_string())
                    .into_response();
            }
            response
        }
        Err(err) => {
            let mut response = err.into_response();
            clear_refresh_cookie(&mut response);
            response
        }
    }
}

/// GET /auth/me
pub async fn me(State(state): State<AppState>, ctx: Ctx) -> Result<Json<CurrentUser>> {
    info!("GET /auth/me");
    Ok(Json(state.auth.current_user(ctx.user_id()).await?))
}

fn require_credentials(
    email: Option<String>,
    password: Option<String>,
) -> Result<(String, String)> {
    match (email, password) {
        (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
            Ok((email, password))
        }
        _ => Err(Error::InvalidInput(
            "Email and password are required".to_string(),
        )),
    }
}

fn set_refresh_cookie(response: &mut Response, token: &str) -> Result<()> {
    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        REFRESH_COOKIE, token, REFRESH_TTL_SECS
    );
    let value = HeaderValue::from_str(&cookie)
        .map_err(|e| Error::Internal(format!("Bad cookie value: {}", e)))?;
    response.headers_mut().insert(SET_COOKIE, value);
    Ok(())
}

fn clear_refresh_cookie(response: &mut Response) {
    let cookie = format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        REFRESH_COOKIE
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(SET_COOKIE, value);
    }
}

fn refresh_cookie_from(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .map(str::trim)
        .find_map(|cookie| cookie.strip_prefix("refresh_token=").map(str::to_string))
}
