use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::{Error, Result};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::debug;

/// Bearer-token gate for every protected route.
///
/// Missing or malformed header is 401; an expired or invalid token is 403,
/// so clients can tell "refresh" apart from "log in again".
pub async fn mw_require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    debug!("MIDDLEWARE: require_auth");

    let auth_header = req.headers().get(header::AUTHORIZATION);
    let auth_header = match auth_header {
        Some(h) => h.to_str().map_err(|_| {
            Error::Unauthorized("Authorization header missing or invalid".to_string())
        })?,
        None => {
            return Err(Error::Unauthorized(
                "Authorization header missing or invalid".to_string(),
            ))
        }
    };

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        Error::Unauthorized("Authorization header missing or invalid".to_string())
    })?;

    // Forbidden on expired/invalid, Internal on anything else
    let claims = state.auth.verify_token(token)?;

    req.extensions_mut().insert(Ctx::new(claims.user_id));

    Ok(next.run(req).await)
}
