//! Bearer access token authentication for the `/api/v1` routes.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use super::RequestId;
use crate::{
    AppState,
    auth::{AuthError, Principal},
    models::{NewEventLog, event_types},
    observability::metrics,
    services::{AuthenticatedToken, Services},
};

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Whether a timestamp is missing or older than `interval`.
fn is_stale(at: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    at.is_none_or(|at| now - at >= interval)
}

/// Middleware that requires a valid access token and inserts the caller's
/// [`Principal`] into request extensions.
pub async fn access_token_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.as_str().to_string());

    let Some(services) = state.services.as_ref() else {
        return Err(AuthError::Internal("database not configured".into()));
    };

    let Some(raw) = bearer_token(req.headers()) else {
        metrics::record_auth_attempt("access_token", false);
        return Err(AuthError::MissingCredentials);
    };

    let authenticated = services
        .tokens
        .authenticate_access(raw)
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?;

    let Some(AuthenticatedToken { user, token }) = authenticated else {
        metrics::record_auth_attempt("access_token", false);
        tracing::warn!(
            request_id = ?request_id,
            "Authentication failed: invalid access token"
        );
        return Err(AuthError::InvalidCredentials);
    };

    metrics::record_auth_attempt("access_token", true);
    tracing::debug!(
        request_id = ?request_id,
        user_id = %user.id,
        role = user.role.as_str(),
        "Request authenticated"
    );

    let now = Utc::now();
    let interval = state.config.auth.login_touch_interval();
    let touch_login = is_stale(user.last_login_at, now, interval);
    let touch_token = is_stale(token.last_used_at, now, interval);
    if touch_login || touch_token {
        let services = services.clone();
        let (user_id, token_id) = (user.id, token.id);
        state.task_tracker.spawn(async move {
            record_activity(&services, user_id, token_id, touch_login, touch_token).await;
        });
    }

    req.extensions_mut().insert(Principal {
        user_id: user.id,
        username: user.username,
        role: user.role,
        token_id: token.id,
    });

    Ok(next.run(req).await)
}

/// Route layer for `/admin`. Runs after [`access_token_auth_middleware`].
pub async fn require_admin_middleware(req: Request, next: Next) -> Result<Response, AuthError> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .ok_or(AuthError::MissingCredentials)?;
    principal.require_admin()?;
    Ok(next.run(req).await)
}

/// Write last-seen timestamps and the login event. Failures are logged and
/// never reach the request.
async fn record_activity(
    services: &Services,
    user_id: uuid::Uuid,
    token_id: uuid::Uuid,
    touch_login: bool,
    touch_token: bool,
) {
    if touch_token && let Err(e) = services.tokens.touch_access_token(token_id).await {
        tracing::warn!(%token_id, error = %e, "Failed to update token last use");
    }
    if touch_login {
        if let Err(e) = services.users.touch_login(user_id, Utc::now()).await {
            tracing::warn!(%user_id, error = %e, "Failed to update last login");
            return;
        }
        services
            .event_logs
            .record(NewEventLog::new(
                event_types::USER_LOGIN,
                Some(user_id),
                json!({ "token_id": token_id }),
            ))
            .await;
    }
}
