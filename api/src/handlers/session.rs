//! Password login and credential lifecycle.
//!
//! These endpoints answer with a numeric `err` field rather than HTTP status
//! codes: `0` success, `1` invalid credentials, `2` missing parameter,
//! `3` invalid or expired session.

use axum::{extract::State, Extension, Form, Json};
use authz::Principal;
use tracing::{debug, info};
use user::auth::{CredentialStore, TouchOutcome};

use crate::{
    error::ApiResult,
    models::{err, AuthenticateForm, SessionForm, SessionResponse, WhoAmIResponse},
    AppState,
};

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Exchange a username and password for a fresh credential
#[utoipa::path(
    post,
    path = "/api/v1/authenticate",
    request_body(content = AuthenticateForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "err 0 with a credential, 1 for invalid credentials, 2 for a missing parameter", body = SessionResponse)
    ),
    tag = "session"
)]
pub async fn authenticate(
    State(state): State<AppState>,
    Form(form): Form<AuthenticateForm>,
) -> ApiResult<Json<SessionResponse>> {
    let (Some(username), Some(password)) = (present(form.username), present(form.password)) else {
        return Ok(Json(SessionResponse::status(err::MISSING_PARAMETER)));
    };

    let Some((user, credential)) = state.users.login(&username, &password).await? else {
        return Ok(Json(SessionResponse::status(err::INVALID_CREDENTIALS)));
    };

    Ok(Json(SessionResponse {
        err: err::OK,
        username: Some(user.username),
        user_id: Some(user.id),
        session_id: Some(credential.session_id),
        session_secret: Some(credential.secret),
    }))
}

/// Refresh a credential's idle timer
#[utoipa::path(
    post,
    path = "/api/v1/validate-session",
    request_body(content = SessionForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "err 0 when live, 3 when unknown or expired", body = SessionResponse)
    ),
    tag = "session"
)]
pub async fn validate_session(
    State(state): State<AppState>,
    Form(form): Form<SessionForm>,
) -> ApiResult<Json<SessionResponse>> {
    let Some(session_id) = present(form.session_id) else {
        return Ok(Json(SessionResponse::status(err::MISSING_PARAMETER)));
    };

    let status = match state.users.credentials().touch(&session_id).await? {
        TouchOutcome::Refreshed => err::OK,
        TouchOutcome::Expired => {
            info!("Session expired on validation");
            err::INVALID_SESSION
        }
        TouchOutcome::NotFound => err::INVALID_SESSION,
    };
    Ok(Json(SessionResponse::status(status)))
}

/// Revoke a credential
#[utoipa::path(
    post,
    path = "/api/v1/invalidate-session",
    request_body(content = SessionForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "err 0, also for unknown sessions", body = SessionResponse)
    ),
    tag = "session"
)]
pub async fn invalidate_session(
    State(state): State<AppState>,
    Form(form): Form<SessionForm>,
) -> ApiResult<Json<SessionResponse>> {
    let Some(session_id) = present(form.session_id) else {
        return Ok(Json(SessionResponse::status(err::MISSING_PARAMETER)));
    };

    state.users.credentials().revoke(&session_id).await?;
    Ok(Json(SessionResponse::status(err::OK)))
}

/// The identity the request authenticated as
#[utoipa::path(
    get,
    path = "/api/v1/whoami",
    responses(
        (status = 200, description = "Authenticated identity, or anonymous", body = WhoAmIResponse)
    ),
    tag = "session"
)]
pub async fn whoami(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<WhoAmIResponse>> {
    let user_id = principal.identity().user_id();
    let username = match user_id {
        Some(id) => state
            .users
            .database()
            .find_user(id)
            .await?
            .map(|user| user.username),
        None => None,
    };
    debug!("whoami: {}", principal.identity());

    Ok(Json(WhoAmIResponse {
        authenticated: user_id.is_some(),
        user_id,
        username,
        roles: principal.role_names().map(str::to_string).collect(),
    }))
}
