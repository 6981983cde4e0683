//! The request pipeline.
//!
//! ```text
//! authentication -> role gate -> record filter -> handler
//! ```
//!
//! Authentication wraps every API route and always yields a [`Principal`],
//! anonymous when the request is unsigned or fails verification. The role
//! gate and record filter are route layers on `/records/...` and need the
//! matched `resource` path parameter.

use authz::{Action, Principal, RoleDirectory};
use axum::{
    body::{to_bytes, Body},
    extract::{OriginalUri, Path, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};
use user::auth::InboundRequest;

use crate::error::{ApiError, ApiResult};
use crate::resources::Resource;
use crate::AppState;

/// Largest request body the authenticator will buffer.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Converts HTTP request parts into the authenticator's view of a request.
pub fn inbound_request(parts: &axum::http::request::Parts, body: &[u8]) -> InboundRequest {
    let mut headers: Vec<(&str, &str)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();

    // HTTP/2 carries the host in the URI authority.
    if !parts.headers.contains_key("host") {
        if let Some(authority) = parts.uri.authority() {
            headers.push(("host", authority.as_str()));
        }
    }

    // Nested routers strip their prefix; clients sign the full path.
    let uri = parts
        .extensions
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or(&parts.uri);

    InboundRequest::new(
        parts.method.as_str(),
        uri.path(),
        uri.query(),
        headers,
        body.to_vec(),
    )
}

/// Verifies the request signature and attaches the resolved [`Principal`].
pub async fn authentication_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> ApiResult<Response> {
    let start = Instant::now();
    let (mut parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Cannot read request body: {}", e)))?;

    let outcome = state
        .authenticator
        .verify(&inbound_request(&parts, &bytes))
        .await?;
    let principal = state
        .users
        .database()
        .principal_for(outcome.identity())
        .await?;

    debug!(
        "AUTH MIDDLEWARE: {} {} as {}",
        parts.method,
        parts.uri.path(),
        principal.identity()
    );
    parts.extensions.insert(principal);

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    debug!("AUTH MIDDLEWARE: Request processed in {:?}", start.elapsed());
    Ok(response)
}

fn principal_of(request: &Request<Body>) -> ApiResult<Principal> {
    request
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or_else(|| ApiError::InternalError("request reached the role gate unauthenticated".to_string()))
}

fn action_of(request: &Request<Body>) -> ApiResult<Action> {
    Action::from_method(request.method().as_str())
        .ok_or_else(|| ApiError::BadRequest(format!("Unsupported method: {}", request.method())))
}

/// Rejects the request with 403 unless one of the principal's roles holds
/// the action on the resource. Attaches the resolved [`Resource`].
pub async fn role_gate_middleware(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request<Body>,
    next: Next,
) -> ApiResult<Response> {
    let name = params.get("resource").cloned().unwrap_or_default();
    let resource = state
        .resources
        .get(&name)
        .ok_or_else(|| ApiError::UnknownResource(name.clone()))?;

    let principal = principal_of(&request)?;
    let action = action_of(&request)?;

    if !state.gate.allowed(&principal, &resource.name, action) {
        warn!(
            "ROLE GATE: {} denied {} on {}",
            principal.identity(),
            action,
            resource.name
        );
        return Err(ApiError::Forbidden);
    }

    info!(
        "ROLE GATE: {} allowed {} on {}",
        principal.identity(),
        action,
        resource.name
    );
    request.extensions_mut().insert(resource);
    Ok(next.run(request).await)
}

/// Evaluates the resource policy into the query alteration handlers apply.
///
/// Creation has no existing record to restrict and gets no alteration.
pub async fn record_filter_middleware(mut request: Request<Body>, next: Next) -> ApiResult<Response> {
    let principal = principal_of(&request)?;
    let action = action_of(&request)?;
    let resource = request
        .extensions()
        .get::<std::sync::Arc<Resource>>()
        .cloned()
        .ok_or_else(|| ApiError::InternalError("record filter ran before the role gate".to_string()))?;

    if let Some(operation) = action.operation() {
        let alteration = resource.policy.evaluate(
            operation,
            &principal,
            &resource.name,
            &resource.collection,
        );
        debug!(
            "RECORD FILTER: {} on {} with {} join(s)",
            operation,
            resource.name,
            alteration.joins.len()
        );
        request.extensions_mut().insert(alteration);
    }

    Ok(next.run(request).await)
}
