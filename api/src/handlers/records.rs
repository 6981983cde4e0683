use authz::{Alteration, Principal};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use database::records::RecordStore;
use std::sync::Arc;
use tracing::info;

use crate::{
    error::{ApiError, ApiErrorResponse, ApiResult},
    models::{DeleteResponse, RecordListResponse, RecordResponse},
    resources::Resource,
    AppState,
};

fn not_found(resource: &Resource, id: i64) -> ApiError {
    ApiError::RecordNotFound(format!("{} {}", resource.name, id))
}

/// List the records visible to the caller
///
/// GET /api/v1/records/{resource}
#[utoipa::path(
    get,
    path = "/api/v1/records/{resource}",
    params(("resource" = String, Path, description = "Resource path segment")),
    responses(
        (status = 200, description = "Visible records", body = RecordListResponse),
        (status = 403, description = "Role may not read this resource", body = ApiErrorResponse),
        (status = 404, description = "Unknown resource", body = ApiErrorResponse)
    ),
    tag = "records"
)]
pub async fn list_records(
    State(state): State<AppState>,
    Extension(resource): Extension<Arc<Resource>>,
    Extension(alteration): Extension<Alteration>,
) -> ApiResult<impl IntoResponse> {
    let records = RecordStore::new(&state.db, &resource.collection)
        .list(&alteration)
        .await?;

    let records: Vec<RecordResponse> = records
        .into_iter()
        .map(|record| RecordResponse::new(&resource.name, record))
        .collect();
    Ok(Json(RecordListResponse {
        total: records.len(),
        records,
    }))
}

/// Create a record owned by the caller
///
/// POST /api/v1/records/{resource}
#[utoipa::path(
    post,
    path = "/api/v1/records/{resource}",
    params(("resource" = String, Path, description = "Resource path segment")),
    responses(
        (status = 201, description = "Record created", body = RecordResponse),
        (status = 400, description = "Attributes are not a JSON object", body = ApiErrorResponse),
        (status = 403, description = "Role may not create on this resource", body = ApiErrorResponse)
    ),
    tag = "records"
)]
pub async fn create_record(
    State(state): State<AppState>,
    Extension(resource): Extension<Arc<Resource>>,
    Extension(principal): Extension<Principal>,
    Json(attributes): Json<serde_json::Value>,
) -> ApiResult<impl IntoResponse> {
    let owner = principal.identity().user_id();
    let record = RecordStore::new(&state.db, &resource.collection)
        .create(owner, &attributes)
        .await?;

    info!("{} created {} {}", principal.identity(), resource.name, record.id);
    Ok((
        StatusCode::CREATED,
        Json(RecordResponse::new(&resource.name, record)),
    ))
}

/// Read one record
///
/// GET /api/v1/records/{resource}/{id}
#[utoipa::path(
    get,
    path = "/api/v1/records/{resource}/{id}",
    params(
        ("resource" = String, Path, description = "Resource path segment"),
        ("id" = i64, Path, description = "Record id")
    ),
    responses(
        (status = 200, description = "The record", body = RecordResponse),
        (status = 404, description = "Missing or not visible", body = ApiErrorResponse)
    ),
    tag = "records"
)]
pub async fn read_record(
    State(state): State<AppState>,
    Path((_resource, id)): Path<(String, i64)>,
    Extension(resource): Extension<Arc<Resource>>,
    Extension(alteration): Extension<Alteration>,
) -> ApiResult<impl IntoResponse> {
    let record = RecordStore::new(&state.db, &resource.collection)
        .get(&alteration, id)
        .await?
        .ok_or_else(|| not_found(&resource, id))?;
    Ok(Json(RecordResponse::new(&resource.name, record)))
}

/// Merge attributes into a record; `null` removes a key
///
/// PATCH /api/v1/records/{resource}/{id}
#[utoipa::path(
    patch,
    path = "/api/v1/records/{resource}/{id}",
    params(
        ("resource" = String, Path, description = "Resource path segment"),
        ("id" = i64, Path, description = "Record id")
    ),
    responses(
        (status = 200, description = "Updated record", body = RecordResponse),
        (status = 404, description = "Missing or not visible", body = ApiErrorResponse)
    ),
    tag = "records"
)]
pub async fn update_record(
    State(state): State<AppState>,
    Path((_resource, id)): Path<(String, i64)>,
    Extension(resource): Extension<Arc<Resource>>,
    Extension(alteration): Extension<Alteration>,
    Json(changes): Json<serde_json::Value>,
) -> ApiResult<impl IntoResponse> {
    let record = RecordStore::new(&state.db, &resource.collection)
        .update(&alteration, id, &changes)
        .await?
        .ok_or_else(|| not_found(&resource, id))?;
    Ok(Json(RecordResponse::new(&resource.name, record)))
}

/// Delete a record
///
/// DELETE /api/v1/records/{resource}/{id}
#[utoipa::path(
    delete,
    path = "/api/v1/records/{resource}/{id}",
    params(
        ("resource" = String, Path, description = "Resource path segment"),
        ("id" = i64, Path, description = "Record id")
    ),
    responses(
        (status = 200, description = "Record deleted", body = DeleteResponse),
        (status = 404, description = "Missing or not visible", body = ApiErrorResponse)
    ),
    tag = "records"
)]
pub async fn delete_record(
    State(state): State<AppState>,
    Path((_resource, id)): Path<(String, i64)>,
    Extension(resource): Extension<Arc<Resource>>,
    Extension(alteration): Extension<Alteration>,
) -> ApiResult<impl IntoResponse> {
    let deleted = RecordStore::new(&state.db, &resource.collection)
        .delete(&alteration, id)
        .await?;
    if !deleted {
        return Err(not_found(&resource, id));
    }
    Ok(Json(DeleteResponse { success: true, id }))
}
