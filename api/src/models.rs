use chrono::{DateTime, Utc};
use database::Record;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Session endpoint status codes.
pub mod err {
    pub const OK: u8 = 0;
    pub const INVALID_CREDENTIALS: u8 = 1;
    pub const MISSING_PARAMETER: u8 = 2;
    pub const INVALID_SESSION: u8 = 3;
}

/// Form body of `POST /authenticate`
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AuthenticateForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Form body of the validate and invalidate endpoints
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SessionForm {
    pub session_id: Option<String>,
}

/// Response of the session endpoints. Only `err` is always present.
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub err: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_secret: Option<String>,
}

impl SessionResponse {
    pub fn status(err: u8) -> Self {
        Self {
            err,
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WhoAmIResponse {
    pub authenticated: bool,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub roles: Vec<String>,
}

/// A single record
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecordResponse {
    pub id: i64,
    pub resource: String,
    pub owner_id: Option<i64>,
    #[schema(value_type = Object)]
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordResponse {
    pub fn new(resource: &str, record: Record) -> Self {
        Self {
            id: record.id,
            resource: resource.to_string(),
            owner_id: record.owner_id,
            attributes: record.attributes,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecordListResponse {
    pub records: Vec<RecordResponse>,
    pub total: usize,
}

/// Delete response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
    pub id: i64,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub database: DatabaseHealth,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatabaseHealth {
    pub connected: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_response_omits_empty_fields() {
        let json = serde_json::to_value(SessionResponse::status(err::INVALID_SESSION)).unwrap();
        assert_eq!(json, serde_json::json!({ "err": 3 }));
    }
}
