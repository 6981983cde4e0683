use authz::RoleGate;
use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use user::auth::{HmacAuthenticator, SqliteCredentialStore};
use user::{database::UserDatabase, UserManager};
use utoipa::OpenApi;

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware_hooks;
pub mod models;
pub mod resources;
pub mod server;


pub use config::KeystoneConfig;
pub use error::{ApiError, ApiResult};
pub use server::{spawn_server, start_server, ApiConfig};

use resources::ResourceRegistry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<database::Database>,
    pub users: UserManager,
    pub authenticator: HmacAuthenticator<SqliteCredentialStore>,
    pub gate: Arc<RoleGate>,
    pub resources: Arc<ResourceRegistry>,
}

impl AppState {
    /// Opens the database, bootstraps the identity tables and every
    /// configured resource table.
    pub async fn initialize(config: &KeystoneConfig) -> ApiResult<Self> {
        let db = database::initialize_database(database::DatabaseConfig::new_with_path(
            config.database.path.clone(),
        ))
        .await?;
        // Records and identities share one SQLite file.
        let user_db = UserDatabase::from_pool(db.get_pool()).await?;
        let users = UserManager::from_database(user_db, config.credential_config());

        let resources = ResourceRegistry::from_config(&config.resources)?;
        resources.ensure_tables(&db).await?;

        for name in config.grants.resources() {
            if !resources.iter().any(|(_, resource)| resource.name == name) {
                warn!("Grant table names resource '{}' which is not configured", name);
            }
        }
        for role in config.grants.roles() {
            if users.database().find_role(role).await?.is_none() {
                warn!("Grant table names role '{}' which does not exist yet", role);
            }
        }

        let authenticator = HmacAuthenticator::new(users.credentials(), config.authenticator_config());
        info!("Application state initialized");

        Ok(Self {
            db: Arc::new(db),
            users,
            authenticator,
            gate: Arc::new(RoleGate::new(config.grants.clone())),
            resources: Arc::new(resources),
        })
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::session::authenticate,
        handlers::session::validate_session,
        handlers::session::invalidate_session,
        handlers::session::whoami,
        handlers::records::list_records,
        handlers::records::create_record,
        handlers::records::read_record,
        handlers::records::update_record,
        handlers::records::delete_record,
        handlers::health::health_check,
    ),
    components(
        schemas(
            models::AuthenticateForm,
            models::SessionForm,
            models::SessionResponse,
            models::WhoAmIResponse,
            models::RecordResponse,
            models::RecordListResponse,
            models::DeleteResponse,
            models::HealthResponse,
            models::DatabaseHealth,
            error::ApiErrorResponse,
            error::ErrorDetail,
        )
    ),
    tags(
        (name = "session", description = "Password login and signing credentials"),
        (name = "records", description = "Record CRUD under access control"),
        (name = "health", description = "Health check endpoints"),
    ),
    info(
        title = "Keystone API",
        version = "1.0.0",
        description = "Signed-request JSON record API with record-level access control",
    ),
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Create the main API router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    // Route layers run innermost-last: the role gate runs before the filter.
    let records = Router::new()
        .route(
            "/records/:resource",
            get(handlers::records::list_records).post(handlers::records::create_record),
        )
        .route(
            "/records/:resource/:id",
            get(handlers::records::read_record)
                .patch(handlers::records::update_record)
                .delete(handlers::records::delete_record),
        )
        .route_layer(middleware::from_fn(
            middleware_hooks::record_filter_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_hooks::role_gate_middleware,
        ));

    let api_v1 = Router::new()
        .route("/authenticate", post(handlers::session::authenticate))
        .route("/validate-session", post(handlers::session::validate_session))
        .route(
            "/invalidate-session",
            post(handlers::session::invalidate_session),
        )
        .route("/whoami", get(handlers::session::whoami))
        .route("/health", get(handlers::health::health_check))
        .route("/openapi.json", get(openapi_json))
        .merge(records)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            middleware_hooks::authentication_middleware,
        ));

    Router::new()
        .nest("/api/v1", api_v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
