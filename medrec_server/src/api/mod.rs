//! HTTP surface of the records backend.
//!
//! Routes:
//! - `POST /api/auth/register`, `POST /api/auth/token`
//! - `/api/patients` (list, create) and `/api/patients/{id}` (get, update, delete)
//! - `GET /` and `GET /health`

mod auth;
mod error;
mod extract;
mod patients;

pub use auth::AuthSession;
pub use error::{ApiError, ApiResult};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use medrec_core::config::RecordsConfig;
use medrec_core::{Database, PasswordHasher, PatientStore, SessionGateway, TokenSigner, UserStore};
use serde_json::json;
use std::sync::Arc;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a handler can reach
pub struct AppState {
    pub db: Database,
    pub users: UserStore,
    pub patients: PatientStore,
    pub sessions: SessionGateway,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        db: Database,
        signer: TokenSigner,
        hasher: PasswordHasher,
        records: &RecordsConfig,
    ) -> Self {
        let users = UserStore::new(&db, hasher);
        let patients = PatientStore::new(&db, records.max_page_limit);
        let sessions = SessionGateway::new(signer, users.clone());
        Self {
            db,
            users,
            patients,
            sessions,
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/token", post(auth::token))
        .route(
            "/api/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/api/patients/",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/api/patients/{id}",
            get(patients::get_patient)
                .put(patients::update_patient)
                .delete(patients::delete_patient),
        )
        .route("/api/patients/{id}/", put(patients::update_patient))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Healthcare API is running",
        "version": VERSION,
    }))
}

async fn health(State(state): State<SharedState>) -> Response {
    match state.db.ping().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "version": VERSION,
            "database": "connected",
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "version": VERSION,
                    "database": "unreachable",
                })),
            )
                .into_response()
        }
    }
}
