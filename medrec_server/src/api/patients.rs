//! Patient routes; every handler requires an [`AuthSession`].

use super::{extract, ApiResult, AuthSession, SharedState};
use axum::{
    extract::{Path, State},
    Json,
};
use medrec_core::{ListQuery, Patient, PatientInput, PatientPage};
use serde_json::json;

pub(super) async fn create_patient(
    AuthSession(session): AuthSession,
    State(state): State<SharedState>,
    extract::Json(input): extract::Json<PatientInput>,
) -> ApiResult<Json<Patient>> {
    tracing::info!("{} creating patient", session.username);
    let patient = state.patients.create(input).await?;
    Ok(Json(patient))
}

pub(super) async fn list_patients(
    AuthSession(_): AuthSession,
    State(state): State<SharedState>,
    extract::Query(query): extract::Query<ListQuery>,
) -> ApiResult<Json<PatientPage>> {
    let page = state.patients.list(&query).await?;
    Ok(Json(page))
}

pub(super) async fn get_patient(
    AuthSession(_): AuthSession,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Patient>> {
    let patient = state.patients.get(&id).await?;
    Ok(Json(patient))
}

pub(super) async fn update_patient(
    AuthSession(session): AuthSession,
    State(state): State<SharedState>,
    Path(id): Path<String>,
    extract::Json(input): extract::Json<PatientInput>,
) -> ApiResult<Json<Patient>> {
    tracing::info!("{} updating patient {}", session.username, id);
    let patient = state.patients.update(&id, input).await?;
    Ok(Json(patient))
}

pub(super) async fn delete_patient(
    AuthSession(session): AuthSession,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::info!("{} deleting patient {}", session.username, id);
    state.patients.delete(&id).await?;
    Ok(Json(json!({ "message": "Patient deleted successfully" })))
}
