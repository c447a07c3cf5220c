use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::patient::{
    CreatePatientRequest, CursorQuery, InviteResponse, Page, PatientProfile, UpdatePatientRequest,
};
use crate::services::auth::AuthService;
use crate::services::patients::PatientService;
use crate::services::structured_input;
use crate::AppState;

pub async fn list_patients(
    State(state): State<AppState>,
    staff: AuthStaff,
    Query(query): Query<CursorQuery>,
) -> Result<Json<Page<PatientProfile>>, ApiError> {
    let limit = query.limit()?;
    let page = PatientService::list(&state.db, &staff, query.cursor, limit).await?;
    Ok(Json(page))
}

pub async fn get_patient(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(id): Path<Uuid>,
) -> Result<Json<PatientProfile>, ApiError> {
    let patient = PatientService::get(&state.db, &staff, id).await?;
    Ok(Json(patient))
}

pub async fn create_patient(
    State(state): State<AppState>,
    staff: AuthStaff,
    Json(body): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<PatientProfile>), ApiError> {
    let patient = PatientService::create(&state.db, &staff, &body).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn update_patient(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePatientRequest>,
) -> Result<Json<PatientProfile>, ApiError> {
    let patient = PatientService::update(&state.db, &staff, id, &body).await?;
    let mut redis = state.redis.clone();
    structured_input::invalidate(&mut redis, id).await;
    Ok(Json(patient))
}

/// Soft archive; ADMIN only.
pub async fn delete_patient(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !staff.is_admin() {
        return Err(ApiError::Forbidden);
    }
    PatientService::archive(&state.db, &staff, id).await?;
    let mut redis = state.redis.clone();
    structured_input::invalidate(&mut redis, id).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_invite(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(id): Path<Uuid>,
) -> Result<Json<InviteResponse>, ApiError> {
    let invite = AuthService::create_invite(&state.db, &staff, id).await?;
    Ok(Json(invite))
}
