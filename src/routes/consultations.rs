use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::patient::{CursorQuery, Page};
use crate::models::records::{Consultation, ConsultationWithDoctor, CreateConsultationRequest};
use crate::services::consultations::ConsultationService;
use crate::AppState;

pub async fn create_consultation(
    State(state): State<AppState>,
    staff: AuthStaff,
    Json(body): Json<CreateConsultationRequest>,
) -> Result<(StatusCode, Json<Consultation>), ApiError> {
    let mut redis = state.redis.clone();
    let consultation =
        ConsultationService::create(&state.db, &mut redis, &staff, &body).await?;
    Ok((StatusCode::CREATED, Json(consultation)))
}

pub async fn delete_consultation(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut redis = state.redis.clone();
    ConsultationService::delete(&state.db, &mut redis, &staff, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_consultations(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<CursorQuery>,
) -> Result<Json<Page<ConsultationWithDoctor>>, ApiError> {
    let limit = query.limit()?;
    let page =
        ConsultationService::list(&state.db, &staff, patient_id, query.cursor, limit).await?;
    Ok(Json(page))
}
