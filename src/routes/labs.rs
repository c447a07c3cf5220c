use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::records::{CreateLabRequest, LabResult};
use crate::services::records::RecordService;
use crate::AppState;

pub async fn create_lab(
    State(state): State<AppState>,
    staff: AuthStaff,
    Json(body): Json<CreateLabRequest>,
) -> Result<(StatusCode, Json<LabResult>), ApiError> {
    let mut redis = state.redis.clone();
    let result = RecordService::create_lab(&state.db, &mut redis, &staff, &body).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn list_labs(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<LabResult>>, ApiError> {
    let results = RecordService::list_labs(&state.db, &staff, patient_id).await?;
    Ok(Json(results))
}

pub async fn delete_lab(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut redis = state.redis.clone();
    RecordService::delete_lab(&state.db, &mut redis, &staff, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
