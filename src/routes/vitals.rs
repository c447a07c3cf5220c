use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::records::{CreateVitalRequest, VitalRecord};
use crate::services::records::RecordService;
use crate::AppState;

pub async fn create_vital(
    State(state): State<AppState>,
    staff: AuthStaff,
    Json(body): Json<CreateVitalRequest>,
) -> Result<(StatusCode, Json<VitalRecord>), ApiError> {
    let mut redis = state.redis.clone();
    let record = RecordService::create_vital(&state.db, &mut redis, &staff, &body).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_vitals(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<VitalRecord>>, ApiError> {
    let records = RecordService::list_vitals(&state.db, &staff, patient_id).await?;
    Ok(Json(records))
}

pub async fn delete_vital(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut redis = state.redis.clone();
    RecordService::delete_vital(&state.db, &mut redis, &staff, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
