use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::Row;

use crate::db::rls;
use crate::error::ApiError;
use crate::models::auth::{AuthPatient, ChangePasswordRequest};
use crate::models::patient::{Patient, PatientProfile};
use crate::models::records::{LabResult, VitalRecord};
use crate::models::summary::AiSummary;
use crate::services::analytics;
use crate::services::audit::{self, AuditEntry};
use crate::services::auth::AuthService;
use crate::AppState;

/// All portal reads are implicitly scoped to the authenticated patient; no
/// cross-patient visibility exists, even inside one clinic.

pub async fn my_vitals(
    State(state): State<AppState>,
    auth: AuthPatient,
) -> Result<Json<Vec<VitalRecord>>, ApiError> {
    let mut tx = rls::clinic_tx(&state.db, auth.clinic_id).await?;
    let records = sqlx::query_as::<_, VitalRecord>(
        "SELECT id, patient_id, vital_type, value, numeric_value, unit, recorded_at
         FROM vital_records
         WHERE patient_id = $1 AND deleted_at IS NULL
         ORDER BY recorded_at DESC",
    )
    .bind(auth.patient_id)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(Json(records))
}

pub async fn my_labs(
    State(state): State<AppState>,
    auth: AuthPatient,
) -> Result<Json<Value>, ApiError> {
    let mut tx = rls::clinic_tx(&state.db, auth.clinic_id).await?;
    let labs = sqlx::query_as::<_, LabResult>(
        "SELECT id, patient_id, test_name, value, numeric_value, unit, reference_range, recorded_at
         FROM lab_results
         WHERE patient_id = $1 AND deleted_at IS NULL
         ORDER BY recorded_at DESC",
    )
    .bind(auth.patient_id)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Json(json!({ "labs": analytics::flag_labs(&labs) })))
}

pub async fn my_analytics(
    State(state): State<AppState>,
    auth: AuthPatient,
) -> Result<Json<Value>, ApiError> {
    let mut tx = rls::clinic_tx(&state.db, auth.clinic_id).await?;
    let vitals = sqlx::query_as::<_, VitalRecord>(
        "SELECT id, patient_id, vital_type, value, numeric_value, unit, recorded_at
         FROM vital_records
         WHERE patient_id = $1 AND deleted_at IS NULL
         ORDER BY recorded_at DESC",
    )
    .bind(auth.patient_id)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Json(json!({ "trends": analytics::metric_trends(&vitals) })))
}

/// Consultations presented as appointments, with the doctor's name only.
pub async fn my_appointments(
    State(state): State<AppState>,
    auth: AuthPatient,
) -> Result<Json<Value>, ApiError> {
    let mut tx = rls::clinic_tx(&state.db, auth.clinic_id).await?;
    let rows = sqlx::query(
        "SELECT c.id, c.date, c.symptoms, c.notes, u.name AS doctor_name
         FROM consultations c
         JOIN users u ON u.id = c.doctor_id
         WHERE c.patient_id = $1 AND c.deleted_at IS NULL
         ORDER BY c.date DESC",
    )
    .bind(auth.patient_id)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    let appointments: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "id": row.get::<uuid::Uuid, _>("id"),
                "date": row.get::<chrono::DateTime<chrono::Utc>, _>("date"),
                "symptoms": row.get::<String, _>("symptoms"),
                "notes": row.get::<String, _>("notes"),
                "doctorName": row.get::<String, _>("doctor_name"),
            })
        })
        .collect();

    Ok(Json(json!({ "appointments": appointments })))
}

pub async fn my_summaries(
    State(state): State<AppState>,
    auth: AuthPatient,
) -> Result<Json<Vec<AiSummary>>, ApiError> {
    let mut tx = rls::clinic_tx(&state.db, auth.clinic_id).await?;
    let summaries = sqlx::query_as::<_, AiSummary>(
        "SELECT id, patient_id, summary_text, risk_flags, created_at
         FROM ai_summaries
         WHERE patient_id = $1 AND deleted_at IS NULL
         ORDER BY created_at DESC",
    )
    .bind(auth.patient_id)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(Json(summaries))
}

pub async fn my_profile(
    State(state): State<AppState>,
    auth: AuthPatient,
) -> Result<Json<PatientProfile>, ApiError> {
    let mut tx = rls::clinic_tx(&state.db, auth.clinic_id).await?;
    let patient = sqlx::query_as::<_, Patient>(
        "SELECT * FROM patients
         WHERE id = $1 AND clinic_id = $2 AND is_archived = FALSE",
    )
    .bind(auth.patient_id)
    .bind(auth.clinic_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::Unauthenticated)?;
    tx.commit().await?;
    Ok(Json(patient.into()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub phone: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthPatient,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<PatientProfile>, ApiError> {
    if let Some(phone) = &body.phone {
        if phone.len() < 6 || phone.len() > 30 {
            return Err(ApiError::validation("phone", "must be 6-30 characters"));
        }
    }

    let mut tx = rls::clinic_tx(&state.db, auth.clinic_id).await?;
    let patient = sqlx::query_as::<_, Patient>(
        "UPDATE patients SET phone = COALESCE($1, phone)
         WHERE id = $2 AND clinic_id = $3 AND is_archived = FALSE
         RETURNING *",
    )
    .bind(&body.phone)
    .bind(auth.patient_id)
    .bind(auth.clinic_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::Unauthenticated)?;

    audit::record(
        &mut tx,
        auth.clinic_id,
        AuditEntry {
            user_id: auth.patient_id,
            action: "PATIENT_PROFILE_UPDATE".into(),
            entity_type: "patient".into(),
            entity_id: Some(auth.patient_id),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(Json(patient.into()))
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthPatient,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    AuthService::patient_change_password(
        &state.db,
        &auth,
        &body.current_password,
        &body.new_password,
    )
    .await?;
    Ok(Json(json!({ "message": "Password updated" })))
}
