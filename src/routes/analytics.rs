use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::rls;
use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::patient::Patient;
use crate::models::records::{LabResult, VitalRecord};
use crate::services::analytics::{self, LabStatus};
use crate::services::structured_input;
use crate::services::summaries::SummaryService;
use crate::services::worker;
use crate::AppState;

/// GET /analytics/patient/:id — trends, anomalies, lab flags and the
/// composite risk score, computed fresh from the stored records.
pub async fn patient_analytics(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let mut tx = rls::clinic_tx(&state.db, staff.clinic_id).await?;

    let patient = sqlx::query_as::<_, Patient>(
        "SELECT * FROM patients
         WHERE id = $1 AND clinic_id = $2 AND is_archived = FALSE",
    )
    .bind(patient_id)
    .bind(staff.clinic_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::NotFound("Patient"))?;

    let vitals = sqlx::query_as::<_, VitalRecord>(
        "SELECT id, patient_id, vital_type, value, numeric_value, unit, recorded_at
         FROM vital_records
         WHERE patient_id = $1 AND deleted_at IS NULL
         ORDER BY recorded_at DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *tx)
    .await?;

    let labs = sqlx::query_as::<_, LabResult>(
        "SELECT id, patient_id, test_name, value, numeric_value, unit, reference_range, recorded_at
         FROM lab_results
         WHERE patient_id = $1 AND deleted_at IS NULL
         ORDER BY recorded_at DESC",
    )
    .bind(patient_id)
    .fetch_all(&mut *tx)
    .await?;

    let symptoms: Vec<String> = sqlx::query_scalar(
        "SELECT symptoms FROM consultations
         WHERE patient_id = $1 AND deleted_at IS NULL
         ORDER BY date DESC
         LIMIT 10",
    )
    .bind(patient_id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    let trends = analytics::metric_trends(&vitals);
    let lab_flags = analytics::flag_labs(&labs);

    let age = patient.age(Utc::now().date_naive()).map(|y| y as i64);
    let input = structured_input::assemble(age, &vitals, &labs, &symptoms);
    let risk_flags = worker::compute_risk_flags(&input);

    let anomaly_count: u32 = trends.iter().map(|t| t.anomalies.len() as u32).sum();
    let evaluated = lab_flags
        .iter()
        .filter(|f| f.status != LabStatus::Unknown)
        .count() as u32;
    let out_of_range = lab_flags
        .iter()
        .filter(|f| matches!(f.status, LabStatus::High | LabStatus::Low))
        .count() as u32;

    let risk = analytics::composite_risk(
        anomaly_count,
        risk_flags.active_trend_flags(),
        evaluated,
        out_of_range,
        &symptoms,
    );

    Ok(Json(json!({
        "patientId": patient_id,
        "trends": trends,
        "labFlags": lab_flags,
        "riskFlags": risk_flags,
        "risk": risk,
    })))
}

/// GET /analytics/clinic-risk — roll-up across each patient's latest summary.
pub async fn clinic_risk(
    State(state): State<AppState>,
    staff: AuthStaff,
) -> Result<Json<Value>, ApiError> {
    let entries = SummaryService::clinic_risk_rollup(&state.db, &staff).await?;
    let high_risk = entries.iter().filter(|e| e.active_flag_count >= 2).count();

    Ok(Json(json!({
        "patients": entries,
        "highRiskCount": high_risk,
    })))
}
