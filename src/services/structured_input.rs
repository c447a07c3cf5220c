use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::rls;
use crate::error::ApiError;
use crate::models::patient::Patient;
use crate::models::records::{LabResult, VitalRecord, VitalType};
use crate::services::analytics;

/// Compact numeric projection of a patient's recent records, fed to the
/// analytics and anonymization stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredInput {
    pub age: Option<i64>,
    pub bp_trend: Vec<f64>,
    pub glucose_trend: Vec<f64>,
    pub heart_rate_trend: Vec<f64>,
    pub weight_trend: Vec<f64>,
    pub recent_symptoms: Vec<String>,
    pub recent_lab_values: Vec<LabValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabValue {
    pub test_name: String,
    pub value: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    pub status: analytics::LabStatus,
}

pub fn cache_key(patient_id: Uuid) -> String {
    format!("ai:structured-input:{patient_id}")
}

/// Most-recent-first numeric projection of one metric, capped at 10 points.
fn trend(vitals: &[VitalRecord], metric: VitalType) -> Vec<f64> {
    let mut records: Vec<&VitalRecord> = vitals
        .iter()
        .filter(|v| v.vital_type == metric.as_str())
        .collect();
    records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
    records
        .iter()
        .filter_map(|v| v.numeric_value)
        .filter(|n| n.is_finite())
        .take(10)
        .collect()
}

/// Assemble the structured input from already-loaded rows. Pure; tested
/// without a database.
pub fn assemble(
    age: Option<i64>,
    vitals: &[VitalRecord],
    labs: &[LabResult],
    symptoms: &[String],
) -> StructuredInput {
    StructuredInput {
        age,
        bp_trend: trend(vitals, VitalType::Bp),
        glucose_trend: trend(vitals, VitalType::Glucose),
        heart_rate_trend: trend(vitals, VitalType::HeartRate),
        weight_trend: trend(vitals, VitalType::Weight),
        recent_symptoms: symptoms.iter().take(5).cloned().collect(),
        recent_lab_values: labs
            .iter()
            .take(8)
            .map(|lab| LabValue {
                test_name: lab.test_name.clone(),
                value: lab.value.clone(),
                unit: lab.unit.clone(),
                reference_range: lab.reference_range.clone(),
                status: analytics::flag_lab(lab.numeric_value, lab.reference_range.as_deref()),
            })
            .collect(),
    }
}

/// Resolve the structured input for a patient: short-TTL cache first, fresh
/// build on miss. Cache failures are non-fatal.
pub async fn resolve(
    pool: &PgPool,
    redis: &mut redis::aio::MultiplexedConnection,
    clinic_id: Uuid,
    patient_id: Uuid,
    ttl_secs: u64,
) -> Result<StructuredInput, ApiError> {
    let key = cache_key(patient_id);

    match redis.get::<_, Option<String>>(&key).await {
        Ok(Some(cached)) => {
            if let Ok(input) = serde_json::from_str::<StructuredInput>(&cached) {
                return Ok(input);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("structured-input cache read failed: {e}"),
    }

    let input = build_fresh(pool, clinic_id, patient_id).await?;

    match serde_json::to_string(&input) {
        Ok(serialized) => {
            if let Err(e) = redis
                .set_ex::<_, _, ()>(&key, serialized, ttl_secs)
                .await
            {
                tracing::warn!("structured-input cache write failed: {e}");
            }
        }
        Err(e) => tracing::warn!("structured-input serialization failed: {e}"),
    }

    Ok(input)
}

/// Evict the cached input after any mutation touching the patient's records.
/// Failures are swallowed; the TTL bounds staleness.
pub async fn invalidate(redis: &mut redis::aio::MultiplexedConnection, patient_id: Uuid) {
    let key = cache_key(patient_id);
    if let Err(e) = redis.del::<_, ()>(&key).await {
        tracing::warn!("structured-input cache invalidation failed for {patient_id}: {e}");
    }
}

async fn build_fresh(
    pool: &PgPool,
    clinic_id: Uuid,
    patient_id: Uuid,
) -> Result<StructuredInput, ApiError> {
    let mut tx = rls::clinic_tx(pool, clinic_id).await?;

    let patient = sqlx::query_as::<_, Patient>(
        "SELECT * FROM patients
         WHERE id = $1 AND clinic_id = $2 AND is_archived = FALSE",
    )
    .bind(patient_id)
    .bind(clinic_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::NotFound("Patient"))?;

    let vitals = sqlx::query_as::<_, VitalRecord>(
        "SELECT id, patient_id, vital_type, value, numeric_value, unit, recorded_at
         FROM vital_records
         WHERE patient_id = $1 AND deleted_at IS NULL
         ORDER BY recorded_at DESC
         LIMIT 20",
    )
    .bind(patient_id)
    .fetch_all(&mut *tx)
    .await?;

    let labs = sqlx::query_as::<_, LabResult>(
        "SELECT id, patient_id, test_name, value, numeric_value, unit, reference_range, recorded_at
         FROM lab_results
         WHERE patient_id = $1 AND deleted_at IS NULL
         ORDER BY recorded_at DESC
         LIMIT 20",
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

    let age = patient
        .age(Utc::now().date_naive())
        .map(|years| years as i64);

    Ok(assemble(age, &vitals, &labs, &symptoms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn vital(metric: &str, value: f64, minutes: i64) -> VitalRecord {
        VitalRecord {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            vital_type: metric.to_string(),
            value: value.to_string(),
            numeric_value: Some(value),
            unit: None,
            recorded_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
                + Duration::minutes(minutes),
        }
    }

    #[test]
    fn trends_are_most_recent_first_capped_at_ten() {
        let vitals: Vec<VitalRecord> = (0..15).map(|i| vital("BP", 100.0 + i as f64, i)).collect();
        let input = assemble(Some(40), &vitals, &[], &[]);
        assert_eq!(input.bp_trend.len(), 10);
        assert_eq!(input.bp_trend[0], 114.0);
        assert_eq!(input.bp_trend[9], 105.0);
    }

    #[test]
    fn symptoms_and_labs_are_capped() {
        let symptoms: Vec<String> = (0..8).map(|i| format!("symptom {i}")).collect();
        let labs: Vec<LabResult> = (0..12)
            .map(|i| LabResult {
                id: Uuid::new_v4(),
                patient_id: Uuid::new_v4(),
                test_name: format!("test {i}"),
                value: "1".into(),
                numeric_value: Some(1.0),
                unit: None,
                reference_range: Some("0-2".into()),
                recorded_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
            })
            .collect();
        let input = assemble(None, &[], &labs, &symptoms);
        assert_eq!(input.recent_symptoms.len(), 5);
        assert_eq!(input.recent_lab_values.len(), 8);
        assert_eq!(input.recent_lab_values[0].status, analytics::LabStatus::Normal);
    }

    #[test]
    fn cache_round_trip_preserves_shape() {
        let input = assemble(Some(30), &[vital("WEIGHT", 81.5, 0)], &[], &["fatigue".into()]);
        let json = serde_json::to_string(&input).unwrap();
        let back: StructuredInput = serde_json::from_str(&json).unwrap();
        assert_eq!(back.weight_trend, vec![81.5]);
        assert_eq!(back.recent_symptoms, vec!["fatigue".to_string()]);
        assert_eq!(back.age, Some(30));
    }

    #[test]
    fn cache_key_is_patient_scoped() {
        let id = Uuid::nil();
        assert_eq!(
            cache_key(id),
            "ai:structured-input:00000000-0000-0000-0000-000000000000"
        );
    }
}
