use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::rls;
use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::summary::{AiSummary, RiskFlags};
use crate::services::patients::PatientService;

pub struct SummaryService;

/// Roll-up row for the clinic-wide risk view: each patient's latest summary
/// with its active flag count.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicRiskEntry {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub summary_id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub risk_flags: serde_json::Value,
    pub active_flag_count: u32,
}

impl SummaryService {
    pub async fn insert(
        tx: &mut Transaction<'static, Postgres>,
        patient_id: Uuid,
        summary_text: &str,
        flags: &RiskFlags,
    ) -> Result<AiSummary, ApiError> {
        let risk_flags =
            serde_json::to_value(flags).map_err(|e| ApiError::Internal(e.into()))?;
        let summary = sqlx::query_as::<_, AiSummary>(
            "INSERT INTO ai_summaries (patient_id, summary_text, risk_flags)
             VALUES ($1, $2, $3)
             RETURNING id, patient_id, summary_text, risk_flags, created_at",
        )
        .bind(patient_id)
        .bind(summary_text)
        .bind(risk_flags)
        .fetch_one(&mut **tx)
        .await?;
        Ok(summary)
    }

    pub async fn get(
        pool: &PgPool,
        staff: &AuthStaff,
        summary_id: Uuid,
    ) -> Result<AiSummary, ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        let summary = sqlx::query_as::<_, AiSummary>(
            "SELECT s.id, s.patient_id, s.summary_text, s.risk_flags, s.created_at
             FROM ai_summaries s
             JOIN patients p ON p.id = s.patient_id
             WHERE s.id = $1 AND p.clinic_id = $2
               AND s.deleted_at IS NULL AND p.is_archived = FALSE",
        )
        .bind(summary_id)
        .bind(staff.clinic_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::NotFound("Summary"))?;
        tx.commit().await?;
        Ok(summary)
    }

    pub async fn list_for_patient(
        pool: &PgPool,
        staff: &AuthStaff,
        patient_id: Uuid,
    ) -> Result<Vec<AiSummary>, ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        PatientService::assert_in_clinic(&mut tx, staff.clinic_id, patient_id).await?;

        let summaries = sqlx::query_as::<_, AiSummary>(
            "SELECT id, patient_id, summary_text, risk_flags, created_at
             FROM ai_summaries
             WHERE patient_id = $1 AND deleted_at IS NULL
             ORDER BY created_at DESC",
        )
        .bind(patient_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(summaries)
    }

    /// Latest summary per patient across the clinic, sorted by how many
    /// deterministic flags are raised.
    pub async fn clinic_risk_rollup(
        pool: &PgPool,
        staff: &AuthStaff,
    ) -> Result<Vec<ClinicRiskEntry>, ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;

        let rows: Vec<(Uuid, String, String, Uuid, chrono::DateTime<chrono::Utc>, serde_json::Value)> =
            sqlx::query_as(
                "SELECT DISTINCT ON (p.id)
                        p.id, p.first_name, p.last_name, s.id, s.created_at, s.risk_flags
                 FROM patients p
                 JOIN ai_summaries s ON s.patient_id = p.id
                 WHERE p.clinic_id = $1 AND p.is_archived = FALSE AND s.deleted_at IS NULL
                 ORDER BY p.id, s.created_at DESC",
            )
            .bind(staff.clinic_id)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut entries: Vec<ClinicRiskEntry> = rows
            .into_iter()
            .map(|(patient_id, first, last, summary_id, created_at, risk_flags)| {
                let active_flag_count = serde_json::from_value::<RiskFlags>(risk_flags.clone())
                    .map(|f| f.active_trend_flags())
                    .unwrap_or(0);
                ClinicRiskEntry {
                    patient_id,
                    patient_name: format!("{first} {last}"),
                    summary_id,
                    created_at,
                    risk_flags,
                    active_flag_count,
                }
            })
            .collect();

        entries.sort_by(|a, b| b.active_flag_count.cmp(&a.active_flag_count));
        Ok(entries)
    }
}
