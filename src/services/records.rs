use sqlx::PgPool;
use uuid::Uuid;

use crate::db::rls;
use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::records::{
    parse_numeric, CreateLabRequest, CreateVitalRequest, LabResult, VitalRecord,
};
use crate::services::audit::{self, AuditEntry};
use crate::services::patients::PatientService;
use crate::services::structured_input;

pub struct RecordService;

impl RecordService {
    /// Store a vital reading. The display string is preserved verbatim; the
    /// numeric projection is best-effort. Invalidates the patient's
    /// structured-input cache after commit.
    pub async fn create_vital(
        pool: &PgPool,
        redis: &mut redis::aio::MultiplexedConnection,
        staff: &AuthStaff,
        req: &CreateVitalRequest,
    ) -> Result<VitalRecord, ApiError> {
        let vital_type = req.validate()?;

        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        PatientService::assert_in_clinic(&mut tx, staff.clinic_id, req.patient_id).await?;

        let record = sqlx::query_as::<_, VitalRecord>(
            "INSERT INTO vital_records (patient_id, vital_type, value, numeric_value, unit, recorded_at)
             VALUES ($1, $2, $3, $4, $5, COALESCE($6, NOW()))
             RETURNING id, patient_id, vital_type, value, numeric_value, unit, recorded_at",
        )
        .bind(req.patient_id)
        .bind(vital_type.as_str())
        .bind(&req.value)
        .bind(parse_numeric(&req.value))
        .bind(&req.unit)
        .bind(req.recorded_at)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "VITAL_CREATE".into(),
                entity_type: "vital_record".into(),
                entity_id: Some(record.id),
            },
        )
        .await?;
        tx.commit().await?;

        structured_input::invalidate(redis, req.patient_id).await;
        Ok(record)
    }

    pub async fn list_vitals(
        pool: &PgPool,
        staff: &AuthStaff,
        patient_id: Uuid,
    ) -> Result<Vec<VitalRecord>, ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        PatientService::assert_in_clinic(&mut tx, staff.clinic_id, patient_id).await?;

        let records = sqlx::query_as::<_, VitalRecord>(
            "SELECT id, patient_id, vital_type, value, numeric_value, unit, recorded_at
             FROM vital_records
             WHERE patient_id = $1 AND deleted_at IS NULL
             ORDER BY recorded_at DESC",
        )
        .bind(patient_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(records)
    }

    pub async fn create_lab(
        pool: &PgPool,
        redis: &mut redis::aio::MultiplexedConnection,
        staff: &AuthStaff,
        req: &CreateLabRequest,
    ) -> Result<LabResult, ApiError> {
        req.validate()?;

        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        PatientService::assert_in_clinic(&mut tx, staff.clinic_id, req.patient_id).await?;

        let result = sqlx::query_as::<_, LabResult>(
            "INSERT INTO lab_results
                 (patient_id, test_name, value, numeric_value, unit, reference_range, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, NOW()))
             RETURNING id, patient_id, test_name, value, numeric_value, unit, reference_range, recorded_at",
        )
        .bind(req.patient_id)
        .bind(req.test_name.trim())
        .bind(&req.value)
        .bind(parse_numeric(&req.value))
        .bind(&req.unit)
        .bind(&req.reference_range)
        .bind(req.recorded_at)
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "LAB_CREATE".into(),
                entity_type: "lab_result".into(),
                entity_id: Some(result.id),
            },
        )
        .await?;
        tx.commit().await?;

        structured_input::invalidate(redis, req.patient_id).await;
        Ok(result)
    }

    /// Soft delete one vital reading. Absent and cross-tenant rows both
    /// return `not-found`.
    pub async fn delete_vital(
        pool: &PgPool,
        redis: &mut redis::aio::MultiplexedConnection,
        staff: &AuthStaff,
        vital_id: Uuid,
    ) -> Result<(), ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        let patient_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE vital_records v SET deleted_at = NOW()
             FROM patients p
             WHERE v.id = $1 AND v.deleted_at IS NULL
               AND p.id = v.patient_id AND p.clinic_id = $2
             RETURNING v.patient_id",
        )
        .bind(vital_id)
        .bind(staff.clinic_id)
        .fetch_optional(&mut *tx)
        .await?;

        let patient_id = patient_id.ok_or(ApiError::NotFound("Vital record"))?;

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "VITAL_DELETE".into(),
                entity_type: "vital_record".into(),
                entity_id: Some(vital_id),
            },
        )
        .await?;
        tx.commit().await?;

        structured_input::invalidate(redis, patient_id).await;
        Ok(())
    }

    pub async fn delete_lab(
        pool: &PgPool,
        redis: &mut redis::aio::MultiplexedConnection,
        staff: &AuthStaff,
        lab_id: Uuid,
    ) -> Result<(), ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        let patient_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE lab_results l SET deleted_at = NOW()
             FROM patients p
             WHERE l.id = $1 AND l.deleted_at IS NULL
               AND p.id = l.patient_id AND p.clinic_id = $2
             RETURNING l.patient_id",
        )
        .bind(lab_id)
        .bind(staff.clinic_id)
        .fetch_optional(&mut *tx)
        .await?;

        let patient_id = patient_id.ok_or(ApiError::NotFound("Lab result"))?;

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "LAB_DELETE".into(),
                entity_type: "lab_result".into(),
                entity_id: Some(lab_id),
            },
        )
        .await?;
        tx.commit().await?;

        structured_input::invalidate(redis, patient_id).await;
        Ok(())
    }

    pub async fn list_labs(
        pool: &PgPool,
        staff: &AuthStaff,
        patient_id: Uuid,
    ) -> Result<Vec<LabResult>, ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        PatientService::assert_in_clinic(&mut tx, staff.clinic_id, patient_id).await?;

        let results = sqlx::query_as::<_, LabResult>(
            "SELECT id, patient_id, test_name, value, numeric_value, unit, reference_range, recorded_at
             FROM lab_results
             WHERE patient_id = $1 AND deleted_at IS NULL
             ORDER BY recorded_at DESC",
        )
        .bind(patient_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(results)
    }
}
