use sqlx::PgPool;
use uuid::Uuid;

use crate::db::rls;
use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::patient::{
    CreatePatientRequest, Page, Patient, PatientProfile, UpdatePatientRequest,
};
use crate::services::audit::{self, AuditEntry};

pub struct PatientService;

impl PatientService {
    /// Cursor-paginated listing ordered `created_at DESC, id DESC`. The
    /// cursor is the last row id of the previous page; one extra row is
    /// fetched to decide whether a next page exists.
    pub async fn list(
        pool: &PgPool,
        staff: &AuthStaff,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Page<PatientProfile>, ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;

        let mut rows: Vec<Patient> = match cursor {
            Some(cursor) => {
                sqlx::query_as(
                    "SELECT p.* FROM patients p, patients c
                     WHERE c.id = $1 AND c.clinic_id = $2
                       AND p.clinic_id = $2 AND p.is_archived = FALSE
                       AND (p.created_at, p.id) < (c.created_at, c.id)
                     ORDER BY p.created_at DESC, p.id DESC
                     LIMIT $3",
                )
                .bind(cursor)
                .bind(staff.clinic_id)
                .bind(limit + 1)
                .fetch_all(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM patients
                     WHERE clinic_id = $1 AND is_archived = FALSE
                     ORDER BY created_at DESC, id DESC
                     LIMIT $2",
                )
                .bind(staff.clinic_id)
                .bind(limit + 1)
                .fetch_all(&mut *tx)
                .await?
            }
        };
        tx.commit().await?;

        let has_more = rows.len() as i64 > limit;
        rows.truncate(limit as usize);
        let next_cursor = if has_more {
            rows.last().map(|p| p.id)
        } else {
            None
        };

        Ok(Page {
            data: rows.into_iter().map(PatientProfile::from).collect(),
            next_cursor,
        })
    }

    pub async fn get(
        pool: &PgPool,
        staff: &AuthStaff,
        patient_id: Uuid,
    ) -> Result<PatientProfile, ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        let patient = sqlx::query_as::<_, Patient>(
            "SELECT * FROM patients
             WHERE id = $1 AND clinic_id = $2 AND is_archived = FALSE",
        )
        .bind(patient_id)
        .bind(staff.clinic_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::NotFound("Patient"))?;
        tx.commit().await?;
        Ok(patient.into())
    }

    pub async fn create(
        pool: &PgPool,
        staff: &AuthStaff,
        req: &CreatePatientRequest,
    ) -> Result<PatientProfile, ApiError> {
        let dob = req.validate()?;

        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        let patient = sqlx::query_as::<_, Patient>(
            "INSERT INTO patients (clinic_id, first_name, last_name, date_of_birth, gender, phone, email)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(staff.clinic_id)
        .bind(req.first_name.trim())
        .bind(req.last_name.trim())
        .bind(dob)
        .bind(&req.gender)
        .bind(&req.phone)
        .bind(req.email.as_ref().map(|e| e.trim().to_lowercase()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                ApiError::Conflict("A patient with this email already exists".into())
            }
            _ => e.into(),
        })?;

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "PATIENT_CREATE".into(),
                entity_type: "patient".into(),
                entity_id: Some(patient.id),
            },
        )
        .await?;
        tx.commit().await?;

        Ok(patient.into())
    }

    pub async fn update(
        pool: &PgPool,
        staff: &AuthStaff,
        patient_id: Uuid,
        req: &UpdatePatientRequest,
    ) -> Result<PatientProfile, ApiError> {
        let dob = req.validate()?;

        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        let patient = sqlx::query_as::<_, Patient>(
            "UPDATE patients
             SET first_name    = COALESCE($1, first_name),
                 last_name     = COALESCE($2, last_name),
                 date_of_birth = COALESCE($3, date_of_birth),
                 gender        = COALESCE($4, gender),
                 phone         = COALESCE($5, phone),
                 email         = COALESCE($6, email)
             WHERE id = $7 AND clinic_id = $8 AND is_archived = FALSE
             RETURNING *",
        )
        .bind(req.first_name.as_deref().map(str::trim))
        .bind(req.last_name.as_deref().map(str::trim))
        .bind(dob)
        .bind(&req.gender)
        .bind(&req.phone)
        .bind(req.email.as_ref().map(|e| e.trim().to_lowercase()))
        .bind(patient_id)
        .bind(staff.clinic_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::NotFound("Patient"))?;

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "PATIENT_UPDATE".into(),
                entity_type: "patient".into(),
                entity_id: Some(patient.id),
            },
        )
        .await?;
        tx.commit().await?;

        Ok(patient.into())
    }

    /// Soft archive. Absent and cross-tenant rows are indistinguishable:
    /// both return `not-found`.
    pub async fn archive(
        pool: &PgPool,
        staff: &AuthStaff,
        patient_id: Uuid,
    ) -> Result<(), ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        let result = sqlx::query(
            "UPDATE patients SET is_archived = TRUE
             WHERE id = $1 AND clinic_id = $2 AND is_archived = FALSE",
        )
        .bind(patient_id)
        .bind(staff.clinic_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Patient"));
        }

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "PATIENT_ARCHIVE".into(),
                entity_type: "patient".into(),
                entity_id: Some(patient_id),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Tenant-scoped existence check shared by the record stores.
    pub async fn assert_in_clinic(
        tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<(), ApiError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM patients
                 WHERE id = $1 AND clinic_id = $2 AND is_archived = FALSE)",
        )
        .bind(patient_id)
        .bind(clinic_id)
        .fetch_one(&mut **tx)
        .await?;

        if !exists {
            return Err(ApiError::NotFound("Patient"));
        }
        Ok(())
    }
}
