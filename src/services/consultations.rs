use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::rls;
use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::patient::Page;
use crate::models::records::{Consultation, ConsultationWithDoctor, CreateConsultationRequest};
use crate::models::user::DoctorRef;
use crate::services::audit::{self, AuditEntry};
use crate::services::patients::PatientService;
use crate::services::structured_input;

pub struct ConsultationService;

impl ConsultationService {
    /// Record a consultation; the author is always the caller.
    pub async fn create(
        pool: &PgPool,
        redis: &mut redis::aio::MultiplexedConnection,
        staff: &AuthStaff,
        req: &CreateConsultationRequest,
    ) -> Result<Consultation, ApiError> {
        req.validate()?;

        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        PatientService::assert_in_clinic(&mut tx, staff.clinic_id, req.patient_id).await?;

        let consultation = sqlx::query_as::<_, Consultation>(
            "INSERT INTO consultations (patient_id, doctor_id, date, symptoms, notes)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, patient_id, doctor_id, date, symptoms, notes",
        )
        .bind(req.patient_id)
        .bind(staff.user_id)
        .bind(req.date)
        .bind(req.symptoms.trim())
        .bind(req.notes.as_deref().unwrap_or("").trim())
        .fetch_one(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "CONSULTATION_CREATE".into(),
                entity_type: "consultation".into(),
                entity_id: Some(consultation.id),
            },
        )
        .await?;
        tx.commit().await?;

        structured_input::invalidate(redis, req.patient_id).await;
        Ok(consultation)
    }

    pub async fn delete(
        pool: &PgPool,
        redis: &mut redis::aio::MultiplexedConnection,
        staff: &AuthStaff,
        consultation_id: Uuid,
    ) -> Result<(), ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        let patient_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE consultations c SET deleted_at = NOW()
             FROM patients p
             WHERE c.id = $1 AND c.deleted_at IS NULL
               AND p.id = c.patient_id AND p.clinic_id = $2
             RETURNING c.patient_id",
        )
        .bind(consultation_id)
        .bind(staff.clinic_id)
        .fetch_optional(&mut *tx)
        .await?;

        let patient_id = patient_id.ok_or(ApiError::NotFound("Consultation"))?;

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "CONSULTATION_DELETE".into(),
                entity_type: "consultation".into(),
                entity_id: Some(consultation_id),
            },
        )
        .await?;
        tx.commit().await?;

        structured_input::invalidate(redis, patient_id).await;
        Ok(())
    }

    /// Cursor-paginated `date DESC, id DESC` listing with the doctor
    /// projection joined in.
    pub async fn list(
        pool: &PgPool,
        staff: &AuthStaff,
        patient_id: Uuid,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Page<ConsultationWithDoctor>, ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        PatientService::assert_in_clinic(&mut tx, staff.clinic_id, patient_id).await?;

        let base = "SELECT c.id, c.patient_id, c.date, c.symptoms, c.notes,
                           u.id AS doctor_id, u.name AS doctor_name,
                           u.email AS doctor_email, u.role AS doctor_role
                    FROM consultations c
                    JOIN users u ON u.id = c.doctor_id";

        let rows = match cursor {
            Some(cursor) => {
                let sql = format!(
                    "{base}, consultations anchor
                     WHERE anchor.id = $1
                       AND c.patient_id = $2 AND c.deleted_at IS NULL
                       AND (c.date, c.id) < (anchor.date, anchor.id)
                     ORDER BY c.date DESC, c.id DESC
                     LIMIT $3"
                );
                sqlx::query(&sql)
                    .bind(cursor)
                    .bind(patient_id)
                    .bind(limit + 1)
                    .fetch_all(&mut *tx)
                    .await?
            }
            None => {
                let sql = format!(
                    "{base}
                     WHERE c.patient_id = $1 AND c.deleted_at IS NULL
                     ORDER BY c.date DESC, c.id DESC
                     LIMIT $2"
                );
                sqlx::query(&sql)
                    .bind(patient_id)
                    .bind(limit + 1)
                    .fetch_all(&mut *tx)
                    .await?
            }
        };
        tx.commit().await?;

        let mut items: Vec<ConsultationWithDoctor> = rows
            .into_iter()
            .map(|row| ConsultationWithDoctor {
                id: row.get("id"),
                patient_id: row.get("patient_id"),
                date: row.get("date"),
                symptoms: row.get("symptoms"),
                notes: row.get("notes"),
                doctor: DoctorRef {
                    id: row.get("doctor_id"),
                    name: row.get("doctor_name"),
                    email: row.get("doctor_email"),
                    role: row.get("doctor_role"),
                },
            })
            .collect();

        let has_more = items.len() as i64 > limit;
        items.truncate(limit as usize);
        let next_cursor = if has_more {
            items.last().map(|c| c.id)
        } else {
            None
        };

        Ok(Page {
            data: items,
            next_cursor,
        })
    }
}
