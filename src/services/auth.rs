use chrono::{Duration, Utc};
use lazy_static::lazy_static;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::db::rls;
use crate::error::{ApiError, FieldError};
use crate::middleware::auth::issue_token;
use crate::models::auth::{AuthPatient, AuthStaff, PatientSetupRequest, RegisterClinicRequest, Role};
use crate::models::clinic::Clinic;
use crate::models::patient::{InviteResponse, Patient, PatientProfile};
use crate::models::user::{User, UserProfile};
use crate::services::audit::{self, AuditEntry};

const INVITE_TTL_HOURS: i64 = 72;

lazy_static! {
    // Verified against on unknown-principal logins so the failure path costs
    // the same as a real hash mismatch.
    static ref TIMING_PAD_HASH: String =
        bcrypt::hash("medibrief-timing-pad", bcrypt::DEFAULT_COST).unwrap();
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub struct AuthService;

impl AuthService {
    /// Atomically create a clinic, its single ADMIN user and the registration
    /// audit record. `conflict` when either email is taken.
    pub async fn register_clinic(
        pool: &PgPool,
        config: &Config,
        req: &RegisterClinicRequest,
    ) -> Result<(String, UserProfile, Clinic), ApiError> {
        let mut errors = Vec::new();
        if req.clinic_name.trim().is_empty() || req.clinic_name.len() > 200 {
            errors.push(FieldError::new("clinicName", "must be 1-200 characters"));
        }
        if req.clinic_email.trim().is_empty() {
            errors.push(FieldError::new("clinicEmail", "must not be empty"));
        }
        if req.admin_name.trim().is_empty() || req.admin_name.len() > 100 {
            errors.push(FieldError::new("adminName", "must be 1-100 characters"));
        }
        if req.admin_email.trim().is_empty() {
            errors.push(FieldError::new("adminEmail", "must not be empty"));
        }
        if req.password.len() < 8 {
            errors.push(FieldError::new("password", "must be at least 8 characters"));
        }
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }

        let password_hash = bcrypt::hash(&req.password, 12)
            .map_err(|e| ApiError::Internal(e.into()))?;
        let plan = req
            .subscription_plan
            .clone()
            .unwrap_or_else(|| "free".to_string());

        let mut tx = pool.begin().await?;

        let clinic = sqlx::query_as::<_, Clinic>(
            "INSERT INTO clinics (name, email, subscription_plan)
             VALUES ($1, $2, $3)
             RETURNING *",
        )
        .bind(req.clinic_name.trim())
        .bind(req.clinic_email.trim().to_lowercase())
        .bind(&plan)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict("A clinic with this email already exists".into())
            } else {
                e.into()
            }
        })?;

        rls::bind_clinic(&mut tx, clinic.id).await?;

        let admin = sqlx::query_as::<_, User>(
            "INSERT INTO users (clinic_id, name, email, password_hash, role)
             VALUES ($1, $2, $3, $4, 'ADMIN')
             RETURNING *",
        )
        .bind(clinic.id)
        .bind(req.admin_name.trim())
        .bind(req.admin_email.trim().to_lowercase())
        .bind(&password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict("A user with this email already exists".into())
            } else {
                e.into()
            }
        })?;

        audit::record(
            &mut tx,
            clinic.id,
            AuditEntry {
                user_id: admin.id,
                action: "CLINIC_REGISTER".into(),
                entity_type: "clinic".into(),
                entity_id: Some(clinic.id),
            },
        )
        .await?;

        tx.commit().await?;

        let token = issue_token(
            admin.id,
            clinic.id,
            Role::Admin,
            &config.jwt_secret,
            config.jwt_expiry_seconds,
        )
        .map_err(ApiError::Internal)?;

        Ok((token, admin.into(), clinic))
    }

    /// Staff login. Unknown email and wrong password are indistinguishable in
    /// both message and timing.
    pub async fn staff_login(
        pool: &PgPool,
        config: &Config,
        email: &str,
        password: &str,
    ) -> Result<(String, UserProfile), ApiError> {
        let mut tx = rls::credential_tx(pool).await?;

        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE email = $1 AND is_archived = FALSE",
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(&mut *tx)
        .await?;

        let user = match user {
            Some(user) => user,
            None => {
                let _ = bcrypt::verify(password, &TIMING_PAD_HASH);
                return Err(ApiError::Unauthenticated);
            }
        };

        let valid = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
        if !valid {
            return Err(ApiError::Unauthenticated);
        }

        rls::bind_clinic(&mut tx, user.clinic_id).await?;
        audit::record(
            &mut tx,
            user.clinic_id,
            AuditEntry {
                user_id: user.id,
                action: "STAFF_LOGIN".into(),
                entity_type: "user".into(),
                entity_id: Some(user.id),
            },
        )
        .await?;
        tx.commit().await?;

        let role: Role = user.role.parse().unwrap_or(Role::Doctor);
        let token = issue_token(
            user.id,
            user.clinic_id,
            role,
            &config.jwt_secret,
            config.jwt_expiry_seconds,
        )
        .map_err(ApiError::Internal)?;

        Ok((token, user.into()))
    }

    /// Current staff principal.
    pub async fn me(pool: &PgPool, staff: &AuthStaff) -> Result<UserProfile, ApiError> {
        let mut tx = rls::clinic_tx(pool, staff.clinic_id).await?;
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users
             WHERE id = $1 AND clinic_id = $2 AND is_archived = FALSE",
        )
        .bind(staff.user_id)
        .bind(staff.clinic_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::Unauthenticated)?;
        tx.commit().await?;
        Ok(user.into())
    }

    /// Generate a patient portal invite valid for 72 hours. `conflict` when
    /// the patient already holds portal credentials.
    pub async fn create_invite(
        pool: &PgPool,
        staff: &AuthStaff,
        patient_id: Uuid,
    ) -> Result<InviteResponse, ApiError> {
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

        if patient.password_hash.is_some() {
            return Err(ApiError::Conflict(
                "Patient already has portal credentials".into(),
            ));
        }

        let invite_token = Uuid::new_v4();
        let expires_at = Utc::now() + Duration::hours(INVITE_TTL_HOURS);

        sqlx::query(
            "UPDATE patients SET invite_token = $1, invite_expires_at = $2
             WHERE id = $3 AND clinic_id = $4",
        )
        .bind(invite_token)
        .bind(expires_at)
        .bind(patient_id)
        .bind(staff.clinic_id)
        .execute(&mut *tx)
        .await?;

        audit::record(
            &mut tx,
            staff.clinic_id,
            AuditEntry {
                user_id: staff.user_id,
                action: "PATIENT_INVITE_CREATE".into(),
                entity_type: "patient".into(),
                entity_id: Some(patient_id),
            },
        )
        .await?;

        tx.commit().await?;

        Ok(InviteResponse {
            invite_token,
            invite_expires_at: expires_at,
            patient_name: format!("{} {}", patient.first_name, patient.last_name),
        })
    }

    /// Redeem an invite: set portal credentials, clear the invite, return a
    /// PATIENT token.
    pub async fn patient_setup(
        pool: &PgPool,
        config: &Config,
        req: &PatientSetupRequest,
    ) -> Result<(String, PatientProfile), ApiError> {
        let mut errors = Vec::new();
        if req.email.trim().is_empty() {
            errors.push(FieldError::new("email", "must not be empty"));
        }
        if req.password.len() < 8 {
            errors.push(FieldError::new("password", "must be at least 8 characters"));
        }
        let invite_token = match req.invite_token.parse::<Uuid>() {
            Ok(token) => Some(token),
            Err(_) => {
                errors.push(FieldError::new("inviteToken", "must be a valid token"));
                None
            }
        };
        let invite_token = match invite_token {
            Some(token) if errors.is_empty() => token,
            _ => return Err(ApiError::Validation(errors)),
        };

        let mut tx = rls::credential_tx(pool).await?;

        let patient = sqlx::query_as::<_, Patient>(
            "SELECT * FROM patients WHERE invite_token = $1 AND is_archived = FALSE",
        )
        .bind(invite_token)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::NotFound("Invite"))?;

        if patient.password_hash.is_some() {
            return Err(ApiError::Conflict("Portal access already configured".into()));
        }
        match patient.invite_expires_at {
            Some(expires_at) if expires_at > Utc::now() => {}
            _ => return Err(ApiError::Gone("Invite has expired".into())),
        }

        let password_hash = bcrypt::hash(&req.password, 12)
            .map_err(|e| ApiError::Internal(e.into()))?;

        rls::bind_clinic(&mut tx, patient.clinic_id).await?;

        let updated = sqlx::query_as::<_, Patient>(
            "UPDATE patients
             SET email = $1, password_hash = $2, invite_token = NULL, invite_expires_at = NULL
             WHERE id = $3
             RETURNING *",
        )
        .bind(req.email.trim().to_lowercase())
        .bind(&password_hash)
        .bind(patient.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict("This email is already in use".into())
            } else {
                e.into()
            }
        })?;

        audit::record(
            &mut tx,
            patient.clinic_id,
            AuditEntry {
                user_id: patient.id,
                action: "PATIENT_PORTAL_SETUP".into(),
                entity_type: "patient".into(),
                entity_id: Some(patient.id),
            },
        )
        .await?;

        tx.commit().await?;

        let token = issue_token(
            updated.id,
            updated.clinic_id,
            Role::Patient,
            &config.jwt_secret,
            config.jwt_expiry_seconds,
        )
        .map_err(ApiError::Internal)?;

        Ok((token, updated.into()))
    }

    /// Patient portal login; mirrors staff login.
    pub async fn patient_login(
        pool: &PgPool,
        config: &Config,
        email: &str,
        password: &str,
    ) -> Result<(String, PatientProfile), ApiError> {
        let mut tx = rls::credential_tx(pool).await?;

        let patient = sqlx::query_as::<_, Patient>(
            "SELECT * FROM patients WHERE email = $1 AND is_archived = FALSE",
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(&mut *tx)
        .await?;

        let hash = patient.as_ref().and_then(|p| p.password_hash.clone());
        let (patient, hash) = match (patient, hash) {
            (Some(patient), Some(hash)) => (patient, hash),
            _ => {
                let _ = bcrypt::verify(password, &TIMING_PAD_HASH);
                return Err(ApiError::Unauthenticated);
            }
        };

        if !bcrypt::verify(password, &hash).unwrap_or(false) {
            return Err(ApiError::Unauthenticated);
        }

        rls::bind_clinic(&mut tx, patient.clinic_id).await?;
        audit::record(
            &mut tx,
            patient.clinic_id,
            AuditEntry {
                user_id: patient.id,
                action: "PATIENT_LOGIN".into(),
                entity_type: "patient".into(),
                entity_id: Some(patient.id),
            },
        )
        .await?;
        tx.commit().await?;

        let token = issue_token(
            patient.id,
            patient.clinic_id,
            Role::Patient,
            &config.jwt_secret,
            config.jwt_expiry_seconds,
        )
        .map_err(ApiError::Internal)?;

        Ok((token, patient.into()))
    }

    /// Rotate a patient's portal password; requires the current password.
    pub async fn patient_change_password(
        pool: &PgPool,
        auth: &AuthPatient,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        if new_password.len() < 8 {
            return Err(ApiError::validation(
                "newPassword",
                "must be at least 8 characters",
            ));
        }

        let mut tx = rls::clinic_tx(pool, auth.clinic_id).await?;

        let hash: Option<String> = sqlx::query_scalar(
            "SELECT password_hash FROM patients
             WHERE id = $1 AND clinic_id = $2 AND is_archived = FALSE",
        )
        .bind(auth.patient_id)
        .bind(auth.clinic_id)
        .fetch_optional(&mut *tx)
        .await?
        .flatten();

        let hash = hash.ok_or(ApiError::Unauthenticated)?;
        if !bcrypt::verify(current_password, &hash).unwrap_or(false) {
            return Err(ApiError::Unauthenticated);
        }

        let new_hash = bcrypt::hash(new_password, 12)
            .map_err(|e| ApiError::Internal(e.into()))?;
        sqlx::query("UPDATE patients SET password_hash = $1 WHERE id = $2 AND clinic_id = $3")
            .bind(&new_hash)
            .bind(auth.patient_id)
            .bind(auth.clinic_id)
            .execute(&mut *tx)
            .await?;

        audit::record(
            &mut tx,
            auth.clinic_id,
            AuditEntry {
                user_id: auth.patient_id,
                action: "PATIENT_PASSWORD_CHANGE".into(),
                entity_type: "patient".into(),
                entity_id: Some(auth.patient_id),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
