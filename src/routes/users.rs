use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::rls;
use crate::error::{ApiError, FieldError};
use crate::models::auth::AuthStaff;
use crate::models::user::{User, UserProfile};
use crate::services::audit::{self, AuditEntry};
use crate::services::auth::AuthService;
use crate::AppState;

pub async fn me(
    State(state): State<AppState>,
    staff: AuthStaff,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = AuthService::me(&state.db, &staff).await?;
    Ok(Json(profile))
}

/// List the clinic's staff. ADMIN only.
pub async fn list_staff(
    State(state): State<AppState>,
    staff: AuthStaff,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    if !staff.is_admin() {
        return Err(ApiError::Forbidden);
    }

    let mut tx = rls::clinic_tx(&state.db, staff.clinic_id).await?;
    let users = sqlx::query_as::<_, User>(
        "SELECT * FROM users
         WHERE clinic_id = $1 AND is_archived = FALSE
         ORDER BY role, name",
    )
    .bind(staff.clinic_id)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Json(users.into_iter().map(UserProfile::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CreateStaffRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

/// Create a staff account directly (no invitation flow for staff). ADMIN only.
pub async fn create_staff(
    State(state): State<AppState>,
    staff: AuthStaff,
    Json(body): Json<CreateStaffRequest>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    if !staff.is_admin() {
        return Err(ApiError::Forbidden);
    }

    let mut errors = Vec::new();
    if body.name.trim().is_empty() || body.name.len() > 100 {
        errors.push(FieldError::new("name", "must be 1-100 characters"));
    }
    if body.email.trim().is_empty() {
        errors.push(FieldError::new("email", "must not be empty"));
    }
    if body.password.len() < 8 {
        errors.push(FieldError::new("password", "must be at least 8 characters"));
    }
    let role = body.role.as_deref().unwrap_or("DOCTOR");
    if !["ADMIN", "DOCTOR"].contains(&role) {
        errors.push(FieldError::new("role", "must be ADMIN or DOCTOR"));
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let password_hash =
        bcrypt::hash(&body.password, 12).map_err(|e| ApiError::Internal(e.into()))?;

    let mut tx = rls::clinic_tx(&state.db, staff.clinic_id).await?;
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (clinic_id, name, email, password_hash, role)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(staff.clinic_id)
    .bind(body.name.trim())
    .bind(body.email.trim().to_lowercase())
    .bind(&password_hash)
    .bind(role)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            ApiError::Conflict("A user with this email already exists".into())
        }
        _ => e.into(),
    })?;

    audit::record(
        &mut tx,
        staff.clinic_id,
        AuditEntry {
            user_id: staff.user_id,
            action: "STAFF_CREATE".into(),
            entity_type: "user".into(),
            entity_id: Some(user.id),
        },
    )
    .await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Archive a staff account. ADMIN only; an admin cannot archive itself.
pub async fn archive_staff(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if !staff.is_admin() {
        return Err(ApiError::Forbidden);
    }
    if user_id == staff.user_id {
        return Err(ApiError::Conflict("Cannot archive your own account".into()));
    }

    let mut tx = rls::clinic_tx(&state.db, staff.clinic_id).await?;
    let result = sqlx::query(
        "UPDATE users SET is_archived = TRUE
         WHERE id = $1 AND clinic_id = $2 AND is_archived = FALSE",
    )
    .bind(user_id)
    .bind(staff.clinic_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("User"));
    }

    audit::record(
        &mut tx,
        staff.clinic_id,
        AuditEntry {
            user_id: staff.user_id,
            action: "STAFF_ARCHIVE".into(),
            entity_type: "user".into(),
            entity_id: Some(user_id),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(Json(json!({ "message": "User archived" })))
}
