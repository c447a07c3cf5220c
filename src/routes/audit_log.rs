use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::audit::AuditQuery;
use crate::models::auth::AuthStaff;
use crate::services::audit;
use crate::AppState;

/// GET /audit — ADMIN-only, paginated, filterable by action prefix,
/// entity type and user.
pub async fn list_audit_log(
    State(state): State<AppState>,
    staff: AuthStaff,
    Query(params): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    if !staff.is_admin() {
        return Err(ApiError::Forbidden);
    }

    let (entries, total) = audit::list(&state.db, staff.clinic_id, &params).await?;

    Ok(Json(json!({
        "entries": entries,
        "total": total,
        "page": params.page.unwrap_or(1).max(1),
        "limit": params.limit.unwrap_or(50).clamp(1, 200),
    })))
}
