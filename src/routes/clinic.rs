use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::auth::AuthStaff;
use crate::models::clinic::Clinic;
use crate::services::quota::{self, QuotaLimits};
use crate::AppState;

/// GET /clinic/info — the caller's clinic profile with current AI usage.
pub async fn clinic_info(
    State(state): State<AppState>,
    staff: AuthStaff,
) -> Result<Json<Value>, ApiError> {
    let clinic = sqlx::query_as::<_, Clinic>("SELECT * FROM clinics WHERE id = $1")
        .bind(staff.clinic_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(ApiError::NotFound("Clinic"))?;

    let limits = QuotaLimits::from(state.config.as_ref());
    let monthly_limit = quota::monthly_limit(&clinic.subscription_plan, limits);

    Ok(Json(json!({
        "clinic": clinic,
        "aiUsage": {
            "monthlyLimit": monthly_limit,
            "used": clinic.ai_call_count,
            "billingPeriodStart": clinic.billing_period_start,
        },
    })))
}
