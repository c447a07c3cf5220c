use chrono::{DateTime, Datelike, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub free: i64,
    pub pro: i64,
    pub enterprise: i64,
}

impl From<&Config> for QuotaLimits {
    fn from(config: &Config) -> Self {
        Self {
            free: config.ai_monthly_limit_free,
            pro: config.ai_monthly_limit_pro,
            enterprise: config.ai_monthly_limit_enterprise,
        }
    }
}

/// Plan names are free-form; tier resolution is by substring, most
/// privileged first. Anything unrecognized falls back to the free limit.
pub fn monthly_limit(plan: &str, limits: QuotaLimits) -> i64 {
    let plan = plan.to_lowercase();
    if plan.contains("enterprise") {
        limits.enterprise
    } else if plan.contains("pro") {
        limits.pro
    } else {
        limits.free
    }
}

/// The billing counter resets when a call arrives in a new UTC month.
pub fn is_new_utc_month(billing_period_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    billing_period_start.year() != now.year() || billing_period_start.month() != now.month()
}

/// Month rollover + precheck + increment, serialized per clinic via a row
/// lock. The increment happens at submission, so the counter may over-count
/// under retries but never under-counts.
pub async fn check_and_increment(
    pool: &PgPool,
    clinic_id: Uuid,
    limits: QuotaLimits,
) -> Result<(), ApiError> {
    let mut tx = pool.begin().await?;

    let row: Option<(String, i32, DateTime<Utc>)> = sqlx::query_as(
        "SELECT subscription_plan, ai_call_count, billing_period_start
         FROM clinics WHERE id = $1
         FOR UPDATE",
    )
    .bind(clinic_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (plan, mut count, period_start) = row.ok_or(ApiError::NotFound("Clinic"))?;

    if is_new_utc_month(period_start, Utc::now()) {
        sqlx::query(
            "UPDATE clinics
             SET ai_call_count = 0, billing_period_start = date_trunc('month', NOW())
             WHERE id = $1",
        )
        .bind(clinic_id)
        .execute(&mut *tx)
        .await?;
        count = 0;
    }

    let limit = monthly_limit(&plan, limits);
    if i64::from(count) >= limit {
        return Err(ApiError::RateLimited {
            message: "Monthly AI summary quota exhausted".into(),
            monthly_limit: Some(limit),
            retry_after_secs: None,
        });
    }

    sqlx::query("UPDATE clinics SET ai_call_count = ai_call_count + 1 WHERE id = $1")
        .bind(clinic_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LIMITS: QuotaLimits = QuotaLimits {
        free: 10,
        pro: 100,
        enterprise: 1000,
    };

    #[test]
    fn plan_tier_resolution_by_substring() {
        assert_eq!(monthly_limit("free", LIMITS), 10);
        assert_eq!(monthly_limit("", LIMITS), 10);
        assert_eq!(monthly_limit("starter", LIMITS), 10);
        assert_eq!(monthly_limit("pro", LIMITS), 100);
        assert_eq!(monthly_limit("Pro Plus", LIMITS), 100);
        assert_eq!(monthly_limit("enterprise", LIMITS), 1000);
        assert_eq!(monthly_limit("Enterprise-Pro", LIMITS), 1000);
    }

    #[test]
    fn month_rollover_is_utc_calendar_based() {
        let june = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let late_june = Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap();
        let july = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let next_june = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        assert!(!is_new_utc_month(june, late_june));
        assert!(is_new_utc_month(june, july));
        // Same month number, different year still rolls over.
        assert!(is_new_utc_month(june, next_june));
    }
}
