use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subscription_plan: String,
    pub ai_call_count: i32,
    pub billing_period_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
