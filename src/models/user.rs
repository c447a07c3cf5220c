use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::auth::Role;

/// DB row struct; role is kept as TEXT and parsed at the DTO boundary.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            clinic_id: u.clinic_id,
            name: u.name,
            email: u.email,
            role: u.role.parse().unwrap_or(Role::Doctor),
            created_at: u.created_at,
        }
    }
}

/// Joined doctor projection embedded in consultation reads.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DoctorRef {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
}
