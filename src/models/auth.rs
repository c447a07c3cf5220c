use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Principal role carried in every token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "DOCTOR")]
    Doctor,
    #[serde(rename = "PATIENT")]
    Patient,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Admin => "ADMIN",
            Role::Doctor => "DOCTOR",
            Role::Patient => "PATIENT",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "DOCTOR" => Ok(Role::Doctor),
            "PATIENT" => Ok(Role::Patient),
            _ => Err(anyhow::anyhow!("Unknown role: {s}")),
        }
    }
}

/// Claims embedded in the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,    // principal UUID (staff user or patient)
    pub clinic: String, // clinic UUID
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// Verified staff principal (ADMIN or DOCTOR), extracted from the token.
#[derive(Debug, Clone)]
pub struct AuthStaff {
    pub user_id: Uuid,
    pub clinic_id: Uuid,
    pub role: Role,
}

impl AuthStaff {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Verified patient principal, extracted from the token.
#[derive(Debug, Clone)]
pub struct AuthPatient {
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
}

/// Extension type carrying the token signing secret through the router.
#[derive(Clone)]
pub struct JwtSecret(pub String);

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClinicRequest {
    pub clinic_name: String,
    pub clinic_email: String,
    #[serde(default)]
    pub subscription_plan: Option<String>,
    pub admin_name: String,
    pub admin_email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSetupRequest {
    pub invite_token: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}
