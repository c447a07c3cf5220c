use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{ApiError, FieldError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Gender {
    #[serde(rename = "MALE")]
    Male,
    #[serde(rename = "FEMALE")]
    Female,
    #[serde(rename = "OTHER")]
    Other,
}

impl std::str::FromStr for Gender {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MALE" => Ok(Gender::Male),
            "FEMALE" => Ok(Gender::Female),
            "OTHER" => Ok(Gender::Other),
            _ => Err(anyhow::anyhow!("Unknown gender: {s}")),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Patient {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub invite_token: Option<Uuid>,
    pub invite_expires_at: Option<DateTime<Utc>>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Patient {
    /// Whole years since date of birth, `None` when the date is in the future.
    pub fn age(&self, today: NaiveDate) -> Option<u32> {
        today.years_since(self.date_of_birth)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfile {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub has_portal_access: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Patient> for PatientProfile {
    fn from(p: Patient) -> Self {
        Self {
            id: p.id,
            clinic_id: p.clinic_id,
            first_name: p.first_name,
            last_name: p.last_name,
            date_of_birth: p.date_of_birth,
            gender: p.gender,
            phone: p.phone,
            email: p.email,
            has_portal_access: p.password_hash.is_some(),
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub gender: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl CreatePatientRequest {
    /// Field-level validation; returns the coerced date of birth.
    pub fn validate(&self) -> Result<NaiveDate, ApiError> {
        let mut errors = Vec::new();

        if self.first_name.trim().is_empty() || self.first_name.len() > 100 {
            errors.push(FieldError::new("firstName", "must be 1-100 characters"));
        }
        if self.last_name.trim().is_empty() || self.last_name.len() > 100 {
            errors.push(FieldError::new("lastName", "must be 1-100 characters"));
        }
        if self.gender.parse::<Gender>().is_err() {
            errors.push(FieldError::new("gender", "must be MALE, FEMALE or OTHER"));
        }
        if let Some(phone) = &self.phone {
            if phone.len() < 6 || phone.len() > 30 {
                errors.push(FieldError::new("phone", "must be 6-30 characters"));
            }
        }

        let dob = match NaiveDate::parse_from_str(&self.date_of_birth, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => {
                errors.push(FieldError::new("dateOfBirth", "must be an ISO date (YYYY-MM-DD)"));
                None
            }
        };

        match dob {
            Some(dob) if errors.is_empty() => Ok(dob),
            _ => Err(ApiError::Validation(errors)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl UpdatePatientRequest {
    pub fn validate(&self) -> Result<Option<NaiveDate>, ApiError> {
        let mut errors = Vec::new();

        if let Some(name) = &self.first_name {
            if name.trim().is_empty() || name.len() > 100 {
                errors.push(FieldError::new("firstName", "must be 1-100 characters"));
            }
        }
        if let Some(name) = &self.last_name {
            if name.trim().is_empty() || name.len() > 100 {
                errors.push(FieldError::new("lastName", "must be 1-100 characters"));
            }
        }
        if let Some(gender) = &self.gender {
            if gender.parse::<Gender>().is_err() {
                errors.push(FieldError::new("gender", "must be MALE, FEMALE or OTHER"));
            }
        }
        if let Some(phone) = &self.phone {
            if phone.len() < 6 || phone.len() > 30 {
                errors.push(FieldError::new("phone", "must be 6-30 characters"));
            }
        }

        let dob = match &self.date_of_birth {
            Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                Ok(d) => Some(d),
                Err(_) => {
                    errors.push(FieldError::new("dateOfBirth", "must be an ISO date (YYYY-MM-DD)"));
                    None
                }
            },
            None => None,
        };

        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }
        Ok(dob)
    }
}

/// Cursor-paginated list envelope: `nextCursor` is the last row id iff more
/// rows exist beyond this page.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub next_cursor: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CursorQuery {
    pub cursor: Option<Uuid>,
    pub limit: Option<i64>,
}

impl CursorQuery {
    /// `limit` must be 1..=100; defaults to 20.
    pub fn limit(&self) -> Result<i64, ApiError> {
        match self.limit {
            None => Ok(20),
            Some(n) if (1..=100).contains(&n) => Ok(n),
            Some(_) => Err(ApiError::validation("limit", "must be between 1 and 100")),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResponse {
    pub invite_token: Uuid,
    pub invite_expires_at: DateTime<Utc>,
    pub patient_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> CreatePatientRequest {
        CreatePatientRequest {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            date_of_birth: "1990-05-15".into(),
            gender: "FEMALE".into(),
            phone: Some("+1234567890".into()),
            email: None,
        }
    }

    #[test]
    fn valid_request_coerces_date() {
        let dob = base_request().validate().unwrap();
        assert_eq!(dob, NaiveDate::from_ymd_opt(1990, 5, 15).unwrap());
    }

    #[test]
    fn bad_gender_and_dob_both_reported() {
        let mut req = base_request();
        req.gender = "F".into();
        req.date_of_birth = "15/05/1990".into();
        match req.validate() {
            Err(ApiError::Validation(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"gender"));
                assert!(fields.contains(&"dateOfBirth"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn phone_length_bounds() {
        let mut req = base_request();
        req.phone = Some("12345".into());
        assert!(req.validate().is_err());
        req.phone = Some("123456".into());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn limit_bounds() {
        let q = CursorQuery { cursor: None, limit: None };
        assert_eq!(q.limit().unwrap(), 20);
        let q = CursorQuery { cursor: None, limit: Some(100) };
        assert_eq!(q.limit().unwrap(), 100);
        let q = CursorQuery { cursor: None, limit: Some(101) };
        assert!(q.limit().is_err());
        let q = CursorQuery { cursor: None, limit: Some(0) };
        assert!(q.limit().is_err());
    }
}
