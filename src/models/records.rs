use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{ApiError, FieldError};

use super::user::DoctorRef;

/// The four tracked vital-sign metrics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VitalType {
    #[serde(rename = "BP")]
    Bp,
    #[serde(rename = "GLUCOSE")]
    Glucose,
    #[serde(rename = "HEART_RATE")]
    HeartRate,
    #[serde(rename = "WEIGHT")]
    Weight,
}

impl VitalType {
    pub const ALL: [VitalType; 4] = [
        VitalType::Bp,
        VitalType::Glucose,
        VitalType::HeartRate,
        VitalType::Weight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VitalType::Bp => "BP",
            VitalType::Glucose => "GLUCOSE",
            VitalType::HeartRate => "HEART_RATE",
            VitalType::Weight => "WEIGHT",
        }
    }
}

impl std::str::FromStr for VitalType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BP" => Ok(VitalType::Bp),
            "GLUCOSE" => Ok(VitalType::Glucose),
            "HEART_RATE" => Ok(VitalType::HeartRate),
            "WEIGHT" => Ok(VitalType::Weight),
            _ => Err(anyhow::anyhow!("Unknown vital type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VitalRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    #[serde(rename = "type")]
    pub vital_type: String,
    pub value: String,
    pub numeric_value: Option<f64>,
    pub unit: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVitalRequest {
    pub patient_id: Uuid,
    #[serde(rename = "type")]
    pub vital_type: String,
    pub value: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl CreateVitalRequest {
    pub fn validate(&self) -> Result<VitalType, ApiError> {
        let mut errors = Vec::new();
        if self.value.trim().is_empty() {
            errors.push(FieldError::new("value", "must not be empty"));
        }
        let vital_type = match self.vital_type.parse::<VitalType>() {
            Ok(t) => Some(t),
            Err(_) => {
                errors.push(FieldError::new(
                    "type",
                    "must be BP, GLUCOSE, HEART_RATE or WEIGHT",
                ));
                None
            }
        };
        match vital_type {
            Some(vital_type) if errors.is_empty() => Ok(vital_type),
            _ => Err(ApiError::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LabResult {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub test_name: String,
    pub value: String,
    pub numeric_value: Option<f64>,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLabRequest {
    pub patient_id: Uuid,
    pub test_name: String,
    pub value: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub reference_range: Option<String>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl CreateLabRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = Vec::new();
        if self.test_name.trim().is_empty() || self.test_name.len() > 200 {
            errors.push(FieldError::new("testName", "must be 1-200 characters"));
        }
        if self.value.trim().is_empty() {
            errors.push(FieldError::new("value", "must not be empty"));
        }
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Consultation {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: DateTime<Utc>,
    pub symptoms: String,
    pub notes: String,
}

/// Consultation with the doctor projection joined in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationWithDoctor {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub date: DateTime<Utc>,
    pub symptoms: String,
    pub notes: String,
    pub doctor: DoctorRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConsultationRequest {
    pub patient_id: Uuid,
    pub date: DateTime<Utc>,
    pub symptoms: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateConsultationRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.symptoms.trim().is_empty() {
            return Err(ApiError::validation("symptoms", "must not be empty"));
        }
        Ok(())
    }
}

/// Best-effort numeric projection of a display value: finite float or none.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    // "120/80" style BP readings parse as their systolic component.
    let candidate = trimmed.split('/').next().unwrap_or(trimmed).trim();
    match candidate.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_projection_is_best_effort() {
        assert_eq!(parse_numeric("150"), Some(150.0));
        assert_eq!(parse_numeric("  72.5 "), Some(72.5));
        assert_eq!(parse_numeric("120/80"), Some(120.0));
        assert_eq!(parse_numeric("positive"), None);
        assert_eq!(parse_numeric("NaN"), None);
        assert_eq!(parse_numeric("inf"), None);
        assert_eq!(parse_numeric(""), None);
    }

    #[test]
    fn vital_type_round_trips() {
        for t in VitalType::ALL {
            assert_eq!(t.as_str().parse::<VitalType>().unwrap(), t);
        }
        assert!("PULSE".parse::<VitalType>().is_err());
    }
}
