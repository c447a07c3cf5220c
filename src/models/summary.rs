use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AiSummary {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub summary_text: String,
    pub risk_flags: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Deterministic flags derived from the vital-sign trends and symptoms.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskFlags {
    pub high_blood_pressure_trend: bool,
    pub rising_glucose_trend: bool,
    pub tachycardia_trend: bool,
    pub rapid_weight_change: bool,
    pub concerning_symptoms: Vec<String>,
    pub disclaimer: String,
}

impl RiskFlags {
    pub fn active_trend_flags(&self) -> u32 {
        [
            self.high_blood_pressure_trend,
            self.rising_glucose_trend,
            self.tachycardia_trend,
            self.rapid_weight_change,
        ]
        .iter()
        .filter(|f| **f)
        .count() as u32
    }
}

/// Lifecycle of a summary-generation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
    Timeout,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Timeout)
    }
}

/// Payload carried on the durable queue. Workers re-read fresh patient data;
/// the job itself holds only the identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryJob {
    pub job_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub user_id: Uuid,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary_id: Option<Uuid>,
    pub failed_reason: Option<String>,
}

impl SummaryJob {
    pub fn new(clinic_id: Uuid, patient_id: Uuid, user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            clinic_id,
            patient_id,
            user_id,
            state: JobState::Queued,
            attempts_made: 0,
            max_attempts: 2,
            created_at: now,
            updated_at: now,
            summary_id: None,
            failed_reason: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }
}

/// A single frame on the job event channel and push stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub state: JobState,
    pub summary_id: Option<Uuid>,
    pub failed_reason: Option<String>,
}

impl JobEvent {
    pub fn completed(summary_id: Uuid) -> Self {
        Self {
            state: JobState::Completed,
            summary_id: Some(summary_id),
            failed_reason: None,
        }
    }

    pub fn failed(reason: String) -> Self {
        Self {
            state: JobState::Failed,
            summary_id: None,
            failed_reason: Some(reason),
        }
    }

    pub fn timeout() -> Self {
        Self {
            state: JobState::Timeout,
            summary_id: None,
            failed_reason: None,
        }
    }

    pub fn progress(state: JobState) -> Self {
        Self {
            state,
            summary_id: None,
            failed_reason: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub status: JobState,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Timeout.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Delayed.is_terminal());
    }

    #[test]
    fn job_states_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&JobState::Completed).unwrap(), "\"completed\"");
        assert_eq!(serde_json::to_string(&JobState::Queued).unwrap(), "\"queued\"");
    }

    #[test]
    fn retry_budget_is_two_attempts() {
        let mut job = SummaryJob::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert!(job.can_retry());
        job.attempts_made = 1;
        assert!(job.can_retry());
        job.attempts_made = 2;
        assert!(!job.can_retry());
    }

    #[test]
    fn event_shape_matches_stream_contract() {
        let ev = JobEvent::completed(Uuid::nil());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["failedReason"], serde_json::Value::Null);
        assert!(json["summaryId"].is_string());
    }
}
