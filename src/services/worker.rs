use tokio::time::Duration;
use uuid::Uuid;

use crate::db::rls;
use crate::error::ApiError;
use crate::models::summary::{JobEvent, JobState, RiskFlags, SummaryJob};
use crate::services::analytics;
use crate::services::anonymizer;
use crate::services::audit::{self, AuditEntry};
use crate::services::events;
use crate::services::llm::{self, LlmClient};
use crate::services::metrics;
use crate::services::patients::PatientService;
use crate::services::queue;
use crate::services::structured_input::{self, StructuredInput};
use crate::services::summaries::SummaryService;
use crate::AppState;

const IDLE_POLL: Duration = Duration::from_millis(500);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Z-score of the most recent value against the baseline of the readings
/// before it. None when the baseline is too short or flat.
fn latest_z(trend_most_recent_first: &[f64]) -> Option<f64> {
    let (latest, baseline) = trend_most_recent_first.split_first()?;
    if baseline.len() < 3 {
        return None;
    }
    let n = baseline.len() as f64;
    let mean = baseline.iter().sum::<f64>() / n;
    let variance = baseline.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let sigma = variance.sqrt();
    if sigma == 0.0 {
        return None;
    }
    Some((latest - mean) / sigma)
}

/// Deterministic risk flags: a trend flags when its latest reading sits two
/// standard deviations above its own baseline (weight flags in either
/// direction).
pub fn compute_risk_flags(input: &StructuredInput) -> RiskFlags {
    RiskFlags {
        high_blood_pressure_trend: latest_z(&input.bp_trend).is_some_and(|z| z >= 2.0),
        rising_glucose_trend: latest_z(&input.glucose_trend).is_some_and(|z| z >= 2.0),
        tachycardia_trend: latest_z(&input.heart_rate_trend).is_some_and(|z| z >= 2.0),
        rapid_weight_change: latest_z(&input.weight_trend).is_some_and(|z| z.abs() >= 2.0),
        concerning_symptoms: input
            .recent_symptoms
            .iter()
            .filter(|s| analytics::is_concerning_symptom(s))
            .cloned()
            .collect(),
        disclaimer: llm::DISCLAIMER.to_string(),
    }
}

/// Spawn the bounded worker pool consuming the summary queue.
pub fn start(state: AppState) {
    for i in 0..state.config.ai_worker_concurrency {
        let worker_state = state.clone();
        let name = format!("summary-worker-{i}");
        tokio::spawn(async move {
            worker_loop(worker_state, name).await;
        });
    }
}

async fn worker_loop(state: AppState, name: String) {
    tracing::info!("{name} started on queue {}", queue::QUEUE_NAME);
    let llm_client = LlmClient::new(&state.config);

    loop {
        let mut redis = state.redis.clone();
        match queue::dequeue(&mut redis).await {
            Ok(Some(job)) => {
                let job_id = job.job_id;
                if let Err(e) = process_job(&state, &llm_client, job).await {
                    tracing::error!("{name}: job {job_id} handling error: {e}");
                }
            }
            Ok(None) => tokio::time::sleep(IDLE_POLL).await,
            Err(e) => {
                tracing::error!("{name}: dequeue failed: {e}");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

async fn process_job(
    state: &AppState,
    llm_client: &LlmClient,
    mut job: SummaryJob,
) -> Result<(), ApiError> {
    let mut redis = state.redis.clone();
    events::publish(&mut redis, job.job_id, &JobEvent::progress(JobState::Active)).await;

    match generate(state, llm_client, &job).await {
        Ok(summary_id) => {
            queue::complete(&mut redis, &mut job, summary_id).await?;
            events::publish(&mut redis, job.job_id, &JobEvent::completed(summary_id)).await;
            metrics::AI_JOBS_COUNTER.with_label_values(&["completed"]).inc();
            tracing::info!("job {} completed, summary {summary_id}", job.job_id);
        }
        Err(e) => {
            let reason = e.to_string();
            let retried = queue::fail(&mut redis, &mut job, &reason).await?;
            if retried {
                events::publish(&mut redis, job.job_id, &JobEvent::progress(JobState::Waiting))
                    .await;
            } else {
                events::publish(&mut redis, job.job_id, &JobEvent::failed(reason.clone())).await;
                metrics::AI_JOBS_COUNTER.with_label_values(&["failed"]).inc();
                tracing::error!("job {} terminally failed: {reason}", job.job_id);
            }
        }
    }
    Ok(())
}

/// One attempt: fresh structured input, deterministic flags, model call with
/// fallback, then persistence and the audit record under the job's clinic
/// binding.
async fn generate(
    state: &AppState,
    llm_client: &LlmClient,
    job: &SummaryJob,
) -> Result<Uuid, ApiError> {
    let mut redis = state.redis.clone();
    let input = structured_input::resolve(
        &state.db,
        &mut redis,
        job.clinic_id,
        job.patient_id,
        state.config.structured_input_ttl_secs,
    )
    .await?;

    let flags = compute_risk_flags(&input);
    let anonymized = anonymizer::anonymize(&input);

    let summary_text = if llm_client.is_configured() {
        match llm_client.generate_summary(&anonymized, &flags).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    "job {}: LLM call failed, using fallback renderer: {e}",
                    job.job_id
                );
                llm::render_fallback_summary(&anonymized, &flags)
            }
        }
    } else {
        llm::render_fallback_summary(&anonymized, &flags)
    };

    let mut tx = rls::clinic_tx(&state.db, job.clinic_id).await?;
    PatientService::assert_in_clinic(&mut tx, job.clinic_id, job.patient_id).await?;
    let summary = SummaryService::insert(&mut tx, job.patient_id, &summary_text, &flags).await?;
    audit::record(
        &mut tx,
        job.clinic_id,
        AuditEntry {
            user_id: job.user_id,
            action: "AI_SUMMARY_GENERATE".into(),
            entity_type: "ai_summary".into(),
            entity_id: Some(summary.id),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(summary.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_with_bp(bp: Vec<f64>) -> StructuredInput {
        StructuredInput {
            age: Some(50),
            bp_trend: bp,
            glucose_trend: vec![],
            heart_rate_trend: vec![],
            weight_trend: vec![],
            recent_symptoms: vec![],
            recent_lab_values: vec![],
        }
    }

    #[test]
    fn spike_above_baseline_raises_flag() {
        // Most-recent-first: 165 against a flat-ish 120-123 baseline.
        let input = input_with_bp(vec![165.0, 123.0, 121.0, 122.0, 120.0]);
        let flags = compute_risk_flags(&input);
        assert!(flags.high_blood_pressure_trend);
    }

    #[test]
    fn stable_series_raises_nothing() {
        let input = input_with_bp(vec![121.0, 123.0, 121.0, 122.0, 120.0]);
        let flags = compute_risk_flags(&input);
        assert!(!flags.high_blood_pressure_trend);
    }

    #[test]
    fn short_baseline_never_flags() {
        let input = input_with_bp(vec![200.0, 120.0, 121.0]);
        assert!(!compute_risk_flags(&input).high_blood_pressure_trend);
    }

    #[test]
    fn flat_baseline_never_flags() {
        let input = input_with_bp(vec![200.0, 120.0, 120.0, 120.0]);
        // σ = 0 on the baseline → no statistical signal.
        assert!(!compute_risk_flags(&input).high_blood_pressure_trend);
    }

    #[test]
    fn weight_flags_in_both_directions() {
        let mut input = input_with_bp(vec![]);
        input.weight_trend = vec![60.0, 80.0, 80.5, 79.5, 80.0];
        assert!(compute_risk_flags(&input).rapid_weight_change);

        input.weight_trend = vec![100.0, 80.0, 80.5, 79.5, 80.0];
        assert!(compute_risk_flags(&input).rapid_weight_change);
    }

    #[test]
    fn heart_rate_flags_only_upward() {
        let mut input = input_with_bp(vec![]);
        input.heart_rate_trend = vec![40.0, 70.0, 71.0, 69.0, 70.0];
        assert!(!compute_risk_flags(&input).tachycardia_trend);

        input.heart_rate_trend = vec![130.0, 70.0, 71.0, 69.0, 70.0];
        assert!(compute_risk_flags(&input).tachycardia_trend);
    }

    #[test]
    fn concerning_symptoms_are_collected() {
        let mut input = input_with_bp(vec![]);
        input.recent_symptoms = vec!["chest pain on exertion".into(), "mild cough".into()];
        let flags = compute_risk_flags(&input);
        assert_eq!(flags.concerning_symptoms, vec!["chest pain on exertion".to_string()]);
        assert!(flags.disclaimer.contains("not a diagnosis"));
    }
}
