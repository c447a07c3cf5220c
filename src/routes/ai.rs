use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Duration;
use uuid::Uuid;

use crate::db::rls;
use crate::error::ApiError;
use crate::middleware::auth::decode_token;
use crate::models::auth::{AuthStaff, Role};
use crate::models::summary::{
    AiSummary, ChatRequest, ChatResponse, EnqueueResponse, JobEvent, JobState, SummaryJob,
};
use crate::services::anonymizer;
use crate::services::audit::{self, AuditEntry};
use crate::services::events;
use crate::services::llm::{self, LlmClient};
use crate::services::metrics::AI_QUOTA_REJECTIONS_COUNTER;
use crate::services::patients::PatientService;
use crate::services::queue;
use crate::services::quota::{self, QuotaLimits};
use crate::services::structured_input;
use crate::services::summaries::SummaryService;
use crate::AppState;

const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(2500);
const STREAM_WALL_CLOCK: Duration = Duration::from_secs(120);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_CHAT_MESSAGE_LEN: usize = 2000;

/// POST /ai/generate-summary/:patientId — quota precheck, durable enqueue,
/// 202 with the job id.
pub async fn generate_summary(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(patient_id): Path<Uuid>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let mut tx = rls::clinic_tx(&state.db, staff.clinic_id).await?;
    PatientService::assert_in_clinic(&mut tx, staff.clinic_id, patient_id).await?;
    tx.commit().await?;

    let limits = QuotaLimits::from(state.config.as_ref());
    if let Err(e) = quota::check_and_increment(&state.db, staff.clinic_id, limits).await {
        if matches!(e, ApiError::RateLimited { .. }) {
            AI_QUOTA_REJECTIONS_COUNTER
                .with_label_values(&[&staff.clinic_id.to_string()])
                .inc();
        }
        return Err(e);
    }

    let job = SummaryJob::new(staff.clinic_id, patient_id, staff.user_id);
    let mut redis = state.redis.clone();
    match tokio::time::timeout(ENQUEUE_TIMEOUT, queue::enqueue(&mut redis, &job)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("summary enqueue failed: {e}");
            return Err(ApiError::Unavailable("Summary queue is unavailable".into()));
        }
        Err(_) => {
            return Err(ApiError::Unavailable("Summary queue is unavailable".into()));
        }
    }

    audit::record_detached(
        state.db.clone(),
        staff.clinic_id,
        AuditEntry {
            user_id: staff.user_id,
            action: "AI_SUMMARY_REQUEST".into(),
            entity_type: "patient".into(),
            entity_id: Some(patient_id),
        },
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: job.job_id,
            status: JobState::Queued,
        }),
    ))
}

/// GET /ai/jobs/:jobId — current job state.
pub async fn job_status(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let mut redis = state.redis.clone();
    let job = queue::get_job(&mut redis, job_id)
        .await?
        .filter(|job| job.clinic_id == staff.clinic_id)
        .ok_or(ApiError::NotFound("Job"))?;

    Ok(Json(json!({
        "state": job.state,
        "summaryId": job.summary_id,
        "failedReason": job.failed_reason,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

/// GET /ai/stream/:jobId — long-lived push stream of job lifecycle events.
/// The only endpoint accepting `?token=`: browser EventSource clients cannot
/// set headers.
pub async fn stream_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(params): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let bearer = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let token = bearer
        .or(params.token.clone())
        .ok_or(ApiError::Unauthenticated)?;
    let claims =
        decode_token(&token, &state.config.jwt_secret).map_err(|_| ApiError::Unauthenticated)?;
    if claims.role == Role::Patient {
        return Err(ApiError::Forbidden);
    }
    let clinic_id: Uuid = claims.clinic.parse().map_err(|_| ApiError::Unauthenticated)?;

    let mut redis = state.redis.clone();
    let job = queue::get_job(&mut redis, job_id)
        .await?
        .filter(|job| job.clinic_id == clinic_id)
        .ok_or(ApiError::NotFound("Job"))?;

    let (tx, rx) = tokio::sync::mpsc::channel::<JobEvent>(16);

    if job.state.is_terminal() {
        // A completion published before the client connected is recovered
        // here: one terminal frame, then close.
        let event = JobEvent {
            state: job.state,
            summary_id: job.summary_id,
            failed_reason: job.failed_reason,
        };
        let _ = tx.send(event).await;
    } else {
        let initial = JobEvent::progress(job.state);
        let client = state.redis_client.clone();
        let mut check_conn = state.redis.clone();
        tokio::spawn(async move {
            if tx.send(initial).await.is_err() {
                return;
            }

            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    tracing::warn!("stream {job_id}: pubsub connect failed: {e}");
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(events::channel(job_id)).await {
                tracing::warn!("stream {job_id}: subscribe failed: {e}");
                return;
            }

            // The job may have finished between the state check and the
            // subscribe; re-read once so that publication is not lost.
            if let Ok(Some(current)) = queue::get_job(&mut check_conn, job_id).await {
                if current.state.is_terminal() {
                    let _ = tx
                        .send(JobEvent {
                            state: current.state,
                            summary_id: current.summary_id,
                            failed_reason: current.failed_reason,
                        })
                        .await;
                    return;
                }
            }

            let deadline = tokio::time::sleep(STREAM_WALL_CLOCK);
            tokio::pin!(deadline);
            let mut messages = pubsub.on_message();

            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        let _ = tx.send(JobEvent::timeout()).await;
                        break;
                    }
                    msg = messages.next() => {
                        let Some(msg) = msg else { break };
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(_) => continue,
                        };
                        let Ok(event) = serde_json::from_str::<JobEvent>(&payload) else {
                            continue;
                        };
                        let terminal = event.state.is_terminal();
                        if tx.send(event).await.is_err() {
                            // Client disconnected; dropping the subscription
                            // is the whole cleanup.
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                }
            }
        });
    }

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Some((Ok::<_, Infallible>(Event::default().data(data)), rx))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    ))
}

/// GET /ai/summaries/patient/:patientId
pub async fn list_summaries(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Vec<AiSummary>>, ApiError> {
    let summaries = SummaryService::list_for_patient(&state.db, &staff, patient_id).await?;
    Ok(Json(summaries))
}

/// GET /ai/summaries/:summaryId
pub async fn get_summary(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(summary_id): Path<Uuid>,
) -> Result<Json<AiSummary>, ApiError> {
    let summary = SummaryService::get(&state.db, &staff, summary_id).await?;
    Ok(Json(summary))
}

/// POST /ai/chat/:patientId — synchronous question answering over the same
/// anonymized context; same quota, no queue.
pub async fn chat(
    State(state): State<AppState>,
    staff: AuthStaff,
    Path(patient_id): Path<Uuid>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = body.message.trim();
    if message.is_empty() || message.len() > MAX_CHAT_MESSAGE_LEN {
        return Err(ApiError::validation(
            "message",
            "must be 1-2000 characters",
        ));
    }

    let mut tx = rls::clinic_tx(&state.db, staff.clinic_id).await?;
    PatientService::assert_in_clinic(&mut tx, staff.clinic_id, patient_id).await?;
    tx.commit().await?;

    let limits = QuotaLimits::from(state.config.as_ref());
    quota::check_and_increment(&state.db, staff.clinic_id, limits).await?;

    let mut redis = state.redis.clone();
    let input = structured_input::resolve(
        &state.db,
        &mut redis,
        staff.clinic_id,
        patient_id,
        state.config.structured_input_ttl_secs,
    )
    .await?;
    let anonymized = anonymizer::anonymize(&input);

    let llm_client = LlmClient::new(&state.config);
    let answer = if llm_client.is_configured() {
        match llm_client.answer_question(&anonymized, message).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("chat LLM call failed, using fallback: {e}");
                llm::render_fallback_answer(&anonymized)
            }
        }
    } else {
        llm::render_fallback_answer(&anonymized)
    };

    audit::record_detached(
        state.db.clone(),
        staff.clinic_id,
        AuditEntry {
            user_id: staff.user_id,
            action: "AI_CHAT".into(),
            entity_type: "patient".into(),
            entity_id: Some(patient_id),
        },
    );

    Ok(Json(ChatResponse { answer }))
}
