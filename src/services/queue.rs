use chrono::Utc;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::summary::{JobState, SummaryJob};

pub const QUEUE_NAME: &str = "ai-summary-generation";

const PENDING_KEY: &str = "ai:queue:ai-summary-generation";
const PROCESSING_KEY: &str = "ai:queue:ai-summary-generation:processing";
const COMPLETED_KEY: &str = "ai:jobs:completed";
const FAILED_KEY: &str = "ai:jobs:failed";

// Retention: recent terminal job ids, and a hard TTL on the job hashes.
const COMPLETED_RETENTION: isize = 500;
const FAILED_RETENTION: isize = 1000;
const JOB_TTL_SECS: i64 = 604_800;

fn job_key(job_id: Uuid) -> String {
    format!("ai:job:{job_id}")
}

async fn store(
    redis: &mut redis::aio::MultiplexedConnection,
    job: &SummaryJob,
) -> Result<(), ApiError> {
    let data = serde_json::to_string(job).map_err(|e| ApiError::Internal(e.into()))?;
    let key = job_key(job.job_id);
    redis.hset::<_, _, _, ()>(&key, "data", data).await?;
    redis.expire::<_, ()>(&key, JOB_TTL_SECS).await?;
    Ok(())
}

/// Durable enqueue: the job hash is written first, then the id joins the
/// pending list consumed by the worker pool.
pub async fn enqueue(
    redis: &mut redis::aio::MultiplexedConnection,
    job: &SummaryJob,
) -> Result<(), ApiError> {
    store(redis, job).await?;
    redis
        .lpush::<_, _, ()>(PENDING_KEY, job.job_id.to_string())
        .await?;
    tracing::debug!("job {} enqueued on {QUEUE_NAME}", job.job_id);
    Ok(())
}

/// Pop one job for a worker: the id moves atomically from pending to
/// processing, and the attempt counter advances.
pub async fn dequeue(
    redis: &mut redis::aio::MultiplexedConnection,
) -> Result<Option<SummaryJob>, ApiError> {
    let job_id: Option<String> = redis::cmd("RPOPLPUSH")
        .arg(PENDING_KEY)
        .arg(PROCESSING_KEY)
        .query_async(redis)
        .await?;

    let Some(job_id) = job_id else {
        return Ok(None);
    };

    let data: Option<String> = redis.hget(format!("ai:job:{job_id}"), "data").await?;
    let Some(data) = data else {
        // Hash expired under the id; drop the orphan from processing.
        redis
            .lrem::<_, _, ()>(PROCESSING_KEY, 1, &job_id)
            .await?;
        return Ok(None);
    };

    let mut job: SummaryJob =
        serde_json::from_str(&data).map_err(|e| ApiError::Internal(e.into()))?;
    job.state = JobState::Active;
    job.attempts_made += 1;
    job.updated_at = Utc::now();
    store(redis, &job).await?;

    Ok(Some(job))
}

pub async fn get_job(
    redis: &mut redis::aio::MultiplexedConnection,
    job_id: Uuid,
) -> Result<Option<SummaryJob>, ApiError> {
    let data: Option<String> = redis.hget(job_key(job_id), "data").await?;
    match data {
        Some(data) => Ok(Some(
            serde_json::from_str(&data).map_err(|e| ApiError::Internal(e.into()))?,
        )),
        None => Ok(None),
    }
}

/// Terminal success: record the summary id and move the job into the
/// bounded completed set.
pub async fn complete(
    redis: &mut redis::aio::MultiplexedConnection,
    job: &mut SummaryJob,
    summary_id: Uuid,
) -> Result<(), ApiError> {
    job.state = JobState::Completed;
    job.summary_id = Some(summary_id);
    job.failed_reason = None;
    job.updated_at = Utc::now();
    store(redis, job).await?;

    redis
        .lrem::<_, _, ()>(PROCESSING_KEY, 1, job.job_id.to_string())
        .await?;
    redis
        .lpush::<_, _, ()>(COMPLETED_KEY, job.job_id.to_string())
        .await?;
    redis
        .ltrim::<_, ()>(COMPLETED_KEY, 0, COMPLETED_RETENTION - 1)
        .await?;
    Ok(())
}

/// Failure path: one retry re-enqueues the job; exhausted attempts park it
/// in the bounded failed set. Returns whether a retry was scheduled.
pub async fn fail(
    redis: &mut redis::aio::MultiplexedConnection,
    job: &mut SummaryJob,
    reason: &str,
) -> Result<bool, ApiError> {
    job.updated_at = Utc::now();
    redis
        .lrem::<_, _, ()>(PROCESSING_KEY, 1, job.job_id.to_string())
        .await?;

    if job.can_retry() {
        job.state = JobState::Waiting;
        job.failed_reason = None;
        store(redis, job).await?;
        redis
            .lpush::<_, _, ()>(PENDING_KEY, job.job_id.to_string())
            .await?;
        tracing::warn!(
            "job {} failed ({reason}), retrying (attempt {}/{})",
            job.job_id,
            job.attempts_made,
            job.max_attempts
        );
        return Ok(true);
    }

    job.state = JobState::Failed;
    job.failed_reason = Some(reason.to_string());
    store(redis, job).await?;
    redis
        .lpush::<_, _, ()>(FAILED_KEY, job.job_id.to_string())
        .await?;
    redis
        .ltrim::<_, ()>(FAILED_KEY, 0, FAILED_RETENTION - 1)
        .await?;
    Ok(false)
}
