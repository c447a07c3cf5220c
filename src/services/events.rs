use uuid::Uuid;

use crate::models::summary::JobEvent;

/// One channel per job id; subscribers may see duplicates and must treat
/// terminal events idempotently.
pub fn channel(job_id: Uuid) -> String {
    format!("ai:job-events:{job_id}")
}

/// Publish a lifecycle event. Pub/sub failures are swallowed: a missed live
/// event is recovered by the stream endpoint's terminal-state check.
pub async fn publish(
    redis: &mut redis::aio::MultiplexedConnection,
    job_id: Uuid,
    event: &JobEvent,
) {
    let payload = match serde_json::to_string(event) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("job event serialization failed for {job_id}: {e}");
            return;
        }
    };
    if let Err(e) = redis::cmd("PUBLISH")
        .arg(channel(job_id))
        .arg(payload)
        .query_async::<()>(redis)
        .await
    {
        tracing::warn!("job event publish failed for {job_id}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_is_job_scoped() {
        let id = Uuid::nil();
        assert_eq!(channel(id), "ai:job-events:00000000-0000-0000-0000-000000000000");
    }
}
