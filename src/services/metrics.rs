use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec};
use sqlx::PgPool;
use tracing::{info, warn};

lazy_static! {
    // ── Event counters ──────────────────────────────────────────────────────
    pub static ref LOGINS_COUNTER: CounterVec = register_counter_vec!(
        "api_logins_total",
        "Login attempts by principal kind and status",
        &["kind", "status"]
    ).unwrap();

    pub static ref AI_JOBS_COUNTER: CounterVec = register_counter_vec!(
        "api_ai_jobs_total",
        "Summary jobs by terminal status",
        &["status"]
    ).unwrap();

    pub static ref AI_QUOTA_REJECTIONS_COUNTER: CounterVec = register_counter_vec!(
        "api_ai_quota_rejections_total",
        "Summary submissions rejected by the monthly quota",
        &["clinic"]
    ).unwrap();

    // ── Business gauges (refreshed by the collector) ────────────────────────
    pub static ref PATIENTS_GAUGE: GaugeVec = register_gauge_vec!(
        "clinic_patients_active_total",
        "Active patients per clinic",
        &["clinic"]
    ).unwrap();

    pub static ref SUMMARIES_GAUGE: GaugeVec = register_gauge_vec!(
        "clinic_ai_summaries_total",
        "Stored AI summaries per clinic",
        &["clinic"]
    ).unwrap();

    pub static ref CLINICS_GAUGE: Gauge = register_gauge!(
        "clinics_total",
        "Registered clinics"
    ).unwrap();
}

/// Spawn the background collector (refreshes every 5 minutes).
pub fn start(pool: PgPool) {
    tokio::spawn(async move {
        if let Err(e) = collect(&pool).await {
            warn!("metrics: initial collection failed: {e}");
        }
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
            if let Err(e) = collect(&pool).await {
                warn!("metrics: collection failed: {e}");
            }
        }
    });
}

// Row policies apply to the collector too, so each clinic is counted under
// its own session binding.
async fn collect(pool: &PgPool) -> anyhow::Result<()> {
    let clinics: Vec<uuid::Uuid> = sqlx::query_scalar("SELECT id FROM clinics")
        .fetch_all(pool)
        .await?;

    CLINICS_GAUGE.set(clinics.len() as f64);

    for clinic in &clinics {
        let mut tx = crate::db::rls::clinic_tx(pool, *clinic)
            .await
            .map_err(|e| anyhow::anyhow!("clinic binding failed: {e}"))?;
        let label = clinic.to_string();

        let patients: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM patients
             WHERE clinic_id = $1 AND is_archived = FALSE",
        )
        .bind(clinic)
        .fetch_one(&mut *tx)
        .await
        .unwrap_or(0);
        PATIENTS_GAUGE.with_label_values(&[&label]).set(patients as f64);

        let summaries: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT
             FROM ai_summaries s JOIN patients p ON p.id = s.patient_id
             WHERE p.clinic_id = $1 AND s.deleted_at IS NULL",
        )
        .bind(clinic)
        .fetch_one(&mut *tx)
        .await
        .unwrap_or(0);
        SUMMARIES_GAUGE.with_label_values(&[&label]).set(summaries as f64);

        tx.commit().await?;
    }

    info!("metrics: collected for {} clinic(s)", clinics.len());
    Ok(())
}
