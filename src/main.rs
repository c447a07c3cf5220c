use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use redis::Client as RedisClient;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medibrief::config::Config;
use medibrief::middleware::{origin, rate_limit};
use medibrief::models::auth::JwtSecret;
use medibrief::services::{metrics, worker};
use medibrief::{db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis_client = RedisClient::open(config.redis_url.as_str())?;
    let redis_conn = redis_client.get_multiplexed_async_connection().await?;
    let mut ping_conn = redis_conn.clone();
    let _: String = redis::cmd("PING").query_async(&mut ping_conn).await?;
    info!("Redis connected");

    let state = AppState {
        db: pool.clone(),
        redis: redis_conn,
        redis_client,
        config: config.clone(),
    };

    metrics::start(pool);
    worker::start(state.clone());
    info!(
        "AI summary worker pool started (concurrency {})",
        config.ai_worker_concurrency
    );

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(origin::allow_origin(
            config.allowed_origins.clone(),
            config.enforce_https,
        ));

    let jwt_secret = JwtSecret(config.jwt_secret.clone());

    // Credential endpoints sit behind the tighter auth tier.
    let auth_routes = Router::new()
        .route("/auth/register-clinic", post(routes::auth::register_clinic))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/patient-setup", post(routes::auth::patient_setup))
        .route("/auth/patient-login", post(routes::auth::patient_login))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit::auth_tier,
        ));

    // Submission endpoints that reach the model sit behind the AI tier.
    let ai_submit_routes = Router::new()
        .route("/ai/generate-summary/{patient_id}", post(routes::ai::generate_summary))
        .route("/ai/chat/{patient_id}", post(routes::ai::chat))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit::ai_tier,
        ));

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Staff
        .route("/users/me", get(routes::users::me))
        .route("/users", get(routes::users::list_staff).post(routes::users::create_staff))
        .route("/users/{id}", axum::routing::delete(routes::users::archive_staff))
        .route("/clinic/info", get(routes::clinic::clinic_info))
        // Patients
        .route("/patients", get(routes::patients::list_patients).post(routes::patients::create_patient))
        .route(
            "/patients/{id}",
            get(routes::patients::get_patient)
                .put(routes::patients::update_patient)
                .delete(routes::patients::delete_patient),
        )
        .route("/patients/{id}/invite", post(routes::patients::create_invite))
        // Clinical records. GET takes a patient id, DELETE a record id.
        .route("/vitals", post(routes::vitals::create_vital))
        .route(
            "/vitals/{id}",
            get(routes::vitals::list_vitals).delete(routes::vitals::delete_vital),
        )
        .route("/labs", post(routes::labs::create_lab))
        .route(
            "/labs/{id}",
            get(routes::labs::list_labs).delete(routes::labs::delete_lab),
        )
        .route("/consultations", post(routes::consultations::create_consultation))
        .route(
            "/consultations/{id}",
            get(routes::consultations::list_consultations)
                .delete(routes::consultations::delete_consultation),
        )
        // AI pipeline reads
        .route("/ai/jobs/{job_id}", get(routes::ai::job_status))
        .route("/ai/stream/{job_id}", get(routes::ai::stream_job))
        .route("/ai/summaries/patient/{patient_id}", get(routes::ai::list_summaries))
        .route("/ai/summaries/{summary_id}", get(routes::ai::get_summary))
        // Analytics
        .route("/analytics/patient/{patient_id}", get(routes::analytics::patient_analytics))
        .route("/analytics/clinic-risk", get(routes::analytics::clinic_risk))
        // Audit
        .route("/audit", get(routes::audit_log::list_audit_log))
        // Patient portal
        .route("/portal/vitals", get(routes::portal::my_vitals))
        .route("/portal/labs", get(routes::portal::my_labs))
        .route("/portal/analytics", get(routes::portal::my_analytics))
        .route("/portal/appointments", get(routes::portal::my_appointments))
        .route("/portal/summaries", get(routes::portal::my_summaries))
        .route("/portal/me", get(routes::portal::my_profile).put(routes::portal::update_profile))
        .route("/portal/security", put(routes::portal::change_password))
        .merge(auth_routes)
        .merge(ai_submit_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit::global_tier,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            origin::require_https,
        ))
        .layer(axum::Extension(jwt_secret))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("medibrief API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
