use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub enforce_https: bool,
    pub rate_limit_window_secs: u64,
    pub rate_limit_global_max: u64,
    pub rate_limit_auth_max: u64,
    pub rate_limit_ai_max: u64,
    // LLM (optional; the pipeline falls back to the deterministic renderer)
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
    pub ai_monthly_limit_free: i64,
    pub ai_monthly_limit_pro: i64,
    pub ai_monthly_limit_enterprise: i64,
    pub ai_worker_concurrency: usize,
    pub structured_input_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 bytes");
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            jwt_secret,
            jwt_expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "86400".into())
                .parse()?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT").unwrap_or_else(|_| "8080".into()).parse()?,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            enforce_https: env::var("ENFORCE_HTTPS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW_SECS")
                .unwrap_or_else(|_| "60".into())
                .parse()?,
            rate_limit_global_max: env::var("RATE_LIMIT_GLOBAL_MAX")
                .unwrap_or_else(|_| "120".into())
                .parse()?,
            rate_limit_auth_max: env::var("RATE_LIMIT_AUTH_MAX")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            rate_limit_ai_max: env::var("RATE_LIMIT_AI_MAX")
                .unwrap_or_else(|_| "5".into())
                .parse()?,
            llm_api_key: env::var("LLM_API_KEY").ok().filter(|s| !s.is_empty()),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            ai_monthly_limit_free: env::var("AI_MONTHLY_LIMIT_FREE")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
            ai_monthly_limit_pro: env::var("AI_MONTHLY_LIMIT_PRO")
                .unwrap_or_else(|_| "100".into())
                .parse()?,
            ai_monthly_limit_enterprise: env::var("AI_MONTHLY_LIMIT_ENTERPRISE")
                .unwrap_or_else(|_| "1000".into())
                .parse()?,
            ai_worker_concurrency: env::var("AI_WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "2".into())
                .parse()?,
            structured_input_ttl_secs: env::var("STRUCTURED_INPUT_TTL_SECS")
                .unwrap_or_else(|_| "300".into())
                .parse()?,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
