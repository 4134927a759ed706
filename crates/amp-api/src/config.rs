//! API configuration.

use std::collections::HashSet;
use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Users allowed to call admin routes
    pub admin_uids: HashSet<String>,
    /// Interval between monthly reset sweeps
    pub monthly_reset_interval: Duration,
    /// Interval between pending charge replays
    pub billing_reconcile_interval: Duration,
    /// Deadline for each upstream step of a pipeline
    pub pipeline_step_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            max_body_size: 12 * 1024 * 1024, // 10MB image plus form fields
            environment: "development".to_string(),
            admin_uids: HashSet::new(),
            monthly_reset_interval: Duration::from_secs(3600),
            billing_reconcile_interval: Duration::from_secs(300),
            pipeline_step_timeout: Duration::from_secs(600),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|s| {
        s.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            cors_origins: env_list("CORS_ORIGINS")
                .filter(|o| !o.is_empty())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS").unwrap_or(defaults.rate_limit_rps),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit_burst),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            admin_uids: env_list("ADMIN_UIDS")
                .map(|uids| uids.into_iter().collect())
                .unwrap_or_default(),
            monthly_reset_interval: env_parse("MONTHLY_RESET_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.monthly_reset_interval),
            billing_reconcile_interval: env_parse("BILLING_RECONCILE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.billing_reconcile_interval),
            pipeline_step_timeout: env_parse("PIPELINE_STEP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.pipeline_step_timeout),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    pub fn is_admin(&self, uid: &str) -> bool {
        self.admin_uids.contains(uid)
    }
}
