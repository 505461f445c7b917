//! Worker configuration

use std::env;

use thiserror::Error;

pub const DEFAULT_MARK_EXPIRED_CRON: &str = "0 0 * * * *";
pub const DEFAULT_WARNING_EMAILS_CRON: &str = "0 0 9 * * *";
pub const DEFAULT_PROCESS_EXPIRED_CRON: &str = "0 15 * * * *";

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // Redis (cache invalidation disabled when unset)
    pub redis_url: Option<String>,

    // Fly.io (certificate teardown skipped when unset)
    pub fly_api_token: Option<String>,
    pub fly_app_name: Option<String>,

    // Schedules, six-field cron in UTC
    pub mark_expired_cron: String,
    pub warning_emails_cron: String,
    pub process_expired_cron: String,

    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            run_migrations: parse_bool(env::var("RUN_MIGRATIONS").ok().as_deref()),

            redis_url: non_empty(env::var("REDIS_URL").ok()),

            fly_api_token: non_empty(env::var("FLY_API_TOKEN").ok()),
            fly_app_name: non_empty(env::var("FLY_APP_NAME").ok()),

            mark_expired_cron: cron_var("MARK_EXPIRED_CRON", DEFAULT_MARK_EXPIRED_CRON)?,
            warning_emails_cron: cron_var("WARNING_EMAILS_CRON", DEFAULT_WARNING_EMAILS_CRON)?,
            process_expired_cron: cron_var("PROCESS_EXPIRED_CRON", DEFAULT_PROCESS_EXPIRED_CRON)?,

            json_logs: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

/// Read a cron expression, checking it has the six fields the scheduler expects
fn cron_var(name: &'static str, default: &str) -> Result<String, ConfigError> {
    let value = non_empty(env::var(name).ok()).unwrap_or_else(|| default.to_string());
    let fields = value.split_whitespace().count();
    if !(6..=7).contains(&fields) {
        return Err(ConfigError::InvalidCron(name, value));
    }
    Ok(value)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid cron expression in {0}: {1:?} (expected sec min hour day month weekday)")]
    InvalidCron(&'static str, String),
}
