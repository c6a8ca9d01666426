use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_VERIFICATION_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;
pub const DEFAULT_MAX_FORM_SESSIONS: usize = 1000;

const REQUIRED_VARS: [&str; 1] = ["OPENROUTER_API_KEY"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub port: u16,
    pub frontend_url: String,
    pub openrouter_endpoint: String,
    pub verification_model: String,
    pub max_upload_bytes: usize,
    /// Idle time after which an open form session is dropped.
    pub session_ttl: Duration,
    pub max_form_sessions: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let environment = get("ENVIRONMENT", "development");
        let port = parse_var(&lookup, "PORT", 3000)?;
        let max_upload_bytes = parse_var(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let session_ttl_secs = parse_var(&lookup, "SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        let max_form_sessions = parse_var(&lookup, "MAX_FORM_SESSIONS", DEFAULT_MAX_FORM_SESSIONS)?;

        Ok(Self {
            environment,
            port,
            frontend_url: get("FRONTEND_URL", "http://localhost:8080"),
            openrouter_endpoint: get("OPENROUTER_ENDPOINT", DEFAULT_OPENROUTER_ENDPOINT),
            verification_model: get("VERIFICATION_MODEL", DEFAULT_VERIFICATION_MODEL),
            max_upload_bytes,
            session_ttl: Duration::from_secs(session_ttl_secs),
            max_form_sessions,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

/// Fails fast on variables the server cannot run without.
pub fn validate_env() -> Result<(), ConfigError> {
    for var in REQUIRED_VARS {
        std::env::var(var).map_err(|_| ConfigError::Missing(var))?;
    }
    Ok(())
}
