//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

use medscribe_ai::OpenAiConfig;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Postgres URL. `None` selects the in-memory stores.
    pub database_url: Option<String>,
    pub openai: OpenAiConfig,
    pub job_workers: usize,
    pub blob_max_age: Duration,
    pub blob_sweep_interval: Duration,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            database_url: None,
            openai: OpenAiConfig::new(""),
            job_workers: 4,
            blob_max_age: Duration::from_secs(24 * 60 * 60),
            blob_sweep_interval: Duration::from_secs(24 * 60 * 60),
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = AppConfig::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("BIND_ADDR") {
            cfg.bind_addr = parse("BIND_ADDR", &v)?;
        }

        match var("JWT_SECRET") {
            Some(secret) => cfg.jwt_secret = secret,
            None => warn!("JWT_SECRET not set; using insecure dev default"),
        }

        cfg.database_url = var("DATABASE_URL");

        match var("OPENAI_API_KEY") {
            Some(key) => cfg.openai.api_key = key,
            None => warn!("OPENAI_API_KEY not set; AI jobs will fail"),
        }
        if let Some(v) = var("OPENAI_BASE_URL") {
            cfg.openai.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = var("OPENAI_TRANSCRIBE_MODEL") {
            cfg.openai.transcribe_model = v;
        }
        if let Some(v) = var("OPENAI_CHAT_MODEL") {
            cfg.openai.chat_model = v;
        }
        if let Some(v) = var("REPORT_LANGUAGE") {
            cfg.openai.report_language = v;
        }

        if let Some(v) = var("JOB_WORKERS") {
            cfg.job_workers = parse("JOB_WORKERS", &v)?;
            if cfg.job_workers == 0 {
                return Err(invalid("JOB_WORKERS", &v, "must be at least 1"));
            }
        }
        if let Some(v) = var("BLOB_MAX_AGE_SECS") {
            cfg.blob_max_age = Duration::from_secs(parse("BLOB_MAX_AGE_SECS", &v)?);
        }
        if let Some(v) = var("BLOB_SWEEP_INTERVAL_SECS") {
            let secs: u64 = parse("BLOB_SWEEP_INTERVAL_SECS", &v)?;
            if secs == 0 {
                return Err(invalid("BLOB_SWEEP_INTERVAL_SECS", &v, "must be positive"));
            }
            cfg.blob_sweep_interval = Duration::from_secs(secs);
        }
        if let Some(v) = var("MAX_UPLOAD_BYTES") {
            cfg.max_upload_bytes = parse("MAX_UPLOAD_BYTES", &v)?;
        }

        Ok(cfg)
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(name, value, &e.to_string()))
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(cfg.jwt_secret, "dev-secret");
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.job_workers, 4);
        assert_eq!(cfg.blob_max_age, Duration::from_secs(86_400));
        assert_eq!(cfg.max_upload_bytes, 26_214_400);
        assert_eq!(cfg.openai.chat_model, "gpt-4-turbo");
        assert_eq!(cfg.openai.report_language, "Spanish");
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("JWT_SECRET", "s3cret"),
            ("DATABASE_URL", "postgres://localhost/medscribe"),
            ("OPENAI_BASE_URL", "http://127.0.0.1:4010/v1/"),
            ("REPORT_LANGUAGE", "English"),
            ("JOB_WORKERS", "8"),
            ("BLOB_SWEEP_INTERVAL_SECS", "600"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.jwt_secret, "s3cret");
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/medscribe"));
        assert_eq!(cfg.openai.base_url, "http://127.0.0.1:4010/v1");
        assert_eq!(cfg.openai.report_language, "English");
        assert_eq!(cfg.job_workers, 8);
        assert_eq!(cfg.blob_sweep_interval, Duration::from_secs(600));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = config(&[("JOB_WORKERS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "JOB_WORKERS", .. }));

        let err = config(&[("JOB_WORKERS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "JOB_WORKERS", .. }));

        let err = config(&[("MAX_UPLOAD_BYTES", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "MAX_UPLOAD_BYTES", .. }));
    }
}
