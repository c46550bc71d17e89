//! Configuration module for the TeamFlow backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::AppError;

/// Upper bound on the retention window, roughly a century.
const MAX_RETENTION_DAYS: i64 = 36_500;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Credentials for the hosted image service.
#[derive(Debug, Clone, Default)]
pub struct ImageHostConfig {
    pub cloud_name: Option<String>,
    pub upload_preset: Option<String>,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key gating the whole API (disabled when unset)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    pub image_host: ImageHostConfig,
    /// Finished tasks older than this are swept
    pub retention_days: i64,
    pub sweep_interval: Duration,
    /// Emails that receive the admin role when their profile is first created
    pub admin_emails: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_psk = non_empty_var("TEAMFLOW_API_PSK");

        let db_path = env::var("TEAMFLOW_DB_PATH")
            .unwrap_or_else(|_| "./data/teamflow.sqlite".to_string())
            .into();

        let bind_addr = env::var("TEAMFLOW_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid TEAMFLOW_BIND_ADDR: {}", e)))?;

        let log_level = env::var("TEAMFLOW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_format = match env::var("TEAMFLOW_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("text") | Err(_) => LogFormat::Text,
            Ok(other) => {
                return Err(AppError::Config(format!(
                    "Invalid TEAMFLOW_LOG_FORMAT: {} (expected text or json)",
                    other
                )))
            }
        };

        let image_host = ImageHostConfig {
            cloud_name: non_empty_var("TEAMFLOW_CLOUDINARY_CLOUD_NAME"),
            upload_preset: non_empty_var("TEAMFLOW_CLOUDINARY_UPLOAD_PRESET"),
        };

        let retention_days =
            validate_retention_days(parse_var("TEAMFLOW_RETENTION_DAYS", 30i64)?)?;

        let sweep_interval_secs = parse_var("TEAMFLOW_SWEEP_INTERVAL_SECS", 86_400u64)?;
        if sweep_interval_secs == 0 {
            return Err(AppError::Config(
                "TEAMFLOW_SWEEP_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        let admin_emails = env::var("TEAMFLOW_ADMIN_EMAILS")
            .map(|raw| parse_email_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            log_format,
            image_host,
            retention_days,
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            admin_emails,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn validate_retention_days(days: i64) -> Result<i64, AppError> {
    if !(0..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(AppError::Config(format!(
            "TEAMFLOW_RETENTION_DAYS must be between 0 and {}, got {}",
            MAX_RETENTION_DAYS, days
        )));
    }
    Ok(days)
}

/// Split a comma separated list of emails, lowercased.
fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        for key in [
            "TEAMFLOW_API_PSK",
            "TEAMFLOW_DB_PATH",
            "TEAMFLOW_BIND_ADDR",
            "TEAMFLOW_LOG_LEVEL",
            "TEAMFLOW_LOG_FORMAT",
            "TEAMFLOW_CLOUDINARY_CLOUD_NAME",
            "TEAMFLOW_CLOUDINARY_UPLOAD_PRESET",
            "TEAMFLOW_RETENTION_DAYS",
            "TEAMFLOW_SWEEP_INTERVAL_SECS",
            "TEAMFLOW_ADMIN_EMAILS",
        ] {
            env::remove_var(key);
        }

        let config = Config::from_env().unwrap();

        assert!(config.api_psk.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/teamflow.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.image_host.cloud_name.is_none());
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.sweep_interval, Duration::from_secs(86_400));
        assert!(config.admin_emails.is_empty());
    }

    #[test]
    fn test_retention_days_are_bounded() {
        assert_eq!(validate_retention_days(0).unwrap(), 0);
        assert_eq!(
            validate_retention_days(MAX_RETENTION_DAYS).unwrap(),
            MAX_RETENTION_DAYS
        );

        for days in [-1, MAX_RETENTION_DAYS + 1, i64::MAX] {
            let err = validate_retention_days(days).unwrap_err();
            assert_eq!(err.error_code(), "CONFIG_ERROR");
        }
    }

    #[test]
    fn test_parse_email_list() {
        assert_eq!(
            parse_email_list(" Boss@Example.com, ,ops@example.com "),
            vec!["boss@example.com".to_string(), "ops@example.com".to_string()]
        );
        assert!(parse_email_list("").is_empty());
    }
}
