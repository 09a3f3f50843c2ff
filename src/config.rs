use std::env;
use std::time::Duration;

use crate::engine::lifecycle::LifecycleSettings;
use crate::error::AppError;

const DEFAULT_NAVIGATION_ORIGIN: &str = "Colombo";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub arrival_delay_ms: u64,
    pub collaborator_timeout_ms: u64,
    pub navigation_origin: Option<String>,
    pub require_proof: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            arrival_delay_ms: parse_or_default("ARRIVAL_DELAY_MS", 10_000)?,
            collaborator_timeout_ms: parse_or_default("COLLABORATOR_TIMEOUT_MS", 5_000)?,
            navigation_origin: optional_string(
                env::var("NAVIGATION_ORIGIN").ok(),
                DEFAULT_NAVIGATION_ORIGIN,
            ),
            require_proof: parse_or_default("REQUIRE_PROOF", false)?,
        })
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            arrival_delay: Duration::from_millis(self.arrival_delay_ms),
            collaborator_timeout: Duration::from_millis(self.collaborator_timeout_ms),
            navigation_origin: self.navigation_origin.clone(),
            require_proof: self.require_proof,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| AppError::Internal(format!("invalid {key}: {err}")))
}

// An explicitly empty value disables the setting.
fn optional_string(raw: Option<String>, default: &str) -> Option<String> {
    match raw {
        Some(value) if value.trim().is_empty() => None,
        Some(value) => Some(value.trim().to_string()),
        None => Some(default.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{optional_string, parse_value};
    use crate::error::AppError;

    #[test]
    fn parse_value_trims_whitespace() {
        let delay: u64 = parse_value("ARRIVAL_DELAY_MS", " 2500 ").unwrap();
        assert_eq!(delay, 2500);
    }

    #[test]
    fn parse_value_reports_the_offending_key() {
        let err = parse_value::<bool>("REQUIRE_PROOF", "maybe").unwrap_err();
        match err {
            AppError::Internal(msg) => assert!(msg.starts_with("invalid REQUIRE_PROOF")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_navigation_origin_disables_it() {
        assert_eq!(optional_string(Some("  ".to_string()), "Colombo"), None);
        assert_eq!(
            optional_string(None, "Colombo"),
            Some("Colombo".to_string())
        );
        assert_eq!(
            optional_string(Some("Galle".to_string()), "Colombo"),
            Some("Galle".to_string())
        );
    }
}
