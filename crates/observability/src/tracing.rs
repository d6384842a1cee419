//! Tracing/logging initialization.
//!
//! JSON lines by default so engine events (reservation ids, warehouse ids,
//! quantities) land as structured fields; `pretty` is meant for local runs.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Selects the output format.
pub const LOG_FORMAT_VAR: &str = "STOCKPILOT_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown log format `{0}` (expected `json` or `pretty`)")]
pub struct ParseLogFormatError(String);

impl FromStr for LogFormat {
    type Err = ParseLogFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ParseLogFormatError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset or unparsable.
    pub default_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self, ParseLogFormatError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ParseLogFormatError> {
        let format = match lookup(LOG_FORMAT_VAR) {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => LogFormat::default(),
        };
        Ok(Self {
            format,
            ..Self::default()
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber described by `config`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with(config: &ObservabilityConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_thread_names(true);

    let _ = match config.format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_json() {
        let config = ObservabilityConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.default_filter, "info");
    }

    #[test]
    fn format_is_read_case_insensitively() {
        let config = ObservabilityConfig::from_lookup(|var| {
            (var == LOG_FORMAT_VAR).then(|| " Pretty ".to_string())
        })
        .unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert_eq!(err, ParseLogFormatError("xml".to_string()));
    }

    #[test]
    fn repeated_init_is_a_no_op() {
        let config = ObservabilityConfig::default();
        init_with(&config);
        init_with(&config);
        ::tracing::info!("still alive");
    }
}
