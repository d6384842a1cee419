//! Engine configuration.

use std::time::Duration;

use anyhow::Context;
use thiserror::Error;

pub const HOLD_TTL_SECS_VAR: &str = "STOCKPILOT_HOLD_TTL_SECS";
pub const SWEEP_INTERVAL_MS_VAR: &str = "STOCKPILOT_SWEEP_INTERVAL_MS";
pub const SWEEP_BATCH_LIMIT_VAR: &str = "STOCKPILOT_SWEEP_BATCH_LIMIT";
pub const MAX_WAREHOUSES_VAR: &str = "STOCKPILOT_MAX_WAREHOUSES";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be an unsigned integer, got {value:?}")]
    NotANumber { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Expiry applied to allocation holds whose request carries none.
    /// `None` leaves such holds open-ended.
    pub default_hold_ttl: Option<chrono::Duration>,
    /// How often the expiry sweeper runs.
    pub sweep_interval: Duration,
    /// Maximum overdue reservations one sweep pass handles.
    pub sweep_batch_limit: usize,
    /// Warehouse cap for allocations that do not set their own.
    pub default_max_warehouses: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_hold_ttl: Some(chrono::Duration::minutes(30)),
            sweep_interval: Duration::from_secs(30),
            sweep_batch_limit: 500,
            default_max_warehouses: None,
        }
    }
}

impl EngineConfig {
    pub fn with_default_hold_ttl(mut self, ttl: Option<chrono::Duration>) -> Self {
        self.default_hold_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_sweep_batch_limit(mut self, limit: usize) -> Self {
        self.sweep_batch_limit = limit;
        self
    }

    pub fn with_default_max_warehouses(mut self, max: Option<usize>) -> Self {
        self.default_max_warehouses = max;
        self
    }

    /// Read overrides from the process environment.
    ///
    /// `STOCKPILOT_HOLD_TTL_SECS=0` disables the default hold expiry.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
            .context("invalid stockpilot engine configuration")
    }

    /// Build from an arbitrary variable lookup; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = parse(&lookup, HOLD_TTL_SECS_VAR)? {
            config.default_hold_ttl = match secs {
                0 => None,
                secs => Some(chrono::Duration::seconds(
                    i64::try_from(secs).unwrap_or(i64::MAX),
                )),
            };
        }
        if let Some(ms) = parse(&lookup, SWEEP_INTERVAL_MS_VAR)? {
            if ms == 0 {
                return Err(ConfigError::Zero {
                    var: SWEEP_INTERVAL_MS_VAR,
                });
            }
            config.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(limit) = parse(&lookup, SWEEP_BATCH_LIMIT_VAR)? {
            if limit == 0 {
                return Err(ConfigError::Zero {
                    var: SWEEP_BATCH_LIMIT_VAR,
                });
            }
            config.sweep_batch_limit = usize::try_from(limit).unwrap_or(usize::MAX);
        }
        if let Some(max) = parse(&lookup, MAX_WAREHOUSES_VAR)? {
            config.default_max_warehouses = match max {
                0 => None,
                max => Some(usize::try_from(max).unwrap_or(usize::MAX)),
            };
        }

        Ok(config)
    }
}

fn parse(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::NotANumber { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            (HOLD_TTL_SECS_VAR, "900"),
            (SWEEP_INTERVAL_MS_VAR, "1500"),
            (SWEEP_BATCH_LIMIT_VAR, "50"),
            (MAX_WAREHOUSES_VAR, "3"),
        ]))
        .unwrap();

        assert_eq!(config.default_hold_ttl, Some(chrono::Duration::minutes(15)));
        assert_eq!(config.sweep_interval, Duration::from_millis(1500));
        assert_eq!(config.sweep_batch_limit, 50);
        assert_eq!(config.default_max_warehouses, Some(3));
    }

    #[test]
    fn zero_ttl_disables_default_expiry() {
        let config = EngineConfig::from_lookup(lookup(&[(HOLD_TTL_SECS_VAR, "0")])).unwrap();
        assert_eq!(config.default_hold_ttl, None);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_eq!(
            EngineConfig::from_lookup(lookup(&[(SWEEP_BATCH_LIMIT_VAR, "lots")])),
            Err(ConfigError::NotANumber {
                var: SWEEP_BATCH_LIMIT_VAR,
                value: "lots".to_string(),
            })
        );
        assert_eq!(
            EngineConfig::from_lookup(lookup(&[(SWEEP_INTERVAL_MS_VAR, "0")])),
            Err(ConfigError::Zero {
                var: SWEEP_INTERVAL_MS_VAR
            })
        );
    }
}
