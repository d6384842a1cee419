//! Process-wide tracing setup for hosts embedding the engine.

/// Initialize tracing from the environment (`RUST_LOG`, `STOCKPILOT_LOG_FORMAT`).
///
/// Safe to call multiple times; subsequent calls become no-ops. An
/// unrecognised log format falls back to JSON.
pub fn init() {
    let config = ObservabilityConfig::from_env().unwrap_or_default();
    self::tracing::init_with(&config);
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LOG_FORMAT_VAR, LogFormat, ObservabilityConfig, ParseLogFormatError, init_with};
