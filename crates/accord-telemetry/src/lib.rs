//! # Accord Telemetry
//!
//! Structured logging setup for the node binary. Every crate logs through
//! `tracing` macros with structured fields; this crate owns the single
//! subscriber installation so libraries never configure logging themselves.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter directive, e.g. `info` or `accord_chain=debug,info`.
    /// The `ACCORD_LOG` environment variable overrides it.
    pub filter: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Telemetry setup errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    SetGlobal(String),
}

/// Install the global tracing subscriber.
///
/// Call once, from the binary, before anything logs.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_env("ACCORD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.filter.clone()));

    let result = if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    result.map_err(|e| TelemetryError::SetGlobal(e.to_string()))
}
