//! Tracing subscriber setup for the relay.
//!
//! `RUST_LOG` takes precedence over the configured level and per-module
//! overrides. Output is human-readable by default, JSON lines on request.

use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level for {target}: {value}")]
    InvalidLevel { target: String, value: String },

    #[error("tracing subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub level: LevelFilter,
    /// Per-module level overrides (e.g. `salon_store` => DEBUG).
    pub module_levels: Vec<(String, LevelFilter)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from level names as they appear in settings files.
    pub fn from_names<'a>(
        level: &str,
        module_levels: impl IntoIterator<Item = (&'a str, &'a str)>,
        json: bool,
    ) -> Result<Self, TelemetryError> {
        let level = parse_level("default", level)?;
        let module_levels = module_levels
            .into_iter()
            .map(|(module, value)| Ok((module.to_string(), parse_level(module, value)?)))
            .collect::<Result<Vec<_>, TelemetryError>>()?;
        Ok(Self {
            level,
            module_levels,
            json,
        })
    }

    /// The `EnvFilter` directive string, e.g. `info,salon_store=debug`.
    pub fn directives(&self) -> String {
        let mut filter = self.level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
        }
        filter
    }
}

fn parse_level(target: &str, value: &str) -> Result<LevelFilter, TelemetryError> {
    LevelFilter::from_str(value).map_err(|_| TelemetryError::InvalidLevel {
        target: target.to_string(),
        value: value.to_string(),
    })
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let (json_layer, pretty_layer) = if config.json {
        let layer = fmt::layer().json().with_target(true).with_span_list(true);
        (Some(layer), None)
    } else {
        (None, Some(fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}
