//! Tracing subscriber setup.
//!
//! Everything logs through `tracing`; this crate only decides where the
//! output goes and at which level. `RUST_LOG` overrides the configured
//! directive when set.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level {0:?}")]
    InvalidLevel(String),
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "rollcall_live" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stderr instead of the human-readable format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build a config from textual levels, as found in settings files.
    pub fn from_names<'a>(
        level: &str,
        modules: impl IntoIterator<Item = (&'a str, &'a str)>,
        json: bool,
    ) -> Result<Self, TelemetryError> {
        let log_level = parse_level(level)?;
        let module_levels = modules
            .into_iter()
            .map(|(module, lvl)| Ok((module.to_string(), parse_level(lvl)?)))
            .collect::<Result<Vec<_>, TelemetryError>>()?;
        Ok(Self {
            log_level,
            module_levels,
            json,
        })
    }
}

fn parse_level(name: &str) -> Result<Level, TelemetryError> {
    Level::from_str(name.trim()).map_err(|_| TelemetryError::InvalidLevel(name.to_string()))
}

/// The filter directive string derived from a config, e.g.
/// `info,rollcall_live=debug`.
pub fn build_filter_directive(config: &TelemetryConfig) -> String {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let directive = build_filter_directive(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_default_only() {
        assert_eq!(build_filter_directive(&TelemetryConfig::default()), "info");
    }

    #[test]
    fn directive_with_modules() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("rollcall_live".into(), Level::DEBUG),
                ("reqwest".into(), Level::ERROR),
            ],
            json: false,
        };
        assert_eq!(
            build_filter_directive(&config),
            "warn,rollcall_live=debug,reqwest=error"
        );
    }

    #[test]
    fn from_names_parses_levels() {
        let config =
            TelemetryConfig::from_names("debug", [("rollcall_views", "trace")], true).unwrap();
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.module_levels[0].1, Level::TRACE);
        assert!(config.json);
    }

    #[test]
    fn from_names_rejects_unknown_level() {
        let err = TelemetryConfig::from_names("loud", [], false).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidLevel(ref s) if s == "loud"));
    }

    #[test]
    fn second_init_fails() {
        let config = TelemetryConfig::default();
        let _ = init_telemetry(&config);
        assert!(matches!(
            init_telemetry(&config),
            Err(TelemetryError::AlreadyInitialized(_))
        ));
    }
}
