//! Structured logging setup for forgeline
//!
//! Installs a `tracing` subscriber once per process. Output goes to stderr so
//! that stdout stays free for the JSON-lines bus.
//!
//! # Example
//!
//! ```no_run
//! use forgeline::util::logging;
//!
//! logging::init_from_env();
//! tracing::info!(correlation_id = "c-1", "Worker started");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Crates whose own logging is limited to warnings unless `RUST_LOG` says otherwise
const QUIET_DEPENDENCIES: &[&str] = &["h2", "hyper", "hyper_util", "reqwest"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for forgeline's own events
    pub level: Level,

    /// One JSON object per event instead of human-readable lines
    pub use_json: bool,

    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with source locations and thread ids, for log shippers
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }

    /// Reads `FORGELINE_LOG_LEVEL` and `FORGELINE_LOG_JSON`
    pub fn from_env() -> Self {
        let level = env::var("FORGELINE_LOG_LEVEL")
            .map(|v| parse_level(&v))
            .unwrap_or(Level::INFO);

        let use_json = env::var("FORGELINE_LOG_JSON")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        if use_json {
            Self {
                level,
                ..Self::production()
            }
        } else {
            Self::with_level(level)
        }
    }
}

/// Parses a log level, falling back to INFO
///
/// ```
/// use forgeline::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("Debug"), Level::DEBUG);
/// assert_eq!(parse_level("loud"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    let mut directives = vec![format!("forgeline={}", level)];
    if env::var("RUST_LOG").is_err() {
        directives.extend(QUIET_DEPENDENCIES.iter().map(|c| format!("{}=warn", c)));
    }
    for directive in directives {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive '{}': {}", directive, e),
        }
    }
    filter
}

/// Installs the global subscriber; later calls are ignored
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_thread_names(config.include_thread_ids);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    });
}

pub fn init_from_env() {
    init_logging(LoggingConfig::from_env());
}

/// Initializes with an explicit level, e.g. from the `--log-level` flag
pub fn with_level(level_str: &str) {
    let mut config = LoggingConfig::from_env();
    config.level = parse_level(level_str);
    init_logging(config);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level(" error "), Level::ERROR);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_production_config() {
        let config = LoggingConfig::production();
        assert!(config.use_json);
        assert!(config.include_location);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_json_flag() {
        let old_json = env::var("FORGELINE_LOG_JSON").ok();
        let old_level = env::var("FORGELINE_LOG_LEVEL").ok();
        env::set_var("FORGELINE_LOG_JSON", "true");
        env::set_var("FORGELINE_LOG_LEVEL", "debug");

        let config = LoggingConfig::from_env();

        match old_json {
            Some(v) => env::set_var("FORGELINE_LOG_JSON", v),
            None => env::remove_var("FORGELINE_LOG_JSON"),
        }
        match old_level {
            Some(v) => env::set_var("FORGELINE_LOG_LEVEL", v),
            None => env::remove_var("FORGELINE_LOG_LEVEL"),
        }

        assert!(config.use_json);
        assert_eq!(config.level, Level::DEBUG);
    }

    #[test]
    fn test_filter_builds() {
        let filter = build_filter(Level::DEBUG);
        assert!(filter.to_string().contains("forgeline=debug"));
    }
}
