//! Logging setup for injection-engine
//!
//! The engine emits `tracing` events under the `injection_engine` target:
//! container, scope and registry lifecycle at `debug`, individual resolutions at
//! `trace`, and transient-limit or cancelled-build conditions at `warn`.
//!
//! This module installs a `tracing-subscriber` formatter for hosts that do not
//! bring their own. The filter can be overridden at runtime with
//! `INJECTION_ENGINE_LOG` (standard `EnvFilter` syntax).
//!
//! # Features
//!
//! - `logging` - emit events (default)
//! - `logging-json` - JSON formatter
//! - `logging-pretty` - human-readable formatter
//!
//! Without a formatter feature the `init*` functions do nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! use injection_engine::logging;
//!
//! logging::builder()
//!     .trace()
//!     .engine_only()
//!     .compact()
//!     .init();
//! ```

use tracing::Level;

/// Target used by every event the engine emits.
pub const TARGET: &str = "injection_engine";

/// Environment variable overriding the configured filter.
pub const ENV_FILTER_VAR: &str = "INJECTION_ENGINE_LOG";

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Multi-line, colored
    Pretty,
    /// Single line per event
    Compact,
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
    with_thread_names: bool,
    env_override: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
            with_thread_names: false,
            env_override: true,
        }
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    /// Only show events from `target`.
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show events from the engine.
    pub fn engine_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    /// Ignore `INJECTION_ENGINE_LOG`.
    pub fn ignore_env(mut self) -> Self {
        self.env_override = false;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// The filter directive to install, given the environment override.
    #[cfg_attr(not(any(feature = "logging-json", feature = "logging-pretty")), allow(dead_code))]
    fn directive(&self, env: Option<String>) -> String {
        if self.env_override {
            if let Some(directive) = env.filter(|d| !d.trim().is_empty()) {
                return directive;
            }
        }
        match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the subscriber. Does nothing if one is already installed.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Install the subscriber; false if a global subscriber already exists.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> bool {
        use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

        let filter = EnvFilter::new(self.directive(std::env::var(ENV_FILTER_VAR).ok()));

        macro_rules! decorated {
            ($layer:expr, $config:expr) => {
                $layer
                    .with_file($config.with_file)
                    .with_line_number($config.with_line_number)
                    .with_thread_ids($config.with_thread_ids)
                    .with_thread_names($config.with_thread_names)
                    .with_target(true)
                    .boxed()
            };
        }

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => decorated!(fmt::layer().json(), self),
            // JSON output needs `logging-json`
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => decorated!(fmt::layer(), self),
            LogFormat::Pretty => decorated!(fmt::layer().pretty(), self),
            LogFormat::Compact => decorated!(fmt::layer().compact(), self),
        };

        tracing_subscriber::registry()
            .with(layer.with_filter(filter))
            .try_init()
            .is_ok()
    }

    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn try_init(self) -> bool {
        false
    }
}

pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// JSON when `logging-json` is enabled, pretty otherwise.
pub fn init() {
    if cfg!(feature = "logging-json") {
        init_json();
    } else {
        init_pretty();
    }
}

/// JSON output at `debug`, for log aggregation.
///
/// ```json
/// {"timestamp":"2024-01-01T00:00:00.000Z","level":"DEBUG","fields":{"message":"Creating new root container","scope":"scope-1"},"target":"injection_engine"}
/// ```
pub fn init_json() {
    builder().json().debug().init();
}

/// Human-readable output at `debug`.
pub fn init_pretty() {
    builder().pretty().debug().init();
}

/// Engine events only, at `trace`.
pub fn init_engine_only() {
    builder().engine_only().trace().compact().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.target.is_none());
        assert!(builder.env_override);
    }

    #[test]
    fn test_builder_chain() {
        let builder = LoggingBuilder::new()
            .trace()
            .pretty()
            .with_file()
            .with_line_number()
            .engine_only();

        assert_eq!(builder.level, Level::TRACE);
        assert_eq!(builder.format, LogFormat::Pretty);
        assert!(builder.with_file);
        assert!(builder.with_line_number);
        assert_eq!(builder.target, Some(TARGET));
    }

    #[test]
    fn test_directive() {
        let builder = LoggingBuilder::new().warn().engine_only();
        assert_eq!(builder.directive(None), "injection_engine=WARN");
        assert_eq!(builder.directive(Some("info".into())), "info");
        assert_eq!(builder.directive(Some("  ".into())), "injection_engine=WARN");
        assert_eq!(builder.ignore_env().directive(Some("info".into())), "injection_engine=WARN");
        assert_eq!(LoggingBuilder::new().info().directive(None), "INFO");
    }
}
