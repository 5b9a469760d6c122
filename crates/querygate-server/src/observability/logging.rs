//! Structured logging configuration.
//!
//! The gate logs through `tracing`; nothing is printed unless the embedding
//! application installs a subscriber. [`init_logging`] installs one.
//!
//! # Log Format
//!
//! With JSON enabled each event is one object per line:
//!
//! ```json
//! {"timestamp":"...","level":"DEBUG","target":"querygate_server::handlers::gate","fields":{"message":"cache hit","operation":"GetAccounts"}}
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Whether to use JSON format (true) or text format (false)
    pub json_format: bool,
    /// The default log level if RUST_LOG is not set
    pub default_level: Level,
    /// Whether to log span creation and close events
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Default::default()
        }
    }

    pub fn text() -> Self {
        Self {
            json_format: false,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Log span creation and close, e.g. around `QueryGate::execute`.
    pub fn with_spans(mut self) -> Self {
        self.include_spans = true;
        self
    }

    /// `RUST_LOG` when set, otherwise `default_level` for every target.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_level.as_str()))
    }

    /// Span creation and close events. Close events carry the busy and idle
    /// time of each `execute` call.
    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Installs a global subscriber for the given configuration.
///
/// `RUST_LOG` takes precedence over `default_level`. Calling this twice is
/// harmless; the second call has no effect.
pub fn init_logging(config: LoggingConfig) {
    let registry = tracing_subscriber::registry().with(config.env_filter());
    let layer = fmt::layer()
        .with_span_events(config.span_events())
        .with_target(true);

    let installed = if config.json_format {
        let layer = layer
            .json()
            .with_current_span(true)
            .with_file(false)
            .with_line_number(false);
        tracing::subscriber::set_global_default(registry.with(layer))
    } else {
        tracing::subscriber::set_global_default(registry.with(layer.pretty()))
    };

    if installed.is_err() {
        tracing::debug!("global subscriber already installed, keeping it");
    }
}

/// Builds a JSON subscriber writing to `writer`, for capturing gate logs in
/// tests. Ignores `RUST_LOG` so captured output is deterministic.
pub fn create_json_layer<W>(
    config: &LoggingConfig,
    writer: W,
) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new(config.default_level.as_str()))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_span_events(config.span_events())
                .with_target(true)
                .with_current_span(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct CaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CaptureWriter {
        fn new() -> Self {
            Self {
                buffer: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn output(&self) -> String {
            let buffer = self.buffer.lock().unwrap();
            String::from_utf8_lossy(&buffer).to_string()
        }
    }

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_logging_config_builders() {
        let config = LoggingConfig::default();
        assert!(!config.json_format);
        assert_eq!(config.default_level, Level::INFO);
        assert!(!config.include_spans);

        assert!(LoggingConfig::json().json_format);
        assert!(!LoggingConfig::text().json_format);
        assert_eq!(
            LoggingConfig::text().with_level(Level::DEBUG).default_level,
            Level::DEBUG
        );
        assert!(LoggingConfig::default().with_spans().include_spans);
    }

    #[test]
    fn test_structured_logs_are_json_formatted() {
        let writer = CaptureWriter::new();
        let config = LoggingConfig::json().with_level(Level::TRACE);
        let subscriber = create_json_layer(&config, writer.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(
                operation = "GetAccounts",
                removed = 3,
                "invalidated cache entries"
            );
        });

        let output = writer.output();
        assert!(!output.is_empty(), "Should have captured log output");

        for line in output.lines().filter(|l| !l.is_empty()) {
            let json: serde_json::Value = serde_json::from_str(line)
                .unwrap_or_else(|e| panic!("log line should be JSON: {line} ({e})"));
            assert_eq!(json["level"], "DEBUG");
            assert_eq!(json["fields"]["operation"], "GetAccounts");
            assert!(json.get("target").is_some());
        }
    }

    #[test]
    fn test_span_events_follow_include_spans() {
        let writer = CaptureWriter::new();
        let config = LoggingConfig::json().with_level(Level::DEBUG).with_spans();
        let subscriber = create_json_layer(&config, writer.clone());

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("execute", operation = "GetAccounts");
            span.in_scope(|| tracing::debug!("cache hit"));
        });

        let messages: Vec<String> = writer
            .output()
            .lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                let json: serde_json::Value = serde_json::from_str(line).unwrap();
                let message = json["fields"]["message"].as_str().unwrap_or_default();
                message.to_string()
            })
            .collect();
        assert_eq!(messages, vec!["new", "cache hit", "close"]);
    }

    #[test]
    fn test_level_filters_captured_output() {
        let writer = CaptureWriter::new();
        let config = LoggingConfig::json().with_level(Level::WARN);
        let subscriber = create_json_layer(&config, writer.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("cache hit");
            tracing::warn!(operation = "GetBudgets", "preload failed");
        });

        let output = writer.output();
        assert_eq!(output.lines().filter(|l| !l.is_empty()).count(), 1);
        assert!(output.contains("preload failed"));
        assert!(!output.contains("cache hit"));
    }
}
