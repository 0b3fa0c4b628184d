//! Logging setup for the `docket` binary
//!
//! Console output goes to stderr so that `--json` command output on stdout
//! stays machine readable. An optional JSON file log rotates daily.

use std::path::PathBuf;

use clap::ValueEnum;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// How console log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, coloured output for people
    #[default]
    Pretty,
    /// Compact single-line output
    Compact,
    /// One JSON object per line
    Json,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// Directory for rotating JSON logs, None to skip file logging
    pub log_dir: Option<PathBuf>,

    /// Whether to include file/line information in console logs
    pub include_location: bool,

    /// Whether to log span open/close (for timing pool operations)
    pub enable_spans: bool,

    /// Filter used when RUST_LOG is not set
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            log_dir: None,
            include_location: cfg!(debug_assertions),
            enable_spans: false,
            default_filter: default_filter(false),
        }
    }
}

impl LoggingConfig {
    /// Configuration for `-v`: debug output from every docket crate
    pub fn verbose() -> Self {
        Self {
            enable_spans: true,
            default_filter: default_filter(true),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }
}

fn default_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!(
        "warn,docket={level},docket_core={level},docket_connection={level},docket_driver_sqlite={level},docket_monitor={level}"
    )
}

/// The default place for file logs
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docket")
        .join("logs")
}

/// Install the global subscriber
///
/// RUST_LOG takes precedence over `config.default_filter`.
pub fn init(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    // NEW fires once per span; ENTER would fire on every re-poll of an awaited future
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(span_events.clone());
    let console = match config.format {
        LogFormat::Pretty => console.pretty().with_filter(env_filter.clone()).boxed(),
        LogFormat::Compact => console.compact().with_filter(env_filter.clone()).boxed(),
        LogFormat::Json => console
            .json()
            .with_current_span(true)
            .with_filter(env_filter.clone())
            .boxed(),
    };
    layers.push(console);

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "docket.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // The guard flushes on drop and must outlive every log call
        std::mem::forget(guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        format = ?config.format,
        log_dir = ?config.log_dir,
        "logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_quiet() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.log_dir.is_none());
        assert!(!config.enable_spans);
        assert!(config.default_filter.contains("docket_connection=info"));
    }

    #[test]
    fn test_verbose_config() {
        let config = LoggingConfig::verbose().with_format(LogFormat::Json);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.enable_spans);
        assert!(config.default_filter.contains("docket_connection=debug"));
    }

    #[test]
    fn test_log_directory_is_namespaced() {
        assert!(log_directory().ends_with("docket/logs"));
    }
}
