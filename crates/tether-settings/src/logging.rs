//! Tracing setup for hosts embedding the connection controller
//!
//! Console output is human readable; the file sink writes JSON lines with
//! daily rotation through a non-blocking writer. `RUST_LOG` overrides the
//! configured filter.

use std::path::PathBuf;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::LogSettings;

const LOG_FILE_PREFIX: &str = "tether.log";
const VERBOSE_FILTER: &str = "info,tether_core=debug,tether_connection=debug,tether_settings=debug";
const QUIET_FILTER: &str = "warn,tether_connection=info,tether_settings=info";

/// Where the JSON log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSink {
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter: String,
    /// Pretty console output to stderr
    pub console: bool,
    pub file: Option<FileSink>,
    /// Emit span open/close events, useful to time connect attempts
    pub span_events: bool,
    /// Source file and line on console output
    pub source_location: bool,
}

impl LoggingConfig {
    /// Verbose console plus the JSON file
    pub fn development() -> Self {
        Self {
            filter: VERBOSE_FILTER.to_string(),
            console: true,
            file: Some(FileSink {
                dir: log_directory(),
            }),
            span_events: true,
            source_location: true,
        }
    }

    /// JSON file only, for bug reports
    pub fn production() -> Self {
        Self {
            filter: QUIET_FILTER.to_string(),
            console: false,
            file: Some(FileSink {
                dir: log_directory(),
            }),
            span_events: false,
            source_location: false,
        }
    }

    /// Console only, nothing on disk
    pub fn testing() -> Self {
        Self {
            filter: "debug".to_string(),
            console: true,
            file: None,
            span_events: true,
            source_location: true,
        }
    }

    /// Preset for the build profile, adjusted by user settings
    pub fn from_settings(settings: &LogSettings) -> Self {
        let mut config = if cfg!(debug_assertions) {
            Self::development()
        } else {
            Self::production()
        };
        if let Some(filter) = settings.filter.as_deref().filter(|f| !f.trim().is_empty()) {
            config.filter = filter.to_string();
        }
        if !settings.enable_json_logs {
            config.file = None;
        }
        config
    }

    fn fmt_span(&self) -> FmtSpan {
        // NEW rather than ENTER: an awaited future re-enters its span on every poll
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Install the global subscriber.
///
/// Hold on to the returned guard for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.filter))?;

    let mut layers = Vec::new();
    if config.console {
        layers.push(console_layer(&config).with_filter(filter.clone()).boxed());
    }

    let guard = match &config.file {
        Some(sink) => {
            std::fs::create_dir_all(&sink.dir)?;
            let appender = tracing_appender::rolling::daily(&sink.dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(config.fmt_span())
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::info!(
        console = config.console,
        file = ?config.file.as_ref().map(|sink| sink.dir.display().to_string()),
        "logging initialized"
    );
    Ok(guard)
}

fn console_layer<S>(config: &LoggingConfig) -> impl Layer<S> + Send + Sync + 'static
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_span_events(config.fmt_span())
        .with_writer(std::io::stderr)
}

/// Directory the JSON logs are written to
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("tether"))
        .unwrap_or_else(|| std::env::temp_dir().join("tether"))
        .join("logs")
}
