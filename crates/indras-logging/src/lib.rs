//! Structured logging setup for the gratitude engine
//!
//! Library code only emits `tracing` events and spans; binaries and test
//! harnesses call into this crate once to decide where they go.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Pretty Console**: Human-readable output for development
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//! - **Per-target Levels**: `EnvFilter` directives from config, overridable by `RUST_LOG`
//!
//! # Quick Start
//!
//! ```no_run
//! use indras_logging::{GratitudeSubscriberBuilder, LogConfig};
//!
//! // Development mode with pretty human-readable output
//! let _guard = GratitudeSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .with_target("indras_gratitude::offering", "trace")
//!     .init();
//! ```

pub mod config;
pub mod error;

pub use config::{ConsoleConfig, FileConfig, FilterConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use error::{LoggingError, Result};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type Base = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync + 'static>;

/// Builder for configuring and initializing the logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output during development.
#[derive(Debug, Clone, Default)]
pub struct GratitudeSubscriberBuilder {
    config: LogConfig,
}

impl GratitudeSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Override the level for a single target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.config = self.config.with_target(target, level);
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// `RUST_LOG` if set, otherwise the configured directives.
    fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        Ok(EnvFilter::try_new(self.config.directives().join(","))?)
    }

    fn json_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let jsonl = &self.config.jsonl;
        fmt::layer()
            .json()
            .with_current_span(jsonl.include_current_span)
            .with_span_list(jsonl.include_spans)
            .flatten_event(jsonl.flatten_events)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location)
            .with_thread_ids(jsonl.include_thread_info)
            .with_thread_names(jsonl.include_thread_info)
            .with_writer(writer)
            .boxed()
    }

    /// Try to initialize the subscriber globally
    ///
    /// Returns the file writer guard when file output is configured; it must
    /// be kept alive for the duration of the program. Fails if a global
    /// subscriber has already been set.
    pub fn try_init(self) -> Result<Option<WorkerGuard>> {
        let filter = self.env_filter()?;
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            if self.config.console.pretty {
                layers.push(
                    fmt::layer()
                        .with_ansi(self.config.console.ansi)
                        .with_target(true)
                        .boxed(),
                );
            } else {
                layers.push(self.json_layer(std::io::stdout));
            }
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(self.json_layer(writer));
        }

        Registry::default()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }

    /// Initialize the subscriber globally
    ///
    /// Like [`try_init`](Self::try_init), but reports failures on stderr
    /// instead of returning them.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {e}");
                None
            }
        }
    }
}

/// Non-blocking writer for the configured file. `Never` truncates a single
/// file; the rotating strategies append.
fn file_writer(file_config: &FileConfig) -> Result<(NonBlocking, WorkerGuard)> {
    let rotation = match file_config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&file_config.directory).map_err(|source| LoggingError::FileCreate {
                path: file_config.directory.clone(),
                source,
            })?;
            let path = file_config.directory.join(format!("{}.log", file_config.prefix));
            let file = File::create(&path).map_err(|source| LoggingError::FileCreate {
                path: path.clone(),
                source,
            })?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file_config.prefix.clone())
        .filename_suffix("log");
    if let Some(max_files) = file_config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder.build(&file_config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() {
    GratitudeSubscriberBuilder::new().init();
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() {
    GratitudeSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Initialize logging for testing (minimal output)
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_testing() {
    let _ = GratitudeSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
