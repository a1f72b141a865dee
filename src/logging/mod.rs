//! Logging configuration and initialization
//!
//! Centralized logging setup on the `tracing` ecosystem. Supports a
//! human-readable console format and JSON output, with an optional JSON
//! file sink for log aggregation.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing filter (e.g. "info", "debug,accelforge=trace")
//! - `ACCELFORGE_LOG_LEVEL`: simple log level (error, warn, info, debug, trace)
//! - `ACCELFORGE_LOG_FORMAT`: output format ("human" or "json")
//! - `ACCELFORGE_LOG_FILE`: optional file path for JSON log output

use once_cell::sync::OnceCell;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Global flag tracking whether a subscriber has been installed
static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_LEVEL_ENV: &str = "ACCELFORGE_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "ACCELFORGE_LOG_FORMAT";
const LOG_FILE_ENV: &str = "ACCELFORGE_LOG_FILE";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Invalid log level string provided
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    /// Failed to create the log file's parent directory
    #[error("failed to create log directory: {0}")]
    DirectoryCreationFailed(String),

    /// Failed to open the log file
    #[error("failed to open log file: {0}")]
    FileOpenFailed(String),
}

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to an EnvFilter directive
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable colored console output (default)
    #[default]
    Human,
    /// JSON structured output
    Json,
}

impl LogFormat {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" | "pretty" | "console" => Some(LogFormat::Human),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Log level to use when no filter env var is set
    pub level: LogLevel,
    /// Console output format
    pub format: LogFormat,
    /// Optional file path for JSON log output
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the console format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the log file path
    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }
}

/// Initialize logging from environment variables with defaults.
///
/// Idempotent: only the first call installs a subscriber.
pub fn init_logging_default() {
    let _ = init_logging_from_env();
}

/// Initialize logging from `ACCELFORGE_LOG_*` / `RUST_LOG`.
///
/// Idempotent: only the first call installs a subscriber.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    TRACING_INITIALIZED.get_or_init(|| {
        let level = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or_default();

        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| LogFormat::parse(&s))
            .unwrap_or_default();

        let mut config = LoggingConfig::new().with_level(level).with_format(format);
        if let Ok(path) = std::env::var(LOG_FILE_ENV) {
            config = config.with_log_file(PathBuf::from(path));
        }

        let _ = install_subscriber(&config);
    });
    Ok(())
}

/// Initialize logging with an explicit configuration.
///
/// Idempotent: only the first call installs a subscriber.
pub fn init_with_config(config: &LoggingConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        let _ = install_subscriber(config);
    });
}

fn install_subscriber(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = build_env_filter(config.level)?;

    // Arc<File> implements MakeWriter through &File: Write
    let file = match &config.log_file {
        Some(path) => Some(std::sync::Arc::new(open_log_file(path)?)),
        None => None,
    };

    match (config.format, file) {
        (LogFormat::Json, Some(file)) => {
            let console = fmt::layer().json().with_target(false);
            let file_layer = fmt::layer()
                .json()
                .with_writer(file)
                .with_target(false)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console)
                .with(file_layer)
                .init();
        }
        (LogFormat::Json, None) => {
            let console = fmt::layer().json().with_target(false);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console)
                .init();
        }
        (LogFormat::Human, Some(file)) => {
            let console = fmt::layer().with_target(true);
            // File sink is always JSON so it can be shipped to aggregation
            let file_layer = fmt::layer()
                .json()
                .with_writer(file)
                .with_target(false)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console)
                .with(file_layer)
                .init();
        }
        (LogFormat::Human, None) => {
            let console = fmt::layer().with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console)
                .init();
        }
    }

    Ok(())
}

fn open_log_file(path: &PathBuf) -> Result<std::fs::File, LoggingError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| LoggingError::DirectoryCreationFailed(e.to_string()))?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LoggingError::FileOpenFailed(e.to_string()))
}

/// Build the environment filter for the effective log level.
/// `RUST_LOG` wins over `ACCELFORGE_LOG_LEVEL`, which wins over the default.
fn build_env_filter(default_level: LogLevel) -> Result<EnvFilter, LoggingError> {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(rust_log)
            .map_err(|e| LoggingError::InvalidLogLevel(e.to_string()));
    }

    if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
        if let Some(level) = LogLevel::parse(&level) {
            return Ok(EnvFilter::new(level.as_filter_str()));
        }
    }

    Ok(EnvFilter::new(default_level.as_filter_str()))
}

/// Check if tracing has been initialized
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}
