//! Structured Logging for the Model Importer
//!
//! This module provides functionality for:
//! 1. Tagging pipeline events with an entry type and operation status
//! 2. Writing logs to a daily rotating file in JSON or line format
//! 3. Optionally mirroring logs to the terminal

use std::fmt as std_fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan, time::UtcTime},
    prelude::*,
};

use crate::config_loader::AppConfig;
use crate::import::ImportResult;

const LOG_FILE_PREFIX: &str = "model_importer.log";

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

/// Log entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntryType {
    Session,
    Hash,
    Duplicate,
    Placement,
    Rollback,
}

impl std_fmt::Display for LogEntryType {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        match self {
            LogEntryType::Session => write!(f, "session"),
            LogEntryType::Hash => write!(f, "hash"),
            LogEntryType::Duplicate => write!(f, "duplicate"),
            LogEntryType::Placement => write!(f, "placement"),
            LogEntryType::Rollback => write!(f, "rollback"),
        }
    }
}

/// Status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Started,
    Completed,
    Failed,
    Skipped,
    Canceled,
}

impl std_fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        match self {
            OperationStatus::Started => write!(f, "started"),
            OperationStatus::Completed => write!(f, "completed"),
            OperationStatus::Failed => write!(f, "failed"),
            OperationStatus::Skipped => write!(f, "skipped"),
            OperationStatus::Canceled => write!(f, "canceled"),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Owns the background writer; logs are flushed when this is dropped
pub struct Logger {
    log_dir: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Install the global subscriber described by the `[logging]` section.
    ///
    /// `RUST_LOG` overrides the configured level when set.
    pub fn new(config: &AppConfig) -> LoggerResult<Self> {
        let logging = &config.logging;
        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;
        let mut log_dir = None;

        if logging.log_to_file {
            let dir = PathBuf::from(&config.paths.log_directory);
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
            }
            let (layer, worker_guard) = Self::file_layer(&dir, &logging.log_format, &logging.log_level)?;
            layers.push(layer);
            guard = Some(worker_guard);
            log_dir = Some(dir);
        }

        if logging.log_to_terminal {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(Self::filter(&logging.log_level)?)
                .boxed();
            layers.push(layer);
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        info!(
            log_format = %logging.log_format,
            log_level = %logging.log_level,
            log_to_file = logging.log_to_file,
            log_to_terminal = logging.log_to_terminal,
            "Logger initialized"
        );

        Ok(Self {
            log_dir,
            _guard: guard,
        })
    }

    fn filter(level: &str) -> LoggerResult<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| LoggerError::Filter(e.to_string()))
    }

    fn file_layer(log_dir: &Path, format: &str, level: &str) -> LoggerResult<(BoxedLayer, WorkerGuard)> {
        let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let filter = Self::filter(level)?;

        let layer = match format {
            "json" => fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(filter)
                .boxed(),
            _ => fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(filter)
                .boxed(),
        };

        Ok((layer, guard))
    }

    /// Directory receiving rotated log files, if file logging is on
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Record the outcome of a finished session
    pub fn log_import_result(&self, result: &ImportResult) {
        let status = if result.success() {
            OperationStatus::Completed
        } else if result.canceled() > 0 {
            OperationStatus::Canceled
        } else {
            OperationStatus::Failed
        };

        info!(
            entry_type = %LogEntryType::Session,
            session_id = %result.session().id(),
            status = %status,
            total = result.total(),
            processed = result.processed(),
            skipped = result.skipped(),
            failed = result.failed(),
            bytes = result.bytes_processed(),
            error = result.error().unwrap_or(""),
            "Import {} for {} files",
            status,
            result.total()
        );
    }
}
