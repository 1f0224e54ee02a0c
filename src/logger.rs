//! Structured logging.
//!
//! Installs a `tracing` subscriber writing to a daily rolling file (JSON or
//! line format) and optionally to the terminal. Records from the `log`
//! facade are bridged into the same subscriber. The typed `log_*` helpers
//! give login, sync and dedup records a stable set of fields.

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan, time::UtcTime},
    prelude::*,
};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::dedup::DownloadAction;

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

pub const LOG_FILE_NAME: &str = "board_profile.log";

/// Log entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEntryType {
    Login,
    Sync,
    Dedup,
    System,
    Error,
}

impl std::fmt::Display for LogEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogEntryType::Login => write!(f, "login"),
            LogEntryType::Sync => write!(f, "sync"),
            LogEntryType::Dedup => write!(f, "dedup"),
            LogEntryType::System => write!(f, "system"),
            LogEntryType::Error => write!(f, "error"),
        }
    }
}

/// Status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Started,
    Completed,
    Rejected,
    Failed,
    Cancelled,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Started => write!(f, "started"),
            OperationStatus::Completed => write!(f, "completed"),
            OperationStatus::Rejected => write!(f, "rejected"),
            OperationStatus::Failed => write!(f, "failed"),
            OperationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Logger for structured logging
pub struct Logger {
    log_dir: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Install the global subscriber described by `config`.
    pub fn new(config: &AppConfig) -> LoggerResult<Self> {
        let logging = &config.logging;
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&logging.log_level))
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        let (file_layer, guard, log_dir) = if logging.log_to_file {
            let log_dir = PathBuf::from(&config.paths.log_directory);
            if !log_dir.exists() {
                std::fs::create_dir_all(&log_dir)?;
            }
            let (layer, guard) = Self::file_layer(&log_dir, &logging.log_format);
            (Some(layer), Some(guard), Some(log_dir))
        } else {
            (None, None, None)
        };

        let terminal_layer = logging.log_to_terminal.then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(terminal_layer)
            .try_init()
            .map_err(|e| LoggerError::Logging(e.to_string()))?;

        info!(
            log_format = %logging.log_format,
            log_level = %logging.log_level,
            message = "Logger initialized",
        );

        Ok(Self {
            log_dir,
            _guard: guard,
        })
    }

    fn file_layer<S>(
        log_dir: &Path,
        format: &str,
    ) -> (Box<dyn tracing_subscriber::Layer<S> + Send + Sync>, WorkerGuard)
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let layer = match format {
            "json" => fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
            _ => fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_timer(UtcTime::rfc_3339())
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
        };
        (layer, guard)
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Log a login attempt. Every attempt gets its own id so the start and the
    /// outcome can be paired.
    pub fn log_login(
        &self,
        attempt_id: Uuid,
        site: &str,
        kind: &str,
        status: OperationStatus,
        response_code: Option<u16>,
    ) {
        info!(
            entry_type = %LogEntryType::Login,
            attempt_id = %attempt_id,
            site = site,
            kind = kind,
            status = %status,
            response_code = response_code,
            timestamp = %Utc::now().to_rfc3339(),
            message = format!("Login {} for {}", status, site),
        );
    }

    pub fn log_sync(&self, profile: &Path, status: OperationStatus) {
        info!(
            entry_type = %LogEntryType::Sync,
            profile = %profile.display(),
            status = %status,
            timestamp = %Utc::now().to_rfc3339(),
            message = format!("Profile sync {}", status),
        );
    }

    pub fn log_dedup(&self, hash: &str, target: &str, action: DownloadAction, existing: Option<&str>) {
        info!(
            entry_type = %LogEntryType::Dedup,
            hash = hash,
            target = target,
            action = %action,
            existing = existing,
            timestamp = %Utc::now().to_rfc3339(),
            message = format!("Dedup decided {} for {}", action, hash),
        );
    }

    /// Log a system event
    pub fn log_system_event(&self, event_type: &str, details: &str) {
        info!(
            entry_type = %LogEntryType::System,
            event_type = event_type,
            details = details,
            timestamp = %Utc::now().to_rfc3339(),
            message = format!("System event: {}", event_type),
        );
    }

    /// Log an error
    pub fn log_error(&self, error_type: &str, message: &str, details: Option<&str>) {
        error!(
            entry_type = %LogEntryType::Error,
            error_type = error_type,
            details = details,
            timestamp = %Utc::now().to_rfc3339(),
            message = format!("Error: {}", message),
        );
    }
}

/// Create a new logger
pub fn init_logger(config: &AppConfig) -> LoggerResult<Logger> {
    Logger::new(config)
}
