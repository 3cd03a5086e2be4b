//! File exchange with the external task tracker.
//!
//! # Responsibility
//! - Locate the two JSON files inside the shared directory.
//! - Classify I/O failures so callers know what to retry.
//!
//! # Invariants
//! - A missing file or directory is "not configured yet", never an error.
//! - Lock and busy errors are transient; other I/O failures are not.

pub mod importer;
pub mod notice;
pub mod relay;

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const COMPLETIONS_FILE_NAME: &str = "completed_blocks.json";
pub const TASKS_FILE_NAME: &str = "tasks.json";

static BUSY_MESSAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(busy|locked|lock violation|being used by another process|temporarily unavailable)")
        .expect("valid busy message regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangePaths {
    pub dir: PathBuf,
}

impl ExchangePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn completions_file(&self) -> PathBuf {
        self.dir.join(COMPLETIONS_FILE_NAME)
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.dir.join(TASKS_FILE_NAME)
    }
}

/// Failure class shown to users and used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    ConfigurationAbsent,
    TransientIo,
    Format,
    PermanentIo,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigurationAbsent => "configuration_absent",
            Self::TransientIo => "transient_io",
            Self::Format => "format",
            Self::PermanentIo => "permanent_io",
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[derive(Debug)]
pub enum ExchangeError {
    /// Lock or busy condition; retrying soon is likely to succeed.
    Transient(std::io::Error),
    Io(std::io::Error),
    Format(String),
}

impl ExchangeError {
    /// Wraps an I/O error, sorting lock and busy conditions as transient.
    pub fn from_io(err: std::io::Error) -> Self {
        if is_transient_io(&err) {
            Self::Transient(err)
        } else {
            Self::Io(err)
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) => ErrorClass::TransientIo,
            Self::Io(_) => ErrorClass::PermanentIo,
            Self::Format(_) => ErrorClass::Format,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl Display for ExchangeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(err) => write!(f, "file temporarily unavailable: {err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Format(message) => write!(f, "unexpected file format: {message}"),
        }
    }
}

impl Error for ExchangeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transient(err) | Self::Io(err) => Some(err),
            Self::Format(_) => None,
        }
    }
}

impl From<std::io::Error> for ExchangeError {
    fn from(value: std::io::Error) -> Self {
        Self::from_io(value)
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Format(value.to_string())
    }
}

pub fn is_transient_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
    ) || BUSY_MESSAGE_RE.is_match(&err.to_string())
}

/// Reads `path`, mapping a missing file to `None`.
pub(crate) fn read_optional(path: &Path) -> ExchangeResult<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ExchangeError::from_io(err)),
    }
}

/// Parses a top-level JSON array; anything else is a format error.
pub(crate) fn parse_array(text: &str) -> ExchangeResult<Vec<serde_json::Value>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<serde_json::Value>(text)? {
        serde_json::Value::Array(items) => Ok(items),
        other => Err(ExchangeError::Format(format!(
            "expected a JSON array, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
