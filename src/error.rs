//! Structured error handling and exit codes.

use serde::Serialize;

use crate::config::ConfigError;

/// Exit codes for the hashmerge binary.
///
/// - 0: Success (every requested cycle ran; file-level failures are
///   reported in the run log, not here)
/// - 1: General error (cache unavailable, unexpected failure)
/// - 2: Configuration error (invalid values, missing target root)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    ConfigError = 2,
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "HM000",
            Self::GeneralError => "HM001",
            Self::ConfigError => "HM002",
            Self::Interrupted => "HM130",
        }
    }

    /// Classifies an application error.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        if err.chain().any(|cause| cause.is::<ConfigError>()) {
            Self::ConfigError
        } else {
            Self::GeneralError
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "HM001")
    pub code: String,
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
