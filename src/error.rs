use std::path::PathBuf;

use thiserror::Error;

use crate::model::AttemptLogEntry;

pub type TsResult<T> = Result<T, TsError>;

#[derive(Debug, Error)]
pub enum TsError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http failure: {0}")]
    Http(#[from] reqwest::Error),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`{stderr_suffix}")]
    CommandTimedOut {
        command: String,
        timeout_ms: u64,
        stderr_suffix: String,
    },

    #[error("audio acquisition failed after {} strategies; last error: {last_error}", attempts.len())]
    AcquisitionFailed {
        attempts: Vec<String>,
        last_error: String,
    },

    #[error("all transcription backends failed after {} attempts", attempt_log.len())]
    AllBackendsFailed { attempt_log: Vec<AttemptLogEntry> },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to publish result: {0}")]
    Publish(String),

    #[error("missing expected artifact at `{0}`")]
    MissingArtifact(PathBuf),

    #[error("run cancelled: {0}")]
    Cancelled(String),
}

impl TsError {
    #[must_use]
    pub fn from_command_failure(command: String, status: i32, stderr: String) -> Self {
        let trimmed = stderr.trim();
        let stderr_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("; stderr: {trimmed}")
        };
        Self::CommandFailed {
            command,
            status,
            stderr_suffix,
        }
    }

    #[must_use]
    pub fn from_command_timeout(command: String, timeout_ms: u64, stderr: String) -> Self {
        let trimmed = stderr.trim();
        let stderr_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("; stderr: {trimmed}")
        };
        Self::CommandTimedOut {
            command,
            timeout_ms,
            stderr_suffix,
        }
    }

    /// Stable, machine-readable code for every variant, used in run outcomes
    /// and structured logs.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "TS-IO",
            Self::Json(_) => "TS-JSON",
            Self::Http(_) => "TS-HTTP",
            Self::CommandMissing { .. } => "TS-CMD-MISSING",
            Self::CommandFailed { .. } => "TS-CMD-FAILED",
            Self::CommandTimedOut { .. } => "TS-CMD-TIMEOUT",
            Self::AcquisitionFailed { .. } => "TS-ACQUIRE-EXHAUSTED",
            Self::AllBackendsFailed { .. } => "TS-BACKENDS-EXHAUSTED",
            Self::BackendUnavailable(_) => "TS-BACKEND-UNAVAILABLE",
            Self::InvalidRequest(_) => "TS-INVALID-REQUEST",
            Self::Publish(_) => "TS-PUBLISH",
            Self::MissingArtifact(_) => "TS-MISSING-ARTIFACT",
            Self::Cancelled(_) => "TS-CANCELLED",
        }
    }

    /// Whether the error is terminal for a run (exhaustion or structural),
    /// as opposed to a single-alternative failure the caller retries past.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionFailed { .. }
                | Self::AllBackendsFailed { .. }
                | Self::InvalidRequest(_)
                | Self::Publish(_)
                | Self::Cancelled(_)
        )
    }
}
