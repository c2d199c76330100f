use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Entity not found")]
    NotFound,
    #[error("Validation failed: {0}")]
    Validation(ValidationCode),
    #[error("Transcoder failed: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("Failed to read/write DB file: {0}")]
    DbIOError(std::io::Error),
    #[error("Failed to serialize/deserialize DB operation: {0}")]
    DbSerializationError(serde_json::Error),
    #[error("File IO error: {0}")]
    FileIOError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MediaError {
    pub fn validation(code: ValidationCode) -> Self {
        Self::Validation(code)
    }

    /// Code reported to API clients. Internal details never leave the server.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation(code) => code.as_str(),
            Self::Transcode(_) => "process_failed",
            Self::DbIOError(_) | Self::DbSerializationError(_) | Self::FileIOError(_) | Self::Internal(_) => "internal_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    MissingFile,
    TooLarge,
    InvalidTitle,
    InvalidId,
    InvalidName,
    WrongType,
    InvalidRequest,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingFile => "missing_file",
            Self::TooLarge => "too_large",
            Self::InvalidTitle => "invalid_title",
            Self::InvalidId => "invalid_id",
            Self::InvalidName => "invalid_name",
            Self::WrongType => "wrong_type",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with code {code:?}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
    },
    #[error("{program} did not finish within {millis}ms")]
    TimedOut {
        program: String,
        millis: u128,
    },
    #[error("unreadable probe output: {0}")]
    ProbeOutput(String),
}
