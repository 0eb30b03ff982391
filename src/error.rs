use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Plan generation error: {0}")]
    PlanGeneration(String),

    #[error("{0}")]
    General(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Failure talking to the inference endpoint.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("endpoint unreachable: {0}")]
    Transport(String),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response envelope: {0}")]
    Envelope(String),
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status { status, .. } => {
                !(400..500).contains(status) || matches!(status, 408 | 409 | 429)
            }
            Self::Envelope(_) => false,
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Envelope(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::Status {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        Self::Transport(err.to_string())
    }
}

/// Outcome of a refused or failed filesystem move.
#[derive(Debug, thiserror::Error)]
pub enum MoveError {
    #[error("destination already exists: {}", .destination.display())]
    Conflict { destination: PathBuf },

    #[error("source does not exist: {}", .source_path.display())]
    SourceMissing { source_path: PathBuf },

    #[error("destination escapes the destination root: {destination}")]
    OutsideRoot { destination: String },

    #[error("move {} -> {} failed: {reason}", .source_path.display(), .destination.display())]
    Failure {
        source_path: PathBuf,
        destination: PathBuf,
        reason: String,
    },
}

impl MoveError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
