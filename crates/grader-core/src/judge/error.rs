use thiserror::Error;

/// Failure of a single rubric judgment.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JudgeError {
    #[error("judge backend unavailable: {0}")]
    Unavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("judgment timed out after {0}s")]
    Timeout(u64),

    #[error("judgment timed out after batch deadline")]
    BatchDeadline,

    #[error("judge returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed judge output: {0}")]
    MalformedOutput(String),

    #[error("score {0} outside [0, 1]")]
    ScoreOutOfRange(f64),
}

impl JudgeError {
    /// True when the failure says nothing about the rubric and everything
    /// about reaching the model: connection problems, timeouts, missing
    /// credentials, auth rejections and server errors.
    pub fn is_transport(&self) -> bool {
        match self {
            JudgeError::Unavailable(_)
            | JudgeError::Transport(_)
            | JudgeError::Timeout(_)
            | JudgeError::BatchDeadline => true,
            JudgeError::Status { status, .. } => {
                *status >= 500 || *status == 401 || *status == 403 || *status == 404
            }
            JudgeError::MalformedOutput(_) | JudgeError::ScoreOutOfRange(_) => false,
        }
    }
}
