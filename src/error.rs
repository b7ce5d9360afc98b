use std::path::PathBuf;

use thiserror::Error;

/// Errors raised inside the judging pipeline.
///
/// Outcomes caused by the submitted program itself (compile failure, timeout,
/// crash, wrong output) are not errors; they are reported as a
/// [`Verdict`](crate::model::Verdict).
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("workspace error at {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("submission {0} not found")]
    SubmissionNotFound(i64),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("AI judge failed: {0}")]
    AiJudge(String),

    #[error("{0}")]
    Internal(String),
}

impl JudgeError {
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, JudgeError>;
