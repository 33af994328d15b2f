use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by a recognition run
#[derive(Debug, Error)]
pub enum JobError {
    /// Listing or traversing the page tree failed
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The recognizer could not be started (missing binary, permissions)
    #[error("failed to launch recognizer {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Waiting on the recognizer process failed
    #[error("failed waiting for recognizer: {0}")]
    Wait(#[source] io::Error),

    /// Start was called while a previous run is still live
    #[error("a recognition run is already in progress")]
    AlreadyRunning,

    /// The recognizer ran but exited unsuccessfully
    #[error("recognizer exited unsuccessfully (exit code {})", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none, killed by signal".to_string()))]
    RecognitionFailed { exit_code: Option<i32> },
}

impl JobError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        JobError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
