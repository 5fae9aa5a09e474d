use std::time::Duration;

use thiserror::Error;

use crate::session::SessionId;
use crate::session::SessionState;

pub type Result<T> = std::result::Result<T, BridgeErr>;

#[derive(Debug, Error)]
pub enum BridgeErr {
    /// Input rejected up front; no process was spawned.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown session id {0}")]
    SessionNotFound(SessionId),

    /// The session is terminal; it must be discarded in favor of a new one.
    #[error("session {id} is {state}, not active")]
    SessionNotActive { id: SessionId, state: SessionState },

    /// The tool ran and exited non-zero. The merged output is kept so
    /// callers can surface diagnostics.
    #[error("claude exited with code {exit_code}")]
    Exec { exit_code: i32, output: String },

    /// The process outlived its deadline and was force-killed.
    #[error("claude did not finish within {timeout:?}")]
    Timeout { timeout: Duration },

    /// The executable could not be started at all, as opposed to a process
    /// that started and then failed.
    #[error("failed to launch claude: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BridgeErr {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Distinguishes the deadline path from ordinary execution failures so
    /// callers can decide whether a retry with a longer timeout makes sense.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
