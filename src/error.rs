use crate::marshal::RemoteError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WtforkError {
    #[error("Failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Payload is not representable: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZMQ error: {0}")]
    Zmq(String),

    #[error("Remote method failed: {0}")]
    Remote(RemoteError),

    #[error("Call to '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Child did not signal readiness within {0}ms")]
    ReadyTimeout(u64),

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Not running as a child process (WTFORK_CHILD is not set)")]
    NotAChild,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<RemoteError> for WtforkError {
    fn from(err: RemoteError) -> Self {
        WtforkError::Remote(err)
    }
}

pub type Result<T> = std::result::Result<T, WtforkError>;
