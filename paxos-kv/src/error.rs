use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure class reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    InvalidArgument,
    Unavailable,
    Internal,
    DeadlineExceeded,
}

/// A failure that crosses the wire as an RPC error rather than a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn key_not_found(key: &str) -> Self {
        Self::invalid_argument(format!("Key {key} doesn't exist."))
    }
}

/// Everything a single request/response exchange can fail with.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("remote returned {0}")]
    Status(#[from] Status),
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed before a response arrived")]
    Closed,
    #[error("unexpected response to {0} request")]
    UnexpectedResponse(&'static str),
}

impl RpcError {
    /// The status a client should see for this failure.
    pub fn status(&self) -> Status {
        match self {
            RpcError::Status(status) => status.clone(),
            RpcError::DeadlineExceeded(_) => {
                Status::new(StatusCode::DeadlineExceeded, self.to_string())
            }
            RpcError::Io(_) | RpcError::Closed => Status::unavailable(self.to_string()),
            RpcError::UnexpectedResponse(_) => Status::internal(self.to_string()),
        }
    }
}
