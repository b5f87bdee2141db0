use std::time::Duration;

use tokio::time::timeout;

use crate::error::RpcError;
use crate::message::{Request, Response};
use crate::transport::round_trip;

/// Issues client-facing requests to a single replica.
///
/// No deadline is applied unless one is set: a PUT or DELETE legitimately
/// blocks for as long as the replica keeps retrying its decree.
#[derive(Debug, Clone)]
pub struct Client {
    endpoint: String,
    deadline: Option<Duration>,
}

impl Client {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<bool, RpcError> {
        let request = Request::Put {
            key: key.to_string(),
            value: value.to_string(),
        };
        match self.call(request).await? {
            Response::Put { status } => Ok(status),
            _ => Err(RpcError::UnexpectedResponse("put")),
        }
    }

    pub async fn get(&self, key: &str) -> Result<String, RpcError> {
        let request = Request::Get {
            key: key.to_string(),
        };
        match self.call(request).await? {
            Response::Get { value } => Ok(value),
            _ => Err(RpcError::UnexpectedResponse("get")),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool, RpcError> {
        let request = Request::Delete {
            key: key.to_string(),
        };
        match self.call(request).await? {
            Response::Delete { status } => Ok(status),
            _ => Err(RpcError::UnexpectedResponse("delete")),
        }
    }

    async fn call(&self, request: Request) -> Result<Response, RpcError> {
        match self.deadline {
            Some(deadline) => timeout(deadline, round_trip(&self.endpoint, &request))
                .await
                .map_err(|_| RpcError::DeadlineExceeded(deadline))?,
            None => round_trip(&self.endpoint, &request).await,
        }
    }
}
