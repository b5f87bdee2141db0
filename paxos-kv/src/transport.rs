//! Request/response transport between replicas.
//!
//! [`Peer`] is the seam the proposer and coordinator talk through. The
//! production implementation, [`TcpPeer`], opens a connection per call and
//! bounds the whole exchange with a deadline; tests substitute in-memory
//! peers.

use std::future::Future;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::RpcError;
use crate::message::{Request, Response, read_response, write_message};

/// Per-call deadline applied to every peer RPC.
pub const DEFAULT_RPC_DEADLINE: Duration = Duration::from_millis(5000);

/// One remote replica.
///
/// `call` resolves to `Ok` only for a protocol reply; an `error` response,
/// a timeout and a broken connection are all `Err`.
pub trait Peer: Send + Sync {
    fn endpoint(&self) -> &str;

    fn call(&self, request: Request) -> impl Future<Output = Result<Response, RpcError>> + Send;
}

#[derive(Debug, Clone)]
pub struct TcpPeer {
    endpoint: String,
    deadline: Duration,
}

impl TcpPeer {
    pub fn new(endpoint: impl Into<String>, deadline: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            deadline,
        }
    }
}

impl Peer for TcpPeer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn call(&self, request: Request) -> impl Future<Output = Result<Response, RpcError>> + Send {
        let endpoint = self.endpoint.clone();
        let deadline = self.deadline;
        async move {
            match timeout(deadline, round_trip(&endpoint, &request)).await {
                Ok(result) => result,
                Err(_) => Err(RpcError::DeadlineExceeded(deadline)),
            }
        }
    }
}

/// Sends one request on a fresh connection and waits for its reply.
pub async fn round_trip(endpoint: &str, request: &Request) -> Result<Response, RpcError> {
    let stream = TcpStream::connect(endpoint).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    write_message(&mut writer, request).await?;
    match read_response(&mut reader).await? {
        Some(response) => response.into_result(),
        None => Err(RpcError::Closed),
    }
}
