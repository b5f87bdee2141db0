//! Legacy checksum-framed line protocol.
//!
//! Each request line is `<method> <key> [value];<checksum>;`. Each response
//! line is `<status> <message>` (status `0` for success, `1` for failure),
//! framed with the same checksum. Writes still go through the replica's
//! configured replication, so this is only a different front door.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{info, warn};

use crate::checksum::{build_msg_with_checksum, drop_checksum, verify_checksum};
use crate::command::TextCommand;
use crate::error::StatusCode;
use crate::replica::Replica;
use crate::transport::Peer;

const GENERAL_ERR_MSG: &str = "Please refer to Readme for accepted input format.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyResponse {
    pub success: bool,
    pub message: String,
}

impl LegacyResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn malformed(text: &str) -> Self {
        Self::failure(format!(
            "Received malformed request of length {}: {text}",
            text.chars().count()
        ))
    }

    pub fn key_not_exist(key: &str) -> Self {
        Self::failure(format!("Key={key} doesn't exist"))
    }

    /// Parses `<status> <message>`, as a client would.
    pub fn parse(line: &str) -> Option<Self> {
        let (status, message) = line.split_once(' ')?;
        match status {
            "0" => Some(Self::success(message)),
            "1" => Some(Self::failure(message)),
            _ => None,
        }
    }
}

impl fmt::Display for LegacyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { '0' } else { '1' };
        write!(f, "{status} {}", self.message)
    }
}

/// Serves one framed request line against `replica`.
pub async fn handle_line<P: Peer>(replica: &Replica<P>, line: &str) -> LegacyResponse {
    if !verify_checksum(line) {
        return LegacyResponse::malformed(line);
    }
    let Some(text) = drop_checksum(line) else {
        return LegacyResponse::malformed(line);
    };

    let command = match TextCommand::parse(text) {
        Ok(command) => command,
        Err(err) => return LegacyResponse::failure(format!("{err} {GENERAL_ERR_MSG}")),
    };

    match command {
        TextCommand::Put { key, value } => match replica.put(&key, &value).await {
            Ok(_) => LegacyResponse::success(format!(
                "key={} & value={} has been added!",
                key.to_lowercase(),
                value.to_lowercase()
            )),
            Err(status) => LegacyResponse::failure(status.message),
        },
        TextCommand::Get { key } => match replica.get(&key).await {
            Ok(value) => LegacyResponse::success(format!(
                "value of key={} is: {value}",
                key.to_lowercase()
            )),
            Err(status) if status.code == StatusCode::InvalidArgument => {
                LegacyResponse::key_not_exist(&key.to_lowercase())
            }
            Err(status) => LegacyResponse::failure(status.message),
        },
        TextCommand::Delete { key } => match replica.delete(&key).await {
            Ok(_) => LegacyResponse::success(format!(
                "KeyValue pair of key={} has been deleted!",
                key.to_lowercase()
            )),
            Err(status) if status.code == StatusCode::InvalidArgument => {
                LegacyResponse::key_not_exist(&key.to_lowercase())
            }
            Err(status) => LegacyResponse::failure(status.message),
        },
    }
}

/// Accepts legacy connections until `shutdown` resolves.
pub async fn serve_until<P, F>(listener: TcpListener, replica: Arc<Replica<P>>, shutdown: F) -> Result<()>
where
    P: Peer + 'static,
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    loop {
        select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let replica = Arc::clone(&replica);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, replica).await {
                            warn!(%peer, error = ?err, "legacy connection closed with error");
                        }
                    });
                }
                Err(err) => warn!(error = ?err, "failed to accept legacy connection"),
            },
        }
    }
    Ok(())
}

async fn handle_connection<P>(stream: TcpStream, replica: Arc<Replica<P>>) -> Result<()>
where
    P: Peer + 'static,
{
    let peer = stream.peer_addr().ok();
    info!(?peer, "legacy client connected");
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        info!(?peer, %line, "legacy request");
        let response = handle_line(&replica, line.trim_end_matches('\r')).await;
        let mut framed = build_msg_with_checksum(&response.to_string());
        framed.push('\n');
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await?;
    }

    info!(?peer, "legacy client disconnected");
    Ok(())
}
