use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::datum::Datum;
use crate::error::{RpcError, Status};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Proposal number reported when an acceptor has accepted nothing.
pub const NO_PROPOSAL: i64 = -1;

/// Every request a replica serves, client-facing and peer-facing alike.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Put {
        key: String,
        value: String,
    },
    Get {
        key: String,
    },
    Delete {
        key: String,
    },
    Prepare {
        proposal_number: i64,
    },
    Accept {
        proposal_number: i64,
        proposal_value: Datum,
    },
    Decide {
        proposal_value: Datum,
    },
    TpcPrepare {
        datum: Datum,
    },
    TpcCommit {
        datum: Datum,
    },
    TpcAbort {
        datum: Datum,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Put { .. } => "put",
            Request::Get { .. } => "get",
            Request::Delete { .. } => "delete",
            Request::Prepare { .. } => "prepare",
            Request::Accept { .. } => "accept",
            Request::Decide { .. } => "decide",
            Request::TpcPrepare { .. } => "tpc_prepare",
            Request::TpcCommit { .. } => "tpc_commit",
            Request::TpcAbort { .. } => "tpc_abort",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Put {
        status: bool,
    },
    Get {
        value: String,
    },
    Delete {
        status: bool,
    },
    Prepare {
        prepare_ok: bool,
        previous_proposal_number: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_proposal_value: Option<Datum>,
    },
    Accept {
        accept_ok: bool,
    },
    Decide {
        success: bool,
    },
    TpcPrepare {
        is_prepared: bool,
    },
    TpcCommit {
        is_committed: bool,
    },
    TpcAbort {
        is_aborted: bool,
    },
    Error(Status),
}

impl Response {
    /// Turns an `error` response into `Err` so callers only match on replies.
    pub fn into_result(self) -> Result<Response, RpcError> {
        match self {
            Response::Error(status) => Err(RpcError::Status(status)),
            reply => Ok(reply),
        }
    }
}

impl From<Status> for Response {
    fn from(status: Status) -> Self {
        Response::Error(status)
    }
}

/// A request line as the server sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Request(Request),
    /// The line was not a valid request. Answered, not fatal.
    Malformed(Status),
}

/// Next non-blank line without its line ending, or `None` at end of stream.
async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if !trimmed.is_empty() {
            return Ok(Some(trimmed.to_string()));
        }
    }
}

/// Reads the next request for a server.
///
/// Only I/O failures are errors. A line that does not decode comes back as
/// [`Inbound::Malformed`] so the connection can answer it and keep going.
pub async fn read_request<R>(reader: &mut R) -> io::Result<Option<Inbound>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(line) = read_line(reader).await? else {
        return Ok(None);
    };
    Ok(Some(match serde_json::from_str(&line) {
        Ok(request) => Inbound::Request(request),
        Err(err) => Inbound::Malformed(Status::invalid_argument(format!(
            "Received malformed request: {err}"
        ))),
    }))
}

/// Reads the reply to a request. An undecodable reply is `InvalidData`.
pub async fn read_response<R>(reader: &mut R) -> io::Result<Option<Response>>
where
    R: AsyncBufRead + Unpin,
{
    match read_line(reader).await? {
        Some(line) => serde_json::from_str(&line).map(Some).map_err(to_io_error),
        None => Ok(None),
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
