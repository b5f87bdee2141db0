use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{debug, info, warn};

use crate::message::{Inbound, Response, read_request, write_message};
use crate::replica::Replica;
use crate::transport::Peer;

/// Accepts connections and hands every request line to a [`Replica`].
///
/// Each connection is served by its own task, so a PUT blocked in a Paxos
/// retry loop never delays requests arriving on other connections.
pub struct Server<P> {
    listener: TcpListener,
    replica: Arc<Replica<P>>,
}

impl<P> Server<P>
where
    P: Peer + 'static,
{
    pub fn new(listener: TcpListener, replica: Arc<Replica<P>>) -> Self {
        Self { listener, replica }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, replica } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(replica = %replica.endpoint(), "server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &replica);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result<P>(result: std::io::Result<(TcpStream, SocketAddr)>, replica: &Arc<Replica<P>>)
where
    P: Peer + 'static,
{
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, replica),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler<P>(stream: TcpStream, peer: SocketAddr, replica: &Arc<Replica<P>>)
where
    P: Peer + 'static,
{
    let replica = Arc::clone(replica);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, replica).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

async fn handle_connection<P>(stream: TcpStream, replica: Arc<Replica<P>>) -> Result<()>
where
    P: Peer + 'static,
{
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    debug!(?peer, "connection opened");

    while let Some(inbound) = read_request(&mut reader).await? {
        let response = match inbound {
            Inbound::Request(request) => replica.handle(request).await,
            Inbound::Malformed(status) => {
                warn!(?peer, %status, "rejecting undecodable request");
                Response::from(status)
            }
        };
        write_message(&mut writer, &response).await?;
    }

    debug!(?peer, "connection closed");
    Ok(())
}
