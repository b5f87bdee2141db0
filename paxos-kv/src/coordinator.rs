//! Two-phase-commit replication.
//!
//! The coordinator asks every peer to lock the key (PREPARE). Only if all of
//! them do is the operation committed everywhere; otherwise the peers that
//! locked are told to ABORT. A single unreachable peer is enough to abort,
//! and nothing is retried.

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::datum::Datum;
use crate::error::RpcError;
use crate::message::{Request, Response};
use crate::transport::Peer;

pub struct Coordinator<P> {
    endpoint: String,
    peers: Vec<P>,
}

impl<P: Peer> Coordinator<P> {
    /// `peers` must not include the replica this coordinator runs on.
    pub fn new(endpoint: impl Into<String>, peers: Vec<P>) -> Self {
        Self {
            endpoint: endpoint.into(),
            peers,
        }
    }

    /// Returns `true` if every peer committed `datum`.
    ///
    /// The caller is responsible for its own local lock and for applying
    /// `datum` locally on success.
    pub async fn two_phase_commit(&self, datum: &Datum) -> bool {
        let prepared = self.send_prepare(datum).await;
        if prepared.len() != self.peers.len() {
            error!(
                replica = %self.endpoint,
                prepared = prepared.len(),
                peers = self.peers.len(),
                "cannot access the database due to concurrency control"
            );
            self.send_abort(datum, &prepared).await;
            return false;
        }
        self.send_commit(datum).await;
        true
    }

    /// Indices of the peers that locked the key.
    async fn send_prepare(&self, datum: &Datum) -> Vec<usize> {
        info!(replica = %self.endpoint, %datum, "sending 2pc prepare");
        let replies = join_all(self.peers.iter().map(|peer| async move {
            let request = Request::TpcPrepare {
                datum: datum.clone(),
            };
            (peer.endpoint(), expect_flag(peer.call(request).await))
        }))
        .await;

        replies
            .into_iter()
            .enumerate()
            .filter_map(|(index, (peer, reply))| match reply {
                Ok(true) => Some(index),
                Ok(false) => {
                    info!(replica = %self.endpoint, peer, "peer refused to prepare");
                    None
                }
                Err(err) => {
                    error!(replica = %self.endpoint, peer, error = %err, "2pc prepare failed");
                    None
                }
            })
            .collect()
    }

    async fn send_commit(&self, datum: &Datum) {
        info!(replica = %self.endpoint, %datum, "sending 2pc commit");
        self.broadcast(self.peers.iter().collect(), || Request::TpcCommit {
            datum: datum.clone(),
        })
        .await;
    }

    async fn send_abort(&self, datum: &Datum, prepared: &[usize]) {
        info!(replica = %self.endpoint, %datum, peers = prepared.len(), "sending 2pc abort");
        let targets = prepared.iter().map(|&index| &self.peers[index]).collect();
        self.broadcast(targets, || Request::TpcAbort {
            datum: datum.clone(),
        })
        .await;
    }

    async fn broadcast<F>(&self, targets: Vec<&P>, request: F)
    where
        F: Fn() -> Request,
    {
        let replies = join_all(targets.into_iter().map(|peer| {
            let call = peer.call(request());
            async move { (peer.endpoint(), expect_flag(call.await)) }
        }))
        .await;

        for (peer, reply) in replies {
            match reply {
                Ok(true) => {}
                Ok(false) => warn!(replica = %self.endpoint, peer, "peer did not confirm"),
                Err(err) => error!(replica = %self.endpoint, peer, error = %err, "2pc request failed"),
            }
        }
    }
}

fn expect_flag(reply: Result<Response, RpcError>) -> Result<bool, RpcError> {
    match reply? {
        Response::TpcPrepare { is_prepared } => Ok(is_prepared),
        Response::TpcCommit { is_committed } => Ok(is_committed),
        Response::TpcAbort { is_aborted } => Ok(is_aborted),
        _ => Err(RpcError::UnexpectedResponse("two-phase commit")),
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Arc;

    use super::*;
    use crate::learner;
    use crate::store::KeyStore;

    struct LocalPeer {
        name: String,
        store: KeyStore,
    }

    impl Peer for Arc<LocalPeer> {
        fn endpoint(&self) -> &str {
            &self.name
        }

        fn call(&self, request: Request) -> impl Future<Output = Result<Response, RpcError>> + Send {
            let response = match request {
                Request::TpcPrepare { datum } => Response::TpcPrepare {
                    is_prepared: self.store.try_write_lock(&datum.key),
                },
                Request::TpcCommit { datum } => {
                    learner::apply(&self.store, &datum);
                    self.store.write_unlock(&datum.key);
                    Response::TpcCommit { is_committed: true }
                }
                Request::TpcAbort { datum } => Response::TpcAbort {
                    is_aborted: self.store.write_unlock(&datum.key),
                },
                _ => Response::Error(crate::error::Status::internal("unsupported")),
            };
            async move { response.into_result() }
        }
    }

    fn peers(n: usize) -> Vec<Arc<LocalPeer>> {
        (0..n)
            .map(|i| {
                Arc::new(LocalPeer {
                    name: format!("peer-{i}"),
                    store: KeyStore::new(),
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn commits_when_every_peer_locks() {
        let peers = peers(2);
        let coordinator = Coordinator::new("self", peers.clone());

        assert!(coordinator.two_phase_commit(&Datum::put("a", "1")).await);
        for peer in &peers {
            assert_eq!(peer.store.get("a"), Some("1".to_string()));
            assert!(peer.store.try_write_lock("a"), "commit must release the lock");
        }
    }

    #[tokio::test]
    async fn one_locked_peer_aborts_everywhere() {
        let peers = peers(3);
        assert!(peers[1].store.try_write_lock("a"));
        let coordinator = Coordinator::new("self", peers.clone());

        assert!(!coordinator.two_phase_commit(&Datum::put("a", "1")).await);

        for peer in &peers {
            assert_eq!(peer.store.get("a"), None);
        }
        // Peers that prepared were released; the foreign lock was left alone.
        assert!(peers[0].store.try_write_lock("a"));
        assert!(peers[2].store.try_write_lock("a"));
        assert!(!peers[1].store.try_write_lock("a"));
    }
}
