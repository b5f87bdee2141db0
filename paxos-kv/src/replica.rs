//! A replica: one store, one acceptor slot, one replication strategy.
//!
//! [`Replica::handle`] is the whole RPC surface. Client-facing requests
//! (put, get, delete) go through the configured [`Replication`]; peer-facing
//! requests drive the local acceptor, learner and two-phase-commit locks.

use tracing::{error, info};

use crate::acceptor::{Acceptor, FaultInjector, NoFaults, Promise, RandomFaults};
use crate::config::{Protocol, ReplicaConfig};
use crate::coordinator::Coordinator;
use crate::datum::{Datum, Method};
use crate::error::Status;
use crate::learner;
use crate::message::{NO_PROPOSAL, Request, Response};
use crate::proposer::Proposer;
use crate::store::KeyStore;
use crate::transport::{Peer, TcpPeer};

/// How PUT and DELETE reach the other replicas.
pub enum Replication<P> {
    Paxos(Proposer<P>),
    TwoPhaseCommit(Coordinator<P>),
}

impl<P: Peer> Replication<P> {
    pub fn protocol(&self) -> Protocol {
        match self {
            Replication::Paxos(_) => Protocol::Paxos,
            Replication::TwoPhaseCommit(_) => Protocol::TwoPhaseCommit,
        }
    }
}

pub struct Replica<P> {
    endpoint: String,
    store: KeyStore,
    acceptor: Acceptor,
    replication: Replication<P>,
}

impl Replica<TcpPeer> {
    /// Builds a replica whose peers are reached over TCP.
    ///
    /// Acceptor faults are injected at `config.fault_ratio`.
    pub fn from_config(config: &ReplicaConfig) -> Self {
        let faults: Box<dyn FaultInjector> = if config.fault_ratio > 0.0 {
            Box::new(RandomFaults::new(config.fault_ratio))
        } else {
            Box::new(NoFaults)
        };
        Self::from_config_with_faults(config, faults)
    }

    pub fn from_config_with_faults(config: &ReplicaConfig, faults: Box<dyn FaultInjector>) -> Self {
        let peers = config
            .peer_endpoints()
            .into_iter()
            .map(|endpoint| TcpPeer::new(endpoint, config.rpc_deadline))
            .collect();
        let replication = match config.protocol {
            Protocol::Paxos => {
                Replication::Paxos(Proposer::new(&config.endpoint, peers, config.restart_delay))
            }
            Protocol::TwoPhaseCommit => {
                Replication::TwoPhaseCommit(Coordinator::new(&config.endpoint, peers))
            }
        };
        Self::new(&config.endpoint, replication, Acceptor::new(faults))
    }
}

impl<P: Peer> Replica<P> {
    pub fn new(endpoint: impl Into<String>, replication: Replication<P>, acceptor: Acceptor) -> Self {
        Self {
            endpoint: endpoint.into(),
            store: KeyStore::new(),
            acceptor,
            replication,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn acceptor(&self) -> &Acceptor {
        &self.acceptor
    }

    pub fn protocol(&self) -> Protocol {
        self.replication.protocol()
    }

    /// Serves one request. Failures come back as [`Response::Error`].
    pub async fn handle(&self, request: Request) -> Response {
        info!(replica = %self.endpoint, ?request, "received {} request", request.name());
        let response = match request {
            Request::Put { key, value } => self
                .put(&key, &value)
                .await
                .map(|status| Response::Put { status }),
            Request::Get { key } => self.get(&key).await.map(|value| Response::Get { value }),
            Request::Delete { key } => self
                .delete(&key)
                .await
                .map(|status| Response::Delete { status }),
            Request::Prepare { proposal_number } => self.on_prepare(proposal_number),
            Request::Accept {
                proposal_number,
                proposal_value,
            } => self
                .acceptor
                .accept(proposal_number, proposal_value)
                .map(|accept_ok| Response::Accept { accept_ok }),
            Request::Decide { proposal_value } => {
                learner::decide(&self.store, &self.acceptor, &proposal_value);
                Ok(Response::Decide { success: true })
            }
            Request::TpcPrepare { datum } => Ok(self.on_tpc_prepare(&datum)),
            Request::TpcCommit { datum } => Ok(self.on_tpc_commit(&datum)),
            Request::TpcAbort { datum } => Ok(Response::TpcAbort {
                is_aborted: self.store.write_unlock(&datum.key),
            }),
        };

        match response {
            Ok(response) => {
                info!(replica = %self.endpoint, ?response, "sending response");
                response
            }
            Err(status) => {
                error!(replica = %self.endpoint, %status, "sending error");
                Response::from(status)
            }
        }
    }

    /// Replicates a PUT. Under Paxos this waits for as long as a majority is
    /// out of reach.
    pub async fn put(&self, key: &str, value: &str) -> Result<bool, Status> {
        let datum = Datum::put(key.to_lowercase(), value.to_lowercase());
        self.replicate(datum).await
    }

    /// Local read under the key's shared lock. No consensus is involved.
    pub async fn get(&self, key: &str) -> Result<String, Status> {
        let key = key.to_lowercase();
        let _guard = self.store.read_lock(&key).await;
        self.store.get(&key).ok_or_else(|| Status::key_not_found(&key))
    }

    /// Replicates a DELETE of a key that exists locally.
    pub async fn delete(&self, key: &str) -> Result<bool, Status> {
        let datum = Datum::delete(key.to_lowercase());
        self.replicate(datum).await
    }

    async fn replicate(&self, datum: Datum) -> Result<bool, Status> {
        match &self.replication {
            Replication::Paxos(proposer) => {
                if datum.method == Method::Delete && !self.store.contains_key(&datum.key) {
                    return Err(Status::key_not_found(&datum.key));
                }
                let chosen = proposer.propose(datum).await;
                learner::apply(&self.store, &chosen);
                Ok(true)
            }
            Replication::TwoPhaseCommit(coordinator) => {
                self.replicate_two_phase(coordinator, datum).await
            }
        }
    }

    async fn replicate_two_phase(
        &self,
        coordinator: &Coordinator<P>,
        datum: Datum,
    ) -> Result<bool, Status> {
        // This replica takes part in the commit too, so it needs its own lock.
        if !self.store.try_write_lock(&datum.key) {
            error!(replica = %self.endpoint, %datum, "unable to acquire local lock");
            return Err(locked_out(datum.method));
        }
        if datum.method == Method::Delete && !self.store.contains_key(&datum.key) {
            self.store.write_unlock(&datum.key);
            return Err(Status::key_not_found(&datum.key));
        }

        let committed = coordinator.two_phase_commit(&datum).await;
        if committed {
            learner::apply(&self.store, &datum);
        }
        self.store.write_unlock(&datum.key);

        if committed {
            Ok(true)
        } else {
            Err(locked_out(datum.method))
        }
    }

    fn on_prepare(&self, proposal_number: i64) -> Result<Response, Status> {
        let response = match self.acceptor.prepare(proposal_number)? {
            Promise::Granted {
                accepted: Some(accepted),
            } => Response::Prepare {
                prepare_ok: true,
                previous_proposal_number: accepted.proposal_number,
                previous_proposal_value: Some(accepted.datum),
            },
            Promise::Granted { accepted: None } => Response::Prepare {
                prepare_ok: true,
                previous_proposal_number: NO_PROPOSAL,
                previous_proposal_value: None,
            },
            Promise::Rejected { .. } => Response::Prepare {
                prepare_ok: false,
                previous_proposal_number: NO_PROPOSAL,
                previous_proposal_value: None,
            },
        };
        Ok(response)
    }

    fn on_tpc_prepare(&self, datum: &Datum) -> Response {
        let is_prepared = self.store.try_write_lock(&datum.key);
        if is_prepared {
            info!(replica = %self.endpoint, %datum, "locked resources, replying commit");
        } else {
            info!(replica = %self.endpoint, %datum, "unable to lock resources, replying abort");
        }
        Response::TpcPrepare { is_prepared }
    }

    fn on_tpc_commit(&self, datum: &Datum) -> Response {
        learner::apply(&self.store, datum);
        self.store.write_unlock(&datum.key);
        Response::TpcCommit { is_committed: true }
    }
}

fn locked_out(method: Method) -> Status {
    let action = match method {
        Method::Put => "put the key/value pair",
        Method::Delete => "delete the value",
    };
    Status::unavailable(format!(
        "Cannot {action} due to database being locked by other requests."
    ))
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use super::*;
    use crate::error::{RpcError, StatusCode};

    /// A peer that never answers; enough for paths that never reach one.
    struct Offline;

    impl Peer for Offline {
        fn endpoint(&self) -> &str {
            "offline"
        }

        fn call(&self, _request: Request) -> impl Future<Output = Result<Response, RpcError>> + Send {
            async { Err(RpcError::Closed) }
        }
    }

    fn paxos_replica() -> Replica<Offline> {
        let proposer = Proposer::new("local", vec![Offline, Offline], Default::default());
        Replica::new("local", Replication::Paxos(proposer), Acceptor::reliable())
    }

    fn tpc_replica() -> Replica<Offline> {
        let coordinator = Coordinator::new("local", vec![Offline, Offline]);
        Replica::new("local", Replication::TwoPhaseCommit(coordinator), Acceptor::reliable())
    }

    #[tokio::test]
    async fn get_of_missing_key_is_invalid_argument() {
        let replica = paxos_replica();
        let response = replica.handle(Request::Get { key: "MissingKey".into() }).await;

        match response {
            Response::Error(status) => {
                assert_eq!(status.code, StatusCode::InvalidArgument);
                assert_eq!(status.message, "Key missingkey doesn't exist.");
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(replica.store().snapshot().is_empty());
    }

    #[tokio::test]
    async fn get_is_case_insensitive() {
        let replica = paxos_replica();
        replica.store().put("foo", "bar");

        assert_eq!(replica.get("FOO").await, Ok("bar".to_string()));
    }

    #[tokio::test]
    async fn delete_of_missing_key_fails_before_consensus() {
        let replica = paxos_replica();
        let result = replica.delete("ghost").await;

        assert_eq!(result.unwrap_err().code, StatusCode::InvalidArgument);
        assert!(replica.acceptor().slot().is_idle());
    }

    #[tokio::test]
    async fn prepare_and_accept_are_served_from_the_slot() {
        let replica = paxos_replica();

        let granted = replica.handle(Request::Prepare { proposal_number: 10 }).await;
        assert_eq!(
            granted,
            Response::Prepare {
                prepare_ok: true,
                previous_proposal_number: NO_PROPOSAL,
                previous_proposal_value: None,
            }
        );

        let accepted = replica
            .handle(Request::Accept {
                proposal_number: 10,
                proposal_value: Datum::put("k", "v"),
            })
            .await;
        assert_eq!(accepted, Response::Accept { accept_ok: true });

        let later = replica.handle(Request::Prepare { proposal_number: 11 }).await;
        assert_eq!(
            later,
            Response::Prepare {
                prepare_ok: true,
                previous_proposal_number: 10,
                previous_proposal_value: Some(Datum::put("k", "v")),
            }
        );

        let stale = replica.handle(Request::Prepare { proposal_number: 3 }).await;
        assert!(matches!(stale, Response::Prepare { prepare_ok: false, .. }));
    }

    #[tokio::test]
    async fn decide_applies_and_frees_the_slot() {
        let replica = paxos_replica();
        replica.handle(Request::Prepare { proposal_number: 4 }).await;

        let response = replica
            .handle(Request::Decide {
                proposal_value: Datum::put("k", "v"),
            })
            .await;

        assert_eq!(response, Response::Decide { success: true });
        assert_eq!(replica.store().get("k"), Some("v".to_string()));
        assert!(replica.acceptor().slot().is_idle());
    }

    #[tokio::test]
    async fn two_phase_commit_aborts_when_a_peer_is_unreachable() {
        let replica = tpc_replica();
        let result = replica.put("k", "v").await;

        assert_eq!(result.unwrap_err().code, StatusCode::Unavailable);
        assert_eq!(replica.store().get("k"), None);
        assert!(replica.store().try_write_lock("k"), "local lock must be released");
    }

    #[tokio::test]
    async fn two_phase_commit_refuses_a_locally_locked_key() {
        let replica = tpc_replica();
        replica
            .handle(Request::TpcPrepare {
                datum: Datum::put("k", "v"),
            })
            .await;

        let result = replica.put("k", "other").await;
        assert_eq!(result.unwrap_err().code, StatusCode::Unavailable);

        let aborted = replica
            .handle(Request::TpcAbort {
                datum: Datum::put("k", "v"),
            })
            .await;
        assert_eq!(aborted, Response::TpcAbort { is_aborted: true });
    }

    #[tokio::test]
    async fn tpc_commit_applies_and_unlocks() {
        let replica = tpc_replica();
        let datum = Datum::put("k", "v");
        replica.handle(Request::TpcPrepare { datum: datum.clone() }).await;

        let response = replica.handle(Request::TpcCommit { datum }).await;
        assert_eq!(response, Response::TpcCommit { is_committed: true });
        assert_eq!(replica.get("k").await, Ok("v".to_string()));
        assert!(replica.store().try_write_lock("k"));
    }
}
