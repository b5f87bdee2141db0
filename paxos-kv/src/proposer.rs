//! Proposer role: drives one decree at a time to completion.
//!
//! A decree runs three rounds against every *other* replica:
//!
//! 1. **Prepare** with a fresh proposal number. A majority of peers must
//!    promise. The highest-numbered value any of them already accepted
//!    replaces the proposer's own datum.
//! 2. **Accept** the chosen value under the same number. A majority of peers
//!    must accept.
//! 3. **Decide**: every peer is told the chosen value. Replies are logged but
//!    not counted.
//!
//! If either counted round misses a majority the decree is abandoned, the
//! proposer sleeps for the restart delay and starts over with a larger
//! number. There is no retry limit: [`Proposer::propose`] only returns once a
//! decree completes.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::acceptor::Accepted;
use crate::datum::Datum;
use crate::error::RpcError;
use crate::message::{NO_PROPOSAL, Request, Response};
use crate::transport::Peer;

/// Pause between a failed decree and its restart.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(1000);

/// Current wall-clock time in milliseconds.
///
/// Comparable across replicas without coordination. Two proposers can draw
/// the same number in the same millisecond; that is tolerated.
pub fn generate_proposal_number() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// `true` when `num_ok` is strictly more than half of `peers`.
///
/// `peers` excludes the proposing replica, so with five replicas the
/// threshold is three out of four.
pub fn is_majority(num_ok: usize, peers: usize) -> bool {
    num_ok > peers / 2
}

/// Wall-clock proposal numbers that never repeat within one proposer.
#[derive(Debug, Default)]
struct ProposalClock {
    last: AtomicI64,
}

impl ProposalClock {
    fn next(&self) -> i64 {
        let now = generate_proposal_number();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Why a single decree was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecreeFailure {
    #[error("prepare reached {ok} of {peers} peers")]
    Prepare { ok: usize, peers: usize },
    #[error("accept reached {ok} of {peers} peers")]
    Accept { ok: usize, peers: usize },
}

/// A successful Prepare reply.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PrepareReply {
    prepare_ok: bool,
    previous: Option<Accepted>,
}

pub struct Proposer<P> {
    endpoint: String,
    peers: Vec<P>,
    restart_delay: Duration,
    clock: ProposalClock,
}

impl<P: Peer> Proposer<P> {
    /// `peers` must not include the replica this proposer runs on.
    pub fn new(endpoint: impl Into<String>, peers: Vec<P>, restart_delay: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            peers,
            restart_delay,
            clock: ProposalClock::default(),
        }
    }

    /// Runs decrees until one completes and returns the value it decided.
    ///
    /// The decided value is not necessarily `datum`: a value some peer had
    /// already accepted takes precedence. The caller applies the returned
    /// value to its own store; peers learn it through Decide.
    pub async fn propose(&self, datum: Datum) -> Datum {
        let mut attempt: u64 = 1;
        loop {
            let proposal_number = self.clock.next();
            match self.run_decree(proposal_number, &datum).await {
                Ok(chosen) => return chosen,
                Err(failure) => {
                    info!(
                        replica = %self.endpoint,
                        attempt,
                        %failure,
                        "unable to reach majority, restarting paxos after {:?}",
                        self.restart_delay
                    );
                    tokio::time::sleep(self.restart_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One full prepare/accept/decide pass under `proposal_number`.
    pub async fn run_decree(
        &self,
        proposal_number: i64,
        datum: &Datum,
    ) -> Result<Datum, DecreeFailure> {
        info!(replica = %self.endpoint, proposal_number, %datum, "initiating paxos");

        let chosen = self.send_prepare(proposal_number, datum).await?;
        self.send_accept(proposal_number, &chosen).await?;
        self.send_decide(&chosen).await;

        info!(replica = %self.endpoint, proposal_number, %chosen, "paxos successful");
        Ok(chosen)
    }

    async fn send_prepare(&self, proposal_number: i64, datum: &Datum) -> Result<Datum, DecreeFailure> {
        let replies = join_all(self.peers.iter().map(|peer| async move {
            let reply = prepare(peer, proposal_number).await;
            (peer.endpoint(), reply)
        }))
        .await;

        let mut ok = 0;
        let mut previous: Option<Accepted> = None;
        for (peer, reply) in replies {
            let reply = match reply {
                Ok(reply) => reply,
                Err(err) => {
                    error!(replica = %self.endpoint, peer, error = %err, "prepare failed");
                    continue;
                }
            };
            info!(
                replica = %self.endpoint,
                peer,
                prepare_ok = reply.prepare_ok,
                previous = ?reply.previous,
                "received prepare response"
            );
            if !reply.prepare_ok {
                continue;
            }
            ok += 1;
            if let Some(candidate) = reply.previous {
                let highest = previous
                    .as_ref()
                    .map_or(NO_PROPOSAL, |accepted| accepted.proposal_number);
                if candidate.proposal_number > highest {
                    previous = Some(candidate);
                }
            }
        }

        let peers = self.peers.len();
        info!(replica = %self.endpoint, peers, ok, "prepare round finished");
        if !is_majority(ok, peers) {
            return Err(DecreeFailure::Prepare { ok, peers });
        }

        Ok(match previous {
            Some(accepted) => {
                info!(
                    replica = %self.endpoint,
                    previous = accepted.proposal_number,
                    datum = %accepted.datum,
                    "adopting previously accepted value"
                );
                accepted.datum
            }
            None => datum.clone(),
        })
    }

    async fn send_accept(&self, proposal_number: i64, chosen: &Datum) -> Result<(), DecreeFailure> {
        let replies = join_all(self.peers.iter().map(|peer| async move {
            let reply = accept(peer, proposal_number, chosen.clone()).await;
            (peer.endpoint(), reply)
        }))
        .await;

        let mut ok = 0;
        for (peer, reply) in replies {
            match reply {
                Ok(accept_ok) => {
                    info!(replica = %self.endpoint, peer, accept_ok, "received accept response");
                    if accept_ok {
                        ok += 1;
                    }
                }
                Err(err) => error!(replica = %self.endpoint, peer, error = %err, "accept failed"),
            }
        }

        let peers = self.peers.len();
        info!(replica = %self.endpoint, peers, ok, "accept round finished");
        if is_majority(ok, peers) {
            Ok(())
        } else {
            Err(DecreeFailure::Accept { ok, peers })
        }
    }

    async fn send_decide(&self, chosen: &Datum) {
        let replies = join_all(self.peers.iter().map(|peer| async move {
            let request = Request::Decide {
                proposal_value: chosen.clone(),
            };
            (peer.endpoint(), peer.call(request).await)
        }))
        .await;

        for (peer, reply) in replies {
            match reply {
                Ok(Response::Decide { success }) => {
                    info!(replica = %self.endpoint, peer, success, "received decide response")
                }
                Ok(other) => warn!(replica = %self.endpoint, peer, ?other, "unexpected decide response"),
                Err(err) => error!(replica = %self.endpoint, peer, error = %err, "decide failed"),
            }
        }
    }
}

async fn prepare<P: Peer>(peer: &P, proposal_number: i64) -> Result<PrepareReply, RpcError> {
    match peer.call(Request::Prepare { proposal_number }).await? {
        Response::Prepare {
            prepare_ok,
            previous_proposal_number,
            previous_proposal_value,
        } => Ok(PrepareReply {
            prepare_ok,
            previous: previous_proposal_value.map(|datum| Accepted {
                proposal_number: previous_proposal_number,
                datum,
            }),
        }),
        _ => Err(RpcError::UnexpectedResponse("prepare")),
    }
}

async fn accept<P: Peer>(peer: &P, proposal_number: i64, datum: Datum) -> Result<bool, RpcError> {
    let request = Request::Accept {
        proposal_number,
        proposal_value: datum,
    };
    match peer.call(request).await? {
        Response::Accept { accept_ok } => Ok(accept_ok),
        _ => Err(RpcError::UnexpectedResponse("accept")),
    }
}
