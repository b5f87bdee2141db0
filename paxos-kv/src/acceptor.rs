//! Acceptor role: the promise/accept register every replica carries.
//!
//! A replica has exactly one [`DecreeSlot`], shared by every decree that
//! reaches it. Decrees proposed by different replicas for unrelated keys
//! therefore contend for the same promise. The slot returns to
//! [`DecreeSlot::Idle`] only when a Decide arrives.

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::datum::Datum;
use crate::error::Status;
use crate::message::NO_PROPOSAL;

/// Probability with which [`RandomFaults`] fails a request by default.
pub const DEFAULT_FAULT_RATIO: f64 = 0.2;

/// Decides whether the next Prepare or Accept should fail outright.
pub trait FaultInjector: Send + Sync {
    fn should_fail(&self) -> bool;
}

impl<F> FaultInjector for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_fail(&self) -> bool {
        self()
    }
}

/// Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn should_fail(&self) -> bool {
        false
    }
}

/// Fails each request independently with probability `ratio`.
#[derive(Debug, Clone, Copy)]
pub struct RandomFaults {
    ratio: f64,
}

impl RandomFaults {
    /// `ratio` is clamped into `[0, 1]`.
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio: ratio.clamp(0.0, 1.0),
        }
    }
}

impl Default for RandomFaults {
    fn default() -> Self {
        Self::new(DEFAULT_FAULT_RATIO)
    }
}

impl FaultInjector for RandomFaults {
    fn should_fail(&self) -> bool {
        rand::thread_rng().gen_bool(self.ratio)
    }
}

/// A value together with the proposal number it was accepted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub proposal_number: i64,
    pub datum: Datum,
}

/// The acceptor register, one per replica process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DecreeSlot {
    /// No decree in flight: nothing promised, nothing accepted.
    #[default]
    Idle,
    /// A Prepare was granted but no value accepted yet.
    Promised { promised: i64 },
    /// A value was accepted; `promised` may since have grown.
    Accepted { promised: i64, accepted: Accepted },
}

impl DecreeSlot {
    /// Highest proposal number seen, or -1 when idle.
    pub fn largest_proposal_number(&self) -> i64 {
        match self {
            DecreeSlot::Idle => NO_PROPOSAL,
            DecreeSlot::Promised { promised } | DecreeSlot::Accepted { promised, .. } => *promised,
        }
    }

    pub fn accepted(&self) -> Option<&Accepted> {
        match self {
            DecreeSlot::Accepted { accepted, .. } => Some(accepted),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, DecreeSlot::Idle)
    }
}

/// Reply to a Prepare that was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promise {
    Granted { accepted: Option<Accepted> },
    Rejected { promised: i64 },
}

pub struct Acceptor {
    slot: Mutex<DecreeSlot>,
    faults: Box<dyn FaultInjector>,
}

impl Acceptor {
    pub fn new(faults: Box<dyn FaultInjector>) -> Self {
        Self {
            slot: Mutex::new(DecreeSlot::Idle),
            faults,
        }
    }

    pub fn reliable() -> Self {
        Self::new(Box::new(NoFaults))
    }

    /// Phase one. Promises to ignore anything numbered below `proposal_number`.
    ///
    /// An injected fault is returned as `Err`, which the server sends back as
    /// an RPC error, so the proposer treats it exactly like a lost peer.
    pub fn prepare(&self, proposal_number: i64) -> Result<Promise, Status> {
        self.maybe_fail("prepare")?;

        let mut slot = self.slot.lock();
        let largest = slot.largest_proposal_number();
        if proposal_number < largest {
            debug!(proposal_number, largest, "rejecting prepare");
            return Ok(Promise::Rejected { promised: largest });
        }

        let accepted = slot.accepted().cloned();
        *slot = match accepted.clone() {
            Some(accepted) => DecreeSlot::Accepted {
                promised: proposal_number,
                accepted,
            },
            None => DecreeSlot::Promised {
                promised: proposal_number,
            },
        };
        Ok(Promise::Granted { accepted })
    }

    /// Phase two. Accepts `datum` unless a higher number was promised since.
    pub fn accept(&self, proposal_number: i64, datum: Datum) -> Result<bool, Status> {
        self.maybe_fail("accept")?;

        let mut slot = self.slot.lock();
        let largest = slot.largest_proposal_number();
        if proposal_number < largest {
            debug!(proposal_number, largest, "rejecting accept");
            return Ok(false);
        }

        *slot = DecreeSlot::Accepted {
            promised: proposal_number,
            accepted: Accepted {
                proposal_number,
                datum,
            },
        };
        Ok(true)
    }

    /// Returns the slot to idle and hands back what it held.
    pub fn reset(&self) -> DecreeSlot {
        std::mem::take(&mut *self.slot.lock())
    }

    pub fn slot(&self) -> DecreeSlot {
        self.slot.lock().clone()
    }

    fn maybe_fail(&self, phase: &str) -> Result<(), Status> {
        if self.faults.should_fail() {
            warn!(phase, "injected acceptor fault");
            return Err(Status::internal(format!(
                "randomly generated exception during {phase}"
            )));
        }
        Ok(())
    }
}

impl Default for Acceptor {
    fn default() -> Self {
        Self::reliable()
    }
}
