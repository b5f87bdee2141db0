//! Replicated key-value store kept consistent with single-decree Paxos.
//!
//! Every replica runs the same server: it answers client PUT/GET/DELETE and
//! plays proposer, acceptor and learner for its peers. See `README.md`
//! for usage and the wire protocol. Modules by responsibility:
//!
//! - [`store`] holds the key/value map and the per-key locks.
//! - [`acceptor`] and [`learner`] are the passive Paxos roles, [`proposer`]
//!   drives a decree to completion.
//! - [`coordinator`] is the two-phase-commit alternative to [`proposer`].
//! - [`replica`] ties one store, one acceptor and one replication strategy
//!   together behind [`replica::Replica::handle`].
//! - [`message`] and [`transport`] carry requests between processes as JSON
//!   lines; [`server`] accepts them and [`client`] issues them.
//! - [`command`], [`checksum`] and [`legacy`] implement the older text
//!   protocol with `;<checksum>;` framing.
//! - [`config`] and [`cli`] turn command-line flags into a
//!   [`config::ReplicaConfig`].

pub mod acceptor;
pub mod checksum;
pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod datum;
pub mod error;
pub mod learner;
pub mod legacy;
pub mod message;
pub mod proposer;
pub mod replica;
pub mod server;
pub mod store;
pub mod transport;
