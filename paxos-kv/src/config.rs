use std::time::Duration;

use anyhow::{Result, ensure};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::acceptor::DEFAULT_FAULT_RATIO;
use crate::proposer::DEFAULT_RESTART_DELAY;
use crate::transport::DEFAULT_RPC_DEADLINE;

/// Which replication strategy carries PUT and DELETE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    #[default]
    Paxos,
    TwoPhaseCommit,
}

/// The fixed replica set, agreed out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    endpoints: Vec<String>,
}

impl ClusterTopology {
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        ensure!(
            endpoints.len() >= 3,
            "topology requires at least three replicas, got {}",
            endpoints.len()
        );
        ensure!(
            endpoints.len() % 2 == 1,
            "topology must have an odd number of replicas"
        );
        for (i, endpoint) in endpoints.iter().enumerate() {
            ensure!(
                !endpoints[..i].contains(endpoint),
                "replica {endpoint} listed twice"
            );
        }
        Ok(Self { endpoints })
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.endpoints.iter().any(|e| e == endpoint)
    }

    /// Every member except `local`, in configured order.
    pub fn peers_of<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.endpoints
            .iter()
            .map(String::as_str)
            .filter(move |endpoint| *endpoint != local)
    }
}

/// Everything needed to start one replica.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub endpoint: String,
    pub topology: ClusterTopology,
    pub protocol: Protocol,
    pub rpc_deadline: Duration,
    pub restart_delay: Duration,
    pub fault_ratio: f64,
}

impl ReplicaConfig {
    pub fn new(endpoint: impl Into<String>, topology: ClusterTopology) -> Result<Self> {
        let endpoint = endpoint.into();
        ensure!(
            topology.contains(&endpoint),
            "local endpoint {endpoint} is not a member of the replica set"
        );
        Ok(Self {
            endpoint,
            topology,
            protocol: Protocol::default(),
            rpc_deadline: DEFAULT_RPC_DEADLINE,
            restart_delay: DEFAULT_RESTART_DELAY,
            fault_ratio: DEFAULT_FAULT_RATIO,
        })
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_rpc_deadline(mut self, deadline: Duration) -> Self {
        self.rpc_deadline = deadline;
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_fault_ratio(mut self, ratio: f64) -> Result<Self> {
        ensure!(
            (0.0..=1.0).contains(&ratio),
            "fault ratio must lie in [0, 1], got {ratio}"
        );
        self.fault_ratio = ratio;
        Ok(self)
    }

    pub fn peer_endpoints(&self) -> Vec<String> {
        self.topology
            .peers_of(&self.endpoint)
            .map(str::to_string)
            .collect()
    }
}
