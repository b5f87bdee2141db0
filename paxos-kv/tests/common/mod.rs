//! In-process cluster harness shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use paxos_kv::acceptor::{FaultInjector, NoFaults};
use paxos_kv::client::Client;
use paxos_kv::config::{ClusterTopology, Protocol, ReplicaConfig};
use paxos_kv::replica::Replica;
use paxos_kv::server::Server;
use paxos_kv::transport::TcpPeer;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const RESTART_DELAY: Duration = Duration::from_millis(20);
pub const RPC_DEADLINE: Duration = Duration::from_millis(1000);

/// Replicas served over real loopback sockets on ephemeral ports.
pub struct TestCluster {
    replicas: Vec<Arc<Replica<TcpPeer>>>,
    shutdowns: Vec<oneshot::Sender<()>>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl TestCluster {
    pub async fn spawn(n: usize, protocol: Protocol) -> Result<Self> {
        Self::spawn_with_faults(n, protocol, |_| Box::new(NoFaults)).await
    }

    /// `faults(i)` picks the fault injector for the i-th replica.
    pub async fn spawn_with_faults<F>(n: usize, protocol: Protocol, mut faults: F) -> Result<Self>
    where
        F: FnMut(usize) -> Box<dyn FaultInjector>,
    {
        let mut listeners = Vec::with_capacity(n);
        for _ in 0..n {
            listeners.push(TcpListener::bind("127.0.0.1:0").await?);
        }
        let endpoints = listeners
            .iter()
            .map(|listener| Ok(listener.local_addr()?.to_string()))
            .collect::<Result<Vec<_>>>()?;
        let topology = ClusterTopology::new(endpoints.clone())?;

        let mut cluster = Self {
            replicas: Vec::with_capacity(n),
            shutdowns: Vec::with_capacity(n),
            tasks: Vec::with_capacity(n),
        };
        for (i, (listener, endpoint)) in listeners.into_iter().zip(endpoints).enumerate() {
            let config = ReplicaConfig::new(endpoint, topology.clone())?
                .with_protocol(protocol)
                .with_rpc_deadline(RPC_DEADLINE)
                .with_restart_delay(RESTART_DELAY)
                .with_fault_ratio(0.0)?;
            let replica = Arc::new(Replica::from_config_with_faults(&config, faults(i)));

            let (tx, rx) = oneshot::channel::<()>();
            let server = Server::new(listener, Arc::clone(&replica));
            cluster.tasks.push(tokio::spawn(server.run_until(async {
                let _ = rx.await;
            })));
            cluster.shutdowns.push(tx);
            cluster.replicas.push(replica);
        }
        Ok(cluster)
    }

    /// 0-indexed.
    pub fn replica(&self, i: usize) -> &Arc<Replica<TcpPeer>> {
        &self.replicas[i]
    }

    pub fn replicas(&self) -> &[Arc<Replica<TcpPeer>>] {
        &self.replicas
    }

    pub fn client(&self, i: usize) -> Client {
        Client::new(self.replicas[i].endpoint()).with_deadline(Duration::from_secs(10))
    }

    pub async fn shutdown(self) -> Result<()> {
        for tx in self.shutdowns {
            let _ = tx.send(());
        }
        for task in self.tasks {
            task.await??;
        }
        Ok(())
    }
}
