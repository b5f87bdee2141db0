use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::config::{ClusterTopology, Protocol, ReplicaConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one replica of the cluster.
    Serve(ServeArgs),
    /// Send a single request to a replica and print the result.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Endpoint this replica listens on. Must appear in `--replica`.
    #[arg(long, default_value = "localhost:32000")]
    pub listen: String,

    /// Every replica in the cluster, this one included, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub replica: Vec<String>,

    /// Replication strategy for PUT and DELETE.
    #[arg(long, value_enum, default_value_t = Protocol::Paxos)]
    pub protocol: Protocol,

    /// Deadline for each replica-to-replica call, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub rpc_deadline_ms: u64,

    /// Pause before a failed decree is retried, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub restart_delay_ms: u64,

    /// Probability that the acceptor fails a prepare or accept on purpose.
    #[arg(long, default_value_t = 0.2)]
    pub fault_ratio: f64,

    /// Also serve the checksum-framed text protocol on this address.
    #[arg(long)]
    pub legacy_listen: Option<SocketAddr>,
}

impl ServeArgs {
    pub fn to_config(&self) -> Result<ReplicaConfig> {
        let topology = ClusterTopology::new(self.replica.clone())?;
        ReplicaConfig::new(&self.listen, topology)?
            .with_protocol(self.protocol)
            .with_rpc_deadline(Duration::from_millis(self.rpc_deadline_ms))
            .with_restart_delay(Duration::from_millis(self.restart_delay_ms))
            .with_fault_ratio(self.fault_ratio)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Replica to send the request to.
    #[arg(long, default_value = "localhost:32000")]
    pub server: String,

    /// Give up after this many milliseconds. Waits indefinitely by default.
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// `put <key> <value>`, `get <key>` or `delete <key>`.
    #[arg(required = true, num_args = 2..=3)]
    pub command: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_args_build_a_config() -> Result<()> {
        let cli = Cli::try_parse_from([
            "paxos-kv",
            "serve",
            "--listen",
            "localhost:32001",
            "--replica",
            "localhost:32000,localhost:32001,localhost:32002",
            "--protocol",
            "two-phase-commit",
            "--fault-ratio",
            "0",
        ])?;
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let config = args.to_config()?;
        assert_eq!(config.protocol, Protocol::TwoPhaseCommit);
        assert_eq!(config.fault_ratio, 0.0);
        assert_eq!(config.rpc_deadline, Duration::from_millis(5000));
        assert_eq!(
            config.peer_endpoints(),
            vec!["localhost:32000".to_string(), "localhost:32002".to_string()]
        );
        Ok(())
    }

    #[test]
    fn serve_rejects_an_even_replica_set() -> Result<()> {
        let cli = Cli::try_parse_from([
            "paxos-kv",
            "serve",
            "--listen",
            "a:1",
            "--replica",
            "a:1,b:2",
        ])?;
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.to_config().is_err());
        Ok(())
    }

    #[test]
    fn client_takes_trailing_words() -> Result<()> {
        let cli = Cli::try_parse_from(["paxos-kv", "client", "put", "apple", "fruit"])?;
        let Command::Client(args) = cli.command else {
            panic!("expected client");
        };
        assert_eq!(args.server, "localhost:32000");
        assert_eq!(args.command, vec!["put", "apple", "fruit"]);
        assert!(Cli::try_parse_from(["paxos-kv", "client", "get"]).is_err());
        Ok(())
    }
}
