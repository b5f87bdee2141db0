//! End-to-end two-phase commit over loopback TCP.

mod common;

use anyhow::Result;
use common::TestCluster;
use paxos_kv::config::Protocol;
use paxos_kv::datum::Datum;
use paxos_kv::error::StatusCode;
use paxos_kv::message::Request;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commit_applies_on_every_replica_and_releases_locks() -> Result<()> {
    let cluster = TestCluster::spawn(3, Protocol::TwoPhaseCommit).await?;
    for replica in cluster.replicas() {
        assert_eq!(replica.protocol(), Protocol::TwoPhaseCommit);
    }

    assert!(cluster.client(0).put("k", "v").await?);

    for replica in cluster.replicas() {
        assert_eq!(replica.store().get("k"), Some("v".to_string()));
        assert!(replica.store().try_write_lock("k"), "lock left behind");
        replica.store().write_unlock("k");
    }

    assert!(cluster.client(1).delete("k").await?);
    for replica in cluster.replicas() {
        assert_eq!(replica.store().get("k"), None);
    }

    cluster.shutdown().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_locked_peer_aborts_the_write() -> Result<()> {
    let cluster = TestCluster::spawn(3, Protocol::TwoPhaseCommit).await?;

    // Another coordinator holds the key on replica 2.
    cluster
        .replica(2)
        .handle(Request::TpcPrepare {
            datum: Datum::put("k", "other"),
        })
        .await;

    let err = cluster.client(0).put("k", "v").await.unwrap_err();
    assert_eq!(err.status().code, StatusCode::Unavailable);

    for replica in cluster.replicas() {
        assert_eq!(replica.store().get("k"), None);
    }
    // Replica 1 prepared and must have been aborted; replica 2 keeps its lock.
    assert!(cluster.replica(1).store().try_write_lock("k"));
    assert!(!cluster.replica(2).store().try_write_lock("k"));

    cluster.shutdown().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_of_missing_key_is_rejected() -> Result<()> {
    let cluster = TestCluster::spawn(3, Protocol::TwoPhaseCommit).await?;

    let err = cluster.client(0).delete("ghost").await.unwrap_err();
    assert_eq!(err.status().code, StatusCode::InvalidArgument);
    assert!(cluster.replica(0).store().try_write_lock("ghost"));

    cluster.shutdown().await
}
