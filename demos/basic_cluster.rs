use std::time::Duration;

use membership_rs::{Cluster, ClusterConfig, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // The first node forms a new cluster by joining itself
    let node1 = Cluster::try_new("127.0.0.1:8080", ClusterConfig::new()).await?;
    node1.run().await?;
    node1.join(node1.addr()).await?;

    // The second node finds the cluster through its seed
    let node2 = Cluster::try_new(
        "127.0.0.1:8081",
        ClusterConfig::builder()
            .with_known_peers(["127.0.0.1:8080"])
            .build(),
    )
    .await?;
    node2.run().await?;

    // Give gossip a few rounds to converge
    tokio::time::sleep(Duration::from_secs(5)).await;

    let state = node2.state();
    tracing::info!(
        "[{}] leader={:?} converged={} members={:?}",
        node2.addr(),
        state.leader(),
        state.is_converged(),
        state.members()
    );

    node2.shutdown().await?;
    node1.shutdown().await?;

    Ok(())
}
