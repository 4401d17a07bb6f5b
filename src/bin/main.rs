use std::time::Duration;

use membership_rs::{Cluster, ClusterConfig, EventFilter, EventKind, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClusterConfig::builder()
        .with_gossip_interval(Duration::from_millis(200))
        .with_gossip_timeout(Duration::from_millis(100))
        .build();

    let mut nodes = Vec::new();
    for i in 0..3 {
        let node = Cluster::try_new(format!("127.0.0.1:808{i}"), config.clone()).await?;
        node.run().await?;
        nodes.push(node);
    }

    let seed = nodes[0].addr().to_string();
    let mut events = nodes[0].subscribe(EventFilter::MemberEvents);
    for node in &nodes {
        node.join(&seed).await?;
    }

    let leaving = nodes[2].addr().to_string();
    let mut up = 0;
    while let Some(event) = events.recv().await {
        tracing::info!("[{}] {:?}", &seed, event.kind());

        match event.into_kind() {
            EventKind::MemberUp(_) => {
                up += 1;
                if up == nodes.len() {
                    nodes[2].leave(&leaving).await?;
                }
            }
            EventKind::MemberRemoved(removed) if removed.member.address() == leaving => break,
            _ => {}
        }
    }

    tracing::info!("[{}] cluster is now {:?}", &seed, nodes[0].state().members());

    for node in &nodes[..2] {
        node.shutdown().await?;
    }

    Ok(())
}
