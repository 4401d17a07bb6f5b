use membership_rs::{
    Cluster, ClusterConfig, EventFilter, EventKind, OverflowStrategy, Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let node1 = Cluster::try_new("127.0.0.1:8080", ClusterConfig::new()).await?;
    let node2 = Cluster::try_new(
        "127.0.0.1:8081",
        ClusterConfig::builder()
            .with_known_peers(["127.0.0.1:8080"])
            .build(),
    )
    .await?;

    // Subscribe before running so no event is missed
    let mut members = node1.subscribe_with(EventFilter::MemberEvents, OverflowStrategy::Backpressure);
    let mut leader = node1.subscribe(EventFilter::LeaderEvents);

    node1.run().await?;
    node1.join(node1.addr()).await?;
    node2.run().await?;

    if let Some(event) = leader.recv().await {
        tracing::info!("[{}] leader {:?}", node1.addr(), event.kind());
    }

    // Handle events accordingly
    while let Some(event) = members.recv().await {
        match event.into_kind() {
            EventKind::MemberJoined(m) => tracing::info!("[{}] joined {}", node1.addr(), m),
            EventKind::MemberUp(m) if m.address() == node2.addr() => {
                tracing::info!("[{}] up {}, asking it to leave", node1.addr(), m);
                node1.leave(m.address()).await?;
            }
            EventKind::MemberUp(m) => tracing::info!("[{}] up {}", node1.addr(), m),
            EventKind::MemberLeft(m) => tracing::info!("[{}] left {}", node1.addr(), m),
            EventKind::MemberExited(m) => tracing::info!("[{}] exited {}", node1.addr(), m),
            EventKind::MemberDowned(m) => tracing::info!("[{}] downed {}", node1.addr(), m),
            EventKind::MemberRemoved(r) => {
                tracing::info!(
                    "[{}] removed {} (was {})",
                    node1.addr(),
                    r.member,
                    r.previous_status
                );
                break;
            }
            _ => {}
        }
    }

    tracing::info!("[{}] {} events rejected", node1.addr(), members.dropped());
    node1.shutdown().await?;

    Ok(())
}
