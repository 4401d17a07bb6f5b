use std::time::Duration;

use membership_rs::{
    Cluster, ClusterConfig, EventFilter, EventKind, EventType, MemberStatus, Subscription,
};

macro_rules! assert_event {
    ($event:pat $(if $guard:expr)?, $sub:expr, $ms:expr) => {
        let result = tokio::time::timeout(Duration::from_millis($ms), async {
            loop {
                match $sub.recv().await.map(|e| e.into_kind()) {
                    Some($event) $(if $guard)? => break,
                    Some(_) => continue,
                    None => panic!("subscription closed"),
                }
            }
        })
        .await;

        if result.is_err() {
            panic!("timed out waiting for {}", stringify!($event))
        }
    };
}

async fn create_single_node(ms: u64, known_peers: &[&str]) -> Cluster {
    let config = ClusterConfig::builder()
        .with_gossip_interval(Duration::from_millis(ms))
        .with_gossip_timeout(Duration::from_millis(ms * 20))
        .with_known_peers(known_peers)
        .build();
    Cluster::try_new("127.0.0.1:0", config).await.unwrap()
}

async fn create_seed_node(ms: u64) -> Cluster {
    let node = create_single_node(ms, &[]).await;
    node.run().await.unwrap();
    node.join(node.addr()).await.unwrap();
    node
}

/// Collects the member events of `address` until it is removed.
async fn member_history(
    subscription: &mut Subscription,
    address: &str,
    ms: u64,
) -> Vec<EventType> {
    let mut history = vec![];
    tokio::time::timeout(Duration::from_millis(ms), async {
        while let Some(event) = subscription.recv().await {
            if event.kind().member().is_some_and(|m| m.address() == address) {
                history.push(event.kind().event_type());
                if event.kind().event_type() == EventType::MemberRemoved {
                    break;
                }
            }
        }
    })
    .await
    .unwrap();
    history
}

#[tokio::test]
async fn test_cluster_two_nodes_join_and_become_up() {
    let node1 = create_seed_node(10).await;
    let node2 = create_single_node(10, &[node1.addr()]).await;
    let mut sub1 = node1.subscribe(EventFilter::MemberEvents);
    let mut sub2 = node2.subscribe(EventFilter::MemberEvents);
    let addr2 = node2.addr().to_string();

    node2.run().await.unwrap();

    assert_event!(EventKind::MemberUp(m) if m.address() == addr2, sub1, 2000);
    assert_event!(EventKind::MemberUp(m) if m.address() == addr2, sub2, 2000);

    let state = node2.state();
    assert_eq!(state.len(), 2);
    assert!(state
        .members()
        .iter()
        .all(|m| m.status() == MemberStatus::Up));
}

#[tokio::test]
async fn test_cluster_views_converge() {
    let node1 = create_seed_node(10).await;
    let node2 = create_single_node(10, &[node1.addr()]).await;
    let node3 = create_single_node(10, &[node1.addr()]).await;
    node2.run().await.unwrap();
    node3.run().await.unwrap();

    let nodes = [&node1, &node2, &node3];
    let converged = tokio::time::timeout(Duration::from_millis(3000), async {
        loop {
            let states: Vec<_> = nodes.iter().map(|n| n.state()).collect();
            let all_up = states.iter().all(|s| {
                s.len() == 3 && s.members().iter().all(|m| m.status() == MemberStatus::Up)
            });
            if all_up && states.windows(2).all(|w| w[0].members() == w[1].members()) {
                break states;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let leader = converged[0].leader().map(str::to_string);
    assert!(leader.is_some());
    assert!(converged.iter().all(|s| s.leader().map(str::to_string) == leader));
}

#[tokio::test]
async fn test_cluster_leave_events_are_ordered() {
    let node1 = create_seed_node(10).await;
    let node2 = create_single_node(10, &[node1.addr()]).await;
    let mut sub1 = node1.subscribe(EventFilter::MemberEvents);
    let mut sub2 = node2.subscribe(EventFilter::MemberEvents);
    let addr2 = node2.addr().to_string();

    node2.run().await.unwrap();
    assert_event!(EventKind::MemberUp(m) if m.address() == addr2, sub2, 2000);

    node2.leave(&addr2).await.unwrap();

    let history = member_history(&mut sub1, &addr2, 3000).await;
    assert_eq!(
        history,
        vec![
            EventType::MemberJoined,
            EventType::MemberUp,
            EventType::MemberLeft,
            EventType::MemberExited,
            EventType::MemberRemoved
        ]
    );

    // the removed node stops and closes its subscriptions
    let closed = tokio::time::timeout(Duration::from_millis(2000), async {
        while sub2.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());

    let pruned = tokio::time::timeout(Duration::from_millis(2000), async {
        while node1.state().len() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(pruned.is_ok());
}

#[tokio::test]
async fn test_cluster_shutdown_does_not_block_later_joins() {
    let node1 = create_seed_node(10).await;
    let node2 = create_single_node(10, &[node1.addr()]).await;
    let mut sub1 = node1.subscribe(EventFilter::MemberEvents);
    let addr2 = node2.addr().to_string();

    node2.run().await.unwrap();
    assert_event!(EventKind::MemberUp(m) if m.address() == addr2, sub1, 2000);

    tokio::time::timeout(Duration::from_millis(3000), node2.shutdown())
        .await
        .unwrap()
        .unwrap();
    assert_event!(
        EventKind::MemberRemoved(r) if r.member.address() == addr2
            && r.previous_status == MemberStatus::Exiting,
        sub1,
        2000
    );

    let node3 = create_single_node(10, &[node1.addr()]).await;
    let addr3 = node3.addr().to_string();
    node3.run().await.unwrap();
    assert_event!(EventKind::MemberUp(m) if m.address() == addr3, sub1, 2000);

    let state = node1.state();
    assert!(state.unreachable().is_empty());
    assert!(state.member(&addr2).is_none());
}

#[tokio::test]
async fn test_cluster_subscribe_with_initial_state() {
    let node1 = create_seed_node(10).await;
    let node2 = create_single_node(10, &[node1.addr()]).await;
    let mut sub1 = node1.subscribe(EventFilter::MemberEvents);
    let addr2 = node2.addr().to_string();

    node2.run().await.unwrap();
    assert_event!(EventKind::MemberUp(m) if m.address() == addr2, sub1, 2000);

    let mut sub = node1
        .subscribe_with_initial_state(EventFilter::MemberEvents)
        .await
        .unwrap();

    let mut initial = vec![];
    for _ in 0..2 {
        initial.push(sub.recv().await.unwrap().into_kind());
    }
    assert!(initial
        .iter()
        .all(|kind| matches!(kind, EventKind::MemberUp(_))));

    assert!(node1.unsubscribe(&sub));
    assert!(!node1.unsubscribe(&sub));

    let closed = tokio::time::timeout(Duration::from_millis(1000), async {
        while sub.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_cluster_run_twice_fails() {
    let node = create_single_node(10, &[]).await;

    node.run().await.unwrap();
    assert!(node.run().await.is_err());

    node.shutdown().await.unwrap();
    assert!(node.join(node.addr()).await.is_err());
}
