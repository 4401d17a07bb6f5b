use std::fmt;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::core::disseminate::{OverflowStrategy, Subscription};
use crate::core::event::{CurrentClusterState, EventFilter};
use crate::core::node::ClusterNode;
use crate::error::Result;

use super::config::ClusterConfig;
use super::init_tracing;

/// A cluster member bound to a UDP socket.
///
/// Cloning is cheap, every clone talks to the same node.
#[derive(Clone)]
pub struct Cluster {
    node: Arc<ClusterNode<UdpSocket>>,
}

impl Cluster {
    /// Binds `addr` and prepares a node. Nothing happens until [`Cluster::run`].
    pub async fn try_new(addr: impl AsRef<str>, config: ClusterConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr.as_ref()).await?;
        let node = Arc::new(ClusterNode::try_new(socket, config)?);

        Ok(Self { node })
    }

    /// The bound address, which identifies this node in the cluster.
    pub fn addr(&self) -> &str {
        self.node.addr()
    }

    pub fn config(&self) -> &ClusterConfig {
        self.node.config()
    }

    /// Joins the cluster `address` belongs to. Joining the own address
    /// forms a new cluster. The request is repeated every gossip round
    /// until a member welcomes this node.
    pub async fn join(&self, address: impl Into<String>) -> Result<()> {
        self.node.join(address).await
    }

    /// Asks `address` to leave the cluster gracefully.
    pub async fn leave(&self, address: impl Into<String>) -> Result<()> {
        self.node.leave(address).await
    }

    /// Marks `address` as down, it will be removed without leaving gracefully.
    pub async fn down(&self, address: impl Into<String>) -> Result<()> {
        self.node.down(address).await
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.node.subscribe(filter)
    }

    pub fn subscribe_with(&self, filter: EventFilter, strategy: OverflowStrategy) -> Subscription {
        self.node.subscribe_with(filter, strategy)
    }

    /// Subscribes and first receives events describing the current members,
    /// reachability and leader, followed by every later change.
    pub async fn subscribe_with_initial_state(&self, filter: EventFilter) -> Result<Subscription> {
        let strategy = self.config().overflow_strategy();
        self.node.subscribe_with_initial_state(filter, strategy).await
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.node.unsubscribe(subscription.id())
    }

    /// The latest published state of this node.
    pub fn state(&self) -> CurrentClusterState {
        self.node.state()
    }

    pub async fn run(&self) -> Result<Vec<JoinHandle<()>>> {
        init_tracing();

        self.node.run().await
    }

    /// Leaves the cluster gracefully and stops once this node was removed,
    /// or after the configured leave timeout. Open subscriptions then end.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("[{}] shutting down", self.addr());
        self.node.shutdown().await
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("addr", &self.addr())
            .field("config", self.config())
            .finish()
    }
}
