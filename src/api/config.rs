use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::disseminate::OverflowStrategy;

/// Default interval between two gossip rounds.
const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_millis(1000);

/// Default time to wait for the reply to a gossip message.
/// A peer that does not reply in time accumulates a missed reply.
const DEFAULT_GOSSIP_TIMEOUT: Duration = Duration::from_millis(500);

/// Default number of consecutive missed replies before a peer is marked unreachable.
const DEFAULT_UNREACHABLE_AFTER_FAILURES: u32 = 1;

/// Default time a shutting down node waits to be removed from the cluster.
const DEFAULT_LEAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of each subscription buffer.
const DEFAULT_SUBSCRIBER_BUFFER_SIZE: usize = 256;

/// The buffer size for receiving new messages, the largest UDP payload.
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 65_507;

/// Capacity of the command queue feeding a node.
pub(crate) const DEFAULT_COMMAND_BUFFER_SIZE: usize = 1024;

/// Builder for creating a [`ClusterConfig`] with customized settings for a node.
/// Allows configuring timeouts, intervals, failure thresholds and known peers.
#[derive(Clone, Debug)]
pub struct ClusterConfigBuilder {
    /// Seed nodes this node joins on startup.
    known_peers: Vec<String>,
    /// The duration between consecutive gossip rounds.
    gossip_interval: Duration,
    /// The duration to wait for the reply to a gossip message.
    gossip_timeout: Duration,
    /// Consecutive missed replies before a peer is marked unreachable.
    unreachable_after_failures: u32,
    /// Consecutive missed replies before a peer is downed, disabled if `None`.
    down_after_failures: Option<u32>,
    /// How long shutdown waits for the graceful leave to complete.
    leave_timeout: Duration,
    /// Capacity of each subscription buffer.
    subscriber_buffer_size: usize,
    /// What happens to events once a subscription buffer is full.
    overflow_strategy: OverflowStrategy,
    /// Generation of this node, defaults to the startup time in milliseconds.
    incarnation: Option<u64>,
}

impl ClusterConfigBuilder {
    /// Creates a new [`ClusterConfigBuilder`] with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the builder and returns a fully constructed [`ClusterConfig`].
    pub fn build(self) -> ClusterConfig {
        let incarnation = self.incarnation.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default()
        });

        ClusterConfig {
            known_peers: self.known_peers,
            gossip_interval: self.gossip_interval,
            gossip_timeout: self.gossip_timeout,
            unreachable_after_failures: self.unreachable_after_failures.max(1),
            down_after_failures: self.down_after_failures.map(|n| n.max(1)),
            leave_timeout: self.leave_timeout,
            subscriber_buffer_size: self.subscriber_buffer_size.max(1).next_power_of_two(),
            overflow_strategy: self.overflow_strategy,
            incarnation,
        }
    }

    /// Sets the seed nodes this node tries to join when it starts running.
    /// A node listing its own address first forms a new cluster.
    pub fn with_known_peers<T>(mut self, known_peers: T) -> Self
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        self.known_peers = known_peers
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        self
    }

    /// Sets the interval between gossip rounds.
    pub fn with_gossip_interval(mut self, gossip_interval: Duration) -> Self {
        self.gossip_interval = gossip_interval;
        self
    }

    /// Sets the timeout for awaiting the reply to a gossip message.
    pub fn with_gossip_timeout(mut self, gossip_timeout: Duration) -> Self {
        self.gossip_timeout = gossip_timeout;
        self
    }

    /// Sets how many consecutive missed replies mark a peer as unreachable.
    pub fn with_unreachable_after_failures(mut self, failures: u32) -> Self {
        self.unreachable_after_failures = failures;
        self
    }

    /// Sets how many consecutive missed replies down a peer.
    pub fn with_down_after_failures(mut self, failures: Option<u32>) -> Self {
        self.down_after_failures = failures;
        self
    }

    /// Sets how long shutdown waits for this node to be removed
    /// before it stops without finishing the leave.
    pub fn with_leave_timeout(mut self, leave_timeout: Duration) -> Self {
        self.leave_timeout = leave_timeout;
        self
    }

    /// Sets the capacity of each subscription buffer.
    /// The capacity is rounded up to the next power of two, so a buffer of 3
    /// holds 4 events before overflowing.
    pub fn with_subscriber_buffer_size(mut self, size: usize) -> Self {
        self.subscriber_buffer_size = size;
        self
    }

    /// Sets the default overflow strategy of new subscriptions.
    pub fn with_overflow_strategy(mut self, strategy: OverflowStrategy) -> Self {
        self.overflow_strategy = strategy;
        self
    }

    /// Sets the incarnation of this node. Must grow across restarts.
    pub fn with_incarnation(mut self, incarnation: u64) -> Self {
        self.incarnation = Some(incarnation);
        self
    }
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        Self {
            known_peers: vec![],
            gossip_interval: DEFAULT_GOSSIP_INTERVAL,
            gossip_timeout: DEFAULT_GOSSIP_TIMEOUT,
            unreachable_after_failures: DEFAULT_UNREACHABLE_AFTER_FAILURES,
            down_after_failures: None,
            leave_timeout: DEFAULT_LEAVE_TIMEOUT,
            subscriber_buffer_size: DEFAULT_SUBSCRIBER_BUFFER_SIZE,
            overflow_strategy: OverflowStrategy::default(),
            incarnation: None,
        }
    }
}

/// Configuration for a cluster node,
/// used to store parameters such as timeouts, intervals, and known peers for the node.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    known_peers: Vec<String>,
    gossip_interval: Duration,
    gossip_timeout: Duration,
    unreachable_after_failures: u32,
    down_after_failures: Option<u32>,
    leave_timeout: Duration,
    subscriber_buffer_size: usize,
    overflow_strategy: OverflowStrategy,
    incarnation: u64,
}

impl ClusterConfig {
    /// Creates a new [`ClusterConfig`] with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new [`ClusterConfigBuilder`] to construct a [`ClusterConfig`].
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::new()
    }

    pub fn known_peers(&self) -> &[String] {
        &self.known_peers
    }

    pub fn gossip_interval(&self) -> Duration {
        self.gossip_interval
    }

    pub fn gossip_timeout(&self) -> Duration {
        self.gossip_timeout
    }

    pub fn unreachable_after_failures(&self) -> u32 {
        self.unreachable_after_failures
    }

    pub fn down_after_failures(&self) -> Option<u32> {
        self.down_after_failures
    }

    pub fn leave_timeout(&self) -> Duration {
        self.leave_timeout
    }

    pub fn subscriber_buffer_size(&self) -> usize {
        self.subscriber_buffer_size
    }

    pub fn overflow_strategy(&self) -> OverflowStrategy {
        self.overflow_strategy
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfigBuilder::new().build()
    }
}
