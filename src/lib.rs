//! Gossip based cluster membership.
//!
//! Nodes join a cluster, leave it gracefully or get downed, and subscribers
//! observe an ordered stream of membership events for every member.
pub mod api;
pub use api::cluster::Cluster;
pub use api::config::{ClusterConfig, ClusterConfigBuilder};

mod core;
pub use crate::core::disseminate::{OverflowStrategy, Subscription, SubscriptionId};
pub use crate::core::event::{
    CurrentClusterState, Event, EventFilter, EventKind, EventType, MemberRemoved,
};
pub use crate::core::member::{Member, MemberRegistry};
pub use crate::core::transport::TransportLayer;

mod error;
pub use error::{Error, Result};

pub mod pb;
pub use pb::MemberStatus;

#[cfg(any(test, feature = "test-util"))]
#[path = "./test-utils/mod.rs"]
#[doc(hidden)]
mod test_utils;
