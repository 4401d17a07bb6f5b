//! # Wire Messages
//!
//! Protobuf messages exchanged between nodes, one [`ClusterMessage`] per datagram.
//! The messages are declared with the `prost` derive macros, so no `.proto`
//! compilation step is involved.
use std::collections::BTreeMap;

/// Envelope for every message sent between nodes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusterMessage {
    #[prost(oneof = "cluster_message::Action", tags = "1, 2")]
    pub action: Option<cluster_message::Action>,
}

pub mod cluster_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Action {
        #[prost(message, tag = "1")]
        JoinRequest(super::JoinRequest),
        #[prost(message, tag = "2")]
        Gossip(super::GossipEnvelope),
    }
}

/// Sent by a node that wants to be admitted into the receiver's cluster.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinRequest {
    #[prost(string, tag = "1")]
    pub from: String,
    #[prost(uint64, tag = "2")]
    pub incarnation: u64,
}

/// Carries the sender's full membership view.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GossipEnvelope {
    #[prost(string, tag = "1")]
    pub from: String,
    /// Replies are never answered.
    #[prost(bool, tag = "2")]
    pub is_reply: bool,
    #[prost(message, optional, tag = "3")]
    pub view: Option<GossipView>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GossipView {
    #[prost(message, repeated, tag = "1")]
    pub members: Vec<MemberState>,
    #[prost(btree_map = "string, uint64", tag = "2")]
    pub version: BTreeMap<String, u64>,
    #[prost(string, repeated, tag = "3")]
    pub seen: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub reachability: Vec<ObserverRecord>,
    #[prost(btree_map = "string, uint64", tag = "5")]
    pub tombstones: BTreeMap<String, u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MemberState {
    #[prost(string, tag = "1")]
    pub address: String,
    #[prost(uint64, tag = "2")]
    pub incarnation: u64,
    #[prost(enumeration = "MemberStatus", tag = "3")]
    pub status: i32,
}

/// The set of subjects a single observer currently considers unreachable.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObserverRecord {
    #[prost(string, tag = "1")]
    pub observer: String,
    #[prost(uint64, tag = "2")]
    pub version: u64,
    #[prost(string, repeated, tag = "3")]
    pub unreachable: Vec<String>,
}

/// Lifecycle status of a member.
///
/// The discriminants define the monotonic order in which a member moves through
/// its lifecycle. A member never moves to a status with a lower value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MemberStatus {
    Joining = 0,
    Up = 1,
    Leaving = 2,
    Exiting = 3,
    Down = 4,
    Removed = 5,
}
