//! # Core Module
//!
//! The `core` module contains the membership protocol: the member registry,
//! vector clocks, reachability and the gossiped view built from them,
//! the state machine owning that view, event derivation and dissemination,
//! and the node actor driving everything over a [`transport::TransportLayer`].
pub(crate) mod clock;
pub(crate) mod disseminate;
pub(crate) mod event;
pub(crate) mod gossip;
pub(crate) mod member;
pub(crate) mod node;
pub(crate) mod reachability;
pub(crate) mod state;
pub(crate) mod transport;
pub(crate) mod view;
