//! # Cluster API Module
//!
//! This module provides the primary API of the crate.
//!
//! ## Modules
//!
//! - [`config`]: Configuration structures and builders for customizing a node.
//! - [`cluster`]: Provides the [`cluster::Cluster`] handle for running a node,
//!   requesting membership changes and subscribing to membership events.
//!
//! ## Tracing Initialization
//!
//! The tracing subscriber is installed once, the first time a node starts running.

use lazy_static::lazy_static;
use tracing_subscriber::EnvFilter;

pub mod cluster;
pub mod config;

lazy_static! {
    static ref TRACING: () = {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    };
}

/// Initializes the tracing subscriber for logging.
/// Filtering follows the `RUST_LOG` environment variable.
fn init_tracing() {
    lazy_static::initialize(&TRACING);
}
