//! # Gossip API Module
//!
//! This module provides the primary API for running a gossip membership node.
//!
//! ## Modules
//!
//! - [`config`]: Configuration structures and builders for customizing nodes.
//! - [`gossip`]: The `GossipCluster` struct binding a node to a UDP socket and running it.
//!
//! ## Tracing Initialization
//!
//! The `init_tracing` function initializes the tracing subscriber for logging purposes.

use lazy_static::lazy_static;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod gossip;

lazy_static! {
    static ref TRACING: () = {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    };
}

/// Initializes the tracing subscriber once, filtered by `RUST_LOG`.
fn init_tracing() {
    lazy_static::initialize(&TRACING);
}
