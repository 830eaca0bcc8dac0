//! # Core Module
//!
//! The `core` module contains the membership machinery: the gossip engine with its
//! endpoint table and accrual failure detection, the connection set stabilizing views
//! over heartbeat connections, leader election, the partition protocol publishing stable
//! views, and the node wiring all of them to a transport.
pub(crate) mod codec;
pub(crate) mod connection;
pub(crate) mod detection;
pub(crate) mod digest;
pub(crate) mod endpoint;
pub(crate) mod event;
pub(crate) mod gossip;
mod interval;
pub(crate) mod leader;
pub(crate) mod node;
pub(crate) mod partition;
pub(crate) mod transport;
pub(crate) mod types;
pub(crate) mod view;
