pub mod api;

mod core;
pub use crate::core::codec::{ProstCodec, WireCodec, WIRE_VERSION};
pub use crate::core::connection::{Connection, ConnectionSet, ConnectionSettings, PeerState};
pub use crate::core::detection::{AccrualFailureDetector, ConvictThreshold, EstimationStrategy};
pub use crate::core::digest::Digest;
pub use crate::core::endpoint::{EndpointSnapshot, EndpointState};
pub use crate::core::event::{Event, MembershipSubscriber, NodeAlive, NodeDead, NodeJoined, NodeRemoved};
pub use crate::core::gossip::GossipState;
pub use crate::core::leader::{LeaderMgr, PreferredLowestLeader};
pub use crate::core::node::GossipNode;
pub use crate::core::partition::{PartitionProtocol, PartitionSink, PartitionUpdate};
pub use crate::core::transport::TransportLayer;
pub use crate::core::types::{HeartbeatState, Identity};
pub use crate::core::view::View;

pub mod error;
pub use error::Result;

pub mod pb;

#[cfg(test)]
#[path = "./test-utils/mod.rs"]
#[doc(hidden)]
mod test_utils;
