use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::core::event::{Event, MembershipSubscriber};
use crate::core::node::GossipNode;
use crate::core::partition::PartitionUpdate;
use crate::core::view::View;
use crate::error::Result;

use super::config::GossipConfig;
use super::init_tracing;

/// A gossip node bound to a UDP socket.
#[derive(Clone)]
pub struct GossipCluster {
    node: Arc<GossipNode<UdpSocket>>,
}

impl GossipCluster {
    pub async fn try_new(addr: impl AsRef<str>, config: GossipConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr.as_ref()).await?;
        let node = Arc::new(GossipNode::try_new(socket, config)?);

        Ok(Self { node })
    }

    pub fn addr(&self) -> &str {
        self.node.addr()
    }

    pub fn config(&self) -> &GossipConfig {
        self.node.config()
    }

    pub fn node(&self) -> &GossipNode<UdpSocket> {
        &self.node
    }

    /// Subscribes to membership events of the gossip engine.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.node.subscribe()
    }

    /// Subscribes to the published partition view and its leader.
    pub fn subscribe_view(&self) -> watch::Receiver<PartitionUpdate> {
        self.node.subscribe_view()
    }

    pub async fn register_subscriber(&self, subscriber: Arc<dyn MembershipSubscriber>) {
        self.node.register_subscriber(subscriber).await;
    }

    pub async fn live_members(&self) -> Vec<String> {
        self.node.live_members().await
    }

    pub async fn unreachable_members(&self) -> Vec<String> {
        self.node.unreachable_members().await
    }

    pub fn view(&self) -> View {
        self.node.view()
    }

    pub fn leader(&self) -> Option<i32> {
        self.node.leader()
    }

    pub async fn run(&self) -> Vec<JoinHandle<()>> {
        init_tracing();

        tracing::info!(
            "[{}] starting node {} in cluster '{}'...",
            self.node.addr(),
            self.node.config().node_id(),
            self.node.config().cluster_id()
        );
        self.node.run()
    }

    pub fn stop(&self) {
        self.node.stop();
    }
}
