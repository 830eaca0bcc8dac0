use tokio::sync::broadcast;

use super::endpoint::EndpointSnapshot;

/// Membership changes observed by the gossip engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A new endpoint or a new generation of a known one was observed.
    NodeJoined(NodeJoined),
    /// An endpoint marked dead showed fresh heartbeats again.
    NodeAlive(NodeAlive),
    /// The failure detector convicted an endpoint.
    NodeDead(NodeDead),
    /// An endpoint was removed from the endpoint table.
    NodeRemoved(NodeRemoved),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeJoined {
    pub from: String,
    pub endpoint: String,
    pub state: EndpointSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAlive {
    pub from: String,
    pub endpoint: String,
    pub state: EndpointSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDead {
    pub from: String,
    pub endpoint: String,
    pub state: EndpointSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRemoved {
    pub from: String,
    pub endpoint: String,
}

impl Event {
    pub(crate) fn new_node_joined(
        from: impl Into<String>,
        endpoint: impl Into<String>,
        state: EndpointSnapshot,
    ) -> Self {
        Event::NodeJoined(NodeJoined {
            from: from.into(),
            endpoint: endpoint.into(),
            state,
        })
    }

    pub(crate) fn new_node_alive(
        from: impl Into<String>,
        endpoint: impl Into<String>,
        state: EndpointSnapshot,
    ) -> Self {
        Event::NodeAlive(NodeAlive {
            from: from.into(),
            endpoint: endpoint.into(),
            state,
        })
    }

    pub(crate) fn new_node_dead(
        from: impl Into<String>,
        endpoint: impl Into<String>,
        state: EndpointSnapshot,
    ) -> Self {
        Event::NodeDead(NodeDead {
            from: from.into(),
            endpoint: endpoint.into(),
            state,
        })
    }

    pub(crate) fn new_node_removed(from: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Event::NodeRemoved(NodeRemoved {
            from: from.into(),
            endpoint: endpoint.into(),
        })
    }
}

/// Receives membership notifications from the gossip engine.
///
/// Callbacks run while the endpoint table is locked and must not block.
pub trait MembershipSubscriber: Send + Sync {
    fn on_join(&self, endpoint: &str, state: &EndpointSnapshot);

    fn on_alive(&self, endpoint: &str, state: &EndpointSnapshot);

    fn on_dead(&self, endpoint: &str, state: &EndpointSnapshot);

    fn on_remove(&self, endpoint: &str);
}

/// Forwards every notification as an [`Event`] into a broadcast channel.
#[derive(Clone, Debug)]
pub(crate) struct BroadcastSubscriber {
    addr: String,
    tx: broadcast::Sender<Event>,
}

impl BroadcastSubscriber {
    pub(crate) fn new(addr: impl Into<String>, tx: broadcast::Sender<Event>) -> Self {
        Self {
            addr: addr.into(),
            tx,
        }
    }

    fn send(&self, event: Event) {
        // No receiver is not an error, events are best effort.
        let _ = self.tx.send(event);
    }
}

impl MembershipSubscriber for BroadcastSubscriber {
    fn on_join(&self, endpoint: &str, state: &EndpointSnapshot) {
        self.send(Event::new_node_joined(&self.addr, endpoint, *state));
    }

    fn on_alive(&self, endpoint: &str, state: &EndpointSnapshot) {
        self.send(Event::new_node_alive(&self.addr, endpoint, *state));
    }

    fn on_dead(&self, endpoint: &str, state: &EndpointSnapshot) {
        self.send(Event::new_node_dead(&self.addr, endpoint, *state));
    }

    fn on_remove(&self, endpoint: &str) {
        self.send(Event::new_node_removed(&self.addr, endpoint));
    }
}
