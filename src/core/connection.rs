//! # Connection Set
//!
//! The [`ConnectionSet`] tracks one [`Connection`] per peer plus one for the local node and
//! derives the local view from them. The view moves through three states:
//!
//! ```text
//! unstable --(all connections report the local view)--> pending(deadline)
//! pending  --(deadline reached)-----------------------> stable
//! any      --(a connection reports a different view)--> unstable
//! ```
//!
//! Terminated connections are kept in a quiescence list for the quiesce period, during which
//! reconnection attempts are refused.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use snafu::location;

use crate::api::config::GossipConfig;
use crate::error::{Error, Result};
use crate::pb;

use super::leader::LeaderMgr;
use super::types::Identity;
use super::view::View;

/// What the local node learned about a peer from its heartbeats.
#[derive(Clone, Debug)]
pub struct PeerState {
    identity: Identity,
    addr: String,
    last_receipt: Instant,
    view: Option<View>,
    view_number: u64,
    msg_links: BTreeSet<i32>,
    candidate: Option<i32>,
    preferred_leader: bool,
    terminated: bool,
}

impl PeerState {
    fn new(identity: Identity, addr: impl Into<String>, now: Instant) -> Self {
        Self {
            identity,
            addr: addr.into(),
            last_receipt: now,
            view: None,
            view_number: 0,
            msg_links: BTreeSet::new(),
            candidate: None,
            preferred_leader: false,
            terminated: false,
        }
    }

    pub fn view(&self) -> Option<&View> {
        self.view.as_ref()
    }

    pub fn view_number(&self) -> u64 {
        self.view_number
    }

    pub fn candidate(&self) -> Option<i32> {
        self.candidate
    }

    pub fn preferred_leader(&self) -> bool {
        self.preferred_leader
    }
}

/// A connection only used to exchange heartbeats.
#[derive(Clone, Debug)]
pub struct HeartbeatConnection {
    peer: PeerState,
}

/// A connection upgraded to carry application messages in addition to heartbeats.
#[derive(Clone, Debug)]
pub struct MessageConnection {
    peer: PeerState,
    established_at: Instant,
}

impl MessageConnection {
    pub fn established_at(&self) -> Instant {
        self.established_at
    }
}

/// The local node's connection to itself, always timely and always agreeing with the local view.
#[derive(Clone, Debug)]
pub struct SelfConnection {
    identity: Identity,
    addr: String,
}

#[derive(Clone, Debug)]
pub enum Connection {
    Heartbeat(HeartbeatConnection),
    Message(MessageConnection),
    Local(SelfConnection),
}

impl Connection {
    pub fn sender(&self) -> &Identity {
        match self {
            Connection::Heartbeat(c) => &c.peer.identity,
            Connection::Message(c) => &c.peer.identity,
            Connection::Local(c) => &c.identity,
        }
    }

    pub fn addr(&self) -> &str {
        match self {
            Connection::Heartbeat(c) => &c.peer.addr,
            Connection::Message(c) => &c.peer.addr,
            Connection::Local(c) => &c.addr,
        }
    }

    pub fn peer(&self) -> Option<&PeerState> {
        match self {
            Connection::Heartbeat(c) => Some(&c.peer),
            Connection::Message(c) => Some(&c.peer),
            Connection::Local(_) => None,
        }
    }

    fn peer_mut(&mut self) -> Option<&mut PeerState> {
        match self {
            Connection::Heartbeat(c) => Some(&mut c.peer),
            Connection::Message(c) => Some(&mut c.peer),
            Connection::Local(_) => None,
        }
    }

    pub fn terminate(&mut self) {
        if let Some(peer) = self.peer_mut() {
            peer.terminated = true;
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.peer().map(|peer| peer.terminated).unwrap_or(false)
    }

    /// Returns `true` if no heartbeat arrived within `timeout`.
    pub fn is_not_timely(&self, now: Instant, timeout: Duration) -> bool {
        match self.peer() {
            Some(peer) => now.saturating_duration_since(peer.last_receipt) > timeout,
            None => false,
        }
    }

    /// Returns `true` if the peer last reported exactly `view`.
    pub fn equals_view(&self, view: &View) -> bool {
        match self {
            Connection::Local(_) => true,
            _ => self.peer().and_then(|peer| peer.view.as_ref()) == Some(view),
        }
    }

    pub fn is_message_capable(&self) -> bool {
        matches!(self, Connection::Message(_) | Connection::Local(_))
    }
}

/// Timing and election settings of a [`ConnectionSet`].
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub timeout: Duration,
    pub quiesce: Duration,
    pub stability_period: Duration,
    pub preferred_leader: bool,
    pub test_interface: Option<String>,
}

impl From<&GossipConfig> for ConnectionSettings {
    fn from(config: &GossipConfig) -> Self {
        Self {
            timeout: config.timeout(),
            quiesce: config.quiesce(),
            stability_period: config.stability_period(),
            preferred_leader: config.preferred_leader(),
            test_interface: None,
        }
    }
}

#[derive(Debug)]
pub struct ConnectionSet {
    me: Identity,
    connections: BTreeMap<i32, Connection>,
    quiescing: HashMap<i32, Instant>,
    view: View,
    view_number: u64,
    stability_deadline: Option<Instant>,
    changed: bool,
    msg_links: BTreeSet<i32>,
    leader: Option<i32>,
    leader_mgr: Arc<dyn LeaderMgr>,
    settings: ConnectionSettings,
}

impl ConnectionSet {
    pub fn new(
        me: Identity,
        addr: impl Into<String>,
        settings: ConnectionSettings,
        leader_mgr: Arc<dyn LeaderMgr>,
    ) -> Self {
        let local = Connection::Local(SelfConnection {
            identity: me,
            addr: addr.into(),
        });

        Self {
            me,
            connections: BTreeMap::from([(me.id(), local)]),
            quiescing: HashMap::new(),
            view: View::new([me.id()]),
            view_number: 0,
            stability_deadline: None,
            changed: true,
            msg_links: BTreeSet::new(),
            leader: None,
            leader_mgr,
            settings,
        }
    }

    pub fn me(&self) -> &Identity {
        &self.me
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn view_number(&self) -> u64 {
        self.view_number
    }

    pub fn leader(&self) -> Option<i32> {
        self.leader
    }

    pub fn is_stable(&self) -> bool {
        self.view.is_stable()
    }

    pub fn connection(&self, id: i32) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_ids(&self) -> Vec<i32> {
        self.connections.keys().copied().collect()
    }

    pub fn is_quiescing(&self, id: i32, now: Instant) -> bool {
        self.quiescing
            .get(&id)
            .map(|terminated_at| now.saturating_duration_since(*terminated_at) < self.settings.quiesce)
            .unwrap_or(false)
    }

    /// Returns the earliest time a pending view becomes stable.
    pub fn next_stability_check(&self) -> Option<Instant> {
        self.stability_deadline
    }

    /// Ids of every member that asked to be preferred during leader election.
    pub fn preferred(&self) -> BTreeSet<i32> {
        let mut preferred: BTreeSet<i32> = self
            .connections
            .values()
            .filter_map(|c| c.peer())
            .filter(|peer| peer.preferred_leader)
            .map(|peer| peer.identity.id())
            .collect();
        if self.settings.preferred_leader {
            preferred.insert(self.me.id());
        }
        preferred
    }

    /// Exactly one side of a connection initiates upgrades: the one with the lower id.
    pub fn this_end_initiates_connections_to(&self, peer: i32) -> bool {
        self.me.id() < peer
    }

    /// Opens a heartbeat connection to `identity` unless it is known, foreign or quiescing.
    pub fn connect(&mut self, identity: Identity, addr: impl Into<String>, now: Instant) -> bool {
        let id = identity.id();
        if identity.magic() != self.me.magic() || id == self.me.id() {
            return false;
        }
        if self.connections.contains_key(&id) || self.is_quiescing(id, now) {
            return false;
        }

        self.quiescing.remove(&id);
        self.connections.insert(
            id,
            Connection::Heartbeat(HeartbeatConnection {
                peer: PeerState::new(identity, addr, now),
            }),
        );
        self.changed = true;
        self.destabilize();

        tracing::debug!("[{}] connected to node {}", self.me.id(), id);
        true
    }

    /// Terminates the connection to `id` and starts its quiescence period.
    pub fn terminate(&mut self, id: i32, now: Instant) -> bool {
        if id == self.me.id() {
            return false;
        }
        let Some(mut connection) = self.connections.remove(&id) else {
            return false;
        };

        connection.terminate();
        self.quiescing.insert(id, now);
        self.changed = true;
        self.destabilize();

        tracing::debug!("[{}] terminated connection to node {}", self.me.id(), id);
        true
    }

    /// Processes a heartbeat received from `addr`.
    ///
    /// A heartbeat from an unknown peer opens a connection. A heartbeat carrying a view
    /// different from the one the peer reported before destabilizes the local view, a view
    /// no longer containing the local node also flags a view change.
    pub fn receive_heartbeat(&mut self, heartbeat: &pb::Heartbeat, addr: &str, now: Instant) -> Result<()> {
        let sender = heartbeat
            .sender
            .as_ref()
            .map(Identity::from)
            .ok_or_else(|| Error::InvalidData {
                message: "heartbeat must contain a 'sender'".to_string(),
                location: location!(),
            })?;

        if sender.magic() != self.me.magic() {
            return Err(Error::ProtocolViolation {
                message: format!("heartbeat with foreign magic {}", sender.magic()),
                location: location!(),
            });
        }
        if sender.id() == self.me.id() {
            return Err(Error::ProtocolViolation {
                message: format!("heartbeat from {addr} claims the local node id"),
                location: location!(),
            });
        }

        let id = sender.id();
        if !self.connections.contains_key(&id) && !self.connect(sender, addr, now) {
            tracing::trace!("[{}] ignoring heartbeat of quiescing node {}", self.me.id(), id);
            return Ok(());
        }

        let my_id = self.me.id();
        let remote_view = heartbeat.view.as_ref().map(View::from);

        let Some(peer) = self
            .connections
            .get_mut(&id)
            .and_then(|connection| connection.peer_mut())
        else {
            return Ok(());
        };

        let view_changed = peer.view != remote_view;
        let linked_before = peer.msg_links.contains(&my_id);
        peer.identity = sender;
        peer.last_receipt = now;
        peer.view = remote_view;
        peer.view_number = heartbeat.view_number;
        peer.msg_links = heartbeat.msg_links.iter().copied().collect();
        peer.candidate = heartbeat.candidate;
        peer.preferred_leader = heartbeat.preferred_leader;
        let excludes_me = peer.view.as_ref().map(|v| !v.contains(my_id)).unwrap_or(false);

        if view_changed {
            self.destabilize();
            if excludes_me {
                self.changed = true;
            }
        }

        self.update_link(id, now, linked_before);

        Ok(())
    }

    /// Asks for a message capable connection to `id`.
    pub fn request_message_link(&mut self, id: i32, now: Instant) {
        if id == self.me.id() {
            return;
        }
        self.msg_links.insert(id);
        let linked = self.advertised_by(id);
        self.update_link(id, now, linked);
    }

    /// Downgrades a message connection back to a heartbeat connection.
    ///
    /// The link stays down until the peer advertises it anew or it is requested locally again.
    pub fn convert_to_heartbeat_connection(&mut self, id: i32) -> bool {
        self.msg_links.remove(&id);
        self.downgrade(id)
    }

    fn advertised_by(&self, id: i32) -> bool {
        self.connections
            .get(&id)
            .and_then(|c| c.peer())
            .map(|peer| peer.msg_links.contains(&self.me.id()))
            .unwrap_or(false)
    }

    /// Follows the link advertised by peer `id`, `linked_before` being its previous advertisement.
    ///
    /// Upgrades react to a newly advertised link or, on the initiating side, to local demand.
    /// A withdrawn advertisement downgrades the link unless the initiating side still demands it.
    fn update_link(&mut self, id: i32, now: Instant, linked_before: bool) {
        let my_id = self.me.id();
        let initiates = self.this_end_initiates_connections_to(id);
        let demanded_locally = self.msg_links.contains(&id);
        let linked = self.advertised_by(id);
        let newly_linked = linked && !linked_before;
        let withdrawn = linked_before && !linked;

        let is_message = match self.connections.get(&id) {
            Some(Connection::Heartbeat(_)) => false,
            Some(Connection::Message(_)) => true,
            _ => return,
        };

        match is_message {
            false if newly_linked || (initiates && demanded_locally) => {
                if let Some(Connection::Heartbeat(c)) = self.connections.remove(&id) {
                    tracing::debug!("[{}] upgrading connection to node {}", my_id, id);
                    self.connections.insert(
                        id,
                        Connection::Message(MessageConnection {
                            peer: c.peer,
                            established_at: now,
                        }),
                    );
                }
            }
            true if withdrawn && !(initiates && demanded_locally) => {
                tracing::debug!("[{}] node {} withdrew its message link", my_id, id);
                self.downgrade(id);
            }
            _ => {}
        }
    }

    fn downgrade(&mut self, id: i32) -> bool {
        let Some(Connection::Message(connection)) = self.connections.remove(&id) else {
            return false;
        };
        self.connections.insert(
            id,
            Connection::Heartbeat(HeartbeatConnection {
                peer: connection.peer,
            }),
        );
        true
    }

    /// Clears a pending stability deadline and marks the view unstable.
    pub fn destabilize(&mut self) {
        self.stability_deadline = None;
        self.view.set_stable(false);
    }

    /// Terminates connections that missed the timeout and purges expired quiescence entries.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<Identity> {
        let quiesce = self.settings.quiesce;
        self.quiescing
            .retain(|_, terminated_at| now.saturating_duration_since(*terminated_at) < quiesce);

        let expired: Vec<Identity> = self
            .connections
            .values()
            .filter(|c| c.is_not_timely(now, self.settings.timeout))
            .map(|c| *c.sender())
            .collect();

        for identity in &expired {
            tracing::info!(
                "[{}] connection to node {} timed out",
                self.me.id(),
                identity.id()
            );
            self.terminate(identity.id(), now);
        }

        expired
    }

    /// Returns `true` if every connection reports the local view.
    pub fn consistent(&self) -> bool {
        self.connections.values().all(|c| c.equals_view(&self.view))
    }

    /// Recomputes the view if a change was flagged and predicts the stability deadline.
    ///
    /// Returns the changed view to hand to the upper layer.
    pub fn view_change_check(&mut self, now: Instant) -> Option<View> {
        let mut changed_view = None;

        if self.changed {
            self.changed = false;

            let members: BTreeSet<i32> = self.connections.keys().copied().collect();
            if self.view.set_members(members) {
                self.view_number += 1;
                self.destabilize();
            }
            self.leader = self.leader_mgr.elect(&self.view, &self.preferred());
            changed_view = Some(self.view.clone());
        }

        if !self.view.is_stable() {
            match self.consistent() {
                true if self.stability_deadline.is_none() => {
                    self.stability_deadline = Some(now + self.settings.stability_period);
                }
                true => {}
                false => self.stability_deadline = None,
            }
        }

        changed_view
    }

    /// Declares the view stable once the deadline passed, returning the stable view.
    pub fn check_stability(&mut self, now: Instant) -> Option<View> {
        let deadline = self.stability_deadline?;
        if now < deadline {
            return None;
        }

        self.stability_deadline = None;
        self.view.set_stable(true);
        self.leader = self.leader_mgr.elect(&self.view, &self.preferred());

        tracing::info!(
            "[{}] view {} with {} members is stable, leader {:?}",
            self.me.id(),
            self.view_number,
            self.view.len(),
            self.leader
        );
        Some(self.view.clone())
    }

    /// Builds the heartbeat sent on every connection.
    pub fn heartbeat(&self) -> pb::Heartbeat {
        // Local demand, plus the links this end initiated and established.
        let mut msg_links = self.msg_links.clone();
        msg_links.extend(
            self.connections
                .iter()
                .filter(|(id, c)| {
                    matches!(c, Connection::Message(_)) && self.this_end_initiates_connections_to(**id)
                })
                .map(|(id, _)| *id),
        );

        pb::Heartbeat {
            sender: Some(pb::Identity::from(&self.me)),
            view: Some(pb::View::from(&self.view)),
            view_number: self.view_number,
            msg_links: msg_links.into_iter().collect(),
            candidate: self.leader,
            preferred_leader: self.settings.preferred_leader,
            test_interface: self.settings.test_interface.clone(),
        }
    }

    /// Addresses of every peer connection.
    pub fn heartbeat_targets(&self) -> Vec<String> {
        self.connections
            .values()
            .filter(|c| c.peer().is_some())
            .map(|c| c.addr().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::core::leader::PreferredLowestLeader;
    use crate::core::types::Identity;
    use crate::core::view::View;
    use crate::error::Error;
    use crate::pb;

    use super::{Connection, ConnectionSet, ConnectionSettings};

    const MAGIC: i32 = 1;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            timeout: Duration::from_millis(500),
            quiesce: Duration::from_millis(1000),
            stability_period: Duration::from_millis(300),
            preferred_leader: false,
            test_interface: None,
        }
    }

    fn identity(id: i32) -> Identity {
        Identity::new(MAGIC, id, 0)
    }

    fn create_set(id: i32) -> ConnectionSet {
        ConnectionSet::new(
            identity(id),
            format!("node-{id}"),
            settings(),
            Arc::new(PreferredLowestLeader),
        )
    }

    fn heartbeat(id: i32, members: &[i32], msg_links: &[i32]) -> pb::Heartbeat {
        pb::Heartbeat {
            sender: Some(pb::Identity::from(&identity(id))),
            view: Some(pb::View::from(&View::new(members.iter().copied()))),
            view_number: 1,
            msg_links: msg_links.to_vec(),
            candidate: None,
            preferred_leader: false,
            test_interface: None,
        }
    }

    #[test]
    fn test_connection_single_node_becomes_stable() {
        let now = Instant::now();
        let mut set = create_set(1);

        assert_eq!(set.view_change_check(now), Some(View::new([1])));
        assert_eq!(set.check_stability(now), None);

        let stable = set.check_stability(now + Duration::from_millis(300)).unwrap();
        assert!(stable.is_stable());
        assert_eq!(set.leader(), Some(1));
    }

    #[test]
    fn test_connection_stability_requires_consistent_views() {
        let now = Instant::now();
        let mut set = create_set(1);
        set.receive_heartbeat(&heartbeat(2, &[2], &[]), "node-2", now)
            .unwrap();

        set.view_change_check(now);
        assert_eq!(set.view(), &View::new([1, 2]));
        assert!(!set.consistent());
        assert_eq!(set.next_stability_check(), None);

        let later = now + Duration::from_millis(100);
        set.receive_heartbeat(&heartbeat(2, &[1, 2], &[]), "node-2", later)
            .unwrap();
        set.view_change_check(later);
        assert!(set.consistent());
        assert_eq!(
            set.next_stability_check(),
            Some(later + Duration::from_millis(300))
        );

        let stable = set.check_stability(later + Duration::from_millis(300));
        assert!(stable.is_some());
        assert!(set.is_stable());
    }

    #[test]
    fn test_connection_changed_remote_view_destabilizes() {
        let now = Instant::now();
        let mut set = create_set(1);
        set.receive_heartbeat(&heartbeat(2, &[1, 2], &[]), "node-2", now)
            .unwrap();
        set.view_change_check(now);
        set.check_stability(now + Duration::from_millis(300)).unwrap();

        let later = now + Duration::from_millis(400);
        set.receive_heartbeat(&heartbeat(2, &[2, 3], &[]), "node-2", later)
            .unwrap();

        assert!(!set.is_stable());
        assert_eq!(set.next_stability_check(), None);
        assert!(set.view_change_check(later).is_some());
    }

    #[test]
    fn test_connection_timeout_and_quiescence() {
        let now = Instant::now();
        let mut set = create_set(1);
        assert!(set.connect(identity(2), "node-2", now));
        assert!(!set.connect(identity(2), "node-2", now));

        let expired = set.check_timeouts(now + Duration::from_millis(501));
        assert_eq!(expired, vec![identity(2)]);
        assert!(set.connection(2).is_none());

        let during = now + Duration::from_millis(1000);
        assert!(set.is_quiescing(2, during));
        assert!(!set.connect(identity(2), "node-2", during));
        set.receive_heartbeat(&heartbeat(2, &[1, 2], &[]), "node-2", during)
            .unwrap();
        assert!(set.connection(2).is_none());

        let after = now + Duration::from_millis(1600);
        set.check_timeouts(after);
        assert!(!set.is_quiescing(2, after));
        assert!(set.connect(identity(2), "node-2", after));
    }

    #[test]
    fn test_connection_rejects_foreign_magic_and_own_id() {
        let now = Instant::now();
        let mut set = create_set(1);

        let mut foreign = heartbeat(2, &[2], &[]);
        foreign.sender = Some(pb::Identity::from(&Identity::new(MAGIC + 1, 2, 0)));
        assert!(matches!(
            set.receive_heartbeat(&foreign, "node-2", now),
            Err(Error::ProtocolViolation { .. })
        ));

        assert!(matches!(
            set.receive_heartbeat(&heartbeat(1, &[1], &[]), "node-1", now),
            Err(Error::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn test_connection_upgrade_only_initiated_by_lower_id() {
        let now = Instant::now();
        let mut low = create_set(1);
        let mut high = create_set(2);
        low.connect(identity(2), "node-2", now);
        high.connect(identity(1), "node-1", now);

        assert!(low.this_end_initiates_connections_to(2));
        assert!(!high.this_end_initiates_connections_to(1));

        high.request_message_link(1, now);
        assert!(matches!(high.connection(1), Some(Connection::Heartbeat(_))));

        low.receive_heartbeat(&high.heartbeat(), "node-2", now).unwrap();
        assert!(matches!(low.connection(2), Some(Connection::Message(_))));

        high.receive_heartbeat(&low.heartbeat(), "node-1", now).unwrap();
        assert!(matches!(high.connection(1), Some(Connection::Message(_))));

        assert!(low.convert_to_heartbeat_connection(2));
        assert!(matches!(low.connection(2), Some(Connection::Heartbeat(_))));
    }

    #[test]
    fn test_connection_downgrade_survives_heartbeat_exchange() {
        let now = Instant::now();
        let mut low = create_set(1);
        let mut high = create_set(2);
        low.connect(identity(2), "node-2", now);
        high.connect(identity(1), "node-1", now);

        high.request_message_link(1, now);
        low.receive_heartbeat(&high.heartbeat(), "node-2", now).unwrap();
        high.receive_heartbeat(&low.heartbeat(), "node-1", now).unwrap();
        assert!(matches!(low.connection(2), Some(Connection::Message(_))));
        assert!(matches!(high.connection(1), Some(Connection::Message(_))));

        assert!(low.convert_to_heartbeat_connection(2));
        let later = now + Duration::from_millis(100);
        low.receive_heartbeat(&high.heartbeat(), "node-2", later).unwrap();
        assert!(matches!(low.connection(2), Some(Connection::Heartbeat(_))));

        high.receive_heartbeat(&low.heartbeat(), "node-1", later).unwrap();
        assert!(matches!(high.connection(1), Some(Connection::Heartbeat(_))));

        let even_later = later + Duration::from_millis(100);
        low.receive_heartbeat(&high.heartbeat(), "node-2", even_later)
            .unwrap();
        high.receive_heartbeat(&low.heartbeat(), "node-1", even_later)
            .unwrap();
        assert!(matches!(low.connection(2), Some(Connection::Heartbeat(_))));
        assert!(matches!(high.connection(1), Some(Connection::Heartbeat(_))));
    }

    #[test]
    fn test_connection_local_request_upgrades_initiator_and_advertises_link() {
        let now = Instant::now();
        let mut low = create_set(1);
        let mut high = create_set(2);
        low.connect(identity(2), "node-2", now);
        high.connect(identity(1), "node-1", now);
        low.view_change_check(now);

        low.request_message_link(2, now);
        assert!(low.heartbeat().msg_links.contains(&2));
        let connection = low.connection(2).unwrap();
        assert!(connection.is_message_capable());
        let Connection::Message(message) = connection else {
            panic!("expected message connection, got {connection:?}");
        };
        assert_eq!(message.established_at(), now);

        high.receive_heartbeat(&low.heartbeat(), "node-1", now).unwrap();
        let connection = high.connection(1).unwrap();
        assert!(connection.is_message_capable());
        assert_eq!(connection.peer().unwrap().candidate(), Some(1));
        assert!(high.heartbeat().msg_links.is_empty());
        assert!(high.connection(2).unwrap().is_message_capable());
    }

    #[test]
    fn test_connection_heartbeat_connection_is_not_message_capable() {
        let now = Instant::now();
        let mut set = create_set(1);
        set.connect(identity(2), "node-2", now);

        assert!(!set.connection(2).unwrap().is_message_capable());
        assert!(set.connection(1).unwrap().is_message_capable());
    }
}
