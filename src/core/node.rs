use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snafu::location;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::config::{GossipConfig, DEFAULT_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::pb::{self, envelope::Action, Envelope};

use super::codec::{ProstCodec, WireCodec};
use super::connection::{ConnectionSet, ConnectionSettings};
use super::event::{BroadcastSubscriber, Event, MembershipSubscriber};
use super::gossip::GossipState;
use super::interval::IntervalExec;
use super::leader::{LeaderMgr, PreferredLowestLeader};
use super::partition::{PartitionProtocol, PartitionUpdate, WatchSink};
use super::transport::{Delivery, SequenceTracker, TransportLayer};
use super::types::Identity;
use super::view::View;

/// A cluster member running the gossip engine and the stable view protocol.
///
/// The endpoint table and the connection set are two separate lock domains,
/// no code path holds both at the same time.
pub struct GossipNode<T: TransportLayer> {
    addr: String,
    identity: Identity,
    config: Arc<GossipConfig>,
    socket: Arc<T>,
    codec: Arc<dyn WireCodec>,
    sequences: Arc<SequenceTracker>,
    send_lock: Arc<Mutex<()>>,
    gossip: Arc<Mutex<GossipState>>,
    connections: Arc<Mutex<ConnectionSet>>,
    partition: Arc<PartitionProtocol>,
    tx: broadcast::Sender<Event>,
    view_rx: watch::Receiver<PartitionUpdate>,
    cancel: CancellationToken,
}

impl<T: TransportLayer> Clone for GossipNode<T> {
    fn clone(&self) -> Self {
        Self {
            addr: self.addr.clone(),
            identity: self.identity,
            config: self.config.clone(),
            socket: self.socket.clone(),
            codec: self.codec.clone(),
            sequences: self.sequences.clone(),
            send_lock: self.send_lock.clone(),
            gossip: self.gossip.clone(),
            connections: self.connections.clone(),
            partition: self.partition.clone(),
            tx: self.tx.clone(),
            view_rx: self.view_rx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: TransportLayer + 'static> GossipNode<T> {
    pub fn try_new(socket: T, config: GossipConfig) -> Result<Self> {
        Self::try_new_with(socket, config, Arc::new(ProstCodec), Arc::new(PreferredLowestLeader))
    }

    /// Creates a node with a custom wire codec and leader election.
    pub fn try_new_with(
        socket: T,
        config: GossipConfig,
        codec: Arc<dyn WireCodec>,
        leader_mgr: Arc<dyn LeaderMgr>,
    ) -> Result<Self> {
        let addr = socket.local_addr()?;
        let config = Arc::new(config);
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Internal {
                message: format!("system clock before unix epoch: {e}"),
                location: location!(),
            })?;
        let generation = since_epoch.as_secs() as i32;
        let identity = Identity::new(
            config.magic(),
            config.node_id(),
            since_epoch.as_millis() as i64,
        );
        let now = Instant::now();

        let (tx, _) = broadcast::channel::<Event>(256);
        let mut gossip = GossipState::new(&addr, generation, config.clone(), now);
        gossip.register(Arc::new(BroadcastSubscriber::new(&addr, tx.clone())));

        let connections = ConnectionSet::new(
            identity,
            &addr,
            ConnectionSettings::from(config.as_ref()),
            leader_mgr.clone(),
        );

        let (view_tx, view_rx) = watch::channel(PartitionUpdate::default());
        let partition = PartitionProtocol::new(
            identity.id(),
            leader_mgr,
            Arc::new(WatchSink::new(view_tx)),
        );

        Ok(Self {
            addr,
            identity,
            config,
            socket: Arc::new(socket),
            codec,
            sequences: Arc::new(SequenceTracker::new()),
            send_lock: Arc::new(Mutex::new(())),
            gossip: Arc::new(Mutex::new(gossip)),
            connections: Arc::new(Mutex::new(connections)),
            partition: Arc::new(partition),
            tx,
            view_rx,
            cancel: CancellationToken::new(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<PartitionUpdate> {
        self.view_rx.clone()
    }

    pub async fn register_subscriber(&self, subscriber: Arc<dyn MembershipSubscriber>) {
        self.gossip.lock().await.register(subscriber);
    }

    pub async fn live_members(&self) -> Vec<String> {
        self.gossip.lock().await.live_members()
    }

    pub async fn unreachable_members(&self) -> Vec<String> {
        self.gossip.lock().await.unreachable_members()
    }

    pub fn view(&self) -> View {
        self.partition.view()
    }

    pub fn leader(&self) -> Option<i32> {
        self.partition.leader()
    }

    /// Asks for a message capable connection to the node with id `peer`.
    pub async fn request_message_link(&self, peer: i32) {
        self.connections
            .lock()
            .await
            .request_message_link(peer, Instant::now());
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) async fn next_stability_check(&self) -> Option<Instant> {
        self.connections.lock().await.next_stability_check()
    }

    /// Spawns the gossip driver, the interval executive, the socket reader and the
    /// delivery workers.
    pub fn run(&self) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.spawn_gossip_driver()];
        handles.push(tokio::spawn(IntervalExec::new(self.clone()).run()));
        handles.extend(self.spawn_delivery());
        handles
    }

    /// Signals every task to stop after its current tick.
    pub fn stop(&self) {
        tracing::info!("[{}] stopping", &self.addr);
        self.cancel.cancel();
    }

    fn spawn_gossip_driver(&self) -> JoinHandle<()> {
        let node = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(node.config.gossip_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut rng = StdRng::from_entropy();

            loop {
                tokio::select! {
                    _ = node.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if let Err(e) = node.gossip_round(&mut rng).await {
                    tracing::error!("[{}] gossip round failed: {e}", &node.addr);
                }
            }

            tracing::info!("[{}] gossip driver stopped", &node.addr);
        })
    }

    fn spawn_delivery(&self) -> Vec<JoinHandle<()>> {
        let workers = self.config.delivery_workers();
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers + 1);

        for _ in 0..workers {
            let (queue_tx, mut queue_rx) =
                mpsc::channel::<Envelope>(self.config.delivery_queue_capacity());
            senders.push(queue_tx);

            let node = self.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let envelope = tokio::select! {
                        _ = node.cancel.cancelled() => break,
                        envelope = queue_rx.recv() => match envelope {
                            Some(envelope) => envelope,
                            None => break,
                        },
                    };

                    let sender_addr = envelope.sender_addr.clone();
                    let sender_id = envelope.sender.as_ref().map(|s| s.id);
                    if let Err(e) = node.dispatch(envelope).await {
                        node.handle_delivery_error(&sender_addr, sender_id, e).await;
                    }
                }
            }));
        }

        let node = self.clone();
        handles.push(tokio::spawn(async move {
            let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];

            loop {
                let len = tokio::select! {
                    _ = node.cancel.cancelled() => break,
                    result = node.socket.recv(&mut buf) => match result {
                        Ok(len) => len,
                        Err(e) => {
                            tracing::warn!("[{}] error while receiving message: {e}", &node.addr);
                            continue;
                        }
                    },
                };

                let envelope = match node.receive(&buf[..len]).await {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => continue,
                    Err(e) => {
                        match e {
                            Error::Security { .. } => {
                                tracing::warn!("[{}] security violation: {e}", &node.addr)
                            }
                            _ => tracing::warn!("[{}] dropping message: {e}", &node.addr),
                        }
                        continue;
                    }
                };

                let shard = shard_of(&envelope.sender_addr, senders.len());
                if senders[shard].send(envelope).await.is_err() {
                    break;
                }
            }

            tracing::info!("[{}] reader stopped", &node.addr);
        }));

        handles
    }

    /// Runs one gossip round: bump the local version, gossip to the chosen targets and
    /// check the status of every endpoint.
    pub(crate) async fn gossip_round<R: Rng + Send>(&self, rng: &mut R) -> Result<()> {
        let now = Instant::now();

        let (syn, targets) = {
            let mut gossip = self.gossip.lock().await;
            gossip.bump_local_version(now);
            let syn = gossip.make_syn(rng);
            let targets = gossip.select_targets(rng);
            gossip.status_check(now);
            (syn, targets)
        };

        for target in targets.iter() {
            tracing::debug!("[{}] sending SYN to {}", &self.addr, target);
            if let Err(e) = self.send_action(Action::Syn(syn.clone()), target).await {
                tracing::warn!("[{}] failed to gossip to {}: {e}", &self.addr, target);
            }
        }

        Ok(())
    }

    /// Runs one step of the interval executive.
    pub(crate) async fn interval_tick(&self, now: Instant, send_heartbeat: bool) -> Result<()> {
        let candidates = self.gossip.lock().await.live_nodes();

        let (heartbeat, expired) = {
            let mut connections = self.connections.lock().await;

            for (addr, id) in candidates {
                connections.connect(Identity::new(self.identity.magic(), id, 0), addr, now);
            }

            let addrs: HashMap<i32, String> = connections
                .connection_ids()
                .into_iter()
                .filter_map(|id| connections.connection(id).map(|c| (id, c.addr().to_string())))
                .collect();
            let expired = connections.check_timeouts(now);

            if let Some(view) = connections.view_change_check(now) {
                self.partition
                    .changed_view(&view, &connections.preferred());
            }

            let heartbeat = send_heartbeat
                .then(|| (connections.heartbeat(), connections.heartbeat_targets()));

            if let Some(view) = connections.check_stability(now) {
                self.partition.stable_view(&view, &connections.preferred());
            }

            let expired: Vec<String> = expired
                .iter()
                .filter_map(|identity| addrs.get(&identity.id()).cloned())
                .collect();

            (heartbeat, expired)
        };

        for addr in &expired {
            self.sequences.reset_inbound(addr);
        }

        self.partition.notify_changes();

        if let Some((heartbeat, targets)) = heartbeat {
            for target in targets {
                if let Err(e) = self
                    .send_action(Action::Heartbeat(heartbeat.clone()), &target)
                    .await
                {
                    tracing::warn!("[{}] failed to send heartbeat to {}: {e}", &self.addr, &target);
                }
            }
        }

        Ok(())
    }

    /// Decodes and validates a datagram.
    ///
    /// Messages of another cluster and replays are dropped, a sequence gap terminates the
    /// connection to the sender.
    pub(crate) async fn receive(&self, bytes: &[u8]) -> Result<Option<Envelope>> {
        let envelope = self.codec.from_wire_form(bytes)?;

        if envelope.cluster_id != self.config.cluster_id() {
            tracing::warn!(
                "[{}] dropping message from {} of cluster '{}'",
                &self.addr,
                &envelope.sender_addr,
                &envelope.cluster_id
            );
            return Ok(None);
        }

        let sender = envelope
            .sender
            .as_ref()
            .map(Identity::from)
            .ok_or_else(|| Error::InvalidData {
                message: "message must contain a 'sender'".to_string(),
                location: location!(),
            })?;

        if sender.magic() != self.identity.magic() {
            tracing::warn!(
                "[{}] dropping message from {} with magic {}",
                &self.addr,
                &envelope.sender_addr,
                sender.magic()
            );
            return Ok(None);
        }

        match self
            .sequences
            .check_inbound(&envelope.sender_addr, sender.epoch(), envelope.sequence)
        {
            Ok(Delivery::InOrder) => Ok(Some(envelope)),
            Ok(Delivery::Replay) => {
                tracing::debug!(
                    "[{}] dropping replayed message {} from {}",
                    &self.addr,
                    envelope.sequence,
                    &envelope.sender_addr
                );
                Ok(None)
            }
            Err(e) => {
                self.teardown(&envelope.sender_addr, Some(sender.id())).await;
                Err(e)
            }
        }
    }

    pub(crate) async fn dispatch(&self, envelope: Envelope) -> Result<()> {
        let Some(action) = envelope.action else {
            return Err(Error::InvalidData {
                message: "message must contain an 'action'".to_string(),
                location: location!(),
            });
        };
        let from = envelope.sender_addr;
        let now = Instant::now();

        match action {
            Action::Syn(syn) => {
                tracing::debug!("[{}] handling SYN from {}", &self.addr, &from);
                let ack = self.gossip.lock().await.handle_syn(&syn)?;
                self.send_action(Action::Ack(ack), &from).await
            }
            Action::Ack(ack) => {
                tracing::debug!("[{}] handling ACK from {}", &self.addr, &from);
                let ack2 = self.gossip.lock().await.handle_ack(&ack, now);
                self.send_action(Action::Ack2(ack2), &from).await
            }
            Action::Ack2(ack2) => {
                tracing::debug!("[{}] handling ACK2 from {}", &self.addr, &from);
                self.gossip.lock().await.handle_ack2(&ack2, now);
                Ok(())
            }
            Action::Heartbeat(heartbeat) => {
                tracing::trace!("[{}] handling HEARTBEAT from {}", &self.addr, &from);
                self.connections
                    .lock()
                    .await
                    .receive_heartbeat(&heartbeat, &from, now)
            }
        }
    }

    async fn handle_delivery_error(&self, sender_addr: &str, sender_id: Option<i32>, e: Error) {
        match e.is_connection_fatal() {
            true => {
                tracing::warn!(
                    "[{}] tearing down connection to {}: {e}",
                    &self.addr,
                    sender_addr
                );
                self.teardown(sender_addr, sender_id).await;
            }
            false => tracing::warn!("[{}] failed to handle message from {}: {e}", &self.addr, sender_addr),
        }
    }

    async fn teardown(&self, addr: &str, id: Option<i32>) {
        if let Some(id) = id {
            self.connections.lock().await.terminate(id, Instant::now());
        }
        self.sequences.reset_inbound(addr);
    }

    async fn send_action(&self, action: Action, target: &str) -> Result<()> {
        // Numbering and sending stay together so a target sees sequence numbers in order.
        let _guard = self.send_lock.lock().await;

        let sequence = self.sequences.peek_outbound(target);
        let envelope = Envelope {
            cluster_id: self.config.cluster_id().to_string(),
            sender: Some(pb::Identity::from(&self.identity)),
            sender_addr: self.addr.clone(),
            sequence,
            action: Some(action),
        };
        let buf = self.codec.to_wire_form(&envelope)?;

        self.socket.send_to(&buf, target).await?;
        self.sequences.commit_outbound(target, sequence);

        Ok(())
    }
}

fn shard_of(sender: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    sender.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::api::config::GossipConfig;
    use crate::core::codec::{ProstCodec, WireCodec};
    use crate::core::leader::PreferredLowestLeader;
    use crate::core::types::Identity;
    use crate::error::Error;
    use crate::pb::{self, envelope::Action, Envelope};
    use crate::test_utils::mocks::{MockUdpSocket, RejectingCodec};

    use super::GossipNode;

    const SEED: &str = "127.0.0.1:9000";
    const PEER: &str = "127.0.0.1:9001";

    fn create_node() -> GossipNode<MockUdpSocket> {
        let config = GossipConfig::builder()
            .with_node_id(1)
            .with_seeds([SEED])
            .build()
            .unwrap();
        GossipNode::try_new(MockUdpSocket::new(), config).unwrap()
    }

    fn envelope(cluster_id: &str, sequence: u64, action: Action) -> Envelope {
        Envelope {
            cluster_id: cluster_id.to_string(),
            sender: Some(pb::Identity::from(&Identity::new(
                GossipConfig::builder().build().unwrap().magic(),
                2,
                42,
            ))),
            sender_addr: PEER.to_string(),
            sequence,
            action: Some(action),
        }
    }

    fn heartbeat(members: Vec<i32>) -> Action {
        Action::Heartbeat(pb::Heartbeat {
            sender: Some(pb::Identity::from(&Identity::new(
                GossipConfig::builder().build().unwrap().magic(),
                2,
                42,
            ))),
            view: Some(pb::View {
                members,
                timestamp: 0,
                stable: false,
            }),
            view_number: 1,
            msg_links: vec![],
            candidate: None,
            preferred_leader: false,
            test_interface: None,
        })
    }

    #[tokio::test]
    async fn test_node_gossip_round_contacts_seed() {
        let node = create_node();
        let mut rng = StdRng::seed_from_u64(3);

        node.gossip_round(&mut rng).await.unwrap();

        let transmitted = node.socket.transmitted().await;
        assert_eq!(transmitted.len(), 1);
        assert_eq!(transmitted[0].0, SEED);
        assert_eq!(transmitted[0].1.sequence, 1);
        match &transmitted[0].1.action {
            Some(Action::Syn(syn)) => {
                assert_eq!(syn.cluster_id, "default");
                assert_eq!(syn.digests.len(), 1);
                assert_eq!(syn.digests[0].address, node.addr());
                assert_eq!(syn.digests[0].max_version, 1);
            }
            other => panic!("expected SYN, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_node_failed_send_keeps_sequence_contiguous() {
        let node = create_node();
        let mut rng = StdRng::seed_from_u64(3);

        node.socket.fail_next_send();
        node.gossip_round(&mut rng).await.unwrap();
        assert!(node.socket.transmitted().await.is_empty());

        node.gossip_round(&mut rng).await.unwrap();
        node.gossip_round(&mut rng).await.unwrap();

        let sequences: Vec<u64> = node
            .socket
            .transmitted()
            .await
            .iter()
            .map(|(_, envelope)| envelope.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_node_dispatch_syn_replies_with_ack() {
        let node = create_node();
        let syn = Action::Syn(pb::Syn {
            cluster_id: "default".to_string(),
            digests: vec![pb::Digest {
                address: PEER.to_string(),
                generation: 5,
                max_version: 3,
            }],
        });

        node.dispatch(envelope("default", 1, syn)).await.unwrap();

        let transmitted = node.socket.transmitted().await;
        assert_eq!(transmitted[0].0, PEER);
        match &transmitted[0].1.action {
            Some(Action::Ack(ack)) => {
                assert_eq!(ack.digests.len(), 1);
                assert_eq!(ack.digests[0].max_version, 0);
            }
            other => panic!("expected ACK, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_node_dispatch_ack_applies_state_and_answers() {
        let node = create_node();
        let mut rx = node.subscribe();
        let ack = Action::Ack(pb::Ack {
            digests: vec![],
            states: [(
                PEER.to_string(),
                pb::EndpointState {
                    generation: 5,
                    version: 3,
                    node_id: 2,
                    has_token: true,
                },
            )]
            .into(),
        });

        node.dispatch(envelope("default", 1, ack)).await.unwrap();

        assert_eq!(node.live_members().await, vec![PEER.to_string()]);
        assert!(matches!(rx.recv().await.unwrap(), crate::Event::NodeJoined(_)));
        assert!(matches!(
            node.socket.transmitted().await[0].1.action,
            Some(Action::Ack2(_))
        ));
    }

    #[tokio::test]
    async fn test_node_receive_drops_foreign_cluster_and_replays() {
        let node = create_node();
        let codec = ProstCodec;

        let foreign = codec
            .to_wire_form(&envelope("other", 1, heartbeat(vec![2])))
            .unwrap();
        assert!(node.receive(&foreign).await.unwrap().is_none());

        let first = codec
            .to_wire_form(&envelope("default", 1, heartbeat(vec![2])))
            .unwrap();
        assert!(node.receive(&first).await.unwrap().is_some());
        assert!(node.receive(&first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_node_sequence_gap_tears_down_connection() {
        let node = create_node();
        let codec = ProstCodec;

        let first = codec
            .to_wire_form(&envelope("default", 1, heartbeat(vec![1, 2])))
            .unwrap();
        let envelope_in_order = node.receive(&first).await.unwrap().unwrap();
        node.dispatch(envelope_in_order).await.unwrap();
        assert!(node.connections.lock().await.connection(2).is_some());

        let gap = codec
            .to_wire_form(&envelope("default", 5, heartbeat(vec![1, 2])))
            .unwrap();
        let result = node.receive(&gap).await;

        assert!(matches!(result, Err(Error::ProtocolViolation { .. })));
        let connections = node.connections.lock().await;
        assert!(connections.connection(2).is_none());
        assert!(connections.is_quiescing(2, Instant::now()));
    }

    #[tokio::test]
    async fn test_node_security_violation_is_reported() {
        let config = GossipConfig::builder().with_node_id(1).build().unwrap();
        let node = GossipNode::try_new_with(
            MockUdpSocket::new(),
            config,
            Arc::new(RejectingCodec),
            Arc::new(PreferredLowestLeader),
        )
        .unwrap();

        let result = node.receive(&[1, 2, 3]).await;

        assert!(matches!(result, Err(Error::Security { .. })));
    }

    #[tokio::test]
    async fn test_node_interval_tick_connects_live_members_and_sends_heartbeats() {
        let node = create_node();
        let ack = pb::Ack {
            digests: vec![],
            states: [(
                PEER.to_string(),
                pb::EndpointState {
                    generation: 5,
                    version: 3,
                    node_id: 2,
                    has_token: true,
                },
            )]
            .into(),
        };
        node.gossip.lock().await.handle_ack(&ack, Instant::now());

        node.interval_tick(Instant::now(), true).await.unwrap();

        assert!(node.connections.lock().await.connection(2).is_some());
        let transmitted = node.socket.transmitted().await;
        assert_eq!(transmitted.len(), 1);
        assert_eq!(transmitted[0].0, PEER);
        assert!(matches!(transmitted[0].1.action, Some(Action::Heartbeat(_))));
    }
}
