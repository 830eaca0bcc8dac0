//! # Gossip Engine
//!
//! [`GossipState`] owns the endpoint table of a node and implements the three way
//! anti-entropy exchange:
//!
//! 1. The initiator sends a `Syn` with a shuffled digest of everything it knows.
//! 2. The receiver [`examines`](GossipState::examine) the digests and answers with an `Ack`
//!    carrying the digests it wants data for and the states it knows better.
//! 3. The initiator applies the pushed states and answers the requested digests with an `Ack2`.
//!
//! The state is a plain struct, the node serializes access to it behind a single mutex.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use snafu::location;

use crate::api::config::GossipConfig;
use crate::error::{Error, Result};
use crate::pb;

use super::detection::AccrualFailureDetector;
use super::digest::Digest;
use super::endpoint::{EndpointSnapshot, EndpointState};
use super::event::MembershipSubscriber;
use super::types::HeartbeatState;

/// Endpoints a single gossip round sends a `Syn` to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct GossipTargets {
    pub(crate) live: Option<String>,
    pub(crate) unreachable: Option<String>,
    pub(crate) seed: Option<String>,
}

impl GossipTargets {
    pub(crate) fn iter(&self) -> impl Iterator<Item = &String> {
        self.live
            .iter()
            .chain(self.unreachable.iter())
            .chain(self.seed.iter())
    }
}

pub struct GossipState {
    addr: String,
    config: Arc<GossipConfig>,
    endpoints: HashMap<String, EndpointState>,
    live: BTreeSet<String>,
    unreachable: HashMap<String, Instant>,
    seeds: BTreeSet<String>,
    just_removed: HashMap<String, Instant>,
    subscribers: Vec<Arc<dyn MembershipSubscriber>>,
}

impl GossipState {
    pub fn new(
        addr: impl Into<String>,
        generation: i32,
        config: Arc<GossipConfig>,
        now: Instant,
    ) -> Self {
        let addr = addr.into();
        let seeds = config
            .seeds()
            .iter()
            .map(|seed| seed.to_string())
            .filter(|seed| seed != &addr)
            .collect();

        let mut state = Self {
            addr: addr.clone(),
            config,
            endpoints: HashMap::new(),
            live: BTreeSet::new(),
            unreachable: HashMap::new(),
            seeds,
            just_removed: HashMap::new(),
            subscribers: vec![],
        };

        let local = EndpointState::new(
            HeartbeatState::new(generation, 0),
            state.config.node_id(),
            state.config.has_token(),
            now,
            state.new_detector(),
        );
        state.endpoints.insert(addr, local);

        state
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn register(&mut self, subscriber: Arc<dyn MembershipSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn endpoint(&self, addr: &str) -> Option<&EndpointState> {
        self.endpoints.get(addr)
    }

    pub fn local_state(&self) -> Option<&EndpointState> {
        self.endpoints.get(&self.addr)
    }

    pub fn live_members(&self) -> Vec<String> {
        self.live.iter().cloned().collect()
    }

    pub fn unreachable_members(&self) -> Vec<String> {
        self.unreachable.keys().cloned().collect()
    }

    pub fn is_quarantined(&self, addr: &str) -> bool {
        self.just_removed.contains_key(addr)
    }

    /// Returns `(address, node id)` of every live endpoint.
    pub fn live_nodes(&self) -> Vec<(String, i32)> {
        self.live
            .iter()
            .filter_map(|addr| {
                self.endpoints
                    .get(addr)
                    .map(|state| (addr.clone(), state.node_id()))
            })
            .collect()
    }

    pub fn bump_local_version(&mut self, now: Instant) {
        if let Some(local) = self.endpoints.get_mut(&self.addr) {
            local.bump_version(now);
        }
    }

    /// Changes the local membership token, a local mutation visible through gossip.
    pub fn set_local_token(&mut self, has_token: bool, now: Instant) {
        if let Some(local) = self.endpoints.get_mut(&self.addr) {
            local.set_has_token(has_token);
            local.bump_version(now);
        }
    }

    /// Builds a shuffled digest of every known endpoint.
    pub fn make_random_digests<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Digest> {
        let mut digests: Vec<Digest> = self
            .endpoints
            .iter()
            .map(|(addr, state)| Digest::new(addr, state.generation(), state.max_version()))
            .collect();
        digests.shuffle(rng);
        digests
    }

    pub fn make_syn<R: Rng + ?Sized>(&self, rng: &mut R) -> pb::Syn {
        pb::Syn {
            cluster_id: self.config.cluster_id().to_string(),
            digests: self
                .make_random_digests(rng)
                .iter()
                .map(pb::Digest::from)
                .collect(),
        }
    }

    /// Chooses the endpoints this round gossips to.
    ///
    /// One random live member; with probability `unreachable / (live + 1)` one random
    /// unreachable member; one random seed unless the live target already was a seed
    /// and at least as many members as seeds are live.
    pub(crate) fn select_targets<R: Rng + ?Sized>(&self, rng: &mut R) -> GossipTargets {
        let live = self.live.iter().choose(rng).cloned();

        let unreachable = match self.unreachable.is_empty() {
            true => None,
            false => {
                let probability = self.unreachable.len() as f64 / (self.live.len() + 1) as f64;
                match rng.gen::<f64>() < probability {
                    true => self.unreachable.keys().choose(rng).cloned(),
                    false => None,
                }
            }
        };

        let gossiped_to_seed = live
            .as_ref()
            .map(|target| self.seeds.contains(target))
            .unwrap_or(false);
        let seed = match !gossiped_to_seed || self.live.len() < self.seeds.len() {
            true => self
                .seeds
                .iter()
                .filter(|seed| Some(*seed) != live.as_ref())
                .choose(rng)
                .or_else(|| self.seeds.iter().choose(rng))
                .cloned(),
            false => None,
        };

        GossipTargets {
            live,
            unreachable,
            seed,
        }
    }

    /// Compares received digests with local knowledge.
    ///
    /// Returns the digests to request from the sender and the states to push to it,
    /// most divergent endpoints first.
    pub fn examine(&self, digests: &[Digest]) -> (Vec<Digest>, HashMap<String, EndpointSnapshot>) {
        let mut sorted = digests.to_vec();
        sorted.sort_by_key(|digest| {
            let local_version = self
                .endpoints
                .get(digest.address())
                .map(|state| state.max_version())
                .unwrap_or(0);
            std::cmp::Reverse((local_version as i64 - digest.max_version() as i64).abs())
        });

        let mut requests = vec![];
        let mut pushes = HashMap::new();
        let max_states = self.config.max_states_per_message();

        for digest in &sorted {
            let Some(local) = self.endpoints.get(digest.address()) else {
                requests.push(Digest::new(digest.address(), digest.generation(), 0));
                continue;
            };

            let (local_generation, local_version) = (local.generation(), local.max_version());

            if digest.generation() > local_generation {
                requests.push(Digest::new(digest.address(), digest.generation(), 0));
            } else if digest.generation() < local_generation {
                if pushes.len() < max_states {
                    pushes.insert(digest.address().to_string(), local.snapshot());
                }
            } else if digest.max_version() > local_version {
                requests.push(Digest::new(
                    digest.address(),
                    local_generation,
                    local_version,
                ));
            } else if digest.max_version() < local_version && pushes.len() < max_states {
                pushes.insert(digest.address().to_string(), local.snapshot());
            }
        }

        (requests, pushes)
    }

    /// Returns the local states newer than what the requested digests claim.
    ///
    /// A requested `max_version` of `0` asks for everything of that generation.
    pub fn states_for(&self, requests: &[Digest]) -> HashMap<String, EndpointSnapshot> {
        requests
            .iter()
            .filter_map(|digest| {
                let local = self.endpoints.get(digest.address())?;
                let newer = match digest.max_version() {
                    0 => local.generation() >= digest.generation(),
                    _ => {
                        local.heartbeat()
                            > HeartbeatState::new(digest.generation(), digest.max_version())
                    }
                };
                newer.then(|| (digest.address().to_string(), local.snapshot()))
            })
            .take(self.config.max_states_per_message())
            .collect()
    }

    /// Merges remote states into the endpoint table.
    ///
    /// A newer generation replaces the local record and counts as a join. A newer version
    /// of the same generation refreshes the record silently, reviving the endpoint if it
    /// was dead. Anything else is stale and ignored, as is gossip about quarantined endpoints.
    pub fn apply_state_locally(&mut self, states: &HashMap<String, EndpointSnapshot>, now: Instant) {
        for (addr, remote) in states {
            if addr == &self.addr {
                continue;
            }

            if self.just_removed.contains_key(addr) {
                tracing::debug!("[{}] ignoring gossip for quarantined {}", &self.addr, addr);
                continue;
            }

            let local_heartbeat = self.endpoints.get(addr).map(|local| local.heartbeat());

            match local_heartbeat {
                None => self.handle_major_state_change(addr, remote, now),
                Some(local) if remote.heartbeat.generation() > local.generation() => {
                    tracing::info!(
                        "[{}] {} restarted with generation {}",
                        &self.addr,
                        addr,
                        remote.heartbeat.generation()
                    );
                    self.handle_major_state_change(addr, remote, now);
                }
                Some(local)
                    if remote.heartbeat.generation() == local.generation()
                        && remote.heartbeat.version() > local.version() =>
                {
                    self.apply_new_state(addr, remote, now);
                }
                Some(_) => {
                    tracing::trace!("[{}] ignoring stale state for {}", &self.addr, addr);
                }
            }
        }
    }

    fn handle_major_state_change(&mut self, addr: &str, remote: &EndpointSnapshot, now: Instant) {
        let mut detector = self.new_detector();
        detector.record(now);

        let state = EndpointState::new(
            remote.heartbeat,
            remote.node_id,
            remote.has_token,
            now,
            detector,
        );
        let snapshot = state.snapshot();

        self.endpoints.insert(addr.to_string(), state);
        self.live.insert(addr.to_string());
        self.unreachable.remove(addr);

        tracing::info!("[{}] {} joined", &self.addr, addr);
        for subscriber in &self.subscribers {
            subscriber.on_join(addr, &snapshot);
        }
    }

    fn apply_new_state(&mut self, addr: &str, remote: &EndpointSnapshot, now: Instant) {
        let Some(local) = self.endpoints.get_mut(addr) else {
            return;
        };

        local.refresh(remote, now);

        if !local.is_alive() {
            local.mark_alive();
            let snapshot = local.snapshot();

            self.live.insert(addr.to_string());
            self.unreachable.remove(addr);

            tracing::info!("[{}] {} is alive again", &self.addr, addr);
            for subscriber in &self.subscribers {
                subscriber.on_alive(addr, &snapshot);
            }
        }
    }

    /// Convicts silent endpoints, removes idle fat clients, purges long dead endpoints
    /// and expires the quarantine.
    pub fn status_check(&mut self, now: Instant) {
        let threshold = self.config.convict_threshold();

        let convicted: Vec<String> = self
            .endpoints
            .iter()
            .filter(|(addr, state)| {
                *addr != &self.addr
                    && state.is_alive()
                    && state.detector().should_convict(now, threshold)
            })
            .map(|(addr, _)| addr.clone())
            .collect();

        for addr in convicted {
            self.mark_dead(&addr, now);
        }

        let fat_clients: Vec<String> = self
            .endpoints
            .iter()
            .filter(|(addr, state)| {
                *addr != &self.addr
                    && !state.has_token()
                    && !state.is_alive()
                    && !self.just_removed.contains_key(*addr)
                    && now.saturating_duration_since(state.last_update())
                        > self.config.fat_client_timeout()
            })
            .map(|(addr, _)| addr.clone())
            .collect();

        for addr in fat_clients {
            tracing::info!("[{}] removing idle fat client {}", &self.addr, &addr);
            self.remove_endpoint(&addr, now);
        }

        let long_dead: Vec<String> = self
            .unreachable
            .iter()
            .filter(|(_, dead_since)| {
                now.saturating_duration_since(**dead_since) > self.config.very_long_time()
            })
            .map(|(addr, _)| addr.clone())
            .collect();

        for addr in long_dead {
            tracing::info!("[{}] purging long dead {}", &self.addr, &addr);
            self.evict(&addr);
        }

        let quarantine_delay = self.config.quarantine_delay();
        self.just_removed
            .retain(|_, removed_at| now.saturating_duration_since(*removed_at) <= quarantine_delay);
    }

    fn mark_dead(&mut self, addr: &str, now: Instant) {
        let Some(state) = self.endpoints.get_mut(addr) else {
            return;
        };

        state.mark_dead();
        let snapshot = state.snapshot();

        self.live.remove(addr);
        self.unreachable.insert(addr.to_string(), now);

        tracing::info!("[{}] convicted {}", &self.addr, addr);
        for subscriber in &self.subscribers {
            subscriber.on_dead(addr, &snapshot);
        }
    }

    /// Removes an endpoint and quarantines it for the quarantine delay.
    pub fn remove_endpoint(&mut self, addr: &str, now: Instant) {
        if addr == self.addr {
            return;
        }
        self.evict(addr);
        self.just_removed.insert(addr.to_string(), now);
    }

    fn evict(&mut self, addr: &str) {
        self.live.remove(addr);
        self.unreachable.remove(addr);

        if self.endpoints.remove(addr).is_some() {
            for subscriber in &self.subscribers {
                subscriber.on_remove(addr);
            }
        }
    }

    /// Answers a `Syn`, failing on a foreign cluster id.
    pub fn handle_syn(&self, syn: &pb::Syn) -> Result<pb::Ack> {
        if syn.cluster_id != self.config.cluster_id() {
            return Err(Error::ProtocolViolation {
                message: format!(
                    "cluster id mismatch: expected '{}', got '{}'",
                    self.config.cluster_id(),
                    syn.cluster_id
                ),
                location: location!(),
            });
        }

        let digests: Vec<Digest> = syn.digests.iter().cloned().map(Digest::from).collect();
        let (requests, pushes) = self.examine(&digests);

        Ok(pb::Ack {
            digests: requests.iter().map(pb::Digest::from).collect(),
            states: to_wire_states(&pushes),
        })
    }

    /// Applies the states of an `Ack` and answers the requested digests with an `Ack2`.
    pub fn handle_ack(&mut self, ack: &pb::Ack, now: Instant) -> pb::Ack2 {
        self.apply_state_locally(&from_wire_states(&ack.states), now);

        let requests: Vec<Digest> = ack.digests.iter().cloned().map(Digest::from).collect();
        pb::Ack2 {
            states: to_wire_states(&self.states_for(&requests)),
        }
    }

    pub fn handle_ack2(&mut self, ack2: &pb::Ack2, now: Instant) {
        self.apply_state_locally(&from_wire_states(&ack2.states), now);
    }

    fn new_detector(&self) -> AccrualFailureDetector {
        AccrualFailureDetector::new(
            self.config.phi_window_size(),
            self.config.min_std_deviation(),
            self.config.bootstrap_interval(),
            self.config.estimation(),
        )
    }
}

fn to_wire_states(states: &HashMap<String, EndpointSnapshot>) -> HashMap<String, pb::EndpointState> {
    states
        .iter()
        .map(|(addr, state)| (addr.clone(), pb::EndpointState::from(state)))
        .collect()
}

fn from_wire_states(states: &HashMap<String, pb::EndpointState>) -> HashMap<String, EndpointSnapshot> {
    states
        .iter()
        .map(|(addr, state)| (addr.clone(), EndpointSnapshot::from(state)))
        .collect()
}
