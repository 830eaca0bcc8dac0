use std::time::Instant;

use crate::pb;

use super::detection::AccrualFailureDetector;
use super::types::HeartbeatState;

/// The gossip engine's canonical record of a known endpoint.
///
/// Only the engine holds `EndpointState`. Messages and subscribers receive an
/// [`EndpointSnapshot`], a plain copy without the failure detector.
#[derive(Clone, Debug)]
pub struct EndpointState {
    heartbeat: HeartbeatState,
    node_id: i32,
    has_token: bool,
    is_alive: bool,
    last_update: Instant,
    detector: AccrualFailureDetector,
}

impl EndpointState {
    pub(crate) fn new(
        heartbeat: HeartbeatState,
        node_id: i32,
        has_token: bool,
        now: Instant,
        detector: AccrualFailureDetector,
    ) -> Self {
        Self {
            heartbeat,
            node_id,
            has_token,
            is_alive: true,
            last_update: now,
            detector,
        }
    }

    pub fn heartbeat(&self) -> HeartbeatState {
        self.heartbeat
    }

    pub fn generation(&self) -> i32 {
        self.heartbeat.generation()
    }

    pub fn max_version(&self) -> i32 {
        self.heartbeat.version()
    }

    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    pub fn has_token(&self) -> bool {
        self.has_token
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    pub(crate) fn detector(&self) -> &AccrualFailureDetector {
        &self.detector
    }

    pub(crate) fn bump_version(&mut self, now: Instant) {
        self.heartbeat.bump_version();
        self.last_update = now;
    }

    pub(crate) fn set_has_token(&mut self, has_token: bool) {
        self.has_token = has_token;
    }

    pub(crate) fn mark_alive(&mut self) {
        self.is_alive = true;
    }

    pub(crate) fn mark_dead(&mut self) {
        self.is_alive = false;
    }

    /// Adopts newer data of the same generation and records the arrival.
    pub(crate) fn refresh(&mut self, snapshot: &EndpointSnapshot, now: Instant) {
        self.heartbeat = snapshot.heartbeat;
        self.node_id = snapshot.node_id;
        self.has_token = snapshot.has_token;
        self.last_update = now;
        self.detector.record(now);
    }

    pub fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            heartbeat: self.heartbeat,
            node_id: self.node_id,
            has_token: self.has_token,
            is_alive: self.is_alive,
        }
    }
}

/// A copy of an endpoint's gossiped state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub heartbeat: HeartbeatState,
    pub node_id: i32,
    pub has_token: bool,
    pub is_alive: bool,
}

impl From<&EndpointSnapshot> for pb::EndpointState {
    fn from(value: &EndpointSnapshot) -> Self {
        pb::EndpointState {
            generation: value.heartbeat.generation(),
            version: value.heartbeat.version(),
            node_id: value.node_id,
            has_token: value.has_token,
        }
    }
}

impl From<&pb::EndpointState> for EndpointSnapshot {
    fn from(value: &pb::EndpointState) -> Self {
        EndpointSnapshot {
            heartbeat: HeartbeatState::new(value.generation, value.version),
            node_id: value.node_id,
            has_token: value.has_token,
            is_alive: true,
        }
    }
}
