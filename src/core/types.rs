use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::pb;

/// Process unique handle of a node.
///
/// `magic` partitions independent clusters sharing a network, `epoch` distinguishes
/// incarnations of the same process. Equality and hashing only consider `(magic, id)`.
#[derive(Copy, Clone, Debug)]
pub struct Identity {
    magic: i32,
    id: i32,
    epoch: i64,
}

impl Identity {
    pub fn new(magic: i32, id: i32, epoch: i64) -> Self {
        Self { magic, id, epoch }
    }

    pub fn magic(&self) -> i32 {
        self.magic
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn epoch(&self) -> i64 {
        self.epoch
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.magic == other.magic && self.id == other.id
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.magic.hash(state);
        self.id.hash(state);
    }
}

/// Versioned liveness of an endpoint.
///
/// Ordered lexicographically: a higher `generation` always wins,
/// `version` only breaks ties within one generation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct HeartbeatState {
    generation: i32,
    version: i32,
}

impl HeartbeatState {
    pub fn new(generation: i32, version: i32) -> Self {
        Self {
            generation,
            version,
        }
    }

    pub fn generation(&self) -> i32 {
        self.generation
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// Bumps the version, it never wraps backwards.
    pub fn bump_version(&mut self) {
        self.version = self.version.saturating_add(1);
    }
}

impl Ord for HeartbeatState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then(self.version.cmp(&other.version))
    }
}

impl PartialOrd for HeartbeatState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&Identity> for pb::Identity {
    fn from(value: &Identity) -> Self {
        pb::Identity {
            magic: value.magic,
            id: value.id,
            epoch: value.epoch,
        }
    }
}

impl From<&pb::Identity> for Identity {
    fn from(value: &pb::Identity) -> Self {
        Identity::new(value.magic, value.id, value.epoch)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{HeartbeatState, Identity};

    #[test]
    fn test_types_identity_ignores_epoch() {
        let a = Identity::new(1, 7, 100);
        let b = Identity::new(1, 7, 200);
        let c = Identity::new(2, 7, 100);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(HashSet::from([a, b, c]).len(), 2);
    }

    #[test]
    fn test_types_generation_dominates_version() {
        let restarted = HeartbeatState::new(5, 0);
        let stale = HeartbeatState::new(4, 999_999);

        assert!(restarted > stale);
        assert!(HeartbeatState::new(4, 2) > HeartbeatState::new(4, 1));
    }

    #[test]
    fn test_types_bump_version_saturates() {
        let mut state = HeartbeatState::new(1, i32::MAX);
        state.bump_version();

        assert_eq!(state.version(), i32::MAX);
    }
}
