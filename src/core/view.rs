use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::pb;

/// A set of member node ids with the time it was formed and whether it is stable.
///
/// Two views are equal if they hold the same members, timestamp and stability flag are ignored.
#[derive(Clone, Debug, Default)]
pub struct View {
    members: BTreeSet<i32>,
    timestamp: i64,
    stable: bool,
}

impl View {
    pub fn new(members: impl IntoIterator<Item = i32>) -> Self {
        Self {
            members: members.into_iter().collect(),
            timestamp: now_millis(),
            stable: false,
        }
    }

    pub fn members(&self) -> &BTreeSet<i32> {
        &self.members
    }

    pub fn contains(&self, id: i32) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub(crate) fn set_stable(&mut self, stable: bool) {
        self.stable = stable;
    }

    /// Replaces the members, returns `true` if they changed.
    pub(crate) fn set_members(&mut self, members: BTreeSet<i32>) -> bool {
        if self.members == members {
            return false;
        }
        self.members = members;
        self.timestamp = now_millis();
        true
    }

    /// Retains the members also present in `other`, returns `true` if any was removed.
    pub(crate) fn retain_in(&mut self, other: &View) -> bool {
        let before = self.members.len();
        self.members.retain(|id| other.contains(*id));
        if self.members.len() != before {
            self.timestamp = now_millis();
            return true;
        }
        false
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl Eq for View {}

impl From<&View> for pb::View {
    fn from(value: &View) -> Self {
        pb::View {
            members: value.members.iter().copied().collect(),
            timestamp: value.timestamp,
            stable: value.stable,
        }
    }
}

impl From<&pb::View> for View {
    fn from(value: &pb::View) -> Self {
        View {
            members: value.members.iter().copied().collect(),
            timestamp: value.timestamp,
            stable: value.stable,
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
