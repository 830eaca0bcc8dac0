use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::leader::LeaderMgr;
use super::view::View;

/// The externally visible membership and its leader.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionUpdate {
    pub view: View,
    pub leader: Option<i32>,
}

/// Receives partition level notifications.
pub trait PartitionSink: Debug + Send + Sync {
    fn notify(&self, view: &View, leader: Option<i32>);
}

/// Publishes every notification into a watch channel.
#[derive(Debug)]
pub(crate) struct WatchSink {
    tx: watch::Sender<PartitionUpdate>,
}

impl WatchSink {
    pub(crate) fn new(tx: watch::Sender<PartitionUpdate>) -> Self {
        Self { tx }
    }
}

impl PartitionSink for WatchSink {
    fn notify(&self, view: &View, leader: Option<i32>) {
        self.tx.send_replace(PartitionUpdate {
            view: view.clone(),
            leader,
        });
    }
}

#[derive(Debug)]
struct PartitionState {
    view: View,
    leader: Option<i32>,
}

/// Owns the externally visible view and leader.
///
/// Members leave the visible view as soon as the connection set loses them, they only
/// join it once the connection set declares a stable view.
#[derive(Debug)]
pub struct PartitionProtocol {
    state: Mutex<PartitionState>,
    changed: AtomicBool,
    leader_mgr: Arc<dyn LeaderMgr>,
    sink: Arc<dyn PartitionSink>,
}

impl PartitionProtocol {
    pub fn new(me: i32, leader_mgr: Arc<dyn LeaderMgr>, sink: Arc<dyn PartitionSink>) -> Self {
        let view = View::new([me]);
        let leader = Some(me);

        Self {
            state: Mutex::new(PartitionState { view, leader }),
            changed: AtomicBool::new(false),
            leader_mgr,
            sink,
        }
    }

    pub fn view(&self) -> View {
        self.lock().view.clone()
    }

    pub fn leader(&self) -> Option<i32> {
        self.lock().leader
    }

    /// Drops members the connection set no longer sees.
    pub fn changed_view(&self, connection_view: &View, preferred: &BTreeSet<i32>) {
        let mut state = self.lock();

        let removed = state.view.retain_in(connection_view);
        let was_stable = state.view.is_stable();

        if removed || was_stable {
            state.view.set_stable(false);
            state.leader = self.leader_mgr.elect(&state.view, preferred);
            self.changed.store(true, Ordering::Release);
        }
    }

    /// Adopts the stable view of the connection set.
    pub fn stable_view(&self, connection_view: &View, preferred: &BTreeSet<i32>) {
        let mut state = self.lock();

        state.view = connection_view.clone();
        state.view.set_stable(true);
        state.leader = self.leader_mgr.elect(&state.view, preferred);
        self.changed.store(true, Ordering::Release);
    }

    /// Delivers the current view and leader to the sink, at most once per flagged change.
    pub fn notify_changes(&self) -> bool {
        if self
            .changed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let (view, leader) = {
            let state = self.lock();
            (state.view.clone(), state.leader)
        };
        self.sink.notify(&view, leader);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PartitionState> {
        // A panicking sink must not poison the view for every later caller.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use crate::core::leader::PreferredLowestLeader;
    use crate::core::view::View;
    use crate::test_utils::mocks::RecordingSink;

    use super::PartitionProtocol;

    fn create_protocol() -> (PartitionProtocol, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let protocol = PartitionProtocol::new(3, Arc::new(PreferredLowestLeader), sink.clone());
        (protocol, sink)
    }

    #[test]
    fn test_partition_stable_view_notifies_once() {
        let (protocol, sink) = create_protocol();

        protocol.stable_view(&View::new([1, 2, 3]), &BTreeSet::new());
        assert!(protocol.notify_changes());
        assert!(!protocol.notify_changes());

        let notifications = sink.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].view, View::new([1, 2, 3]));
        assert!(notifications[0].view.is_stable());
        assert_eq!(notifications[0].leader, Some(1));
    }

    #[test]
    fn test_partition_changed_view_removes_members_and_reelects() {
        let (protocol, sink) = create_protocol();
        protocol.stable_view(&View::new([1, 2, 3]), &BTreeSet::new());
        protocol.notify_changes();

        protocol.changed_view(&View::new([2, 3, 4]), &BTreeSet::new());
        assert!(protocol.notify_changes());

        assert_eq!(protocol.view(), View::new([2, 3]));
        assert!(!protocol.view().is_stable());
        assert_eq!(protocol.leader(), Some(2));
        assert_eq!(sink.notifications().len(), 2);
    }

    #[test]
    fn test_partition_changed_view_without_removal_on_unstable_view() {
        let (protocol, sink) = create_protocol();

        protocol.changed_view(&View::new([1, 2, 3]), &BTreeSet::new());

        assert!(!protocol.notify_changes());
        assert_eq!(protocol.view(), View::new([3]));
        assert!(sink.notifications().is_empty());
    }
}
