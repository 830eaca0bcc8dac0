use std::collections::BTreeSet;
use std::fmt::Debug;

use super::view::View;

/// Elects the leader of a view.
///
/// Implementations must be deterministic: every node observing the same view and the same
/// preferred set elects the same leader without exchanging messages.
pub trait LeaderMgr: Debug + Send + Sync {
    fn elect(&self, view: &View, preferred: &BTreeSet<i32>) -> Option<i32>;
}

/// Elects the lowest preferred member, or the lowest member if no member is preferred.
#[derive(Copy, Clone, Debug, Default)]
pub struct PreferredLowestLeader;

impl LeaderMgr for PreferredLowestLeader {
    fn elect(&self, view: &View, preferred: &BTreeSet<i32>) -> Option<i32> {
        view.members()
            .iter()
            .find(|id| preferred.contains(id))
            .or_else(|| view.members().first())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::core::view::View;

    use super::{LeaderMgr, PreferredLowestLeader};

    #[test]
    fn test_leader_lowest_member_without_preference() {
        let leader = PreferredLowestLeader.elect(&View::new([9, 4, 7]), &BTreeSet::new());
        assert_eq!(leader, Some(4));
    }

    #[test]
    fn test_leader_preferred_member_wins() {
        let preferred = BTreeSet::from([7, 9, 12]);
        let leader = PreferredLowestLeader.elect(&View::new([9, 4, 7]), &preferred);
        assert_eq!(leader, Some(7));
    }

    #[test]
    fn test_leader_empty_view() {
        assert_eq!(PreferredLowestLeader.elect(&View::default(), &BTreeSet::new()), None);
    }
}
