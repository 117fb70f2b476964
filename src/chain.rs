//! Derivation of the ordered convoy from follower → leader relations.

use crate::VehicleId;
use std::collections::HashSet;

/// States that `follower` drives behind `leader`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FollowRelation {
    pub follower: VehicleId,
    pub leader: VehicleId,
}

impl FollowRelation {
    /// Creates a new relation.
    pub fn new(follower: impl Into<VehicleId>, leader: impl Into<VehicleId>) -> Self {
        Self {
            follower: follower.into(),
            leader: leader.into(),
        }
    }

    /// Whether the vehicle takes part in this relation on either side.
    pub fn touches(&self, id: &VehicleId) -> bool {
        self.follower == *id || self.leader == *id
    }
}

/// Orders the relation set into a chain, root first.
///
/// The root is a leader that never appears as a follower. When several
/// leaders qualify, the first one in relation order is used. A set with no
/// root at all (every leader also follows someone) is cyclic and yields an
/// empty chain. Walking the chain is capped at the relation count, so
/// malformed input always terminates.
pub fn order_chain(relations: &[FollowRelation]) -> Vec<VehicleId> {
    if relations.is_empty() {
        return vec![];
    }

    let followers: HashSet<&VehicleId> = relations.iter().map(|r| &r.follower).collect();
    let root = match relations.iter().find(|r| !followers.contains(&r.leader)) {
        Some(r) => r.leader.clone(),
        None => {
            log::warn!("follow relations form a cycle; no convoy root");
            return vec![];
        }
    };

    let mut chain = vec![root];
    for _ in 0..relations.len() {
        let tail = &chain[chain.len() - 1];
        let next = relations
            .iter()
            .find(|r| r.leader == *tail && !chain.contains(&r.follower))
            .map(|r| r.follower.clone());
        match next {
            Some(next) => chain.push(next),
            None => break,
        }
    }
    chain
}

/// Finds the vehicles directly in front of and behind `id` in the chain.
/// Both are `None` if `id` is not a member.
pub fn neighbors<'a>(
    chain: &'a [VehicleId],
    id: &VehicleId,
) -> (Option<&'a VehicleId>, Option<&'a VehicleId>) {
    match chain.iter().position(|v| v == id) {
        Some(idx) => {
            let front = idx.checked_sub(1).and_then(|i| chain.get(i));
            (front, chain.get(idx + 1))
        }
        None => (None, None),
    }
}

/// Builds a new relation set with `me` spliced in directly behind `front`.
///
/// Any relations `me` already had are dropped, and the vehicle that used to
/// follow `front` is re-pointed to follow `me`. Returns the new set and that
/// former rear vehicle.
pub fn splice_behind(
    relations: &[FollowRelation],
    me: &VehicleId,
    front: &VehicleId,
) -> (Vec<FollowRelation>, Option<VehicleId>) {
    let rear = relations
        .iter()
        .find(|r| r.leader == *front && r.follower != *me)
        .map(|r| r.follower.clone());
    let mut spliced: Vec<FollowRelation> = relations
        .iter()
        .filter(|r| !r.touches(me))
        .map(|r| match &rear {
            Some(rear) if r.follower == *rear => FollowRelation {
                follower: rear.clone(),
                leader: me.clone(),
            },
            _ => r.clone(),
        })
        .collect();
    spliced.push(FollowRelation {
        follower: me.clone(),
        leader: front.clone(),
    });
    (spliced, rear)
}

/// Builds a new relation set without `me`, reconnecting its rear neighbour
/// to its front neighbour when it had both. Returns the new set and the
/// former `(front, rear)` neighbours.
pub fn unlink(
    relations: &[FollowRelation],
    me: &VehicleId,
) -> (Vec<FollowRelation>, Option<VehicleId>, Option<VehicleId>) {
    let front = relations
        .iter()
        .find(|r| r.follower == *me)
        .map(|r| r.leader.clone());
    let rear = relations
        .iter()
        .find(|r| r.leader == *me)
        .map(|r| r.follower.clone());
    let mut unlinked: Vec<FollowRelation> =
        relations.iter().filter(|r| !r.touches(me)).cloned().collect();
    if let (Some(front), Some(rear)) = (&front, &rear) {
        unlinked.push(FollowRelation {
            follower: rear.clone(),
            leader: front.clone(),
        });
    }
    (unlinked, front, rear)
}

#[cfg(test)]
mod test {
    use super::*;
    use itertools::Itertools;

    fn rel(follower: &str, leader: &str) -> FollowRelation {
        FollowRelation::new(follower, leader)
    }

    fn ids(names: &[&str]) -> Vec<VehicleId> {
        names.iter().map(|n| VehicleId::from(*n)).collect()
    }

    #[test]
    fn empty_relations_give_empty_chain() {
        assert!(order_chain(&[]).is_empty());
    }

    #[test]
    fn orders_shuffled_relations() {
        let relations = vec![rel("Veh3", "Veh2"), rel("Veh1", "Veh0"), rel("Veh2", "Veh1")];
        let chain = order_chain(&relations);
        assert_eq!(chain, ids(&["Veh0", "Veh1", "Veh2", "Veh3"]));
        assert_eq!(chain.len(), relations.len() + 1);
        for (leader, follower) in chain.iter().tuple_windows() {
            assert!(relations.contains(&FollowRelation {
                follower: follower.clone(),
                leader: leader.clone(),
            }));
        }
    }

    #[test]
    fn ambiguous_roots_use_first_listed() {
        let relations = vec![rel("B", "A"), rel("D", "C")];
        assert_eq!(order_chain(&relations), ids(&["A", "B"]));
    }

    #[test]
    fn cycles_terminate_with_empty_chain() {
        let relations = vec![rel("A", "B"), rel("B", "A")];
        assert!(order_chain(&relations).is_empty());
    }

    #[test]
    fn branching_input_terminates() {
        // Two vehicles claim to follow A; only one can be walked.
        let relations = vec![rel("B", "A"), rel("C", "A"), rel("D", "C")];
        let chain = order_chain(&relations);
        assert_eq!(chain, ids(&["A", "B"]));
        assert_eq!(chain.iter().unique().count(), chain.len());
    }

    #[test]
    fn splice_into_middle() {
        let relations = vec![rel("B", "A"), rel("C", "B")];
        let me = VehicleId::from("X");
        let (spliced, rear) = splice_behind(&relations, &me, &VehicleId::from("A"));
        assert_eq!(rear, Some(VehicleId::from("B")));
        assert_eq!(order_chain(&spliced), ids(&["A", "X", "B", "C"]));
    }

    #[test]
    fn unlink_reconnects_neighbors() {
        let relations = vec![rel("B", "A"), rel("C", "B")];
        let (unlinked, front, rear) = unlink(&relations, &VehicleId::from("B"));
        assert_eq!(front, Some(VehicleId::from("A")));
        assert_eq!(rear, Some(VehicleId::from("C")));
        assert_eq!(unlinked, vec![rel("C", "A")]);
    }

    #[test]
    fn splice_then_unlink_round_trips() {
        let relations = vec![rel("B", "A"), rel("C", "B")];
        let me = VehicleId::from("X");
        let (spliced, _) = splice_behind(&relations, &me, &VehicleId::from("C"));
        let (restored, _, _) = unlink(&spliced, &me);
        assert_eq!(restored, relations);
    }

    #[test]
    fn neighbor_lookup() {
        let chain = ids(&["A", "B", "C"]);
        let b = VehicleId::from("B");
        assert_eq!(neighbors(&chain, &b), (Some(&chain[0]), Some(&chain[2])));
        assert_eq!(neighbors(&chain, &chain[0]), (None, Some(&chain[1])));
        assert_eq!(neighbors(&chain, &chain[2]), (Some(&chain[1]), None));
        assert_eq!(neighbors(&chain, &VehicleId::from("X")), (None, None));
    }
}
