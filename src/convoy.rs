//! The shared convoy state threaded through the tick loop.

use crate::chain::{order_chain, splice_behind, unlink, FollowRelation};
use crate::util::Deadline;
use crate::VehicleId;
use std::collections::{BTreeMap, BTreeSet};

/// Which speed-limit regime a follower's controller is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedRegime {
    /// Normal speed limits are enforced.
    Normal,
    /// Limits are relaxed to close a large gap.
    CatchUp,
}

/// Per-follower controller state.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlState {
    /// The vehicle this follower is assigned to follow.
    pub designated_leader: VehicleId,
    /// The initial lock, if one has been engaged.
    pub lock: Option<Deadline>,
    /// The current speed-limit regime.
    pub regime: SpeedRegime,
}

impl ControlState {
    fn new(designated_leader: VehicleId) -> Self {
        Self {
            designated_leader,
            lock: None,
            regime: SpeedRegime::Normal,
        }
    }

    /// Whether the initial lock is in force at time `now`.
    pub fn lock_active(&self, now: f64) -> bool {
        self.lock.map_or(false, |lock| !lock.expired(now))
    }
}

/// The convoy: follow relations, per-follower control state and the
/// pairs whose target gap is currently widened for a cut-in.
///
/// The relation set is only ever replaced as a whole, so a reader never
/// sees a half-applied join or leave.
#[derive(Clone, Debug, Default)]
pub struct ConvoyState {
    /// The follow relations.
    relations: Vec<FollowRelation>,
    /// A leader with no followers yet.
    head: Option<VehicleId>,
    /// Controller state keyed by follower.
    controls: BTreeMap<VehicleId, ControlState>,
    /// `(leader, follower)` pairs with an expanded target gap.
    expanded: BTreeSet<(VehicleId, VehicleId)>,
}

impl ConvoyState {
    /// Creates an empty convoy.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a convoy from an initial relation set.
    pub fn from_relations(relations: Vec<FollowRelation>) -> Self {
        let mut convoy = Self::new();
        convoy.replace_relations(relations);
        convoy
    }

    /// The current follow relations.
    pub fn relations(&self) -> &[FollowRelation] {
        &self.relations
    }

    /// The ordered chain, root first.
    pub fn chain(&self) -> Vec<VehicleId> {
        if self.relations.is_empty() {
            self.head.iter().cloned().collect()
        } else {
            order_chain(&self.relations)
        }
    }

    /// Whether the vehicle is a member of the convoy.
    pub fn contains(&self, id: &VehicleId) -> bool {
        self.head.as_ref() == Some(id) || self.relations.iter().any(|r| r.touches(id))
    }

    /// Whether the convoy has no members.
    pub fn is_empty(&self) -> bool {
        self.head.is_none() && self.relations.is_empty()
    }

    /// The leader the vehicle is assigned to follow.
    pub fn designated_leader(&self, follower: &VehicleId) -> Option<&VehicleId> {
        self.relations
            .iter()
            .find(|r| r.follower == *follower)
            .map(|r| &r.leader)
    }

    /// The vehicle assigned to follow `leader`.
    pub fn follower_of(&self, leader: &VehicleId) -> Option<&VehicleId> {
        self.relations
            .iter()
            .find(|r| r.leader == *leader)
            .map(|r| &r.follower)
    }

    /// Controller state of a follower.
    pub fn control(&self, follower: &VehicleId) -> Option<&ControlState> {
        self.controls.get(follower)
    }

    pub(crate) fn control_mut(&mut self, follower: &VehicleId) -> Option<&mut ControlState> {
        self.controls.get_mut(follower)
    }

    /// Makes `id` the lone leader of an empty convoy.
    pub(crate) fn set_head(&mut self, id: VehicleId) {
        debug_assert!(self.relations.is_empty());
        self.head = Some(id);
    }

    /// Splices `me` in behind `front`. Returns the vehicle that now follows `me`.
    pub(crate) fn attach_behind(&mut self, me: &VehicleId, front: &VehicleId) -> Option<VehicleId> {
        let (relations, rear) = splice_behind(&self.relations, me, front);
        self.replace_relations(relations);
        rear
    }

    /// Removes `id` from the convoy, closing the gap it leaves behind.
    /// Returns its former `(front, rear)` neighbours.
    pub(crate) fn detach(&mut self, id: &VehicleId) -> (Option<VehicleId>, Option<VehicleId>) {
        if self.head.as_ref() == Some(id) {
            self.head = None;
        }
        let (relations, front, rear) = unlink(&self.relations, id);
        // A two-vehicle convoy leaves a lone leader behind
        if relations.is_empty() {
            self.head = match (&front, &rear) {
                (Some(other), None) | (None, Some(other)) => Some(other.clone()),
                _ => None,
            };
        }
        self.replace_relations(relations);
        self.expanded.retain(|(l, f)| l != id && f != id);
        (front, rear)
    }

    /// Swaps in a new relation set and brings the per-follower state in line with it.
    pub(crate) fn replace_relations(&mut self, relations: Vec<FollowRelation>) {
        if !relations.is_empty() {
            self.head = None;
        }
        let mut controls = BTreeMap::new();
        for relation in &relations {
            let control = match self.controls.remove(&relation.follower) {
                Some(mut control) => {
                    control.designated_leader = relation.leader.clone();
                    control
                }
                None => ControlState::new(relation.leader.clone()),
            };
            controls.insert(relation.follower.clone(), control);
        }
        self.relations = relations;
        self.controls = controls;
    }

    /// Starts the initial lock of a follower.
    pub(crate) fn engage_lock(&mut self, follower: &VehicleId, now: f64, duration: f64) -> bool {
        match self.controls.get_mut(follower) {
            Some(control) => {
                control.lock = Some(Deadline::after(now, duration));
                true
            }
            None => false,
        }
    }

    /// Clears any lock held by the vehicle.
    pub(crate) fn clear_lock(&mut self, follower: &VehicleId) {
        if let Some(control) = self.controls.get_mut(follower) {
            control.lock = None;
        }
    }

    /// Whether the pair's target gap is widened for a cut-in.
    pub fn gap_expanded(&self, leader: &VehicleId, follower: &VehicleId) -> bool {
        self.expanded.contains(&(leader.clone(), follower.clone()))
    }

    /// Widens or restores the target gap of a pair.
    pub(crate) fn set_gap_expansion(&mut self, leader: &VehicleId, follower: &VehicleId, on: bool) {
        let pair = (leader.clone(), follower.clone());
        if on {
            self.expanded.insert(pair);
        } else {
            self.expanded.remove(&pair);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(name: &str) -> VehicleId {
        VehicleId::from(name)
    }

    #[test]
    fn lone_leader_forms_chain() {
        let mut convoy = ConvoyState::new();
        convoy.set_head(id("A"));
        assert_eq!(convoy.chain(), vec![id("A")]);
        assert!(convoy.contains(&id("A")));
    }

    #[test]
    fn controls_follow_relations() {
        let mut convoy = ConvoyState::new();
        convoy.set_head(id("A"));
        assert_eq!(convoy.attach_behind(&id("B"), &id("A")), None);
        assert_eq!(convoy.control(&id("B")).unwrap().designated_leader, id("A"));

        assert_eq!(convoy.attach_behind(&id("X"), &id("A")), Some(id("B")));
        assert_eq!(convoy.control(&id("B")).unwrap().designated_leader, id("X"));
        assert_eq!(convoy.chain(), vec![id("A"), id("X"), id("B")]);

        assert_eq!(convoy.detach(&id("X")), (Some(id("A")), Some(id("B"))));
        assert!(convoy.control(&id("X")).is_none());
        assert_eq!(convoy.chain(), vec![id("A"), id("B")]);
    }

    #[test]
    fn detach_to_lone_leader() {
        let mut convoy = ConvoyState::from_relations(vec![FollowRelation::new("B", "A")]);
        convoy.detach(&id("A"));
        assert_eq!(convoy.chain(), vec![id("B")]);
        convoy.detach(&id("B"));
        assert!(convoy.is_empty());
    }

    #[test]
    fn lock_lifetime() {
        let mut convoy = ConvoyState::from_relations(vec![FollowRelation::new("B", "A")]);
        assert!(convoy.engage_lock(&id("B"), 3.0, 0.7));
        assert!(!convoy.engage_lock(&id("A"), 3.0, 0.7));
        let control = convoy.control(&id("B")).unwrap();
        assert!(control.lock_active(3.5));
        assert!(!control.lock_active(3.7));
    }

    #[test]
    fn expansion_cleared_on_detach() {
        let mut convoy = ConvoyState::from_relations(vec![FollowRelation::new("B", "A")]);
        convoy.set_gap_expansion(&id("A"), &id("B"), true);
        assert!(convoy.gap_expanded(&id("A"), &id("B")));
        convoy.detach(&id("B"));
        assert!(!convoy.gap_expanded(&id("A"), &id("B")));
    }
}
