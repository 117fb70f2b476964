//! Coordination of a joiner's lane change into the convoy.

use super::guard::restore_lane_mode;
use crate::client::{tolerate, LaneChangeMode, SimResult, SimulationClient, SpeedCommand};
use crate::config::MembershipConfig;
use crate::convoy::ConvoyState;
use crate::util::Deadline;
use crate::VehicleId;
use std::collections::{BTreeMap, BTreeSet};

/// A join whose lane change has not been issued yet.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PendingMerge {
    pub front: VehicleId,
    pub rear: Option<VehicleId>,
}

/// What happened to a pending merge on a tick.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum MergeProgress {
    /// Still waiting for room or for the joiner to reach the front's road.
    Waiting,
    /// The lane change was issued, or was not needed.
    Executed,
    /// The joiner or its front vehicle has gone.
    Abandoned,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct MergeCoordinator {
    pending: BTreeMap<VehicleId, PendingMerge>,
    /// Rear members currently slowed to make room.
    yielding: BTreeSet<VehicleId>,
    /// Vehicles with a temporarily unlocked lane-change mode.
    lane_restores: BTreeMap<VehicleId, Deadline>,
}

impl MergeCoordinator {
    pub fn register(&mut self, me: &VehicleId, front: &VehicleId, rear: Option<&VehicleId>) {
        self.pending.insert(
            me.clone(),
            PendingMerge {
                front: front.clone(),
                rear: rear.cloned(),
            },
        );
    }

    pub fn is_pending(&self, me: &VehicleId) -> bool {
        self.pending.contains_key(me)
    }

    pub fn is_yielding(&self, id: &VehicleId) -> bool {
        self.yielding.contains(id)
    }

    /// Whether the vehicle's merge lane change is still being held.
    pub fn changing_lanes(&self, id: &VehicleId) -> bool {
        self.lane_restores.contains_key(id)
    }

    /// Drops the joiner's own pending merge and hands its yielding rear
    /// back to its own control.
    pub fn cancel<C: SimulationClient>(&mut self, client: &mut C, me: &VehicleId) {
        if let Some(merge) = self.pending.remove(me) {
            log::debug!("{} merge behind {} abandoned", me, merge.front);
            if let Some(rear) = merge.rear {
                self.release_yield(client, &rear);
            }
        }
        self.lane_restores.remove(me);
    }

    /// Points merges that relied on `gone` at its replacement in the convoy,
    /// which must already have been detached.
    ///
    /// A departed rear is replaced by the joiner's new follower. A departed
    /// front is replaced by the joiner's new designated leader, and the merge
    /// is only abandoned when the joiner has become the convoy's root.
    pub fn retarget<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &ConvoyState,
        gone: &VehicleId,
    ) {
        self.release_yield(client, gone);
        let affected: Vec<VehicleId> = self
            .pending
            .iter()
            .filter(|(_, merge)| merge.front == *gone || merge.rear.as_ref() == Some(gone))
            .map(|(me, _)| me.clone())
            .collect();
        for me in affected {
            let front = match convoy.designated_leader(&me) {
                Some(front) => front.clone(),
                None => {
                    log::debug!("{} leads the convoy now, merge dropped", me);
                    self.cancel(client, &me);
                    continue;
                }
            };
            let rear = convoy.follower_of(&me).cloned();
            if let Some(merge) = self.pending.get_mut(&me) {
                if merge.front != front || merge.rear != rear {
                    log::debug!("{} now merging behind {} ({:?} behind)", me, front, rear);
                }
                merge.front = front;
                merge.rear = rear;
            }
        }
    }

    /// Advances one pending merge. Returns its progress.
    pub fn step<C: SimulationClient>(
        &mut self,
        client: &mut C,
        me: &VehicleId,
        cfg: &MembershipConfig,
    ) -> MergeProgress {
        let merge = match self.pending.get(me) {
            Some(merge) => merge.clone(),
            None => return MergeProgress::Abandoned,
        };
        if !client.contains(me) || !client.contains(&merge.front) {
            self.cancel(client, me);
            return MergeProgress::Abandoned;
        }

        match self.try_merge(client, me, &merge, cfg) {
            Ok(true) => {
                self.pending.remove(me);
                if let Some(rear) = &merge.rear {
                    self.release_yield(client, rear);
                }
                log::info!("{} merged behind {}", me, merge.front);
                MergeProgress::Executed
            }
            Ok(false) => MergeProgress::Waiting,
            Err(err) => {
                log::debug!("merge of {}: {}", me, err);
                MergeProgress::Waiting
            }
        }
    }

    /// Advances every pending merge. Returns the joiners whose merge executed.
    pub fn tick<C: SimulationClient>(
        &mut self,
        client: &mut C,
        cfg: &MembershipConfig,
    ) -> Vec<VehicleId> {
        let pending: Vec<VehicleId> = self.pending.keys().cloned().collect();
        let executed = pending
            .into_iter()
            .filter(|me| self.step(client, me, cfg) == MergeProgress::Executed)
            .collect();
        self.tick_lane_restores(client, cfg);
        executed
    }

    /// Holds the joiner just below its front's speed, makes a close rear
    /// yield, and issues the lane change once there is room.
    fn try_merge<C: SimulationClient>(
        &mut self,
        client: &mut C,
        me: &VehicleId,
        merge: &PendingMerge,
        cfg: &MembershipConfig,
    ) -> SimResult<bool> {
        let front_speed = client.speed(&merge.front)?;
        client.set_speed(me, SpeedCommand::Set(f64::max(1.0, front_speed - 1.0)))?;

        if let Some(rear) = merge.rear.as_ref().filter(|rear| client.contains(rear)) {
            let here = client.position(me)?;
            let there = client.position(rear)?;
            let dist = f64::hypot(here.x - there.x, here.y - there.y);
            if dist < cfg.merge_safe_gap {
                let my_speed = client.speed(me)?;
                let rear_speed = client.speed(rear)?;
                let yield_speed = f64::max(
                    0.0,
                    f64::min(rear_speed - 0.5, f64::max(0.0, my_speed - 5.0)),
                );
                if self.yielding.insert(rear.clone()) {
                    log::debug!("{} yielding to {} ({:.1}m)", rear, me, dist);
                }
                client.set_speed(rear, SpeedCommand::Set(yield_speed))?;
                return Ok(false);
            }
            self.release_yield(client, rear);
        }

        if client.road_id(me)? != client.road_id(&merge.front)? {
            return Ok(false);
        }
        let target = client.lane_index(&merge.front)?;
        if client.lane_index(me)? != target {
            self.change_lane(client, me, target, cfg.merge_hold)?;
        }
        Ok(true)
    }

    /// Unlocks lane changes for `hold` seconds and requests the change.
    pub fn change_lane<C: SimulationClient>(
        &mut self,
        client: &mut C,
        id: &VehicleId,
        lane: usize,
        hold: f64,
    ) -> SimResult<()> {
        client.set_lane_change_mode(id, LaneChangeMode::Default)?;
        client.change_lane(id, lane, hold)?;
        self.lane_restores
            .insert(id.clone(), Deadline::after(client.time(), hold));
        Ok(())
    }

    fn release_yield<C: SimulationClient>(&mut self, client: &mut C, rear: &VehicleId) {
        if self.yielding.remove(rear) {
            tolerate(client.set_speed(rear, SpeedCommand::Release), "release yield");
        }
    }

    fn tick_lane_restores<C: SimulationClient>(&mut self, client: &mut C, cfg: &MembershipConfig) {
        let now = client.time();
        let lapsed: Vec<VehicleId> = self
            .lane_restores
            .iter()
            .filter(|(id, deadline)| deadline.expired(now) || !client.contains(id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in lapsed {
            self.lane_restores.remove(&id);
            if client.contains(&id) {
                restore_lane_mode(client, &id, cfg);
            }
        }
    }
}
