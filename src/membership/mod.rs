//! Joining and leaving the convoy.

use self::guard::GuardTimers;
use self::merge::{MergeCoordinator, MergeProgress};
use crate::client::{
    tolerate, LaneChangeMode, SimResult, SimulationClient, SpeedCommand, SpeedMode,
};
use crate::config::MembershipConfig;
use crate::convoy::ConvoyState;
use crate::VehicleId;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

mod guard;
mod merge;

/// Why a join or leave request was refused.
#[derive(Clone, Debug, PartialEq)]
pub enum MembershipError {
    /// The vehicle is not in the simulation.
    VehicleGone(VehicleId),
    /// The vehicle is already in the convoy.
    AlreadyMember(VehicleId),
    /// The vehicle is not in the convoy.
    NotMember(VehicleId),
    /// No convoy member is within the join distance.
    NoConvoyNearby { id: VehicleId, within: f64 },
}

impl fmt::Display for MembershipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipError::VehicleGone(id) => write!(f, "{} is no longer in the simulation", id),
            MembershipError::AlreadyMember(id) => write!(f, "{} is already in the convoy", id),
            MembershipError::NotMember(id) => write!(f, "{} is not in the convoy", id),
            MembershipError::NoConvoyNearby { id, within } => {
                write!(f, "no convoy vehicle within {:.0}m of {}", within, id)
            }
        }
    }
}

impl std::error::Error for MembershipError {}

/// The outcome of a successful join.
#[derive(Clone, Debug, PartialEq)]
pub enum Joined {
    /// The convoy was empty and the vehicle now leads it.
    Leader,
    /// The vehicle was spliced in behind `front`.
    Behind {
        front: VehicleId,
        /// The vehicle that now follows the joiner.
        rear: Option<VehicleId>,
        /// Whether the lane change into position is still pending.
        merging: bool,
    },
}

/// The outcome of a successful leave.
#[derive(Clone, Debug, PartialEq)]
pub struct Left {
    /// The former front neighbour.
    pub front: Option<VehicleId>,
    /// The former rear neighbour, now following `front`.
    pub rear: Option<VehicleId>,
}

/// Candidate front vehicles for a join, nearest first, as `(id, distance)`.
pub type Candidates = SmallVec<[(VehicleId, f64); 4]>;

/// Carries out join and leave requests and the timed effects that follow them.
#[derive(Clone, Debug, Default)]
pub struct MembershipManager {
    cfg: MembershipConfig,
    merges: MergeCoordinator,
    guards: GuardTimers,
}

impl MembershipManager {
    /// Creates a new membership manager.
    pub fn new(cfg: MembershipConfig) -> Self {
        Self {
            cfg,
            merges: Default::default(),
            guards: Default::default(),
        }
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.cfg
    }

    /// Whether the vehicle's lane change into the convoy is still pending.
    pub fn merging(&self, id: &VehicleId) -> bool {
        self.merges.is_pending(id)
    }

    /// Whether the vehicle is slowed to let a joiner in.
    pub fn yielding(&self, id: &VehicleId) -> bool {
        self.merges.is_yielding(id)
    }

    /// Whether the vehicle is in its post-join no-overtake cooldown.
    pub fn in_cooldown(&self, id: &VehicleId) -> bool {
        self.guards.in_cooldown(id)
    }

    /// Whether the vehicle is held back after its front neighbour left.
    pub fn guarded(&self, id: &VehicleId) -> bool {
        self.guards.guarded(id)
    }

    /// Lists the convoy members within the join distance of `me` by
    /// straight-line distance, nearest first.
    pub fn candidates<C: SimulationClient>(
        &self,
        client: &C,
        convoy: &ConvoyState,
        me: &VehicleId,
    ) -> Candidates {
        let here = match client.position(me) {
            Ok(here) => here,
            Err(_) => return Candidates::new(),
        };
        let mut candidates: Candidates = convoy
            .chain()
            .into_iter()
            .filter(|id| id != me)
            .filter_map(|id| {
                let there = client.position(&id).ok()?;
                let dist = f64::hypot(here.x - there.x, here.y - there.y);
                (dist <= self.cfg.join_distance + 1e-6).then(|| (id, dist))
            })
            .collect();
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        candidates
    }

    /// Adds `me` to the convoy.
    ///
    /// An empty convoy is simply taken over. Otherwise `me` is spliced in
    /// behind the member it can see directly ahead, or else the nearest
    /// member ahead of it on the same road, or else the nearest member by
    /// straight-line distance. Its lane change into position is issued once
    /// it shares a road with its front and any rear member has room.
    pub fn join<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &mut ConvoyState,
        me: &VehicleId,
    ) -> Result<Joined, MembershipError> {
        if !client.contains(me) {
            return Err(MembershipError::VehicleGone(me.clone()));
        }
        if convoy.contains(me) {
            return Err(MembershipError::AlreadyMember(me.clone()));
        }

        if convoy.is_empty() {
            convoy.set_head(me.clone());
            tolerate(switch_to_cacc(client, me, &self.cfg), "switch to CACC");
            log::info!("{} now leads the convoy", me);
            return Ok(Joined::Leader);
        }

        let nearest = self
            .candidates(client, convoy, me)
            .into_iter()
            .next()
            .map(|(id, _)| id)
            .ok_or_else(|| MembershipError::NoConvoyNearby {
                id: me.clone(),
                within: self.cfg.join_distance,
            })?;
        let front = self.pick_front(client, &convoy.chain(), me).unwrap_or(nearest);

        let rear = convoy.attach_behind(me, &front);
        tolerate(switch_to_cacc(client, me, &self.cfg), "switch to CACC");
        log::info!("{} joining behind {}", me, front);

        self.merges.register(me, &front, rear.as_ref());
        let merging = match self.merges.step(client, me, &self.cfg) {
            MergeProgress::Executed => {
                self.guards.start_cooldown(me, client.time(), &self.cfg);
                false
            }
            _ => true,
        };
        Ok(Joined::Behind {
            front,
            rear,
            merging,
        })
    }

    /// Removes `me` from the convoy, closing the gap behind it.
    ///
    /// The former rear neighbour is held back for a while so it does not
    /// surge into the space, and `me` returns to independent driving in an
    /// adjacent lane.
    pub fn leave<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &mut ConvoyState,
        me: &VehicleId,
    ) -> Result<Left, MembershipError> {
        if !convoy.contains(me) {
            return Err(MembershipError::NotMember(me.clone()));
        }

        let (front, rear) = convoy.detach(me);
        self.merges.cancel(client, me);
        self.merges.retarget(client, convoy, me);
        self.guards.release(me);

        if client.contains(me) {
            if let Some(rear) = rear.as_ref().filter(|rear| client.contains(rear)) {
                tolerate(
                    self.guards.start_leave_guard(client, rear, me, &self.cfg),
                    "leave guard",
                );
            }
            tolerate(switch_to_basic(client, me, &self.cfg), "switch to basic");
            tolerate(self.change_to_adjacent_lane(client, me), "leave lane change");
        }
        log::info!("{} left the convoy", me);
        Ok(Left { front, rear })
    }

    /// Drops every trace of a vehicle that has left the simulation.
    /// Returns true if it was a convoy member.
    pub fn forget<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &mut ConvoyState,
        id: &VehicleId,
    ) -> bool {
        let member = convoy.contains(id);
        if member {
            convoy.detach(id);
            log::info!("{} dropped from the convoy", id);
        }
        self.merges.cancel(client, id);
        self.merges.retarget(client, convoy, id);
        self.guards.forget(id);
        member
    }

    /// Advances pending merges, cooldowns and leave guards.
    pub fn tick<C: SimulationClient>(&mut self, client: &mut C, convoy: &ConvoyState) {
        let now = client.time();
        for me in self.merges.tick(client, &self.cfg) {
            self.guards.start_cooldown(&me, now, &self.cfg);
        }
        let merges = &self.merges;
        self.guards
            .tick(client, convoy, &self.cfg, |id| merges.changing_lanes(id));
    }

    /// The convoy member `me` should join behind, judged by road order.
    fn pick_front<C: SimulationClient>(
        &self,
        client: &C,
        chain: &[VehicleId],
        me: &VehicleId,
    ) -> Option<VehicleId> {
        if let Ok(Some(info)) = client.leader(me, self.cfg.front_lookahead) {
            if chain.contains(&info.id) {
                return Some(info.id);
            }
        }

        let road = client.road_id(me).ok()?;
        let pos = client.lane_position(me).ok()?;
        chain
            .iter()
            .filter(|id| *id != me)
            .filter(|id| client.road_id(id).map_or(false, |r| r == road))
            .filter_map(|id| {
                let ahead = client.lane_position(id).ok()? - pos;
                (ahead > 0.5).then(|| (id, ahead))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(id, _)| id.clone())
    }

    /// Moves a vehicle one lane over, preferring the higher lane index.
    fn change_to_adjacent_lane<C: SimulationClient>(
        &mut self,
        client: &mut C,
        id: &VehicleId,
    ) -> SimResult<()> {
        let lanes = client.lane_count(&client.road_id(id)?)?;
        let lane = client.lane_index(id)?;
        let target = if lane + 1 < lanes {
            lane + 1
        } else if lane > 0 {
            lane - 1
        } else {
            return Ok(());
        };
        self.merges.change_lane(client, id, target, self.cfg.leave_hold)
    }
}

/// Puts a vehicle under convoy control: the CACC type, full speed checks,
/// no voluntary lane changes, and standard reaction time and standstill gap.
pub fn switch_to_cacc<C: SimulationClient>(
    client: &mut C,
    id: &VehicleId,
    cfg: &MembershipConfig,
) -> SimResult<()> {
    client.set_type(id, &cfg.cacc_type)?;
    client.set_speed_mode(id, SpeedMode::Default)?;
    client.set_lane_change_mode(id, LaneChangeMode::Locked)?;
    client.set_speed_factor(id, 1.0)?;
    client.set_tau(id, cfg.cacc_tau)?;
    client.set_min_gap(id, cfg.cacc_min_gap)
}

/// Returns a vehicle to independent driving.
pub fn switch_to_basic<C: SimulationClient>(
    client: &mut C,
    id: &VehicleId,
    cfg: &MembershipConfig,
) -> SimResult<()> {
    client.set_type(id, &cfg.basic_type)?;
    client.set_speed(id, SpeedCommand::Release)?;
    client.set_speed_mode(id, SpeedMode::Default)?;
    client.set_lane_change_mode(id, LaneChangeMode::Default)
}
