//! Timed speed caps applied around joins and leaves.

use crate::client::{tolerate, LaneChangeMode, SimResult, SimulationClient, SpeedCommand};
use crate::config::MembershipConfig;
use crate::convoy::ConvoyState;
use crate::util::Deadline;
use crate::VehicleId;
use std::collections::BTreeMap;

/// Holds a rear vehicle back while the vehicle in front of it leaves.
#[derive(Clone, Debug, PartialEq)]
struct LeaveGuard {
    deadline: Deadline,
    departing: VehicleId,
}

/// The no-overtake cooldowns of fresh joiners and the leave guards of
/// vehicles whose front neighbour just left.
#[derive(Clone, Debug, Default)]
pub(crate) struct GuardTimers {
    cooldowns: BTreeMap<VehicleId, Deadline>,
    leave_guards: BTreeMap<VehicleId, LeaveGuard>,
}

impl GuardTimers {
    pub fn start_cooldown(&mut self, id: &VehicleId, now: f64, cfg: &MembershipConfig) {
        self.cooldowns
            .insert(id.clone(), Deadline::after(now, cfg.cooldown));
    }

    /// Starts guarding `rear` and gives it an immediate speed cut.
    pub fn start_leave_guard<C: SimulationClient>(
        &mut self,
        client: &mut C,
        rear: &VehicleId,
        departing: &VehicleId,
        cfg: &MembershipConfig,
    ) -> SimResult<()> {
        let now = client.time();
        self.leave_guards.insert(
            rear.clone(),
            LeaveGuard {
                deadline: Deadline::after(now, cfg.leave_guard),
                departing: departing.clone(),
            },
        );
        let speed = client.speed(rear)?;
        let cap = f64::max(cfg.leave_floor, speed - cfg.leave_margin);
        client.set_speed(rear, SpeedCommand::Set(cap))?;
        client.set_lane_change_mode(rear, LaneChangeMode::Locked)
    }

    pub fn in_cooldown(&self, id: &VehicleId) -> bool {
        self.cooldowns.contains_key(id)
    }

    pub fn guarded(&self, id: &VehicleId) -> bool {
        self.leave_guards.contains_key(id)
    }

    /// Drops the vehicle's own cooldown and leave guard. Guards it placed
    /// on others stay in force.
    pub fn release(&mut self, id: &VehicleId) {
        self.cooldowns.remove(id);
        self.leave_guards.remove(id);
    }

    /// Drops every timer that refers to the vehicle.
    pub fn forget(&mut self, id: &VehicleId) {
        self.cooldowns.remove(id);
        self.leave_guards
            .retain(|rear, guard| rear != id && guard.departing != *id);
    }

    /// Applies the speed caps and retires lapsed timers.
    ///
    /// # Arguments
    /// * `changing_lanes` - Whether a vehicle is in the middle of a merge lane
    ///   change, during which its lane-change mode is left alone.
    pub fn tick<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &ConvoyState,
        cfg: &MembershipConfig,
        changing_lanes: impl Fn(&VehicleId) -> bool,
    ) {
        let now = client.time();

        let cooldowns = std::mem::take(&mut self.cooldowns);
        for (id, deadline) in cooldowns {
            if !client.contains(&id) {
                continue;
            }
            if deadline.expired(now) {
                restore_lane_mode(client, &id, cfg);
                continue;
            }
            if let Some(front) = convoy.designated_leader(&id) {
                if !changing_lanes(&id) {
                    tolerate(
                        client.set_lane_change_mode(&id, LaneChangeMode::Locked),
                        "cooldown",
                    );
                }
                tolerate(cap_cooldown(client, &id, front, cfg), "cooldown");
            }
            self.cooldowns.insert(id, deadline);
        }

        let guards = std::mem::take(&mut self.leave_guards);
        for (rear, guard) in guards {
            if !client.contains(&rear) || !client.contains(&guard.departing) {
                continue;
            }
            if guard.deadline.expired(now) {
                log::debug!("{} leave guard lapsed", rear);
                restore_lane_mode(client, &rear, cfg);
                continue;
            }
            if !changing_lanes(&rear) {
                tolerate(
                    client.set_lane_change_mode(&rear, LaneChangeMode::Locked),
                    "leave guard",
                );
            }
            let front = convoy.designated_leader(&rear);
            tolerate(cap_leave_guard(client, &rear, &guard.departing, front, cfg), "leave guard");
            self.leave_guards.insert(rear, guard);
        }
    }
}

/// Keeps a joiner below its new leader's speed.
fn cap_cooldown<C: SimulationClient>(
    client: &mut C,
    id: &VehicleId,
    front: &VehicleId,
    cfg: &MembershipConfig,
) -> SimResult<()> {
    let front_speed = client.speed(front)?;
    let cap = f64::max(cfg.cooldown_floor, front_speed - cfg.cooldown_margin);
    if client.speed(id)? > cap {
        client.set_speed(id, SpeedCommand::Set(cap))?;
    }
    Ok(())
}

/// Keeps a rear vehicle below both the departing vehicle and its new front.
fn cap_leave_guard<C: SimulationClient>(
    client: &mut C,
    rear: &VehicleId,
    departing: &VehicleId,
    front: Option<&VehicleId>,
    cfg: &MembershipConfig,
) -> SimResult<()> {
    let departing_speed = client.speed(departing)?;
    let front_speed = front
        .and_then(|front| client.speed(front).ok())
        .unwrap_or(departing_speed);
    let cap = f64::max(
        cfg.leave_floor,
        f64::min(departing_speed, front_speed) - cfg.leave_margin,
    );
    if client.speed(rear)? > cap {
        client.set_speed(rear, SpeedCommand::Set(cap))?;
    }
    Ok(())
}

/// Puts a convoy member back into its locked lane-change mode.
pub(crate) fn restore_lane_mode<C: SimulationClient>(
    client: &mut C,
    id: &VehicleId,
    cfg: &MembershipConfig,
) {
    let is_cacc = client.type_id(id).map_or(false, |t| t == cfg.cacc_type);
    if is_cacc {
        tolerate(
            client.set_lane_change_mode(id, LaneChangeMode::Locked),
            "lane mode restore",
        );
    }
}
