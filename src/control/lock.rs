//! The initial lock that holds a freshly departed follower at its leader's speed.

use super::GapController;
use crate::client::{SimResult, SimulationClient, SpeedCommand};
use crate::config::GapConfig;
use crate::convoy::ConvoyState;
use crate::VehicleId;

/// Computes the follower speed while the lock is in force.
///
/// The follower tracks its leader's speed, nudged by a fixed correction when
/// the gap leaves a dead band around the target. If the follower cannot see
/// its leader it drops below the leader's speed.
///
/// # Arguments
/// * `leader_speed` - The designated leader's speed (m/s).
/// * `gap` - The sensed gap to the designated leader, if it is the vehicle ahead (m).
/// * `target_gap` - The target gap (m).
pub(crate) fn lock_speed(
    cfg: &GapConfig,
    leader_speed: f64,
    gap: Option<f64>,
    target_gap: f64,
) -> f64 {
    let speed = match gap {
        Some(gap) if gap > target_gap + cfg.lock_band => leader_speed + cfg.lock_correction,
        Some(gap) if gap < target_gap - cfg.lock_band => leader_speed - cfg.lock_correction,
        Some(_) => leader_speed,
        None => leader_speed - cfg.lock_correction,
    };
    speed.clamp(0.0, cfg.max_speed)
}

impl GapController {
    /// Engages the initial lock for a follower that has just departed:
    /// its speed snaps to the leader's and its top speed is raised so it
    /// can keep up.
    pub fn engage_lock<C: SimulationClient>(
        &self,
        client: &mut C,
        convoy: &mut ConvoyState,
        follower: &VehicleId,
    ) -> SimResult<()> {
        let now = client.time();
        let leader = match convoy.designated_leader(follower) {
            Some(leader) => leader.clone(),
            None => return Ok(()),
        };
        convoy.engage_lock(follower, now, self.cfg.lock_duration);
        log::debug!("{} locked to {} for {:.1}s", follower, leader, self.cfg.lock_duration);

        if client.contains(follower) && client.contains(&leader) {
            let leader_speed = client.speed(&leader)?;
            client.set_speed(follower, SpeedCommand::Set(leader_speed))?;
            client.set_max_speed(follower, f64::max(self.cfg.max_speed, leader_speed + 5.0))?;
        }
        Ok(())
    }

    /// Clears locks whose duration has passed.
    pub fn expire_locks(&self, convoy: &mut ConvoyState, chain: &[VehicleId], now: f64) {
        for follower in chain.iter().skip(1) {
            let expired = convoy
                .control(follower)
                .and_then(|control| control.lock)
                .map_or(false, |lock| lock.expired(now));
            if expired {
                log::debug!("{} lock released", follower);
                convoy.clear_lock(follower);
            }
        }
    }
}
