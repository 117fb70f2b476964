use super::lock::lock_speed;
use super::safety::hard_brake;
use crate::client::{SimResult, SimulationClient, SpeedCommand, SpeedMode};
use crate::config::GapConfig;
use crate::convoy::{ConvoyState, SpeedRegime};
use crate::VehicleId;

/// The rule that produced a speed command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Regime {
    /// Hard brake from the stopping-distance or time-to-collision check.
    EmergencyBrake,
    /// The initial lock after departure.
    Lock,
    /// No gap could be measured.
    Blind,
    /// A large gap is being closed with relaxed limits.
    CatchUp,
    /// Ordinary PD tracking.
    Tracking,
    /// The gap is at or near the target; normal limits apply.
    Converged,
    /// The follower is closer than the target and held below the target's speed.
    TooClose,
}

/// Everything the control law needs for one follower on one tick.
#[derive(Clone, Debug)]
pub struct GapInput {
    /// The gap to the obstacle ahead (m).
    pub gap: Option<f64>,
    /// Whether `gap` came from the gap sensor rather than the along-route
    /// estimate.
    pub sensed: bool,
    /// The follower's speed (m/s).
    pub follower_speed: f64,
    /// The speed of the obstacle ahead (m/s).
    pub target_speed: Option<f64>,
    /// The gap to hold (m).
    pub target_gap: f64,
    /// Whether the initial lock applies this tick.
    pub locked: bool,
    /// The follower's emergency deceleration (m/s<sup>2</sup>).
    pub follower_decel: f64,
    /// The obstacle's emergency deceleration (m/s<sup>2</sup>).
    pub target_decel: f64,
    /// The control period (s).
    pub dt: f64,
}

/// A speed command and the rule that produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GapCommand {
    /// The commanded follower speed (m/s).
    pub speed: f64,
    pub regime: Regime,
}

/// Keeps a follower at the target gap behind whatever is ahead of it.
#[derive(Clone, Debug, Default)]
pub struct GapController {
    pub(super) cfg: GapConfig,
}

impl GapController {
    /// Creates a new controller.
    pub fn new(cfg: GapConfig) -> Self {
        Self { cfg }
    }

    /// The controller's parameters.
    pub fn config(&self) -> &GapConfig {
        &self.cfg
    }

    /// Evaluates the tiered control law.
    ///
    /// In order of precedence: the collision override, the initial lock,
    /// the blind rule when nothing is measured, then PD tracking with the
    /// catch-up bonus, convergence clamp and too-close cap.
    pub fn command(&self, input: &GapInput) -> GapCommand {
        let cfg = &self.cfg;
        let vf = input.follower_speed;

        if cfg.emergency_override {
            if let (Some(gap), Some(vt)) = (input.gap, input.target_speed) {
                let brake = hard_brake(cfg, gap, vf, vt, input.follower_decel, input.target_decel);
                if let Some(speed) = brake {
                    return GapCommand {
                        speed,
                        regime: Regime::EmergencyBrake,
                    };
                }
            }
        }

        if input.locked {
            let vl = input.target_speed.unwrap_or(vf);
            let sensed_gap = input.gap.filter(|_| input.sensed);
            return GapCommand {
                speed: lock_speed(cfg, vl, sensed_gap, input.target_gap),
                regime: Regime::Lock,
            };
        }

        let gap = match input.gap {
            Some(gap) => gap,
            None => {
                let speed = match input.target_speed {
                    Some(vt) if vt > 0.0 => f64::min(vt + cfg.blind_margin, cfg.max_speed),
                    _ => f64::max(vf - cfg.blind_decrement, 0.0),
                };
                return GapCommand {
                    speed,
                    regime: Regime::Blind,
                };
            }
        };

        let vt = input.target_speed.unwrap_or(vf);
        let err = gap - input.target_gap;
        let acc = cfg.kp * err + cfg.kd * (vt - vf);
        let speed = vf + acc * input.dt;

        let (mut speed, mut regime) = if err > cfg.catch_up_error {
            let bonus = f64::min(cfg.catch_up_bonus, err * cfg.catch_gain * 0.25);
            let speed = f64::max(speed, vt + bonus);
            (speed.clamp(0.0, cfg.catch_up_ceiling), Regime::CatchUp)
        } else if err < cfg.converged_error {
            (speed.clamp(0.0, cfg.max_speed), Regime::Converged)
        } else {
            (speed.clamp(0.0, cfg.max_speed), Regime::Tracking)
        };

        if err < cfg.too_close_error {
            speed = f64::max(f64::min(speed, vt - cfg.too_close_margin), 0.0);
            regime = Regime::TooClose;
        }

        GapCommand { speed, regime }
    }

    /// Measures, evaluates and commands one follower.
    ///
    /// The obstacle actually ahead takes priority over the designated
    /// leader, so an interloper is followed as soon as it is seen.
    pub fn control_follower<C: SimulationClient>(
        &self,
        client: &mut C,
        convoy: &mut ConvoyState,
        follower: &VehicleId,
    ) -> SimResult<Option<GapCommand>> {
        let leader = match convoy.designated_leader(follower) {
            Some(leader) => leader.clone(),
            None => return Ok(None),
        };
        let cfg = &self.cfg;
        let now = client.time();

        let (target, gap, sensed) = match client.leader(follower, cfg.lookahead)? {
            Some(info) => (info.id, Some(info.gap), true),
            None => {
                let estimate = self.estimate_gap(client, follower, &leader);
                (leader.clone(), estimate, false)
            }
        };

        let follower_speed = client.speed(follower)?;
        let target_speed = client.speed(&target).ok();
        let target_gap = if convoy.gap_expanded(&leader, follower) {
            cfg.cut_in_gap
        } else {
            cfg.desired_gap
        };
        let locked = target == leader
            && convoy
                .control(follower)
                .map_or(false, |control| control.lock_active(now));

        let input = GapInput {
            gap,
            sensed,
            follower_speed,
            target_speed,
            target_gap,
            locked,
            follower_decel: client
                .emergency_decel(follower)
                .unwrap_or(cfg.default_emergency_decel),
            target_decel: client
                .emergency_decel(&target)
                .unwrap_or(cfg.default_emergency_decel),
            dt: client.step_length(),
        };
        let command = self.command(&input);

        self.update_regime(client, convoy, follower, command.regime)?;
        client.set_speed(follower, SpeedCommand::Set(command.speed))?;

        #[cfg(feature = "debug")]
        crate::debug::debug_gap(follower, &target, gap, target_gap, &command);

        Ok(Some(command))
    }

    /// Estimates the gap to the designated leader along the route when the
    /// sensor sees nothing.
    fn estimate_gap<C: SimulationClient>(
        &self,
        client: &C,
        follower: &VehicleId,
        leader: &VehicleId,
    ) -> Option<f64> {
        if !client.contains(leader) {
            return None;
        }
        let road = client.road_id(leader).ok()?;
        let pos = client.lane_position(leader).ok()?;
        let length = client.length(leader).ok()?;
        client
            .driving_distance(follower, &road, pos)
            .ok()
            .flatten()
            .filter(|dist| *dist > 0.0)
            .map(|dist| f64::max(dist - length, 0.0))
    }

    /// Relaxes or restores the follower's speed limits on regime changes.
    fn update_regime<C: SimulationClient>(
        &self,
        client: &mut C,
        convoy: &mut ConvoyState,
        follower: &VehicleId,
        regime: Regime,
    ) -> SimResult<()> {
        let control = match convoy.control_mut(follower) {
            Some(control) => control,
            None => return Ok(()),
        };
        match (control.regime, regime) {
            (SpeedRegime::Normal, Regime::CatchUp) => {
                client.set_speed_mode(follower, SpeedMode::IgnoreLimits)?;
                client.set_max_speed(follower, self.cfg.catch_up_ceiling)?;
                control.regime = SpeedRegime::CatchUp;
                log::debug!("{} catching up", follower);
            }
            (SpeedRegime::CatchUp, Regime::Converged | Regime::TooClose) => {
                client.set_speed_mode(follower, SpeedMode::Default)?;
                control.regime = SpeedRegime::Normal;
                log::debug!("{} converged", follower);
            }
            _ => {}
        }
        Ok(())
    }
}
