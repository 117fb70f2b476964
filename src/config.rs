//! Named tuning constants, supplied once at startup.

/// The complete platoon configuration.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlatoonConfig {
    pub gap: GapConfig,
    pub membership: MembershipConfig,
    pub cut_in: CutInConfig,
    pub release: ReleaseConfig,
    pub brake: BrakeConfig,
}

/// Parameters of the gap-holding controller.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GapConfig {
    /// The target gap between a follower and the vehicle ahead in m.
    pub desired_gap: f64,
    /// The target gap while a cut-in is being accommodated in m.
    pub cut_in_gap: f64,
    /// Proportional gain on the gap error.
    pub kp: f64,
    /// Derivative gain on the relative speed.
    pub kd: f64,
    /// Gain used to size the catch-up speed bonus.
    pub catch_gain: f64,
    /// Gap error above which the catch-up regime engages, in m.
    pub catch_up_error: f64,
    /// The largest catch-up speed bonus in m/s.
    pub catch_up_bonus: f64,
    /// The speed ceiling while catching up in m/s.
    pub catch_up_ceiling: f64,
    /// Gap error below which normal speed limits are restored, in m.
    pub converged_error: f64,
    /// Gap error below which the follower must be slower than the target, in m.
    pub too_close_error: f64,
    /// How much slower than the target a too-close follower drives, in m/s.
    pub too_close_margin: f64,
    /// The normal maximum follower speed in m/s.
    pub max_speed: f64,
    /// Speed margin above the target when no gap can be measured, in m/s.
    pub blind_margin: f64,
    /// Speed decrement when neither gap nor target speed is known, in m/s.
    pub blind_decrement: f64,
    /// Gap sensor range in m.
    pub lookahead: f64,
    /// Duration of the initial lock after a follower departs, in s.
    pub lock_duration: f64,
    /// Half-width of the dead band around the target gap during the lock, in m.
    pub lock_band: f64,
    /// Speed correction applied outside the lock dead band, in m/s.
    pub lock_correction: f64,
    /// Whether the stopping-distance and time-to-collision override is active.
    pub emergency_override: bool,
    /// Safety buffer subtracted from the available stopping room, in m.
    pub emergency_buffer: f64,
    /// Time-to-collision below which the follower brakes hard, in s.
    pub min_ttc: f64,
    /// Emergency deceleration assumed when the simulator cannot report one.
    pub default_emergency_decel: f64,
    /// Hard brake target below the follower's own speed, in m/s.
    pub brake_below_follower: f64,
    /// Hard brake target below the obstacle's speed, in m/s.
    pub brake_below_leader: f64,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            desired_gap: 15.0,
            cut_in_gap: 38.0,
            kp: 0.8,
            kd: 0.4,
            catch_gain: 1.2,
            catch_up_error: 10.0,
            catch_up_bonus: 6.0,
            catch_up_ceiling: 40.0,
            converged_error: 2.0,
            too_close_error: -1.5,
            too_close_margin: 0.5,
            max_speed: 33.0,
            blind_margin: 1.5,
            blind_decrement: 1.0,
            lookahead: 250.0,
            lock_duration: 0.7,
            lock_band: 1.0,
            lock_correction: 2.0,
            emergency_override: true,
            emergency_buffer: 5.0,
            min_ttc: 1.3,
            default_emergency_decel: 6.0,
            brake_below_follower: 3.0,
            brake_below_leader: 2.0,
        }
    }
}

/// Parameters of the join and leave operations.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MembershipConfig {
    /// The furthest straight-line distance to a convoy member that allows a join, in m.
    pub join_distance: f64,
    /// Range of the "directly ahead" check when picking a front vehicle, in m.
    pub front_lookahead: f64,
    /// Vehicle type for convoy members.
    pub cacc_type: String,
    /// Vehicle type for independent driving.
    pub basic_type: String,
    /// Reaction time applied to convoy members, in s.
    pub cacc_tau: f64,
    /// Standstill gap applied to convoy members, in m.
    pub cacc_min_gap: f64,
    /// No-overtake cooldown after a join, in s.
    pub cooldown: f64,
    /// How much slower than its leader a cooling-down joiner is kept, in m/s.
    pub cooldown_margin: f64,
    /// The lowest speed cap during the cooldown, in m/s.
    pub cooldown_floor: f64,
    /// How long the rear neighbour is held back after a leave, in s.
    pub leave_guard: f64,
    /// How much slower than the departing vehicle the rear is kept, in m/s.
    pub leave_margin: f64,
    /// The lowest speed cap during the leave guard, in m/s.
    pub leave_floor: f64,
    /// Rear members closer than this to a merging vehicle are made to yield, in m.
    pub merge_safe_gap: f64,
    /// Lane change hold for a merge, in s.
    pub merge_hold: f64,
    /// Lane change hold when leaving the convoy, in s.
    pub leave_hold: f64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            join_distance: 300.0,
            front_lookahead: 2000.0,
            cacc_type: "truckCACC".to_owned(),
            basic_type: "truckBASIC".to_owned(),
            cacc_tau: 0.6,
            cacc_min_gap: 3.0,
            cooldown: 5.0,
            cooldown_margin: 1.5,
            cooldown_floor: 4.0,
            leave_guard: 4.0,
            leave_margin: 2.0,
            leave_floor: 3.0,
            merge_safe_gap: 25.0,
            merge_hold: 5.0,
            leave_hold: 3.0,
        }
    }
}

/// Parameters of the cut-in demonstration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CutInConfig {
    /// Vehicle type of the interloper.
    pub vehicle_type: String,
    /// How far behind the leader's rear the interloper appears, in m.
    pub spawn_gap: f64,
    /// Speed factor of the interloper while it approaches.
    pub approach_speed_factor: f64,
    /// Lane change hold for the cut-in and cut-out maneuvers, in s.
    pub hold: f64,
    /// Range within which the follower must see the interloper, in m.
    pub recognition_lookahead: f64,
    /// The interloper is slowed toward this much below the leader, in m/s.
    pub yield_margin: f64,
    /// The interloper is never slowed below this speed, in m/s.
    pub yield_floor: f64,
    /// How long the interloper takes to slow down for the convoy, in s.
    pub yield_ramp: f64,
    /// The slowest merge speed commanded on the cut-in trigger, in m/s.
    pub merge_floor: f64,
    /// How long the interloper takes to reach its merge speed, in s.
    pub merge_ramp: f64,
    /// Speed increase when the interloper leaves, in m/s.
    pub exit_boost: f64,
    /// How long the interloper takes to speed up when it leaves, in s.
    pub exit_ramp: f64,
    /// Minimum simulated time between repeated progress logs, in s.
    pub log_period: f64,
}

impl Default for CutInConfig {
    fn default() -> Self {
        Self {
            vehicle_type: "carCUT".to_owned(),
            spawn_gap: 30.0,
            approach_speed_factor: 1.15,
            hold: 2.0,
            recognition_lookahead: 150.0,
            yield_margin: 3.0,
            yield_floor: 8.0,
            yield_ramp: 1.5,
            merge_floor: 9.0,
            merge_ramp: 1.2,
            exit_boost: 5.0,
            exit_ramp: 1.0,
            log_period: 2.0,
        }
    }
}

/// Parameters of the release gate.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReleaseConfig {
    /// The road the gate is on.
    pub gate_road: String,
    /// The position along `gate_road` that counts as through the gate, in m.
    pub gate_end_pos: f64,
    /// How far a vehicle must travel past the gate before the next is released, in m.
    pub min_spacing: f64,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            gate_road: "E0".to_owned(),
            gate_end_pos: 20.0,
            min_spacing: 25.0,
        }
    }
}

/// Parameters of the leader brake.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BrakeConfig {
    /// Speed factor decrease per second while pressed.
    pub ramp_down: f64,
    /// Speed factor recovery per second after release.
    pub ramp_up: f64,
    /// The lowest speed factor.
    pub min_factor: f64,
}

impl Default for BrakeConfig {
    fn default() -> Self {
        Self {
            ramp_down: 1.5,
            ramp_up: 0.8,
            min_factor: 0.0,
        }
    }
}

#[cfg(feature = "serde")]
impl PlatoonConfig {
    /// Parses a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(all(test, feature = "serde"))]
mod test {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = PlatoonConfig::from_json(r#"{ "gap": { "desired_gap": 12.0 } }"#).unwrap();
        assert_eq!(cfg.gap.desired_gap, 12.0);
        assert_eq!(cfg.gap.cut_in_gap, 38.0);
        assert_eq!(cfg.membership, MembershipConfig::default());
    }
}
