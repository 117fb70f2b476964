use super::acceleration::{AccelerationModel, ModelParams};
use super::VehicleTypeAttributes;
use crate::client::{LaneChangeMode, SpeedMode};
use crate::{RoadKey, VehicleId};

/// A linear speed change requested through `slow_down`.
#[derive(Clone, Copy, Debug)]
struct Ramp {
    from: f64,
    to: f64,
    start: f64,
    duration: f64,
}

impl Ramp {
    fn speed_at(&self, time: f64) -> Option<f64> {
        let t = time - self.start;
        if t >= self.duration {
            None
        } else {
            let frac = f64::max(t, 0.0) / self.duration;
            Some(self.from + (self.to - self.from) * frac)
        }
    }
}

/// A vehicle in a [super::KinematicSim].
#[derive(Clone, Debug)]
pub struct SimVehicle {
    pub(crate) id: VehicleId,
    pub(crate) type_id: String,
    length: f64,
    emergency_decel: f64,
    /// The vehicle's own top speed in m/s.
    max_speed: f64,
    acc: AccelerationModel,
    pub(crate) road: RoadKey,
    pub(crate) lane: usize,
    /// The front bumper position along the current road, in m.
    pub(crate) pos: f64,
    vel: f64,
    odometer: f64,
    /// The externally commanded speed, if any.
    command: Option<f64>,
    ramp: Option<Ramp>,
    pub(crate) speed_mode: SpeedMode,
    pub(crate) lc_mode: LaneChangeMode,
    /// A requested lane change to be performed on the next step.
    pub(crate) pending_lane: Option<usize>,
    pub(crate) stopped: bool,
}

impl SimVehicle {
    pub(crate) fn new(
        id: VehicleId,
        type_id: &str,
        attributes: &VehicleTypeAttributes,
        road: RoadKey,
        lane: usize,
        pos: f64,
        vel: f64,
    ) -> Self {
        Self {
            id,
            type_id: type_id.to_owned(),
            length: attributes.length,
            emergency_decel: attributes.emergency_decel,
            max_speed: attributes.max_speed,
            acc: AccelerationModel::new(&ModelParams {
                time_headway: attributes.tau,
                min_gap: attributes.min_gap,
                max_acceleration: attributes.max_acc,
                comf_deceleration: attributes.comf_dec,
            }),
            road,
            lane,
            pos,
            vel,
            odometer: 0.0,
            command: None,
            ramp: None,
            speed_mode: SpeedMode::Default,
            lc_mode: LaneChangeMode::Default,
            pending_lane: None,
            stopped: false,
        }
    }

    /// Switches to a new vehicle type, keeping the driving state.
    pub(crate) fn set_type(&mut self, type_id: &str, attributes: &VehicleTypeAttributes) {
        let factor = self.acc.speed_factor();
        self.type_id = type_id.to_owned();
        self.length = attributes.length;
        self.emergency_decel = attributes.emergency_decel;
        self.max_speed = attributes.max_speed;
        self.acc = AccelerationModel::new(&ModelParams {
            time_headway: attributes.tau,
            min_gap: attributes.min_gap,
            max_acceleration: attributes.max_acc,
            comf_deceleration: attributes.comf_dec,
        });
        self.acc.set_speed_factor(factor);
    }

    /// The vehicle's length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn emergency_decel(&self) -> f64 {
        self.emergency_decel
    }

    /// The velocity in m/s.
    pub fn vel(&self) -> f64 {
        self.vel
    }

    /// The distance driven since insertion in m.
    pub fn odometer(&self) -> f64 {
        self.odometer
    }

    pub(crate) fn set_vel(&mut self, vel: f64) {
        self.vel = f64::max(vel, 0.0);
    }

    pub(crate) fn set_command(&mut self, command: Option<f64>) {
        self.command = command;
    }

    pub(crate) fn set_ramp(&mut self, to: f64, now: f64, duration: f64) {
        self.ramp = Some(Ramp {
            from: self.vel,
            to,
            start: now,
            duration: f64::max(duration, 1e-6),
        });
    }

    pub(crate) fn set_max_speed(&mut self, speed: f64) {
        self.max_speed = speed;
    }

    pub(crate) fn acc_mut(&mut self) -> &mut AccelerationModel {
        &mut self.acc
    }

    /// Works out the speed for the next step.
    ///
    /// # Arguments
    /// * `ahead` - The net gap to and speed of the vehicle ahead, if any.
    /// * `speed_limit` - The road speed limit (m/s).
    /// * `now` - The simulation time at the start of the step (s).
    /// * `dt` - The step length (s).
    pub(crate) fn next_vel(
        &mut self,
        ahead: Option<(f64, f64)>,
        speed_limit: f64,
        now: f64,
        dt: f64,
    ) -> f64 {
        if self.stopped {
            return 0.0;
        }

        let ramped = self.ramp.and_then(|ramp| ramp.speed_at(now + dt));
        if ramped.is_none() {
            if let Some(ramp) = self.ramp.take() {
                // A finished ramp leaves the vehicle at its target speed
                if self.command.is_none() {
                    self.command = Some(ramp.to);
                }
            }
        }

        let wanted = match ramped.or(self.command) {
            Some(wanted) => wanted,
            None => {
                let mut acc = self.acc.free_road(self.vel, speed_limit);
                if let Some((gap, their_vel)) = ahead {
                    acc = f64::min(acc, self.acc.follow_vehicle(gap, self.vel, their_vel));
                }
                self.vel + acc * dt
            }
        };

        if self.speed_mode == SpeedMode::Unchecked {
            return f64::max(wanted, 0.0);
        }

        let mut vel = wanted.clamp(
            self.vel - self.emergency_decel * dt,
            self.vel + self.acc.max_acc() * dt,
        );
        vel = f64::min(vel, self.max_speed);
        if self.speed_mode.respects_limits() {
            vel = f64::min(vel, self.acc.speed_factor() * speed_limit);
        }
        if let Some((gap, their_vel)) = ahead {
            let room = f64::max(gap - self.acc.min_gap(), 0.0);
            vel = f64::min(vel, their_vel + room / dt);
        }
        f64::max(vel, 0.0)
    }

    /// Moves the vehicle forward at velocity `vel` for `dt` seconds.
    pub(crate) fn integrate(&mut self, vel: f64, dt: f64) {
        self.vel = vel;
        self.pos += vel * dt;
        self.odometer += vel * dt;
    }
}
