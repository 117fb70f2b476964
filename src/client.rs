//! The boundary to the external simulator.

use crate::{Point2d, VehicleId};
use std::fmt;

/// The result of a call into the simulator.
pub type SimResult<T> = Result<T, SimError>;

/// A failure reported by the simulator.
#[derive(Clone, Debug, PartialEq)]
pub enum SimError {
    /// The vehicle is no longer part of the simulation.
    VehicleNotFound(VehicleId),
    /// The simulator refused the command, e.g. because the vehicle is mid-maneuver.
    Rejected { id: VehicleId, reason: String },
    /// A road ID that the network does not contain.
    UnknownRoad(String),
    /// No more vehicles or scheduled events remain.
    SimulationEnded,
}

impl SimError {
    /// Whether the error is a routine per-vehicle failure that should be
    /// skipped for the current tick rather than stopping the loop.
    pub fn is_transient(&self) -> bool {
        !matches!(self, SimError::SimulationEnded)
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::VehicleNotFound(id) => write!(f, "vehicle {} not found", id),
            SimError::Rejected { id, reason } => {
                write!(f, "command for vehicle {} rejected: {}", id, reason)
            }
            SimError::UnknownRoad(road) => write!(f, "unknown road {}", road),
            SimError::SimulationEnded => f.write_str("simulation ended"),
        }
    }
}

impl std::error::Error for SimError {}

/// Logs and swallows a transient error. Per-vehicle operations go through
/// this at the tick boundary so a departed vehicle never stops the loop.
pub(crate) fn tolerate(result: SimResult<()>, context: &str) {
    if let Err(err) = result {
        log::debug!("{}: {}", context, err);
    }
}

/// An externally commanded speed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpeedCommand {
    /// Hold the given speed in m/s.
    Set(f64),
    /// Hand speed control back to the simulator's own driver model.
    Release,
}

/// Which safety checks the simulator applies to a vehicle's speed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedMode {
    /// All checks: safe gap, acceleration bounds and speed limits.
    Default,
    /// Default checks, except that road speed limits are ignored.
    IgnoreLimits,
    /// No checks at all; the vehicle does exactly what it is told.
    Unchecked,
}

impl SpeedMode {
    /// The bitset the SUMO control interface uses for this mode.
    pub fn bits(self) -> u32 {
        match self {
            SpeedMode::Default => 31,
            SpeedMode::IgnoreLimits => 29,
            SpeedMode::Unchecked => 0,
        }
    }

    /// Whether the mode keeps a safe gap to the vehicle ahead.
    pub fn keeps_safe_gap(self) -> bool {
        self != SpeedMode::Unchecked
    }

    /// Whether the mode caps speed at the road's speed limit.
    pub fn respects_limits(self) -> bool {
        self == SpeedMode::Default
    }
}

/// Which lane changes the simulator permits for a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneChangeMode {
    /// No lane changes at all, including requested ones.
    Locked,
    /// The simulator's usual strategic and requested lane changes.
    Default,
}

impl LaneChangeMode {
    /// The bitset the SUMO control interface uses for this mode.
    pub fn bits(self) -> u32 {
        match self {
            LaneChangeMode::Locked => 0,
            LaneChangeMode::Default => 1621,
        }
    }
}

/// The obstacle detected ahead of a vehicle.
#[derive(Clone, Debug, PartialEq)]
pub struct LeaderInfo {
    /// The vehicle ahead.
    pub id: VehicleId,
    /// Distance from our front bumper to its rear bumper in m.
    pub gap: f64,
}

/// Where and how to insert a new vehicle.
#[derive(Clone, Debug)]
pub struct VehicleSpawn {
    pub id: VehicleId,
    /// The vehicle type name.
    pub type_id: String,
    /// The road to insert on.
    pub road: String,
    /// The lane index on that road.
    pub lane: usize,
    /// The front bumper position along the road in m.
    pub pos: f64,
    /// The initial speed in m/s.
    pub speed: f64,
}

/// The capabilities the platoon core needs from a traffic simulator.
///
/// Every per-vehicle call fails with [SimError::VehicleNotFound] once the
/// vehicle has left the simulation. Callers treat that as routine.
pub trait SimulationClient {
    /// Advances the simulation by one step. Fails with
    /// [SimError::SimulationEnded] once nothing remains to simulate.
    fn advance(&mut self) -> SimResult<()>;

    /// The current simulation time in s.
    fn time(&self) -> f64;

    /// The length of one simulation step in s.
    fn step_length(&self) -> f64;

    /// The IDs of all vehicles currently in the simulation.
    fn vehicle_ids(&self) -> Vec<VehicleId>;

    /// Whether the vehicle is currently in the simulation.
    fn contains(&self, id: &VehicleId) -> bool {
        self.vehicle_ids().iter().any(|v| v == id)
    }

    fn speed(&self, id: &VehicleId) -> SimResult<f64>;
    fn set_speed(&mut self, id: &VehicleId, command: SpeedCommand) -> SimResult<()>;

    /// Reduces (or raises) the speed linearly to `speed` over `duration` seconds.
    fn slow_down(&mut self, id: &VehicleId, speed: f64, duration: f64) -> SimResult<()>;
    fn set_max_speed(&mut self, id: &VehicleId, speed: f64) -> SimResult<()>;
    fn set_speed_factor(&mut self, id: &VehicleId, factor: f64) -> SimResult<()>;
    fn set_speed_mode(&mut self, id: &VehicleId, mode: SpeedMode) -> SimResult<()>;

    fn position(&self, id: &VehicleId) -> SimResult<Point2d>;
    fn lane_id(&self, id: &VehicleId) -> SimResult<String>;
    fn lane_index(&self, id: &VehicleId) -> SimResult<usize>;
    fn road_id(&self, id: &VehicleId) -> SimResult<String>;

    /// The front bumper position along the current road in m.
    fn lane_position(&self, id: &VehicleId) -> SimResult<f64>;

    /// The number of lanes on a road.
    fn lane_count(&self, road: &str) -> SimResult<usize>;

    /// The total distance the vehicle has driven since insertion in m.
    fn distance(&self, id: &VehicleId) -> SimResult<f64>;

    /// The along-route distance from the vehicle to a position on a road,
    /// or `None` if that position is not ahead on its route.
    fn driving_distance(&self, id: &VehicleId, road: &str, pos: f64) -> SimResult<Option<f64>>;

    fn length(&self, id: &VehicleId) -> SimResult<f64>;

    /// The emergency deceleration rating of the vehicle's type in m/s<sup>2</sup>.
    fn emergency_decel(&self, id: &VehicleId) -> SimResult<f64>;

    /// The nearest vehicle ahead in the same lane within `lookahead` m.
    fn leader(&self, id: &VehicleId, lookahead: f64) -> SimResult<Option<LeaderInfo>>;

    /// Requests a change to `lane`, held for `duration` seconds.
    fn change_lane(&mut self, id: &VehicleId, lane: usize, duration: f64) -> SimResult<()>;
    fn set_lane_change_mode(&mut self, id: &VehicleId, mode: LaneChangeMode) -> SimResult<()>;

    fn type_id(&self, id: &VehicleId) -> SimResult<String>;
    fn set_type(&mut self, id: &VehicleId, type_id: &str) -> SimResult<()>;

    /// Sets the driver reaction time in s.
    fn set_tau(&mut self, id: &VehicleId, tau: f64) -> SimResult<()>;

    /// Sets the standstill gap in m.
    fn set_min_gap(&mut self, id: &VehicleId, gap: f64) -> SimResult<()>;

    /// Whether the vehicle is halted at a stop or parking area.
    fn is_stopped(&self, id: &VehicleId) -> SimResult<bool>;

    /// Ends the vehicle's current stop.
    fn resume(&mut self, id: &VehicleId) -> SimResult<()>;

    fn add_vehicle(&mut self, spawn: &VehicleSpawn) -> SimResult<()>;
    fn remove_vehicle(&mut self, id: &VehicleId) -> SimResult<()>;
}
