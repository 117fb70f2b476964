//! Truck platooning control on top of an external traffic microsimulator.
//!
//! The crate holds the gap-holding control loop, the convoy chain and its
//! membership operations, the cut-in state machine and a release gate for
//! vehicles leaving a holding area. The simulator itself sits behind the
//! [SimulationClient] trait; [KinematicSim] is a small straight-road
//! implementation used for tests and demos.

use cgmath::Point2;
use slotmap::new_key_type;
use std::fmt;

pub use brake::LeaderBrake;
pub use chain::{neighbors, order_chain, splice_behind, unlink, FollowRelation};
pub use client::{
    LaneChangeMode, LeaderInfo, SimError, SimResult, SimulationClient, SpeedCommand, SpeedMode,
    VehicleSpawn,
};
pub use config::{
    BrakeConfig, CutInConfig, GapConfig, MembershipConfig, PlatoonConfig, ReleaseConfig,
};
pub use control::{
    stopping_distance, time_to_collision, GapCommand, GapController, GapInput, Regime,
};
pub use convoy::{ControlState, ConvoyState, SpeedRegime};
pub use cut_in::{CutInError, CutInSession, CutInState};
pub use driver::{PlatoonDriver, TickReport};
pub use kinematic::{KinematicSim, RoadAttributes, SimVehicle, VehicleTypeAttributes};
pub use membership::{
    switch_to_basic, switch_to_cacc, Candidates, Joined, Left, MembershipError, MembershipManager,
};
pub use release::ReleaseGate;
pub use util::{Deadline, Throttle};

mod brake;
mod chain;
mod client;
mod config;
mod control;
mod convoy;
mod cut_in;
#[cfg(feature = "debug")]
mod debug;
mod driver;
mod kinematic;
mod membership;
mod release;
mod util;

/// A 2D point in simulator world coordinates.
pub type Point2d = Point2<f64>;

/// Opaque identifier of a vehicle known to the simulator.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleId(String);

impl VehicleId {
    /// Creates a vehicle ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VehicleId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for VehicleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VehicleId({})", &self.0)
    }
}

new_key_type! {
    /// Internal key of a vehicle stored in a [KinematicSim].
    pub struct VehicleKey;
    /// Internal key of a road stored in a [KinematicSim].
    pub struct RoadKey;
}
