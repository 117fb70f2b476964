//! A small straight-road kinematic simulator implementing [SimulationClient].
//!
//! Roads are laid end to end along the x axis in the order they are added,
//! and a vehicle that drives off the end of the last road leaves the
//! simulation. Vehicles not under external speed control follow the
//! intelligent driver model. Lane changes are instantaneous and happen on
//! the step after they are requested.

use crate::client::{
    LaneChangeMode, LeaderInfo, SimError, SimResult, SimulationClient, SpeedCommand, SpeedMode,
    VehicleSpawn,
};
use crate::{Point2d, RoadKey, VehicleId, VehicleKey};
use rand::Rng;
use rand_distr::Distribution;
use slotmap::SlotMap;
use std::collections::{BTreeMap, HashMap};
pub use vehicle::SimVehicle;

mod acceleration;
mod vehicle;

/// The lateral distance between adjacent lane centres in m.
const LANE_WIDTH: f64 = 3.2;

/// The attributes of a road.
#[derive(Clone, Debug)]
pub struct RoadAttributes {
    /// The road's name, used as its road ID.
    pub name: String,
    /// The length of the road in m.
    pub length: f64,
    /// The number of lanes.
    pub lanes: usize,
    /// The speed limit in m/s.
    pub speed_limit: f64,
}

#[derive(Clone, Debug)]
struct Road {
    name: String,
    /// The x coordinate of the start of the road.
    offset: f64,
    length: f64,
    lanes: usize,
    speed_limit: f64,
}

/// The attributes of a vehicle type.
#[derive(Clone, Copy, Debug)]
pub struct VehicleTypeAttributes {
    /// The vehicle length in m.
    pub length: f64,
    /// The vehicle's own top speed in m/s.
    pub max_speed: f64,
    /// The maximum acceleration of the vehicle, in m/s^2.
    pub max_acc: f64,
    /// The comfortable deceleration of the vehicle, a positive number in m/s^2.
    pub comf_dec: f64,
    /// The emergency deceleration of the vehicle, a positive number in m/s^2.
    pub emergency_decel: f64,
    /// Driver reaction time in s.
    pub tau: f64,
    /// Standstill gap in m.
    pub min_gap: f64,
}

impl VehicleTypeAttributes {
    /// A heavy goods vehicle.
    pub fn truck() -> Self {
        Self {
            length: 12.0,
            max_speed: 40.0,
            max_acc: 2.0,
            comf_dec: 2.5,
            emergency_decel: 6.0,
            tau: 1.0,
            min_gap: 2.5,
        }
    }

    /// A passenger car.
    pub fn car() -> Self {
        Self {
            length: 5.0,
            max_speed: 50.0,
            max_acc: 2.6,
            comf_dec: 4.5,
            emergency_decel: 9.0,
            tau: 1.0,
            min_gap: 2.5,
        }
    }
}

/// A kinematic simulation of vehicles on a straight multi-lane road.
pub struct KinematicSim {
    roads: SlotMap<RoadKey, Road>,
    /// Roads in driving order.
    road_order: Vec<RoadKey>,
    road_names: HashMap<String, RoadKey>,
    vehicle_types: HashMap<String, VehicleTypeAttributes>,
    vehicles: SlotMap<VehicleKey, SimVehicle>,
    vehicle_ids: BTreeMap<VehicleId, VehicleKey>,
    time: f64,
    step_length: f64,
    /// The simulation ends at this time, if set.
    end_time: Option<f64>,
}

impl KinematicSim {
    /// Creates an empty simulation that advances `step_length` seconds per step.
    pub fn new(step_length: f64) -> Self {
        Self {
            roads: SlotMap::with_key(),
            road_order: vec![],
            road_names: HashMap::new(),
            vehicle_types: HashMap::new(),
            vehicles: SlotMap::with_key(),
            vehicle_ids: BTreeMap::new(),
            time: 0.0,
            step_length,
            end_time: None,
        }
    }

    /// Adds a road after the last one.
    pub fn add_road(&mut self, attributes: &RoadAttributes) -> RoadKey {
        let offset = self
            .road_order
            .last()
            .map_or(0.0, |key| self.roads[*key].offset + self.roads[*key].length);
        let key = self.roads.insert(Road {
            name: attributes.name.clone(),
            offset,
            length: attributes.length,
            lanes: attributes.lanes.max(1),
            speed_limit: attributes.speed_limit,
        });
        self.road_order.push(key);
        self.road_names.insert(attributes.name.clone(), key);
        key
    }

    /// Registers a vehicle type.
    pub fn add_vehicle_type(&mut self, name: &str, attributes: VehicleTypeAttributes) {
        self.vehicle_types.insert(name.to_owned(), attributes);
    }

    /// Ends the simulation once `time` is reached.
    pub fn set_end_time(&mut self, time: f64) {
        self.end_time = Some(time);
    }

    /// Gets a vehicle.
    pub fn get_vehicle(&self, id: &VehicleId) -> SimResult<&SimVehicle> {
        self.vehicle_ids
            .get(id)
            .and_then(|key| self.vehicles.get(*key))
            .ok_or_else(|| SimError::VehicleNotFound(id.clone()))
    }

    fn vehicle_mut(&mut self, id: &VehicleId) -> SimResult<&mut SimVehicle> {
        match self.vehicle_ids.get(id) {
            Some(key) => self
                .vehicles
                .get_mut(*key)
                .ok_or_else(|| SimError::VehicleNotFound(id.clone())),
            None => Err(SimError::VehicleNotFound(id.clone())),
        }
    }

    fn road_key(&self, name: &str) -> SimResult<RoadKey> {
        self.road_names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownRoad(name.to_owned()))
    }

    /// The x coordinate of a vehicle's front bumper.
    fn front_x(&self, vehicle: &SimVehicle) -> f64 {
        self.roads[vehicle.road].offset + vehicle.pos
    }

    /// Halts a vehicle where it stands until it is resumed.
    pub fn park(&mut self, id: &VehicleId) -> SimResult<()> {
        let vehicle = self.vehicle_mut(id)?;
        vehicle.stopped = true;
        vehicle.set_vel(0.0);
        Ok(())
    }

    /// Moves a vehicle to the given spot, keeping its speed.
    pub fn place(&mut self, id: &VehicleId, road: &str, lane: usize, pos: f64) -> SimResult<()> {
        let key = self.road_key(road)?;
        let lanes = self.roads[key].lanes;
        let vehicle = self.vehicle_mut(id)?;
        vehicle.road = key;
        vehicle.lane = lane.min(lanes - 1);
        vehicle.pos = pos;
        vehicle.pending_lane = None;
        Ok(())
    }

    /// Overrides a vehicle's current speed.
    pub fn set_vehicle_speed(&mut self, id: &VehicleId, speed: f64) -> SimResult<()> {
        self.vehicle_mut(id)?.set_vel(speed);
        Ok(())
    }

    /// Randomly assigns a desired speed factor to each vehicle, which is
    /// sampled from a normal distribution with a mean of 1 (no adjustment)
    /// and standard deviation of `stddev`.
    pub fn randomise_speed_factors<R: Rng>(
        &mut self,
        stddev: f64,
        rng: &mut R,
    ) -> Result<(), rand_distr::NormalError> {
        let distr = rand_distr::Normal::new(1.0, stddev)?;
        for (_, vehicle) in &mut self.vehicles {
            let factor = distr.sample(rng).clamp(0.75, 1.25);
            vehicle.acc_mut().set_speed_factor(factor);
        }
        Ok(())
    }

    /// The vehicle ahead in the same lane, as `(key, net gap)`.
    fn find_leader(&self, key: VehicleKey, lookahead: f64) -> Option<(VehicleKey, f64)> {
        let me = &self.vehicles[key];
        let my_x = self.front_x(me);
        self.vehicles
            .iter()
            .filter(|(other, veh)| *other != key && veh.lane == me.lane)
            .filter_map(|(other, veh)| {
                let x = self.front_x(veh);
                (x > my_x).then(|| (other, x - veh.length() - my_x))
            })
            .filter(|(_, gap)| *gap <= lookahead)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Performs requested lane changes.
    fn apply_lane_changes(&mut self) {
        for (_, vehicle) in &mut self.vehicles {
            if let Some(lane) = vehicle.pending_lane.take() {
                vehicle.lane = lane;
            }
        }
    }

    /// Integrates the velocities and positions of all vehicles.
    fn integrate(&mut self) {
        let dt = self.step_length;
        let keys: Vec<VehicleKey> = self.vehicles.keys().collect();
        let mut vels = Vec::with_capacity(keys.len());
        for key in keys {
            let ahead = self
                .find_leader(key, 500.0)
                .map(|(other, gap)| (gap, self.vehicles[other].vel()));
            let speed_limit = self.roads[self.vehicles[key].road].speed_limit;
            let vel = self.vehicles[key].next_vel(ahead, speed_limit, self.time, dt);
            vels.push((key, vel));
        }
        for (key, vel) in vels {
            self.vehicles[key].integrate(vel, dt);
        }
    }

    /// Moves vehicles that have run off the end of their road onto the next
    /// one, or out of the simulation.
    fn advance_vehicles(&mut self) {
        let mut exited = vec![];
        for (key, vehicle) in &mut self.vehicles {
            loop {
                let road = &self.roads[vehicle.road];
                if vehicle.pos <= road.length {
                    break;
                }
                let idx = self.road_order.iter().position(|r| *r == vehicle.road);
                match idx.and_then(|idx| self.road_order.get(idx + 1)) {
                    Some(next) => {
                        vehicle.pos -= road.length;
                        vehicle.road = *next;
                        vehicle.lane = vehicle.lane.min(self.roads[*next].lanes - 1);
                    }
                    None => {
                        exited.push(key);
                        break;
                    }
                }
            }
        }
        for key in exited {
            if let Some(vehicle) = self.vehicles.remove(key) {
                log::debug!("{} arrived", vehicle.id);
                self.vehicle_ids.remove(&vehicle.id);
            }
        }
    }
}

impl SimulationClient for KinematicSim {
    fn advance(&mut self) -> SimResult<()> {
        let ended = self.end_time.map_or(false, |end| self.time >= end);
        if self.vehicles.is_empty() || ended {
            return Err(SimError::SimulationEnded);
        }
        self.apply_lane_changes();
        self.integrate();
        self.advance_vehicles();
        self.time += self.step_length;
        Ok(())
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn step_length(&self) -> f64 {
        self.step_length
    }

    fn vehicle_ids(&self) -> Vec<VehicleId> {
        self.vehicle_ids.keys().cloned().collect()
    }

    fn contains(&self, id: &VehicleId) -> bool {
        self.vehicle_ids.contains_key(id)
    }

    fn speed(&self, id: &VehicleId) -> SimResult<f64> {
        Ok(self.get_vehicle(id)?.vel())
    }

    fn set_speed(&mut self, id: &VehicleId, command: SpeedCommand) -> SimResult<()> {
        let command = match command {
            SpeedCommand::Set(speed) => Some(f64::max(speed, 0.0)),
            SpeedCommand::Release => None,
        };
        self.vehicle_mut(id)?.set_command(command);
        Ok(())
    }

    fn slow_down(&mut self, id: &VehicleId, speed: f64, duration: f64) -> SimResult<()> {
        let now = self.time;
        self.vehicle_mut(id)?
            .set_ramp(f64::max(speed, 0.0), now, duration);
        Ok(())
    }

    fn set_max_speed(&mut self, id: &VehicleId, speed: f64) -> SimResult<()> {
        self.vehicle_mut(id)?.set_max_speed(speed);
        Ok(())
    }

    fn set_speed_factor(&mut self, id: &VehicleId, factor: f64) -> SimResult<()> {
        self.vehicle_mut(id)?.acc_mut().set_speed_factor(factor);
        Ok(())
    }

    fn set_speed_mode(&mut self, id: &VehicleId, mode: SpeedMode) -> SimResult<()> {
        self.vehicle_mut(id)?.speed_mode = mode;
        Ok(())
    }

    fn position(&self, id: &VehicleId) -> SimResult<Point2d> {
        let vehicle = self.get_vehicle(id)?;
        Ok(Point2d::new(
            self.front_x(vehicle),
            -(vehicle.lane as f64) * LANE_WIDTH,
        ))
    }

    fn lane_id(&self, id: &VehicleId) -> SimResult<String> {
        let vehicle = self.get_vehicle(id)?;
        Ok(format!("{}_{}", self.roads[vehicle.road].name, vehicle.lane))
    }

    fn lane_index(&self, id: &VehicleId) -> SimResult<usize> {
        Ok(self.get_vehicle(id)?.lane)
    }

    fn road_id(&self, id: &VehicleId) -> SimResult<String> {
        let vehicle = self.get_vehicle(id)?;
        Ok(self.roads[vehicle.road].name.clone())
    }

    fn lane_position(&self, id: &VehicleId) -> SimResult<f64> {
        Ok(self.get_vehicle(id)?.pos)
    }

    fn lane_count(&self, road: &str) -> SimResult<usize> {
        Ok(self.roads[self.road_key(road)?].lanes)
    }

    fn distance(&self, id: &VehicleId) -> SimResult<f64> {
        Ok(self.get_vehicle(id)?.odometer())
    }

    fn driving_distance(&self, id: &VehicleId, road: &str, pos: f64) -> SimResult<Option<f64>> {
        let vehicle = self.get_vehicle(id)?;
        let target = self.roads[self.road_key(road)?].offset + pos;
        let dist = target - self.front_x(vehicle);
        Ok((dist >= 0.0).then(|| dist))
    }

    fn length(&self, id: &VehicleId) -> SimResult<f64> {
        Ok(self.get_vehicle(id)?.length())
    }

    fn emergency_decel(&self, id: &VehicleId) -> SimResult<f64> {
        Ok(self.get_vehicle(id)?.emergency_decel())
    }

    fn leader(&self, id: &VehicleId, lookahead: f64) -> SimResult<Option<LeaderInfo>> {
        let key = *self
            .vehicle_ids
            .get(id)
            .ok_or_else(|| SimError::VehicleNotFound(id.clone()))?;
        Ok(self.find_leader(key, lookahead).map(|(other, gap)| LeaderInfo {
            id: self.vehicles[other].id.clone(),
            gap,
        }))
    }

    fn change_lane(&mut self, id: &VehicleId, lane: usize, _duration: f64) -> SimResult<()> {
        let road = self.get_vehicle(id)?.road;
        let lanes = self.roads[road].lanes;
        let vehicle = self.vehicle_mut(id)?;
        if vehicle.lc_mode == LaneChangeMode::Locked {
            return Err(SimError::Rejected {
                id: id.clone(),
                reason: "lane changes are locked".to_owned(),
            });
        }
        if lane >= lanes {
            return Err(SimError::Rejected {
                id: id.clone(),
                reason: format!("no lane {}", lane),
            });
        }
        vehicle.pending_lane = Some(lane);
        Ok(())
    }

    fn set_lane_change_mode(&mut self, id: &VehicleId, mode: LaneChangeMode) -> SimResult<()> {
        self.vehicle_mut(id)?.lc_mode = mode;
        Ok(())
    }

    fn type_id(&self, id: &VehicleId) -> SimResult<String> {
        Ok(self.get_vehicle(id)?.type_id.clone())
    }

    fn set_type(&mut self, id: &VehicleId, type_id: &str) -> SimResult<()> {
        let attributes = *self
            .vehicle_types
            .get(type_id)
            .ok_or_else(|| SimError::Rejected {
                id: id.clone(),
                reason: format!("unknown vehicle type {}", type_id),
            })?;
        self.vehicle_mut(id)?.set_type(type_id, &attributes);
        Ok(())
    }

    fn set_tau(&mut self, id: &VehicleId, tau: f64) -> SimResult<()> {
        self.vehicle_mut(id)?.acc_mut().set_headway(tau);
        Ok(())
    }

    fn set_min_gap(&mut self, id: &VehicleId, gap: f64) -> SimResult<()> {
        self.vehicle_mut(id)?.acc_mut().set_min_gap(gap);
        Ok(())
    }

    fn is_stopped(&self, id: &VehicleId) -> SimResult<bool> {
        Ok(self.get_vehicle(id)?.stopped)
    }

    fn resume(&mut self, id: &VehicleId) -> SimResult<()> {
        self.vehicle_mut(id)?.stopped = false;
        Ok(())
    }

    fn add_vehicle(&mut self, spawn: &VehicleSpawn) -> SimResult<()> {
        if self.vehicle_ids.contains_key(&spawn.id) {
            return Err(SimError::Rejected {
                id: spawn.id.clone(),
                reason: "duplicate vehicle ID".to_owned(),
            });
        }
        let road = self.road_key(&spawn.road)?;
        let attributes = *self
            .vehicle_types
            .get(&spawn.type_id)
            .ok_or_else(|| SimError::Rejected {
                id: spawn.id.clone(),
                reason: format!("unknown vehicle type {}", spawn.type_id),
            })?;
        let lane = spawn.lane.min(self.roads[road].lanes - 1);
        let vehicle = SimVehicle::new(
            spawn.id.clone(),
            &spawn.type_id,
            &attributes,
            road,
            lane,
            spawn.pos,
            spawn.speed,
        );
        let key = self.vehicles.insert(vehicle);
        self.vehicle_ids.insert(spawn.id.clone(), key);
        Ok(())
    }

    fn remove_vehicle(&mut self, id: &VehicleId) -> SimResult<()> {
        let key = self
            .vehicle_ids
            .remove(id)
            .ok_or_else(|| SimError::VehicleNotFound(id.clone()))?;
        self.vehicles.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sim() -> KinematicSim {
        let mut sim = KinematicSim::new(0.1);
        sim.add_road(&RoadAttributes {
            name: "E0".to_owned(),
            length: 100.0,
            lanes: 2,
            speed_limit: 30.0,
        });
        sim.add_road(&RoadAttributes {
            name: "E1".to_owned(),
            length: 1000.0,
            lanes: 2,
            speed_limit: 30.0,
        });
        sim.add_vehicle_type("truck", VehicleTypeAttributes::truck());
        sim
    }

    fn spawn(
        sim: &mut KinematicSim,
        id: &str,
        road: &str,
        lane: usize,
        pos: f64,
        speed: f64,
    ) -> VehicleId {
        let id = VehicleId::from(id);
        sim.add_vehicle(&VehicleSpawn {
            id: id.clone(),
            type_id: "truck".to_owned(),
            road: road.to_owned(),
            lane,
            pos,
            speed,
        })
        .unwrap();
        id
    }

    #[test]
    fn leader_and_gap() {
        let mut sim = sim();
        let a = spawn(&mut sim, "A", "E1", 0, 50.0, 20.0);
        let b = spawn(&mut sim, "B", "E0", 0, 80.0, 20.0);
        let c = spawn(&mut sim, "C", "E1", 1, 60.0, 20.0);

        let info = sim.leader(&b, 250.0).unwrap().unwrap();
        assert_eq!(info.id, a);
        assert_approx_eq!(info.gap, 150.0 - 12.0 - 80.0);
        assert_eq!(sim.leader(&b, 50.0).unwrap(), None);
        assert_eq!(sim.leader(&c, 250.0).unwrap(), None);
        assert_approx_eq!(sim.driving_distance(&b, "E1", 50.0).unwrap().unwrap(), 70.0);
        assert_eq!(sim.driving_distance(&a, "E0", 10.0).unwrap(), None);
    }

    #[test]
    fn crosses_roads_and_arrives() {
        let mut sim = sim();
        let a = spawn(&mut sim, "A", "E0", 0, 99.0, 20.0);
        sim.set_speed(&a, SpeedCommand::Set(20.0)).unwrap();
        sim.advance().unwrap();
        assert_eq!(sim.road_id(&a).unwrap(), "E1");
        assert_approx_eq!(sim.lane_position(&a).unwrap(), 1.0);
        assert_approx_eq!(sim.distance(&a).unwrap(), 2.0);

        sim.place(&a, "E1", 0, 999.0).unwrap();
        sim.advance().unwrap();
        assert!(!sim.contains(&a));
        assert_eq!(sim.speed(&a), Err(SimError::VehicleNotFound(a.clone())));
        assert_eq!(sim.advance(), Err(SimError::SimulationEnded));
    }

    #[test]
    fn lane_changes_obey_mode() {
        let mut sim = sim();
        let a = spawn(&mut sim, "A", "E1", 0, 10.0, 0.0);
        sim.set_lane_change_mode(&a, LaneChangeMode::Locked).unwrap();
        assert!(matches!(sim.change_lane(&a, 1, 2.0), Err(SimError::Rejected { .. })));
        sim.set_lane_change_mode(&a, LaneChangeMode::Default).unwrap();
        assert!(sim.change_lane(&a, 2, 2.0).is_err());
        sim.change_lane(&a, 1, 2.0).unwrap();
        assert_eq!(sim.lane_index(&a).unwrap(), 0);
        sim.advance().unwrap();
        assert_eq!(sim.lane_index(&a).unwrap(), 1);
        assert_approx_eq!(sim.position(&a).unwrap().y, -3.2);
    }

    #[test]
    fn parked_vehicles_wait() {
        let mut sim = sim();
        let a = spawn(&mut sim, "A", "E0", 0, 10.0, 0.0);
        sim.park(&a).unwrap();
        for _ in 0..10 {
            sim.advance().unwrap();
        }
        assert!(sim.is_stopped(&a).unwrap());
        assert_approx_eq!(sim.lane_position(&a).unwrap(), 10.0);
        sim.resume(&a).unwrap();
        sim.advance().unwrap();
        assert!(sim.speed(&a).unwrap() > 0.0);
    }

    #[test]
    fn seeded_speed_factors() {
        let mut sim = sim();
        spawn(&mut sim, "A", "E0", 0, 10.0, 0.0);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(sim.randomise_speed_factors(0.1, &mut rng).is_ok());
        assert!(sim.randomise_speed_factors(-1.0, &mut rng).is_err());
    }
}
