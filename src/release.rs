//! Sequencing vehicles out of a holding area one at a time.

use crate::client::{tolerate, SimResult, SimulationClient};
use crate::config::ReleaseConfig;
use crate::VehicleId;
use std::collections::BTreeMap;

/// Releases queued vehicles in order, each only once its predecessor has
/// passed the gate and driven a minimum distance beyond it.
#[derive(Clone, Debug)]
pub struct ReleaseGate {
    cfg: ReleaseConfig,
    /// The vehicles to release, in order.
    queue: Vec<VehicleId>,
    /// The index into `queue` of the next vehicle to release.
    next: usize,
    /// The odometer reading of each released vehicle when it cleared the gate.
    crossed_at: BTreeMap<VehicleId, f64>,
}

impl ReleaseGate {
    /// Creates a new release gate.
    pub fn new(cfg: ReleaseConfig, queue: Vec<VehicleId>) -> Self {
        Self {
            cfg,
            queue,
            next: 0,
            crossed_at: BTreeMap::new(),
        }
    }

    pub fn queue(&self) -> &[VehicleId] {
        &self.queue
    }

    /// The number of vehicles released so far.
    pub fn released(&self) -> usize {
        self.next
    }

    /// Whether every queued vehicle has been released.
    pub fn is_finished(&self) -> bool {
        self.next >= self.queue.len()
    }

    /// Decides whether the next vehicle may go.
    ///
    /// The first vehicle may always go. After that the previous vehicle must
    /// be past the end of the gate, and must have driven at least the
    /// minimum spacing since it was first seen past it. A predecessor that
    /// has left the simulation no longer holds anyone up.
    pub fn ready_to_release_next<C: SimulationClient>(&mut self, client: &C) -> bool {
        if self.is_finished() {
            return false;
        }
        let prev = match self.next.checked_sub(1) {
            Some(idx) => self.queue[idx].clone(),
            None => return true,
        };
        if !client.contains(&prev) {
            return true;
        }
        match self.spacing_reached(client, &prev) {
            Ok(ready) => ready,
            Err(err) => {
                log::debug!("release gate: {}", err);
                false
            }
        }
    }

    fn spacing_reached<C: SimulationClient>(
        &mut self,
        client: &C,
        prev: &VehicleId,
    ) -> SimResult<bool> {
        let road = client.road_id(prev)?;
        let pos = client.lane_position(prev)?;
        if road == self.cfg.gate_road && pos < self.cfg.gate_end_pos {
            return Ok(false);
        }
        let odometer = client.distance(prev)?;
        let crossed = *self.crossed_at.entry(prev.clone()).or_insert(odometer);
        Ok(odometer - crossed >= self.cfg.min_spacing)
    }

    /// Releases the next vehicle if it may go. Returns the released vehicle.
    pub fn tick<C: SimulationClient>(&mut self, client: &mut C) -> Option<VehicleId> {
        if !self.ready_to_release_next(client) {
            return None;
        }
        let id = self.queue[self.next].clone();
        self.next += 1;
        if !client.contains(&id) {
            return None;
        }
        if client.is_stopped(&id).unwrap_or(false) {
            tolerate(client.resume(&id), "release");
        }
        log::info!("{} released", id);
        Some(id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::VehicleSpawn;
    use crate::kinematic::{KinematicSim, RoadAttributes, VehicleTypeAttributes};

    #[test]
    fn first_goes_at_once_and_finished_gate_stays_shut() {
        let mut sim = KinematicSim::new(0.1);
        sim.add_road(&RoadAttributes {
            name: "E0".to_owned(),
            length: 100.0,
            lanes: 1,
            speed_limit: 10.0,
        });
        sim.add_vehicle_type("truck", VehicleTypeAttributes::truck());
        let id = VehicleId::from("A");
        sim.add_vehicle(&VehicleSpawn {
            id: id.clone(),
            type_id: "truck".to_owned(),
            road: "E0".to_owned(),
            lane: 0,
            pos: 5.0,
            speed: 0.0,
        })
        .unwrap();
        sim.park(&id).unwrap();

        let mut gate = ReleaseGate::new(Default::default(), vec![id.clone()]);
        assert!(gate.ready_to_release_next(&sim));
        assert_eq!(gate.tick(&mut sim), Some(id.clone()));
        assert!(!sim.is_stopped(&id).unwrap());
        assert!(gate.is_finished());
        assert!(!gate.ready_to_release_next(&sim));
        assert_eq!(gate.tick(&mut sim), None);
    }

    #[test]
    fn vanished_predecessor_clears_gate() {
        let mut sim = KinematicSim::new(0.1);
        sim.add_road(&RoadAttributes {
            name: "E0".to_owned(),
            length: 100.0,
            lanes: 1,
            speed_limit: 10.0,
        });
        let mut gate = ReleaseGate::new(
            Default::default(),
            vec![VehicleId::from("A"), VehicleId::from("B")],
        );
        assert_eq!(gate.tick(&mut sim), None);
        assert_eq!(gate.released(), 1);
        assert!(gate.ready_to_release_next(&sim));
    }
}
