use crate::client::{SimResult, SimulationClient, SpeedCommand};
use crate::config::BrakeConfig;
use crate::VehicleId;

/// A press-and-hold brake for the convoy leader.
///
/// While pressed, the leader's speed factor ramps down toward the
/// configured minimum; once released it recovers toward 1.
#[derive(Clone, Debug)]
pub struct LeaderBrake {
    cfg: BrakeConfig,
    factor: f64,
    pressed: bool,
}

impl LeaderBrake {
    /// Creates a released brake.
    pub fn new(cfg: BrakeConfig) -> Self {
        Self {
            cfg,
            factor: 1.0,
            pressed: false,
        }
    }

    pub fn press(&mut self) {
        self.pressed = true;
    }

    pub fn release(&mut self) {
        self.pressed = false;
    }

    pub fn pressed(&self) -> bool {
        self.pressed
    }

    /// The speed factor applied to the leader.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Moves the factor one step along its ramp and applies it to `leader`.
    ///
    /// Any speed command the leader holds is cleared, so the factor acts on
    /// the simulator's own driver model.
    ///
    /// # Arguments
    /// * `dt` - The time step (s).
    pub fn update<C: SimulationClient>(
        &mut self,
        client: &mut C,
        leader: &VehicleId,
        dt: f64,
    ) -> SimResult<()> {
        if !client.contains(leader) {
            return Ok(());
        }
        self.factor = if self.pressed {
            f64::max(self.cfg.min_factor, self.factor - self.cfg.ramp_down * dt)
        } else {
            f64::min(1.0, self.factor + self.cfg.ramp_up * dt)
        };
        client.set_speed(leader, SpeedCommand::Release)?;
        client.set_speed_factor(leader, self.factor)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::VehicleSpawn;
    use crate::kinematic::{KinematicSim, RoadAttributes, VehicleTypeAttributes};
    use assert_approx_eq::assert_approx_eq;

    fn sim_with_leader() -> (KinematicSim, VehicleId) {
        let mut sim = KinematicSim::new(0.1);
        sim.add_road(&RoadAttributes {
            name: "E0".to_owned(),
            length: 5000.0,
            lanes: 1,
            speed_limit: 20.0,
        });
        sim.add_vehicle_type("truck", VehicleTypeAttributes::truck());
        let id = VehicleId::from("Leader");
        sim.add_vehicle(&VehicleSpawn {
            id: id.clone(),
            type_id: "truck".to_owned(),
            road: "E0".to_owned(),
            lane: 0,
            pos: 50.0,
            speed: 20.0,
        })
        .unwrap();
        (sim, id)
    }

    #[test]
    fn ramps_down_and_recovers() {
        let (mut sim, id) = sim_with_leader();
        let mut brake = LeaderBrake::new(BrakeConfig::default());

        brake.press();
        for _ in 0..4 {
            brake.update(&mut sim, &id, 0.1).unwrap();
        }
        assert_approx_eq!(brake.factor(), 0.4);

        for _ in 0..10 {
            brake.update(&mut sim, &id, 0.1).unwrap();
        }
        assert_approx_eq!(brake.factor(), 0.0);

        brake.release();
        brake.update(&mut sim, &id, 0.5).unwrap();
        assert_approx_eq!(brake.factor(), 0.4);
        for _ in 0..10 {
            brake.update(&mut sim, &id, 0.5).unwrap();
        }
        assert_approx_eq!(brake.factor(), 1.0);
    }

    #[test]
    fn braking_slows_the_leader() {
        let (mut sim, id) = sim_with_leader();
        let mut brake = LeaderBrake::new(BrakeConfig::default());
        brake.press();
        for _ in 0..30 {
            brake.update(&mut sim, &id, 0.1).unwrap();
            sim.advance().unwrap();
        }
        assert!(sim.speed(&id).unwrap() < 20.0);
    }

    #[test]
    fn absent_leader_is_ignored() {
        let mut sim = KinematicSim::new(0.1);
        let mut brake = LeaderBrake::new(BrakeConfig::default());
        brake.press();
        brake.update(&mut sim, &VehicleId::from("Leader"), 0.1).unwrap();
        assert_approx_eq!(brake.factor(), 1.0);
    }
}
