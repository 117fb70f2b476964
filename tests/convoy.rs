//! Convoy scenarios run through the driver.

use assert_approx_eq::assert_approx_eq;
use platoon::{
    ConvoyState, FollowRelation, Joined, KinematicSim, MembershipError, PlatoonConfig,
    PlatoonDriver, Regime, RoadAttributes, SimulationClient, VehicleId, VehicleSpawn,
    VehicleTypeAttributes,
};

fn id(name: &str) -> VehicleId {
    VehicleId::from(name)
}

fn sim() -> KinematicSim {
    let mut sim = KinematicSim::new(0.1);
    sim.add_road(&RoadAttributes {
        name: "E1".to_owned(),
        length: 8000.0,
        lanes: 2,
        speed_limit: 30.0,
    });
    sim.add_vehicle_type("truckCACC", VehicleTypeAttributes::truck());
    sim.add_vehicle_type("truckBASIC", VehicleTypeAttributes::truck());
    sim.add_vehicle_type(
        "slowTruck",
        VehicleTypeAttributes {
            max_speed: 20.0,
            ..VehicleTypeAttributes::truck()
        },
    );
    sim.add_vehicle_type(
        "crawler",
        VehicleTypeAttributes {
            max_speed: 10.0,
            ..VehicleTypeAttributes::truck()
        },
    );
    sim
}

fn spawn(sim: &mut KinematicSim, name: &str, type_id: &str, lane: usize, pos: f64) -> VehicleId {
    let id = id(name);
    sim.add_vehicle(&VehicleSpawn {
        id: id.clone(),
        type_id: type_id.to_owned(),
        road: "E1".to_owned(),
        lane,
        pos,
        speed: 20.0,
    })
    .unwrap();
    id
}

fn gap(sim: &KinematicSim, follower: &VehicleId, leader: &VehicleId) -> f64 {
    sim.lane_position(leader).unwrap()
        - sim.length(leader).unwrap()
        - sim.lane_position(follower).unwrap()
}

/// A follower far behind a steady leader closes up to the target gap and stays there.
#[test]
fn follower_converges_to_target_gap() {
    let mut sim = sim();
    let leader = spawn(&mut sim, "Leader", "slowTruck", 0, 500.0);
    let follower = spawn(&mut sim, "Veh1", "truckCACC", 0, 420.0);
    let convoy = ConvoyState::from_relations(vec![FollowRelation::new("Veh1", "Leader")]);
    let mut driver = PlatoonDriver::new(sim, PlatoonConfig::default()).with_convoy(convoy);

    for tick in 0..1200 {
        let report = driver.step().unwrap();
        assert_eq!(report.chain, vec![leader.clone(), follower.clone()]);
        let gap = gap(driver.client(), &follower, &leader);
        assert!(gap > 0.0, "collision at tick {}", tick);
        if tick >= 400 {
            assert!((gap - 15.0).abs() < 1.0, "gap {} at tick {}", gap, tick);
        }
    }
    assert_approx_eq!(driver.client().speed(&follower).unwrap(), 20.0, 0.2);
}

/// Joining behind the tail then leaving again gives back the original chain.
#[test]
fn join_then_leave_round_trip() {
    let mut sim = sim();
    let leader = spawn(&mut sim, "Leader", "truckBASIC", 0, 500.0);
    let veh1 = spawn(&mut sim, "Veh1", "truckBASIC", 0, 475.0);
    let joiner = spawn(&mut sim, "Joiner", "truckBASIC", 0, 440.0);
    let mut driver = PlatoonDriver::new(sim, PlatoonConfig::default());

    assert_eq!(driver.join(&leader), Ok(Joined::Leader));
    driver.join(&veh1).unwrap();
    driver.step().unwrap();
    let original = driver.convoy().chain();
    assert_eq!(original, vec![leader.clone(), veh1.clone()]);

    assert_eq!(
        driver.join(&joiner),
        Ok(Joined::Behind {
            front: veh1.clone(),
            rear: None,
            merging: false,
        })
    );
    assert_eq!(driver.client().type_id(&joiner).unwrap(), "truckCACC");
    for _ in 0..10 {
        driver.step().unwrap();
    }
    assert_eq!(driver.convoy().chain(), vec![leader.clone(), veh1.clone(), joiner.clone()]);

    let left = driver.leave(&joiner).unwrap();
    assert_eq!(left.front, Some(veh1.clone()));
    assert_eq!(left.rear, None);
    assert_eq!(driver.convoy().chain(), original);
    assert_eq!(driver.client().type_id(&joiner).unwrap(), "truckBASIC");
    driver.step().unwrap();
    assert_eq!(driver.convoy().chain(), original);
}

#[test]
fn refusals_carry_a_reason() {
    let mut sim = sim();
    let leader = spawn(&mut sim, "Leader", "truckBASIC", 0, 500.0);
    let far = spawn(&mut sim, "Far", "truckBASIC", 1, 3000.0);
    let mut driver = PlatoonDriver::new(sim, PlatoonConfig::default());

    driver.join(&leader).unwrap();
    assert_eq!(driver.join(&leader), Err(MembershipError::AlreadyMember(leader.clone())));
    assert!(matches!(
        driver.join(&far),
        Err(MembershipError::NoConvoyNearby { .. })
    ));
    assert_eq!(driver.leave(&far), Err(MembershipError::NotMember(far.clone())));
    assert_eq!(
        driver.join(&id("Ghost")),
        Err(MembershipError::VehicleGone(id("Ghost")))
    );
    assert_eq!(driver.convoy().chain(), vec![leader]);
}

/// A joiner that disappears while waiting to merge leaves nothing behind.
#[test]
fn joiner_vanishes_mid_merge() {
    let mut sim = sim();
    let leader = spawn(&mut sim, "Leader", "truckBASIC", 0, 500.0);
    let veh1 = spawn(&mut sim, "Veh1", "truckBASIC", 0, 480.0);
    let joiner = spawn(&mut sim, "Joiner", "truckBASIC", 1, 490.0);
    let mut driver = PlatoonDriver::new(sim, PlatoonConfig::default());

    driver.join(&leader).unwrap();
    driver.join(&veh1).unwrap();
    let joined = driver.join(&joiner).unwrap();
    assert_eq!(
        joined,
        Joined::Behind {
            front: leader.clone(),
            rear: Some(veh1.clone()),
            merging: true,
        }
    );
    assert!(driver.membership().merging(&joiner));
    assert!(driver.membership().yielding(&veh1));

    driver.client_mut().remove_vehicle(&joiner).unwrap();
    let report = driver.step().unwrap();
    assert_eq!(report.dropped, vec![joiner.clone()]);
    assert_eq!(report.chain, vec![leader.clone(), veh1.clone()]);
    assert!(driver.convoy().relations().iter().all(|r| !r.touches(&joiner)));
    assert!(!driver.membership().merging(&joiner));
    assert!(!driver.membership().yielding(&veh1));

    // Nothing left to trip over on later ticks
    for _ in 0..20 {
        driver.step().unwrap();
    }
    assert_eq!(driver.convoy().chain(), vec![leader, veh1]);
}

/// The rear neighbour a joiner was waiting on disappears, and the joiner
/// merges without it.
#[test]
fn merge_completes_after_rear_vanishes() {
    let mut sim = sim();
    let leader = spawn(&mut sim, "Leader", "truckBASIC", 0, 500.0);
    let veh1 = spawn(&mut sim, "Veh1", "truckBASIC", 0, 480.0);
    let joiner = spawn(&mut sim, "Joiner", "truckBASIC", 1, 490.0);
    let mut driver = PlatoonDriver::new(sim, PlatoonConfig::default());

    driver.join(&leader).unwrap();
    driver.join(&veh1).unwrap();
    driver.join(&joiner).unwrap();
    assert!(driver.membership().merging(&joiner));
    assert!(driver.membership().yielding(&veh1));

    driver.client_mut().remove_vehicle(&veh1).unwrap();
    let report = driver.step().unwrap();
    assert_eq!(report.dropped, vec![veh1]);
    assert_eq!(report.chain, vec![leader.clone(), joiner.clone()]);
    assert!(!driver.membership().merging(&joiner));
    assert!(driver.membership().in_cooldown(&joiner));

    driver.step().unwrap();
    assert_eq!(driver.client().lane_index(&joiner).unwrap(), 0);
    assert_eq!(driver.convoy().chain(), vec![leader, joiner]);
}

/// The rear neighbour a joiner was waiting on leaves, and the joiner
/// merges behind its front as planned.
#[test]
fn merge_completes_after_rear_leaves() {
    let mut sim = sim();
    let leader = spawn(&mut sim, "Leader", "truckBASIC", 0, 500.0);
    let veh1 = spawn(&mut sim, "Veh1", "truckBASIC", 0, 480.0);
    let joiner = spawn(&mut sim, "Joiner", "truckBASIC", 1, 490.0);
    let mut driver = PlatoonDriver::new(sim, PlatoonConfig::default());

    driver.join(&leader).unwrap();
    driver.join(&veh1).unwrap();
    driver.join(&joiner).unwrap();
    driver.leave(&veh1).unwrap();
    assert!(driver.membership().merging(&joiner));
    assert!(!driver.membership().yielding(&veh1));

    driver.step().unwrap();
    assert!(!driver.membership().merging(&joiner));
    assert!(driver.membership().in_cooldown(&joiner));
    driver.step().unwrap();
    assert_eq!(driver.client().lane_index(&joiner).unwrap(), 0);
    assert_eq!(driver.convoy().chain(), vec![leader, joiner]);
}

/// A follower pulling away from a stop is locked to its leader's speed for a
/// short while. With the leader out of sensor range it stays a little below.
#[test]
fn departure_lock_with_unseen_leader() {
    let mut sim = sim();
    let leader = spawn(&mut sim, "Leader", "crawler", 0, 800.0);
    let follower = spawn(&mut sim, "Veh1", "truckCACC", 0, 470.0);
    sim.set_vehicle_speed(&leader, 10.0).unwrap();
    sim.park(&follower).unwrap();
    let convoy = ConvoyState::from_relations(vec![FollowRelation::new("Veh1", "Leader")]);
    let cfg = PlatoonConfig::default();
    let lookahead = cfg.gap.lookahead;
    let mut driver = PlatoonDriver::new(sim, cfg).with_convoy(convoy);

    // Held at the stop, so nothing is commanded
    let report = driver.step().unwrap();
    assert!(report.commands.is_empty());

    driver.client_mut().resume(&follower).unwrap();
    let mut regimes = vec![];
    for _ in 0..20 {
        let report = driver.step().unwrap();
        let sim = driver.client();
        assert!(sim.leader(&follower, lookahead).unwrap().is_none());
        assert_eq!(report.commands.len(), 1);
        let (id, command) = &report.commands[0];
        assert_eq!(id, &follower);
        if command.regime == Regime::Lock {
            assert_approx_eq!(command.speed, sim.speed(&leader).unwrap() - 2.0);
        }
        regimes.push(command.regime);
    }

    let locked = regimes.iter().take_while(|r| **r == Regime::Lock).count();
    assert!(locked == 7 || locked == 8, "locked for {} ticks", locked);
    assert!(regimes[locked..].iter().all(|r| *r == Regime::CatchUp));
}

#[test]
fn simulation_end_stops_the_run() {
    let mut sim = sim();
    let leader = spawn(&mut sim, "Leader", "truckBASIC", 0, 500.0);
    sim.set_end_time(2.0);
    let mut driver = PlatoonDriver::new(sim, PlatoonConfig::default());
    driver.join(&leader).unwrap();
    let ticks = driver.run(1000).unwrap();
    assert!(ticks >= 19 && ticks <= 21);
}
