//! A foreign vehicle cutting into the convoy and leaving again.

use platoon::{
    CutInError, CutInState, KinematicSim, PlatoonConfig, PlatoonDriver, RoadAttributes,
    SimulationClient, VehicleId, VehicleSpawn, VehicleTypeAttributes,
};

fn id(name: &str) -> VehicleId {
    VehicleId::from(name)
}

/// A leader with one follower 28m behind it, both already in the convoy.
fn setup() -> PlatoonDriver<KinematicSim> {
    let mut sim = KinematicSim::new(0.1);
    sim.add_road(&RoadAttributes {
        name: "E1".to_owned(),
        length: 8000.0,
        lanes: 2,
        speed_limit: 30.0,
    });
    sim.add_vehicle_type("truckCACC", VehicleTypeAttributes::truck());
    sim.add_vehicle_type("truckBASIC", VehicleTypeAttributes::truck());
    sim.add_vehicle_type("carCUT", VehicleTypeAttributes::car());
    for (name, pos) in [("Leader", 500.0), ("Veh1", 460.0)] {
        sim.add_vehicle(&VehicleSpawn {
            id: id(name),
            type_id: "truckBASIC".to_owned(),
            road: "E1".to_owned(),
            lane: 0,
            pos,
            speed: 20.0,
        })
        .unwrap();
    }
    let mut driver = PlatoonDriver::new(sim, PlatoonConfig::default());
    driver.join(&id("Leader")).unwrap();
    driver.join(&id("Veh1")).unwrap();
    driver
}

fn expanded(driver: &PlatoonDriver<KinematicSim>) -> bool {
    let convoy_flag = driver.convoy().gap_expanded(&id("Leader"), &id("Veh1"));
    assert_eq!(convoy_flag, driver.cut_in().gap_expansion_active());
    convoy_flag
}

#[test]
fn gap_expansion_lifecycle() {
    let mut driver = setup();
    let (leader, follower, car) = (id("Leader"), id("Veh1"), id("Cut"));

    assert_eq!(driver.request_cut_in(), Err(CutInError::WrongState(CutInState::Idle)));
    driver.start_cut_in(&leader, &follower, &car).unwrap();
    assert_eq!(
        driver.start_cut_in(&leader, &follower, &car),
        Err(CutInError::Busy)
    );

    driver.step().unwrap();
    assert_eq!(driver.cut_in().state(), CutInState::Approach);
    assert_eq!(driver.client().lane_index(&car).unwrap(), 1);
    assert_eq!(driver.client().type_id(&car).unwrap(), "carCUT");
    assert!(!expanded(&driver));

    for _ in 0..3 {
        driver.step().unwrap();
        assert_eq!(driver.cut_in().state(), CutInState::Approach);
        assert!(!driver.cut_in().lane_change_detected());
        assert!(!expanded(&driver));
    }

    // Line the car up in the side lane just behind the leader's rear
    let leader_pos = driver.client().lane_position(&leader).unwrap();
    driver
        .client_mut()
        .place(&car, "E1", 1, leader_pos - 14.0)
        .unwrap();

    driver.request_cut_in().unwrap();
    driver.step().unwrap();
    assert_eq!(driver.cut_in().state(), CutInState::Approach);
    assert!(expanded(&driver));

    // The lane change lands, the follower sees the car, and the gap narrows again
    driver.step().unwrap();
    assert_eq!(driver.client().lane_index(&car).unwrap(), 0);
    assert_eq!(driver.cut_in().state(), CutInState::Merged);
    assert!(driver.cut_in().lane_change_detected());
    assert!(driver.cut_in().recognized());
    assert!(!expanded(&driver));
    assert_eq!(
        driver.client().leader(&follower, 150.0).unwrap().map(|info| info.id),
        Some(car.clone())
    );

    for _ in 0..5 {
        driver.step().unwrap();
        assert_eq!(driver.cut_in().state(), CutInState::Merged);
        assert!(!expanded(&driver));
    }

    driver.request_cut_out().unwrap();
    driver.step().unwrap();
    assert_eq!(driver.cut_in().state(), CutInState::Exiting);
    assert!(!expanded(&driver));

    driver.step().unwrap();
    assert_eq!(driver.client().lane_index(&car).unwrap(), 1);
    assert_eq!(driver.cut_in().state(), CutInState::Done);
    assert!(driver.cut_in().ready());
    assert!(!expanded(&driver));
}

/// The car moves over on its own, with no cut-in requested. The gap widens
/// as soon as it leaves the side lane and narrows once the follower sees it.
#[test]
fn lane_change_detected_without_request() {
    let mut driver = setup();
    let (leader, follower, car) = (id("Leader"), id("Veh1"), id("Cut"));
    driver.start_cut_in(&leader, &follower, &car).unwrap();
    driver.step().unwrap();
    assert_eq!(driver.cut_in().state(), CutInState::Approach);

    // Drop the car back behind the follower, then let it change lanes
    let follower_pos = driver.client().lane_position(&follower).unwrap();
    let sim = driver.client_mut();
    sim.place(&car, "E1", 1, follower_pos - 30.0).unwrap();
    sim.change_lane(&car, 0, 2.0).unwrap();
    assert!(!driver.cut_in().lane_change_detected());
    assert!(!expanded(&driver));

    driver.step().unwrap();
    assert_eq!(driver.client().lane_index(&car).unwrap(), 0);
    assert!(driver.cut_in().lane_change_detected());
    assert_eq!(driver.cut_in().state(), CutInState::Merged);
    assert!(!driver.cut_in().recognized());
    assert!(expanded(&driver));

    driver.step().unwrap();
    assert!(expanded(&driver));

    // Once the car is ahead of the follower the gap goes back to normal
    let follower_pos = driver.client().lane_position(&follower).unwrap();
    driver
        .client_mut()
        .place(&car, "E1", 0, follower_pos + 14.0)
        .unwrap();
    driver.step().unwrap();
    assert!(driver.cut_in().recognized());
    assert!(driver.cut_in().lane_change_detected());
    assert!(!expanded(&driver));
}

/// The follower leaving the convoy mid-approach ends the session.
#[test]
fn follower_leaving_ends_session() {
    let mut driver = setup();
    let (leader, follower, car) = (id("Leader"), id("Veh1"), id("Cut"));
    driver.start_cut_in(&leader, &follower, &car).unwrap();
    driver.step().unwrap();
    driver.request_cut_in().unwrap();
    driver.step().unwrap();
    assert!(expanded(&driver));

    driver.leave(&follower).unwrap();
    for _ in 0..3 {
        driver.step().unwrap();
        assert_eq!(driver.cut_in().state(), CutInState::Done);
        assert!(!driver.cut_in().gap_expansion_active());
        assert!(!driver.convoy().gap_expanded(&leader, &follower));
    }
    assert_eq!(driver.convoy().chain(), vec![leader]);
}

#[test]
fn single_lane_road_refused() {
    let mut sim = KinematicSim::new(0.1);
    sim.add_road(&RoadAttributes {
        name: "E1".to_owned(),
        length: 2000.0,
        lanes: 1,
        speed_limit: 30.0,
    });
    sim.add_vehicle_type("truckCACC", VehicleTypeAttributes::truck());
    sim.add_vehicle_type("truckBASIC", VehicleTypeAttributes::truck());
    for (name, pos) in [("Leader", 500.0), ("Veh1", 460.0)] {
        sim.add_vehicle(&VehicleSpawn {
            id: id(name),
            type_id: "truckBASIC".to_owned(),
            road: "E1".to_owned(),
            lane: 0,
            pos,
            speed: 20.0,
        })
        .unwrap();
    }
    let mut driver = PlatoonDriver::new(sim, PlatoonConfig::default());
    driver.join(&id("Leader")).unwrap();
    driver.join(&id("Veh1")).unwrap();

    assert_eq!(
        driver.start_cut_in(&id("Leader"), &id("Veh1"), &id("Cut")),
        Err(CutInError::NoSideLane)
    );
    driver.step().unwrap();
    assert!(!driver.client().contains(&id("Cut")));
    assert!(driver.cut_in().ready());
}

#[test]
fn vanished_car_ends_session() {
    let mut driver = setup();
    let car = id("Cut");
    driver.start_cut_in(&id("Leader"), &id("Veh1"), &car).unwrap();
    driver.step().unwrap();
    driver.request_cut_in().unwrap();
    driver.step().unwrap();
    assert!(expanded(&driver));

    driver.client_mut().remove_vehicle(&car).unwrap();
    driver.step().unwrap();
    assert_eq!(driver.cut_in().state(), CutInState::Done);
    assert!(!expanded(&driver));
    assert_eq!(driver.convoy().chain(), vec![id("Leader"), id("Veh1")]);
}

#[test]
fn vanished_follower_ends_session() {
    let mut driver = setup();
    let follower = id("Veh1");
    driver.start_cut_in(&id("Leader"), &follower, &id("Cut")).unwrap();
    driver.step().unwrap();

    driver.client_mut().remove_vehicle(&follower).unwrap();
    let report = driver.step().unwrap();
    assert_eq!(report.dropped, vec![follower.clone()]);
    assert_eq!(driver.cut_in().state(), CutInState::Done);
    assert!(!driver.convoy().gap_expanded(&id("Leader"), &follower));
    assert_eq!(driver.convoy().chain(), vec![id("Leader")]);
}
