use anyhow::{Context, Result};
use platoon::{
    KinematicSim, PlatoonConfig, PlatoonDriver, RoadAttributes, SimulationClient, VehicleId,
    VehicleSpawn, VehicleTypeAttributes,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "platoon-demo")]
struct Flags {
    /// JSON file overriding the default tuning constants
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Simulation step length in seconds
    #[structopt(long, default_value = "0.05")]
    step_length: f64,

    /// How long to simulate, in seconds
    #[structopt(long, default_value = "130")]
    duration: f64,

    /// Randomise the starting speed factors with this seed
    #[structopt(long)]
    seed: Option<u64>,
}

/// A scripted operator action.
#[derive(Clone, Debug)]
enum Action {
    Join(&'static str),
    Leave(&'static str),
    StartCutIn,
    CutIn,
    CutOut,
    PressBrake,
    ReleaseBrake,
}

const TRUCKS: [(&str, f64); 4] = [
    ("Leader", 200.0),
    ("Veh1", 175.0),
    ("Veh2", 150.0),
    ("Veh3", 125.0),
];

fn main() -> Result<()> {
    let flags = Flags::from_args();
    {
        use env_logger::{Builder, Env};
        Builder::from_env(Env::default().default_filter_or("info")).init();
    }

    let cfg = match &flags.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            PlatoonConfig::from_json(&json).with_context(|| format!("parsing {}", path.display()))?
        }
        None => PlatoonConfig::default(),
    };

    let sim = build_scenario(&flags, &cfg)?;
    let mut driver = PlatoonDriver::new(sim, cfg);
    let mut script: VecDeque<(f64, Action)> = VecDeque::from(vec![
        (0.0, Action::Join("Leader")),
        (0.0, Action::Join("Veh1")),
        (0.0, Action::Join("Veh2")),
        (0.0, Action::Join("Veh3")),
        (20.0, Action::Join("Joiner")),
        (40.0, Action::StartCutIn),
        (45.0, Action::CutIn),
        (70.0, Action::CutOut),
        (90.0, Action::PressBrake),
        (92.0, Action::ReleaseBrake),
        (110.0, Action::Leave("Joiner")),
    ]);

    let mut next_report = 0.0;
    while driver.client().time() < flags.duration {
        let now = driver.client().time();
        while script.front().map_or(false, |(at, _)| *at <= now) {
            if let Some((_, action)) = script.pop_front() {
                perform(&mut driver, action);
            }
        }

        let report = match driver.step() {
            Ok(report) => report,
            Err(err) => {
                log::info!("{}", err);
                break;
            }
        };
        if report.time >= next_report {
            next_report += 10.0;
            let gaps: Vec<String> = report
                .commands
                .iter()
                .map(|(id, cmd)| format!("{} {:.1}m/s {:?}", id, cmd.speed, cmd.regime))
                .collect();
            log::info!(
                "t={:.1} chain=[{}] {}",
                report.time,
                report.chain.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(" "),
                gaps.join(", ")
            );
        }
    }
    Ok(())
}

fn perform(driver: &mut PlatoonDriver<KinematicSim>, action: Action) {
    log::info!("{:?}", action);
    // Refusals are already logged by the driver
    match action {
        Action::Join(id) => {
            let _ = driver.join(&VehicleId::from(id));
        }
        Action::Leave(id) => {
            let _ = driver.leave(&VehicleId::from(id));
        }
        Action::StartCutIn => {
            let chain = driver.convoy().chain();
            if let (Some(leader), Some(follower)) = (chain.first(), chain.get(1)) {
                let car = VehicleId::from("CutIn");
                if let Err(err) = driver.start_cut_in(leader, follower, &car) {
                    log::warn!("{}", err);
                }
            }
        }
        Action::CutIn => {
            if let Err(err) = driver.request_cut_in() {
                log::warn!("{}", err);
            }
        }
        Action::CutOut => {
            if let Err(err) = driver.request_cut_out() {
                log::warn!("{}", err);
            }
        }
        Action::PressBrake => driver.press_brake(),
        Action::ReleaseBrake => driver.release_brake(),
    }
}

/// Two lanes of motorway with four trucks in line and one more in the
/// passing lane.
fn build_scenario(flags: &Flags, cfg: &PlatoonConfig) -> Result<KinematicSim> {
    let mut sim = KinematicSim::new(flags.step_length);
    sim.add_road(&RoadAttributes {
        name: "E0".to_owned(),
        length: 6000.0,
        lanes: 2,
        speed_limit: 25.0,
    });
    sim.add_vehicle_type(&cfg.membership.cacc_type, VehicleTypeAttributes::truck());
    sim.add_vehicle_type(&cfg.membership.basic_type, VehicleTypeAttributes::truck());
    sim.add_vehicle_type(&cfg.cut_in.vehicle_type, VehicleTypeAttributes::car());

    let trucks = TRUCKS.iter().map(|(id, pos)| (*id, 0, *pos));
    for (id, lane, pos) in trucks.chain(std::iter::once(("Joiner", 1, 110.0))) {
        sim.add_vehicle(&VehicleSpawn {
            id: VehicleId::from(id),
            type_id: cfg.membership.basic_type.clone(),
            road: "E0".to_owned(),
            lane,
            pos,
            speed: 20.0,
        })?;
    }

    if let Some(seed) = flags.seed {
        let mut rng = StdRng::seed_from_u64(seed);
        sim.randomise_speed_factors(0.05, &mut rng)?;
    }
    Ok(sim)
}
