//! A foreign vehicle cutting into the convoy, and the convoy making room.

use crate::client::{tolerate, SimError, SimResult, SimulationClient, SpeedMode, VehicleSpawn};
use crate::config::CutInConfig;
use crate::convoy::ConvoyState;
use crate::util::Throttle;
use crate::VehicleId;
use std::fmt;

/// The stage a cut-in has reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutInState {
    /// No session has been started.
    Idle,
    /// The foreign vehicle is inserted on the next tick.
    Spawn,
    /// The foreign vehicle drives alongside the convoy in the side lane.
    Approach,
    /// The foreign vehicle is in the convoy's lane.
    Merged,
    /// The foreign vehicle is moving back to the side lane.
    Exiting,
    /// The session is over.
    Done,
}

/// Why a cut-in trigger was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutInError {
    /// A session is already running.
    Busy,
    /// The trigger does not apply in the current state.
    WrongState(CutInState),
    /// The leader's road has no lane beside the convoy to approach in.
    NoSideLane,
}

impl fmt::Display for CutInError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutInError::Busy => f.write_str("a cut-in is already in progress"),
            CutInError::WrongState(state) => write!(f, "not possible while {:?}", state),
            CutInError::NoSideLane => f.write_str("no lane beside the convoy"),
        }
    }
}

impl std::error::Error for CutInError {}

/// A cut-in between `leader` and `follower`.
///
/// The convoy widens the pair's target gap once it sees the foreign vehicle
/// start to change lanes (or as soon as the cut-in is committed), and
/// narrows it again once the follower sees the foreign vehicle as the
/// vehicle directly ahead.
#[derive(Clone, Debug)]
pub struct CutInSession {
    cfg: CutInConfig,
    state: CutInState,
    foreign: VehicleId,
    leader: VehicleId,
    follower: VehicleId,
    /// The convoy's lane.
    target_lane: usize,
    /// The lane the foreign vehicle approaches in.
    side_lane: usize,
    /// The foreign vehicle's lane on the previous tick.
    previous_lane: Option<usize>,
    lane_change_detected: bool,
    gap_expansion: bool,
    recognized: bool,
    want_cut_in: bool,
    want_cut_out: bool,
    progress_log: Throttle,
}

impl CutInSession {
    /// Creates an idle session.
    pub fn new(cfg: CutInConfig) -> Self {
        let progress_log = Throttle::new(cfg.log_period);
        Self {
            cfg,
            state: CutInState::Idle,
            foreign: Default::default(),
            leader: Default::default(),
            follower: Default::default(),
            target_lane: 0,
            side_lane: 0,
            previous_lane: None,
            lane_change_detected: false,
            gap_expansion: false,
            recognized: false,
            want_cut_in: false,
            want_cut_out: false,
            progress_log,
        }
    }

    pub fn state(&self) -> CutInState {
        self.state
    }

    /// The foreign vehicle, once a session has been started.
    pub fn foreign(&self) -> Option<&VehicleId> {
        match self.state {
            CutInState::Idle => None,
            _ => Some(&self.foreign),
        }
    }

    /// Whether a new session may be started.
    pub fn ready(&self) -> bool {
        matches!(self.state, CutInState::Idle | CutInState::Done)
    }

    /// Whether the target gap between the leader and follower is widened.
    pub fn gap_expansion_active(&self) -> bool {
        self.gap_expansion
    }

    /// Whether the foreign vehicle has been seen starting its lane change.
    pub fn lane_change_detected(&self) -> bool {
        self.lane_change_detected
    }

    /// Whether the follower has recognised the foreign vehicle ahead of it.
    pub fn recognized(&self) -> bool {
        self.recognized
    }

    /// Starts a cut-in of `foreign` between `leader` and `follower`.
    ///
    /// Refused while another session runs, or when the leader is on a
    /// single-lane road.
    pub fn start<C: SimulationClient>(
        &mut self,
        client: &C,
        convoy: &mut ConvoyState,
        leader: &VehicleId,
        follower: &VehicleId,
        foreign: &VehicleId,
    ) -> Result<(), CutInError> {
        if !self.ready() {
            return Err(CutInError::Busy);
        }
        let lanes = client.road_id(leader).and_then(|road| client.lane_count(&road));
        if matches!(lanes, Ok(lanes) if lanes < 2) {
            return Err(CutInError::NoSideLane);
        }
        self.leader = leader.clone();
        self.follower = follower.clone();
        self.foreign = foreign.clone();
        self.previous_lane = None;
        self.lane_change_detected = false;
        self.recognized = false;
        self.want_cut_in = false;
        self.want_cut_out = false;
        self.progress_log.reset();
        self.gap_expansion = false;
        convoy.set_gap_expansion(leader, follower, false);
        self.state = CutInState::Spawn;
        log::info!("cut-in of {} between {} and {} started", foreign, leader, follower);
        Ok(())
    }

    /// Asks the foreign vehicle to move into the convoy's lane.
    pub fn request_cut_in(&mut self) -> Result<(), CutInError> {
        match self.state {
            CutInState::Approach => {
                self.want_cut_in = true;
                Ok(())
            }
            state => Err(CutInError::WrongState(state)),
        }
    }

    /// Asks the foreign vehicle to return to the side lane.
    pub fn request_cut_out(&mut self) -> Result<(), CutInError> {
        match self.state {
            CutInState::Approach | CutInState::Merged => {
                self.want_cut_out = true;
                Ok(())
            }
            state => Err(CutInError::WrongState(state)),
        }
    }

    /// Advances the session by one tick.
    pub fn tick<C: SimulationClient>(&mut self, client: &mut C, convoy: &mut ConvoyState) {
        if self.ready() {
            return;
        }
        let foreign_gone = self.state != CutInState::Spawn && !client.contains(&self.foreign);
        if !client.contains(&self.leader) || !client.contains(&self.follower) || foreign_gone {
            log::info!("cut-in of {} abandoned", self.foreign);
            self.finish(convoy);
            return;
        }
        if convoy.designated_leader(&self.follower) != Some(&self.leader) {
            log::info!(
                "{} no longer follows {}; cut-in of {} abandoned",
                self.follower,
                self.leader,
                self.foreign
            );
            self.finish(convoy);
            return;
        }

        let result = match self.state {
            CutInState::Spawn => self.spawn(client),
            CutInState::Approach => self.approach(client, convoy),
            CutInState::Merged => self.merged(client, convoy),
            CutInState::Exiting => self.exiting(client, convoy),
            CutInState::Idle | CutInState::Done => Ok(()),
        };
        if let Err(err) = result {
            if self.state == CutInState::Spawn {
                log::warn!("could not insert {}: {}", self.foreign, err);
                self.finish(convoy);
            } else {
                log::debug!("cut-in of {}: {}", self.foreign, err);
            }
        }
    }

    /// Inserts the foreign vehicle in the lane beside the leader, behind it.
    fn spawn<C: SimulationClient>(&mut self, client: &mut C) -> SimResult<()> {
        let road = client.road_id(&self.leader)?;
        let lanes = client.lane_count(&road)?;
        self.target_lane = client.lane_index(&self.leader)?;
        self.side_lane = if self.target_lane + 1 < lanes {
            self.target_lane + 1
        } else if self.target_lane > 0 {
            self.target_lane - 1
        } else {
            return Err(SimError::Rejected {
                id: self.foreign.clone(),
                reason: format!("{} has no lane beside the convoy", road),
            });
        };

        let leader_pos = client.lane_position(&self.leader)?;
        let leader_len = client.length(&self.leader)?;
        let pos = f64::max(0.0, leader_pos - leader_len - self.cfg.spawn_gap);

        if client.contains(&self.foreign) {
            tolerate(client.remove_vehicle(&self.foreign), "replace foreign vehicle");
        }
        client.add_vehicle(&VehicleSpawn {
            id: self.foreign.clone(),
            type_id: self.cfg.vehicle_type.clone(),
            road,
            lane: self.side_lane,
            pos,
            speed: client.speed(&self.leader)?,
        })?;
        client.set_speed_mode(&self.foreign, SpeedMode::Unchecked)?;
        client.set_speed_factor(&self.foreign, self.cfg.approach_speed_factor)?;

        self.previous_lane = Some(self.side_lane);
        self.state = CutInState::Approach;
        Ok(())
    }

    fn approach<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &mut ConvoyState,
    ) -> SimResult<()> {
        let lane = client.lane_index(&self.foreign)?;
        let left_side_lane = self.previous_lane == Some(self.side_lane) && lane != self.side_lane;
        if left_side_lane && !self.lane_change_detected {
            self.lane_change_detected = true;
            log::info!("{} is changing lanes; widening the gap", self.foreign);
        }
        self.previous_lane = Some(lane);

        if self.lane_change_detected {
            self.set_expansion(convoy, true);
        }
        if self.gap_expansion {
            self.log_progress(client);
            self.cooperate(client)?;
        }

        if self.want_cut_out {
            return self.cut_out(client, convoy);
        }

        if self.want_cut_in {
            self.want_cut_in = false;
            client.change_lane(&self.foreign, self.target_lane, self.cfg.hold)?;
            let leader_speed = client.speed(&self.leader)?;
            client.slow_down(
                &self.foreign,
                f64::max(leader_speed, self.cfg.merge_floor),
                self.cfg.merge_ramp,
            )?;
            self.set_expansion(convoy, true);
            log::info!("{} cutting in", self.foreign);
        }

        if lane == self.target_lane {
            self.state = CutInState::Merged;
            self.check_recognition(client, convoy)?;
        }
        Ok(())
    }

    fn merged<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &mut ConvoyState,
    ) -> SimResult<()> {
        self.check_recognition(client, convoy)?;
        if self.gap_expansion {
            self.log_progress(client);
        }
        if self.want_cut_out {
            return self.cut_out(client, convoy);
        }
        Ok(())
    }

    fn exiting<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &mut ConvoyState,
    ) -> SimResult<()> {
        if client.lane_index(&self.foreign)? == self.side_lane {
            client.set_speed_mode(&self.foreign, SpeedMode::Default)?;
            client.set_speed_factor(&self.foreign, 1.0)?;
            log::info!("{} has left the convoy's lane", self.foreign);
            self.finish(convoy);
        }
        Ok(())
    }

    /// Sends the foreign vehicle back to the side lane.
    fn cut_out<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &mut ConvoyState,
    ) -> SimResult<()> {
        self.want_cut_out = false;
        self.set_expansion(convoy, false);
        self.state = CutInState::Exiting;
        if client.lane_index(&self.foreign)? != self.side_lane {
            client.change_lane(&self.foreign, self.side_lane, self.cfg.hold)?;
        }
        let speed = client.speed(&self.foreign)?;
        client.slow_down(&self.foreign, speed + self.cfg.exit_boost, self.cfg.exit_ramp)
    }

    /// Slows the foreign vehicle a little below the leader to help open the gap.
    fn cooperate<C: SimulationClient>(&mut self, client: &mut C) -> SimResult<()> {
        let leader_speed = client.speed(&self.leader)?;
        let speed = client.speed(&self.foreign)?;
        let target = f64::max(self.cfg.yield_floor, leader_speed - self.cfg.yield_margin);
        if speed > target + 0.5 {
            client.slow_down(&self.foreign, target, self.cfg.yield_ramp)?;
        }
        Ok(())
    }

    /// Narrows the gap again once the follower sees the foreign vehicle ahead.
    fn check_recognition<C: SimulationClient>(
        &mut self,
        client: &mut C,
        convoy: &mut ConvoyState,
    ) -> SimResult<()> {
        if self.recognized {
            return Ok(());
        }
        let ahead = client.leader(&self.follower, self.cfg.recognition_lookahead)?;
        if let Some(info) = ahead.filter(|info| info.id == self.foreign) {
            log::info!(
                "{} sees {} ahead at {:.1}m; restoring the gap",
                self.follower,
                self.foreign,
                info.gap
            );
            self.set_expansion(convoy, false);
            self.recognized = true;
        }
        Ok(())
    }

    fn log_progress<C: SimulationClient>(&mut self, client: &C) {
        if !self.progress_log.ready(client.time()) {
            return;
        }
        if let Ok(Some(info)) = client.leader(&self.follower, self.cfg.recognition_lookahead) {
            if info.id == self.leader {
                log::info!("{} gap to {}: {:.1}m", self.follower, self.leader, info.gap);
            }
        }
    }

    fn set_expansion(&mut self, convoy: &mut ConvoyState, on: bool) {
        self.gap_expansion = on;
        convoy.set_gap_expansion(&self.leader, &self.follower, on);
    }

    fn finish(&mut self, convoy: &mut ConvoyState) {
        self.set_expansion(convoy, false);
        self.want_cut_in = false;
        self.want_cut_out = false;
        self.state = CutInState::Done;
    }
}
