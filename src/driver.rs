//! The per-tick control loop tying the convoy components together.

use crate::brake::LeaderBrake;
use crate::client::{tolerate, SimError, SimulationClient};
use crate::config::{PlatoonConfig, ReleaseConfig};
use crate::control::{GapCommand, GapController};
use crate::convoy::ConvoyState;
use crate::cut_in::{CutInError, CutInSession};
use crate::membership::{Candidates, Joined, Left, MembershipError, MembershipManager};
use crate::release::ReleaseGate;
use crate::VehicleId;
use std::collections::BTreeSet;

#[cfg(feature = "debug")]
use crate::debug::{debug_tick, take_debug_frame};

/// What happened during one tick.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    /// The simulation time after the step (s).
    pub time: f64,
    /// The convoy chain the tick's control acted on, root first.
    pub chain: Vec<VehicleId>,
    /// The speed command issued to each follower.
    pub commands: Vec<(VehicleId, GapCommand)>,
    /// Members that had left the simulation and were dropped.
    pub dropped: Vec<VehicleId>,
    /// The vehicle let out of the holding area, if any.
    pub released: Option<VehicleId>,
}

/// Drives a convoy through a simulator, one step at a time.
pub struct PlatoonDriver<C: SimulationClient> {
    client: C,
    convoy: ConvoyState,
    gap: GapController,
    membership: MembershipManager,
    cut_in: CutInSession,
    brake: LeaderBrake,
    release_cfg: ReleaseConfig,
    release: Option<ReleaseGate>,
    /// Followers that were held at a stop on the previous tick.
    halted: BTreeSet<VehicleId>,
    #[cfg(feature = "debug")]
    debug: serde_json::Value,
}

impl<C: SimulationClient> PlatoonDriver<C> {
    /// Creates a driver with an empty convoy.
    pub fn new(client: C, cfg: PlatoonConfig) -> Self {
        Self {
            client,
            convoy: ConvoyState::new(),
            gap: GapController::new(cfg.gap),
            membership: MembershipManager::new(cfg.membership),
            cut_in: CutInSession::new(cfg.cut_in),
            brake: LeaderBrake::new(cfg.brake),
            release_cfg: cfg.release,
            release: None,
            halted: BTreeSet::new(),
            #[cfg(feature = "debug")]
            debug: serde_json::Value::Null,
        }
    }

    /// Starts from an existing convoy, e.g. one built from configured relations.
    pub fn with_convoy(mut self, convoy: ConvoyState) -> Self {
        self.convoy = convoy;
        self
    }

    /// Lets the given vehicles out of the holding area one by one.
    pub fn with_release_queue(mut self, queue: Vec<VehicleId>) -> Self {
        self.release = Some(ReleaseGate::new(self.release_cfg.clone(), queue));
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn convoy(&self) -> &ConvoyState {
        &self.convoy
    }

    pub fn membership(&self) -> &MembershipManager {
        &self.membership
    }

    pub fn cut_in(&self) -> &CutInSession {
        &self.cut_in
    }

    pub fn brake(&self) -> &LeaderBrake {
        &self.brake
    }

    pub fn release_gate(&self) -> Option<&ReleaseGate> {
        self.release.as_ref()
    }

    /// Advances the simulation and the convoy by one tick.
    ///
    /// Fails only when the simulation has ended. Every per-vehicle failure
    /// within the tick is logged and skipped.
    pub fn step(&mut self) -> Result<TickReport, SimError> {
        self.client.advance()?;
        let now = self.client.time();
        let dt = self.client.step_length();

        #[cfg(feature = "debug")]
        debug_tick(now);

        // Re-derive the chain, without members that have gone
        let mut dropped = vec![];
        for id in self.convoy.chain() {
            if !self.client.contains(&id)
                && self.membership.forget(&mut self.client, &mut self.convoy, &id)
            {
                dropped.push(id);
            }
        }
        let chain = self.convoy.chain();

        self.maintain_locks(&chain, now);

        let mut commands = vec![];
        for follower in chain.iter().skip(1) {
            if self.halted.contains(follower) {
                continue;
            }
            match self
                .gap
                .control_follower(&mut self.client, &mut self.convoy, follower)
            {
                Ok(Some(command)) => commands.push((follower.clone(), command)),
                Ok(None) => {}
                Err(err) => log::debug!("gap control: {}", err),
            }
        }

        self.membership.tick(&mut self.client, &self.convoy);
        self.cut_in.tick(&mut self.client, &mut self.convoy);
        if let Some(root) = chain.first() {
            tolerate(self.brake.update(&mut self.client, root, dt), "leader brake");
        }

        let released = match self.release.as_mut() {
            Some(gate) => gate.tick(&mut self.client),
            None => None,
        };
        if let Some(id) = &released {
            tolerate(
                self.gap.engage_lock(&mut self.client, &mut self.convoy, id),
                "lock on release",
            );
        }

        #[cfg(feature = "debug")]
        {
            self.debug = take_debug_frame();
        }

        Ok(TickReport {
            time: now,
            chain,
            commands,
            dropped,
            released,
        })
    }

    /// Engages the initial lock for followers that have just left a stop
    /// and lets lapsed locks go.
    fn maintain_locks(&mut self, chain: &[VehicleId], now: f64) {
        let mut halted = BTreeSet::new();
        for follower in chain.iter().skip(1) {
            let stopped = self.client.is_stopped(follower).unwrap_or(false);
            if stopped {
                halted.insert(follower.clone());
                continue;
            }
            let locked = self
                .convoy
                .control(follower)
                .map_or(false, |control| control.lock_active(now));
            if self.halted.contains(follower) && !locked {
                tolerate(
                    self.gap
                        .engage_lock(&mut self.client, &mut self.convoy, follower),
                    "lock on departure",
                );
            }
        }
        self.halted = halted;
        self.gap.expire_locks(&mut self.convoy, chain, now);
    }

    /// Steps until the simulation ends or `max_steps` ticks have run.
    /// Returns the number of ticks run.
    pub fn run(&mut self, max_steps: usize) -> Result<usize, SimError> {
        for tick in 0..max_steps {
            match self.step() {
                Ok(_) => {}
                Err(SimError::SimulationEnded) => {
                    log::info!("simulation ended after {} ticks", tick);
                    return Ok(tick);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(max_steps)
    }

    /// Convoy members close enough for `me` to join.
    pub fn candidates(&self, me: &VehicleId) -> Candidates {
        self.membership.candidates(&self.client, &self.convoy, me)
    }

    pub fn join(&mut self, me: &VehicleId) -> Result<Joined, MembershipError> {
        let joined = self.membership.join(&mut self.client, &mut self.convoy, me);
        if let Err(err) = &joined {
            log::info!("join refused: {}", err);
        }
        joined
    }

    pub fn leave(&mut self, me: &VehicleId) -> Result<Left, MembershipError> {
        let left = self.membership.leave(&mut self.client, &mut self.convoy, me);
        if let Err(err) = &left {
            log::info!("leave refused: {}", err);
        }
        left
    }

    /// Starts a cut-in of `foreign` between `leader` and `follower`.
    pub fn start_cut_in(
        &mut self,
        leader: &VehicleId,
        follower: &VehicleId,
        foreign: &VehicleId,
    ) -> Result<(), CutInError> {
        self.cut_in
            .start(&self.client, &mut self.convoy, leader, follower, foreign)
    }

    pub fn request_cut_in(&mut self) -> Result<(), CutInError> {
        self.cut_in.request_cut_in()
    }

    pub fn request_cut_out(&mut self) -> Result<(), CutInError> {
        self.cut_in.request_cut_out()
    }

    pub fn press_brake(&mut self) {
        self.brake.press();
    }

    pub fn release_brake(&mut self) {
        self.brake.release();
    }

    /// Gets the debugging information for the previous tick as a JSON array.
    #[cfg(feature = "debug")]
    pub fn debug(&self) -> serde_json::Value {
        self.debug.clone()
    }
}
