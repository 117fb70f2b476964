//! Miscellaneous utility structs.

/// A point in simulated time after which something lapses.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Deadline {
    until: f64,
}

impl Deadline {
    /// Creates a deadline `duration` seconds after `now`.
    pub fn after(now: f64, duration: f64) -> Self {
        Self {
            until: now + duration,
        }
    }

    /// The simulation time at which the deadline lapses.
    pub fn until(&self) -> f64 {
        self.until
    }

    /// Returns true once `now` has reached the deadline.
    pub fn expired(&self, now: f64) -> bool {
        now >= self.until
    }
}

/// Rate limits a repeated log message by simulated time.
#[derive(Copy, Clone, Debug, Default)]
pub struct Throttle {
    period: f64,
    last: Option<f64>,
}

impl Throttle {
    /// Creates a throttle that lets one message through per `period` seconds.
    pub const fn new(period: f64) -> Self {
        Self { period, last: None }
    }

    /// Returns true, and records `now`, if a message may be emitted.
    pub fn ready(&mut self, now: f64) -> bool {
        match self.last {
            Some(last) if now - last < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Forgets the last emission.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
