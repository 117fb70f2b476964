//! Gap-holding speed control for convoy followers.

pub use gap::{GapCommand, GapController, GapInput, Regime};
pub use safety::{stopping_distance, time_to_collision};

mod gap;
mod lock;
mod safety;
