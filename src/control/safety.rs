//! The imminent-collision override.

use crate::config::GapConfig;

/// Computes the distance needed to stop from `speed` at a deceleration of `decel`.
///
/// # Arguments
/// * `speed` - The current speed (m/s).
/// * `decel` - The emergency deceleration, a positive number (m/s<sup>2</sup>).
pub fn stopping_distance(speed: f64, decel: f64) -> f64 {
    speed * speed / (2.0 * f64::max(decel, 1e-6))
}

/// Computes the time until the gap closes at the current closing speed.
/// Infinite when the gap is not closing.
pub fn time_to_collision(gap: f64, closing: f64) -> f64 {
    if closing > 0.0 {
        gap / closing
    } else {
        f64::INFINITY
    }
}

/// Returns the hard-brake speed if following at this gap is unsafe.
///
/// Following is unsafe when the follower needs more room to stop than the
/// gap plus the obstacle's own stopping distance (less a buffer), or when
/// the time to collision drops below the configured minimum.
///
/// # Arguments
/// * `gap` - The distance to the obstacle ahead (m).
/// * `follower_speed` - The follower's speed (m/s).
/// * `leader_speed` - The obstacle's speed (m/s).
/// * `follower_decel` - The follower's emergency deceleration (m/s<sup>2</sup>).
/// * `leader_decel` - The obstacle's emergency deceleration (m/s<sup>2</sup>).
pub(crate) fn hard_brake(
    cfg: &GapConfig,
    gap: f64,
    follower_speed: f64,
    leader_speed: f64,
    follower_decel: f64,
    leader_decel: f64,
) -> Option<f64> {
    let gap = f64::max(gap, 0.0);
    let follower_stop = stopping_distance(follower_speed, follower_decel);
    let leader_stop = stopping_distance(leader_speed, leader_decel);
    let imminent = follower_stop > gap + leader_stop - cfg.emergency_buffer;
    let ttc = time_to_collision(gap, follower_speed - leader_speed);

    if imminent || ttc < cfg.min_ttc {
        let speed = f64::min(
            follower_speed - cfg.brake_below_follower,
            leader_speed - cfg.brake_below_leader,
        );
        Some(f64::max(speed, 0.0))
    } else {
        None
    }
}
