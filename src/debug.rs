use crate::control::GapCommand;
use crate::VehicleId;
use serde_json::json;

thread_local!(
    static DEBUG_FRAME: std::cell::RefCell<Vec<serde_json::Value>> = Default::default();
);

/// Records one follower's control decision in the current frame.
pub fn debug_gap(
    follower: &VehicleId,
    target: &VehicleId,
    gap: Option<f64>,
    target_gap: f64,
    command: &GapCommand,
) {
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "gap",
            "follower": follower.as_str(),
            "target": target.as_str(),
            "gap": gap,
            "target_gap": target_gap,
            "regime": format!("{:?}", command.regime),
            "speed": command.speed,
        }))
    })
}

/// Records the tick the frame belongs to.
pub fn debug_tick(time: f64) {
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "tick",
            "time": time,
        }))
    })
}

pub fn take_debug_frame() -> serde_json::Value {
    json!(DEBUG_FRAME.with(|frame| frame.take()))
}
