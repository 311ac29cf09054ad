//! Gamepad axes to wheel commands.
//!
//! ```text
//! throttle = clamp(rt − lt, −1, 1)
//! turn     = dz(lx)³ · gain · (0.5 + 0.5 · (1 − |throttle|)),  clamped to ±max_turn
//! left     = clamp(throttle + turn)
//! right    = clamp(throttle − turn)
//! ```
//!
//! The cubic keeps small stick deflections fine-grained and the throttle
//! term softens turns at speed.

use rover_types::DriveCommand;

use crate::input::GamepadState;

#[derive(Debug, Clone, PartialEq)]
pub struct ShapingConfig {
    /// Stick deflection below which the turn input is ignored.
    pub turn_deadzone: f64,
    pub turn_gain: f64,
    pub max_turn: f64,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            turn_deadzone: 0.12,
            turn_gain: 0.8,
            max_turn: 0.8,
        }
    }
}

pub fn shape(pad: &GamepadState, config: &ShapingConfig) -> DriveCommand {
    let throttle = finite(pad.right_trigger - pad.left_trigger).clamp(-1.0, 1.0);

    let mut raw = finite(pad.left_x);
    if raw.abs() < config.turn_deadzone {
        raw = 0.0;
    }
    let max_turn = config.max_turn.abs();
    let turn = (raw.powi(3) * config.turn_gain * (0.5 + 0.5 * (1.0 - throttle.abs())))
        .clamp(-max_turn, max_turn);

    DriveCommand::new(throttle + turn, throttle - turn)
}

fn finite(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}
