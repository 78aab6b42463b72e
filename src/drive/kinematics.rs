// Differential-drive inverse kinematics
// Converts conditioned (speed, rotation) into left/right wheel fractions.

use serde::{Deserialize, Serialize};

use crate::messages::{ConditionedInput, WheelCommand};

/// When the enhanced curvature strategy pivots in place
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuickTurnPolicy {
    /// Pivot when |speed| < max_speed and |rotation| > min_rotation
    Threshold { max_speed: f64, min_rotation: f64 },
    /// Pivot while the quick-turn button is held
    Button,
    ThresholdOrButton { max_speed: f64, min_rotation: f64 },
}

impl Default for QuickTurnPolicy {
    fn default() -> Self {
        QuickTurnPolicy::Threshold {
            max_speed: 0.1,
            min_rotation: 0.5,
        }
    }
}

impl QuickTurnPolicy {
    pub fn is_asserted(&self, input: ConditionedInput, flags: DriveFlags) -> bool {
        let threshold = |max_speed: f64, min_rotation: f64| {
            input.speed.abs() < max_speed && input.rotation.abs() > min_rotation
        };
        match *self {
            QuickTurnPolicy::Threshold {
                max_speed,
                min_rotation,
            } => threshold(max_speed, min_rotation),
            QuickTurnPolicy::Button => flags.quick_turn_button,
            QuickTurnPolicy::ThresholdOrButton {
                max_speed,
                min_rotation,
            } => flags.quick_turn_button || threshold(max_speed, min_rotation),
        }
    }
}

/// Per-tick flags from the joystick that affect kinematics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveFlags {
    pub quick_turn_button: bool,
}

/// Kinematics strategy, chosen once from configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriveStrategy {
    Arcade { turn_sensitivity: f64 },
    Curvature,
    CurvatureQuickTurn { quick_turn: QuickTurnPolicy },
}

impl Default for DriveStrategy {
    fn default() -> Self {
        DriveStrategy::Arcade {
            turn_sensitivity: 1.0,
        }
    }
}

impl DriveStrategy {
    /// Wheel command for one tick, always within [-1, 1]
    pub fn compute(&self, input: ConditionedInput, flags: DriveFlags) -> WheelCommand {
        let raw = match *self {
            DriveStrategy::Arcade { turn_sensitivity } => {
                arcade_drive(input.speed, input.rotation, turn_sensitivity)
            }
            DriveStrategy::Curvature => curvature_drive(input.speed, input.rotation),
            DriveStrategy::CurvatureQuickTurn { quick_turn } => curvature_drive_quick_turn(
                input.speed,
                input.rotation,
                quick_turn.is_asserted(input, flags),
            ),
        };
        desaturate(raw)
    }
}

pub fn arcade_drive(speed: f64, rotation: f64, turn_sensitivity: f64) -> WheelCommand {
    let turn = rotation * turn_sensitivity;
    WheelCommand::new(speed + turn, speed - turn)
}

/// Turning authority scales with |speed|; exact zero speed pivots in place
pub fn curvature_drive(speed: f64, rotation: f64) -> WheelCommand {
    if speed == 0.0 {
        return rotate_in_place(rotation);
    }
    WheelCommand::new(
        speed + speed.abs() * rotation,
        speed - speed.abs() * rotation,
    )
}

pub fn curvature_drive_quick_turn(speed: f64, rotation: f64, quick_turn: bool) -> WheelCommand {
    if quick_turn {
        rotate_in_place(rotation)
    } else {
        curvature_drive(speed, rotation)
    }
}

fn rotate_in_place(rotation: f64) -> WheelCommand {
    WheelCommand::new(rotation, -rotation)
}

/// Divide both wheels by the larger magnitude when it exceeds 1, keeping their ratio
pub fn desaturate(cmd: WheelCommand) -> WheelCommand {
    let max_magnitude = cmd.max_magnitude();
    if max_magnitude > 1.0 {
        cmd.scaled(1.0 / max_magnitude)
    } else {
        cmd
    }
}
