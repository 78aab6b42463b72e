// Data records passed between the joystick, the control loop, the motors and the dashboard

use serde::{Deserialize, Serialize};

use crate::drive::DriveMode;

/// Joystick button number as reported by the device
pub type ButtonId = u8;

/// Set of pressed buttons (button numbers 0..64)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonSet(u64);

impl ButtonSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, button: ButtonId) {
        if let Some(bit) = Self::bit(button) {
            self.0 |= bit;
        }
    }

    pub fn remove(&mut self, button: ButtonId) {
        if let Some(bit) = Self::bit(button) {
            self.0 &= !bit;
        }
    }

    pub fn set(&mut self, button: ButtonId, pressed: bool) {
        if pressed {
            self.insert(button);
        } else {
            self.remove(button);
        }
    }

    pub fn contains(&self, button: ButtonId) -> bool {
        Self::bit(button).is_some_and(|bit| self.0 & bit != 0)
    }

    // Buttons past 63 are ignored
    fn bit(button: ButtonId) -> Option<u64> {
        1u64.checked_shl(u32::from(button))
    }
}

impl FromIterator<ButtonId> for ButtonSet {
    fn from_iter<I: IntoIterator<Item = ButtonId>>(iter: I) -> Self {
        let mut set = Self::empty();
        for button in iter {
            set.insert(button);
        }
        set
    }
}

// One poll of the joystick, forward and right positive
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JoystickSample {
    pub vertical: f64,
    pub horizontal: f64,
    pub buttons: ButtonSet,
}

impl JoystickSample {
    pub fn new(vertical: f64, horizontal: f64) -> Self {
        Self {
            vertical,
            horizontal,
            buttons: ButtonSet::empty(),
        }
    }

    pub fn with_buttons(mut self, buttons: ButtonSet) -> Self {
        self.buttons = buttons;
        self
    }
}

/// Speed and rotation after deadzone, shaping, smoothing and slew limiting
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConditionedInput {
    pub speed: f64,
    pub rotation: f64,
}

/// Left/right wheel speed as a fraction of full speed, each in [-1, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelCommand {
    pub left: f64,
    pub right: f64,
}

impl WheelCommand {
    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn scaled(self, factor: f64) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }

    pub fn max_magnitude(&self) -> f64 {
        self.left.abs().max(self.right.abs())
    }
}

// Point-in-time reading from one motor controller.
// Default is the "stopped" reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorFeedback {
    pub rpm: f64,
    pub avg_current: f64,
    pub bus_voltage: f64,
    pub fet_temp: f64,
}

impl MotorFeedback {
    pub fn stopped() -> Self {
        Self::default()
    }
}

/// Runtime health published alongside the snapshot
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    #[default]
    JoystickDisconnected,
    FeedbackStale,
}

/// Derived telemetry for one control tick. Replaced as a whole, never field by field.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub speed_mph: f64,
    pub power_watts: f64,
    pub battery_pct: f64,
    pub bus_voltage: f64,
    pub fet_temp_c: f64,
    pub range_miles: f64,
    pub mode: DriveMode,
    pub health: RuntimeHealth,
}

// Record pushed to the dashboard; field names follow what the dashboard frontend parses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMessage {
    pub speed: f64,
    pub battery: f64,
    pub wattage: f64,
    pub range: f64,
    pub voltage: f64,
    pub speed_mode: u8,
    pub gear: u8,
    pub mode: DriveMode,
    pub fet_temp: f64,
    pub health: RuntimeHealth,
}

impl From<&TelemetrySnapshot> for DashboardMessage {
    fn from(snapshot: &TelemetrySnapshot) -> Self {
        Self {
            speed: snapshot.speed_mph,
            battery: snapshot.battery_pct,
            wattage: snapshot.power_watts,
            range: snapshot.range_miles,
            voltage: snapshot.bus_voltage,
            speed_mode: snapshot.mode.index(),
            gear: snapshot.mode.gear(),
            mode: snapshot.mode,
            fet_temp: snapshot.fet_temp_c,
            health: snapshot.health,
        }
    }
}
