// Loop rates, topics, device defaults and the runtime configuration file
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drive::{DriveStrategy, ModeBindings, QuickTurnPolicy};
use crate::input::{InputConfig, JoystickConfig};
use crate::motor::MotorsConfig;
use crate::telemetry::{TelemetryConfig, VehicleConfig};

// Control loop frequency
pub const LOOP_HZ: u64 = 20;

// Dashboard publish frequency
pub const TELEMETRY_HZ: u64 = 5;

// Retry period for missing joystick and motor controllers
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

// Zenoh topics
pub const TOPIC_DASHBOARD: &str = "couch/state/dashboard"; // dashboard record
pub const TOPIC_HEALTH: &str = "couch/state/health"; // health status

// Serial ports for the VESC motor controllers
pub const LEFT_MOTOR_PORT: &str = "/dev/ttyACM0";
pub const RIGHT_MOTOR_PORT: &str = "/dev/ttyACM1";

// Linux joystick device
pub const JOYSTICK_DEVICE: &str = "/dev/input/js0";

// Enable hardware motor control (set to false for simulation/testing)
pub const MOTOR_ENABLED: bool = true;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    pub loop_hz: u64,
    pub telemetry_hz: u64,
    /// Re-issue motor commands at most this often; None issues every tick
    pub min_command_interval_ms: Option<u64>,
    pub reconnect_interval_ms: u64,
    /// Consecutive failed reads before retained feedback decays to "stopped"
    pub feedback_stale_ticks: u32,
    /// Force the wheels to zero above this speed
    pub max_safe_speed_mph: Option<f64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            telemetry_hz: TELEMETRY_HZ,
            min_command_interval_ms: None,
            reconnect_interval_ms: RECONNECT_INTERVAL.as_millis() as u64,
            feedback_stale_ticks: 10,
            max_safe_speed_mph: None,
        }
    }
}

impl ControlConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(1000 / self.loop_hz.max(1))
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_millis(1000 / self.telemetry_hz.max(1))
    }

    pub fn min_command_interval(&self) -> Option<Duration> {
        self.min_command_interval_ms.map(Duration::from_millis)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriveConfig {
    pub strategy: DriveStrategy,
    pub bindings: ModeBindings,
    /// Max change per second of each scaled wheel target; None disables
    pub wheel_slew_per_sec: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub control: ControlConfig,
    pub input: InputConfig,
    pub drive: DriveConfig,
    pub motors: MotorsConfig,
    pub joystick: JoystickConfig,
    pub telemetry: TelemetryConfig,
    pub vehicle: VehicleConfig,
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(reason.into())
}

impl RuntimeConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let control = &self.control;
        if control.loop_hz == 0 || control.loop_hz > 1000 {
            return Err(invalid(format!("loop_hz {} not in 1..=1000", control.loop_hz)));
        }
        if control.telemetry_hz == 0 || control.telemetry_hz > 1000 {
            return Err(invalid(format!(
                "telemetry_hz {} not in 1..=1000",
                control.telemetry_hz
            )));
        }
        if control.reconnect_interval_ms == 0 {
            return Err(invalid("reconnect_interval_ms must be positive"));
        }
        if control.feedback_stale_ticks == 0 {
            return Err(invalid("feedback_stale_ticks must be at least 1"));
        }
        if control.max_safe_speed_mph.is_some_and(|mph| !(mph > 0.0)) {
            return Err(invalid("max_safe_speed_mph must be positive"));
        }

        let input = &self.input;
        if !(0.0..1.0).contains(&input.smoothing) {
            return Err(invalid(format!("smoothing {} not in [0, 1)", input.smoothing)));
        }
        if !(input.deadband >= 0.0) || !(input.hysteresis >= 0.0) {
            return Err(invalid("deadband and hysteresis must be non-negative"));
        }
        if input.deadband + input.hysteresis >= 1.0 {
            return Err(invalid("deadband + hysteresis must be below 1"));
        }
        if !(input.max_accel_per_sec > 0.0) {
            return Err(invalid("max_accel_per_sec must be positive"));
        }

        match &self.drive.strategy {
            DriveStrategy::Arcade { turn_sensitivity } => {
                if !(*turn_sensitivity > 0.0 && *turn_sensitivity <= 1.0) {
                    return Err(invalid(format!(
                        "turn_sensitivity {} not in (0, 1]",
                        turn_sensitivity
                    )));
                }
            }
            DriveStrategy::Curvature => {}
            DriveStrategy::CurvatureQuickTurn { quick_turn } => {
                let needs_button = !matches!(quick_turn, QuickTurnPolicy::Threshold { .. });
                if needs_button && self.drive.bindings.quick_turn.is_none() {
                    return Err(invalid("quick-turn button policy needs bindings.quick_turn"));
                }
            }
        }
        if self.drive.wheel_slew_per_sec.is_some_and(|rate| !(rate > 0.0)) {
            return Err(invalid("wheel_slew_per_sec must be positive"));
        }

        if !(self.motors.max_erpm > 0.0) {
            return Err(invalid("max_erpm must be positive"));
        }

        let vehicle = &self.vehicle;
        if !vehicle.speed_conversion.is_valid() {
            return Err(invalid("speed conversion constants must be positive"));
        }
        if !(vehicle.battery_full_v > vehicle.battery_empty_v) {
            return Err(invalid(format!(
                "battery_full_v {} must exceed battery_empty_v {}",
                vehicle.battery_full_v, vehicle.battery_empty_v
            )));
        }
        if !(vehicle.full_range_miles >= 0.0) {
            return Err(invalid("full_range_miles must be non-negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.control.period(), Duration::from_millis(50));
        assert_eq!(config.control.telemetry_period(), Duration::from_millis(200));
        assert_eq!(config.control.min_command_interval(), None);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{
            "control": { "min_command_interval_ms": 100 },
            "drive": { "strategy": { "type": "curvature" } },
            "motors": { "left": { "port": "/dev/ttyUSB0", "invert": true } }
        }"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.control.loop_hz, LOOP_HZ);
        assert_eq!(
            config.control.min_command_interval(),
            Some(Duration::from_millis(100))
        );
        assert_eq!(config.drive.strategy, DriveStrategy::Curvature);
        assert!(config.motors.left.invert);
        assert_eq!(config.motors.right.port, RIGHT_MOTOR_PORT);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_smoothing() {
        let mut config = RuntimeConfig::default();
        config.input.smoothing = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_turn_sensitivity() {
        let mut config = RuntimeConfig::default();
        config.drive.strategy = DriveStrategy::Arcade {
            turn_sensitivity: 0.0,
        };
        assert!(config.validate().is_err());
        config.drive.strategy = DriveStrategy::Arcade {
            turn_sensitivity: 1.5,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_battery_range() {
        let mut config = RuntimeConfig::default();
        config.vehicle.battery_full_v = 30.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_button_quick_turn_needs_binding() {
        let mut config = RuntimeConfig::default();
        config.drive.strategy = DriveStrategy::CurvatureQuickTurn {
            quick_turn: QuickTurnPolicy::Button,
        };
        assert!(config.validate().is_err());
        config.drive.bindings.quick_turn = Some(7);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            RuntimeConfig::load("/nonexistent/couch.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
