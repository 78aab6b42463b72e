// Motor controller interface and implementations
//
// One controller per wheel side. The VESC-backed controller owns its serial
// port and reopens it on its own when the controller goes away.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::vesc::{MotorError, Result, VescBus, DEFAULT_BAUDRATE};
use crate::messages::MotorFeedback;

/// Commands and measurements for one wheel motor
pub trait MotorController: Send {
    fn name(&self) -> &str;

    /// Current rpm (electrical), average motor current, bus voltage and FET temperature
    fn measurements(&mut self) -> Result<MotorFeedback>;

    /// Closed-loop speed in electrical RPM. 0 holds the wheel (brake).
    fn set_rpm(&mut self, erpm: f64) -> Result<()>;

    /// Motor current in amps. 0 releases the wheel (freewheel).
    fn set_current(&mut self, amps: f64) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotorSideConfig {
    pub port: String,
    /// Mirror-mounted motor: flip command and measurement sign
    pub invert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotorsConfig {
    /// false = simulated motors
    pub enabled: bool,
    pub baudrate: u32,
    /// eRPM commanded for a wheel fraction of 1.0 at multiplier 1.0
    pub max_erpm: f64,
    pub left: MotorSideConfig,
    pub right: MotorSideConfig,
}

impl Default for MotorsConfig {
    fn default() -> Self {
        Self {
            enabled: crate::config::MOTOR_ENABLED,
            baudrate: DEFAULT_BAUDRATE,
            max_erpm: 10_000.0,
            left: MotorSideConfig {
                port: crate::config::LEFT_MOTOR_PORT.to_string(),
                invert: false,
            },
            right: MotorSideConfig {
                port: crate::config::RIGHT_MOTOR_PORT.to_string(),
                invert: false,
            },
        }
    }
}

/// VESC on a dedicated serial port
pub struct VescMotor {
    side: MotorSideConfig,
    baudrate: u32,
    reconnect_interval: Duration,
    bus: Option<VescBus>,
    last_attempt: Option<Instant>,
    reported_missing: bool,
}

impl VescMotor {
    /// Does not touch the port; the first command or read opens it
    pub fn new(side: MotorSideConfig, baudrate: u32, reconnect_interval: Duration) -> Self {
        Self {
            side,
            baudrate,
            reconnect_interval,
            bus: None,
            last_attempt: None,
            reported_missing: false,
        }
    }

    fn sign(&self) -> f64 {
        if self.side.invert { -1.0 } else { 1.0 }
    }

    fn not_connected(&self) -> MotorError {
        MotorError::NotConnected {
            port: self.side.port.clone(),
        }
    }

    fn bus(&mut self) -> Result<&mut VescBus> {
        if self.bus.is_none() {
            let due = self
                .last_attempt
                .is_none_or(|at| at.elapsed() >= self.reconnect_interval);
            if !due {
                return Err(self.not_connected());
            }
            self.last_attempt = Some(Instant::now());

            match VescBus::open_with_baudrate(&self.side.port, self.baudrate) {
                Ok(bus) => {
                    info!("Motor controller connected on {}", self.side.port);
                    self.reported_missing = false;
                    self.bus = Some(bus);
                }
                Err(e) => {
                    if self.reported_missing {
                        debug!("Motor controller {} still unavailable: {}", self.side.port, e);
                    } else {
                        info!("Waiting for motor controller on {}: {}", self.side.port, e);
                        self.reported_missing = true;
                    }
                    return Err(self.not_connected());
                }
            }
        }
        self.bus.as_mut().ok_or_else(|| MotorError::NotConnected {
            port: self.side.port.clone(),
        })
    }

    // Port-level failures mean the controller went away; timeouts and bad packets do not
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(MotorError::Io(_) | MotorError::Serial(_)) = &result {
            warn!("Motor controller {} lost, will reconnect", self.side.port);
            self.bus = None;
        }
        result
    }
}

impl MotorController for VescMotor {
    fn name(&self) -> &str {
        &self.side.port
    }

    fn measurements(&mut self) -> Result<MotorFeedback> {
        let sign = self.sign();
        let result = self.bus()?.get_values();
        let values = self.check(result)?;
        Ok(MotorFeedback {
            rpm: values.rpm * sign,
            avg_current: values.avg_motor_current * sign,
            bus_voltage: values.v_in,
            fet_temp: values.temp_fet,
        })
    }

    fn set_rpm(&mut self, erpm: f64) -> Result<()> {
        let erpm = erpm * self.sign();
        let result = self.bus()?.set_rpm(erpm);
        self.check(result)
    }

    fn set_current(&mut self, amps: f64) -> Result<()> {
        let amps = amps * self.sign();
        let result = self.bus()?.set_current(amps);
        self.check(result)
    }
}

impl Drop for VescMotor {
    fn drop(&mut self) {
        // Release the wheel when the controller handle goes away
        if let Some(bus) = self.bus.as_mut() {
            if let Err(e) = bus.set_current(0.0) {
                warn!("Failed to release motor {} on drop: {}", self.side.port, e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SimDrive {
    Speed(f64),
    Current(f64),
}

/// Simulated motor following the commanded eRPM with a first-order lag
pub struct SimMotor {
    name: String,
    drive: SimDrive,
    erpm: f64,
    updated_at: Instant,
}

impl SimMotor {
    const TIME_CONSTANT: f64 = 0.3;
    const COAST_TIME_CONSTANT: f64 = 3.0;
    const NOMINAL_VOLTAGE: f64 = 40.0;
    const AMPS_PER_ERPM: f64 = 0.002;

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            drive: SimDrive::Current(0.0),
            erpm: 0.0,
            updated_at: Instant::now(),
        }
    }

    fn advance(&mut self) -> f64 {
        let dt = self.updated_at.elapsed().as_secs_f64();
        self.updated_at = Instant::now();

        let (target, tau, current) = match self.drive {
            SimDrive::Speed(target) => {
                let friction = if self.erpm.abs() > 1.0 { self.erpm.signum() * 0.5 } else { 0.0 };
                let current = (target - self.erpm) * Self::AMPS_PER_ERPM + friction;
                (target, Self::TIME_CONSTANT, current)
            }
            // Released: coast down, current only from the command itself
            SimDrive::Current(amps) => (0.0, Self::COAST_TIME_CONSTANT, amps),
        };
        self.erpm += (target - self.erpm) * (dt / tau).min(1.0);
        current
    }
}

impl MotorController for SimMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn measurements(&mut self) -> Result<MotorFeedback> {
        let current = self.advance();
        Ok(MotorFeedback {
            rpm: self.erpm,
            avg_current: current,
            bus_voltage: Self::NOMINAL_VOLTAGE - 0.05 * current.abs(),
            fet_temp: 30.0 + 0.1 * current.abs(),
        })
    }

    fn set_rpm(&mut self, erpm: f64) -> Result<()> {
        self.advance();
        self.drive = SimDrive::Speed(erpm);
        Ok(())
    }

    fn set_current(&mut self, amps: f64) -> Result<()> {
        self.advance();
        self.drive = SimDrive::Current(amps);
        Ok(())
    }
}
