// Motor control module for the couch base
//
// Provides:
// - VESC UART protocol implementation
// - The `MotorController` interface with VESC-backed and simulated controllers

mod driver;
pub mod vesc;

pub use driver::{MotorController, MotorSideConfig, MotorsConfig, SimMotor, VescMotor};
pub use vesc::{MotorError, VescBus};
