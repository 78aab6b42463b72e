// Joystick-driven control runtime for a two-wheel differential couch

pub mod config;
pub mod control;
pub mod drive;
pub mod input;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod telemetry;

#[cfg(test)]
mod testing;
