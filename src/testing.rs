// Test doubles for the joystick, motor and telemetry collaborators
//
// Each double is a cheap handle over shared state: clone it, hand one copy to
// the code under test and keep the other to script or inspect.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::input::{JoystickDevice, JoystickError};
use crate::messages::{DashboardMessage, JoystickSample, MotorFeedback};
use crate::motor::vesc::{MotorError, Result};
use crate::motor::MotorController;
use crate::telemetry::{TelemetryError, TelemetrySink};

#[derive(Debug, Default)]
struct ScriptState {
    available: bool,
    connected: bool,
    sample: JoystickSample,
    connects: u32,
}

#[derive(Clone, Default)]
pub struct ScriptedJoystick {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedJoystick {
    /// Plugged in and not yet connected
    pub fn new(sample: JoystickSample) -> Self {
        let joystick = Self::default();
        joystick.lock().available = true;
        joystick.lock().sample = sample;
        joystick
    }

    pub fn unplugged() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }

    pub fn set_sample(&self, sample: JoystickSample) {
        self.lock().sample = sample;
    }

    pub fn plug(&self) {
        self.lock().available = true;
    }

    /// Device vanishes: reads stop and it is no longer available
    pub fn unplug(&self) {
        let mut state = self.lock();
        state.available = false;
        state.connected = false;
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }
}

impl JoystickDevice for ScriptedJoystick {
    fn is_available(&mut self) -> bool {
        self.lock().available
    }

    fn connect(&mut self) -> std::result::Result<(), JoystickError> {
        let mut state = self.lock();
        if !state.available {
            return Err(JoystickError::NotAvailable("unplugged".to_string()));
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn sample(&self) -> JoystickSample {
        self.lock().sample
    }

    fn disconnect(&mut self) {
        self.lock().connected = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCall {
    Rpm(f64),
    Current(f64),
}

#[derive(Debug, Default)]
struct MotorLog {
    calls: Vec<MotorCall>,
    feedback: MotorFeedback,
    fail_reads: bool,
    fail_commands: bool,
}

/// Records accepted commands and serves scripted feedback
#[derive(Clone)]
pub struct RecordingMotor {
    name: String,
    log: Arc<Mutex<MotorLog>>,
}

impl RecordingMotor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::new(Mutex::new(MotorLog::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MotorLog> {
        self.log.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<MotorCall> {
        self.lock().calls.clone()
    }

    pub fn last_call(&self) -> Option<MotorCall> {
        self.lock().calls.last().copied()
    }

    pub fn set_feedback(&self, feedback: MotorFeedback) {
        self.lock().feedback = feedback;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Rejected commands are not recorded
    pub fn fail_commands(&self, fail: bool) {
        self.lock().fail_commands = fail;
    }

    fn record(&self, call: MotorCall) -> Result<()> {
        let mut log = self.lock();
        if log.fail_commands {
            return Err(MotorError::Timeout {
                port: self.name.clone(),
            });
        }
        log.calls.push(call);
        Ok(())
    }
}

impl MotorController for RecordingMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn measurements(&mut self) -> Result<MotorFeedback> {
        let log = self.lock();
        if log.fail_reads {
            return Err(MotorError::Timeout {
                port: self.name.clone(),
            });
        }
        Ok(log.feedback)
    }

    fn set_rpm(&mut self, erpm: f64) -> Result<()> {
        self.record(MotorCall::Rpm(erpm))
    }

    fn set_current(&mut self, amps: f64) -> Result<()> {
        self.record(MotorCall::Current(amps))
    }
}

#[derive(Debug, Default)]
struct SinkState {
    messages: Vec<DashboardMessage>,
    fail_remaining: u32,
}

/// Keeps every delivered message; can reject the first N
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(count: u32) -> Self {
        let sink = Self::default();
        sink.state.lock().unwrap().fail_remaining = count;
        sink
    }

    pub fn messages(&self) -> Vec<DashboardMessage> {
        self.state.lock().unwrap().messages.clone()
    }
}

impl TelemetrySink for MemorySink {
    async fn publish(&mut self, message: DashboardMessage) -> std::result::Result<(), TelemetryError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            return Err(TelemetryError::Transport("sink offline".to_string()));
        }
        state.messages.push(message);
        Ok(())
    }
}

/// Never completes a publish
pub struct HangingSink;

impl TelemetrySink for HangingSink {
    async fn publish(&mut self, _message: DashboardMessage) -> std::result::Result<(), TelemetryError> {
        std::future::pending().await
    }
}
