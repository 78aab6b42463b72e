// One fixed-cadence control tick:
// sample -> condition -> mode -> kinematics -> scale/limit -> motors -> feedback -> snapshot
//
// ControlLoop holds everything the control context writes; the only thing that
// leaves it is the TelemetrySnapshot, replaced whole in a watch slot.

use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ControlConfig, RuntimeConfig};
use crate::drive::{DriveFlags, DriveMode, DriveModeMachine, DriveStrategy, ModeInputDecoder};
use crate::input::{InputConditioner, SlewLimiter};
use crate::messages::{
    JoystickSample, MotorFeedback, RuntimeHealth, TelemetrySnapshot, WheelCommand,
};
use crate::motor::MotorController;
use crate::telemetry::{derive_snapshot, VehicleConfig};

/// What one wheel is told to do for a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCommand {
    /// Zero-velocity hold (brake)
    Hold,
    /// Zero-current release (freewheel)
    Release,
    /// Closed-loop speed, eRPM
    Speed(f64),
}

impl MotorCommand {
    /// Must go out now even when re-issuing is throttled: a change of kind,
    /// or a moving wheel told to stop
    fn bypasses_throttle(self, previous: MotorCommand) -> bool {
        match (previous, self) {
            (MotorCommand::Speed(before), MotorCommand::Speed(now)) => now == 0.0 && before != 0.0,
            (before, now) => std::mem::discriminant(&before) != std::mem::discriminant(&now),
        }
    }
}

struct MotorSide {
    motor: Box<dyn MotorController>,
    slew: Option<SlewLimiter>,
    feedback: Option<MotorFeedback>,
    read_failures: u32,
    command_failing: bool,
}

impl MotorSide {
    fn new(motor: Box<dyn MotorController>, slew_per_sec: Option<f64>) -> Self {
        Self {
            motor,
            slew: slew_per_sec.map(SlewLimiter::new),
            feedback: None,
            read_failures: 0,
            command_failing: false,
        }
    }

    fn limit(&mut self, target: f64, dt: f64) -> f64 {
        match self.slew.as_mut() {
            Some(slew) => slew.apply(target, dt),
            None => target,
        }
    }

    fn reset_slew(&mut self) {
        if let Some(slew) = self.slew.as_mut() {
            slew.reset();
        }
    }

    fn command(&mut self, command: MotorCommand) {
        let result = match command {
            MotorCommand::Hold => self.motor.set_rpm(0.0),
            MotorCommand::Release => self.motor.set_current(0.0),
            MotorCommand::Speed(erpm) => self.motor.set_rpm(erpm),
        };
        match result {
            Ok(()) => {
                if self.command_failing {
                    info!("Motor {} accepting commands again", self.motor.name());
                    self.command_failing = false;
                }
            }
            Err(e) if self.command_failing => {
                debug!("Motor {} command failed: {}", self.motor.name(), e);
            }
            Err(e) => {
                warn!("Motor {} command failed: {}", self.motor.name(), e);
                self.command_failing = true;
            }
        }
    }

    /// Latest feedback, or the retained value on a failed read. The bool is true
    /// when the value is no longer trustworthy and "stopped" is substituted.
    fn read_feedback(&mut self, stale_after: u32) -> (MotorFeedback, bool) {
        match self.motor.measurements() {
            Ok(feedback) => {
                if self.read_failures > 0 {
                    info!(
                        "Motor {} feedback recovered after {} failed reads",
                        self.motor.name(),
                        self.read_failures
                    );
                }
                self.read_failures = 0;
                self.feedback = Some(feedback);
            }
            Err(e) => {
                self.read_failures = self.read_failures.saturating_add(1);
                if self.read_failures == 1 {
                    warn!("Motor {} feedback read failed: {}", self.motor.name(), e);
                } else {
                    debug!(
                        "Motor {} feedback read failed ({} in a row): {}",
                        self.motor.name(),
                        self.read_failures,
                        e
                    );
                }
            }
        }

        match self.feedback {
            Some(feedback) if self.read_failures < stale_after => (feedback, false),
            _ => (MotorFeedback::stopped(), true),
        }
    }
}

pub struct ControlLoop {
    control: ControlConfig,
    strategy: DriveStrategy,
    vehicle: VehicleConfig,
    max_erpm: f64,
    conditioner: InputConditioner,
    decoder: ModeInputDecoder,
    machine: DriveModeMachine,
    left: MotorSide,
    right: MotorSide,
    last_issue: Option<(Instant, MotorCommand, MotorCommand)>,
    over_speed: bool,
    snapshot: TelemetrySnapshot,
    snapshots: watch::Sender<TelemetrySnapshot>,
}

impl ControlLoop {
    pub fn new(
        config: &RuntimeConfig,
        left: Box<dyn MotorController>,
        right: Box<dyn MotorController>,
        snapshots: watch::Sender<TelemetrySnapshot>,
    ) -> Self {
        let slew = config.drive.wheel_slew_per_sec;
        Self {
            control: config.control.clone(),
            strategy: config.drive.strategy,
            vehicle: config.vehicle.clone(),
            max_erpm: config.motors.max_erpm,
            conditioner: InputConditioner::new(config.input.clone()),
            decoder: ModeInputDecoder::new(config.drive.bindings.clone()),
            machine: DriveModeMachine::new(),
            left: MotorSide::new(left, slew),
            right: MotorSide::new(right, slew),
            last_issue: None,
            over_speed: false,
            snapshot: TelemetrySnapshot::default(),
            snapshots,
        }
    }

    pub fn mode(&self) -> DriveMode {
        self.machine.mode()
    }

    /// Snapshot published by the most recent tick
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot
    }

    /// Run one tick with a fresh joystick sample; `dt` is seconds since the last tick
    pub fn tick(&mut self, sample: &JoystickSample, dt: f64) -> TelemetrySnapshot {
        let input = self.conditioner.condition(sample, dt);
        let inputs = self.decoder.decode(sample.buttons);
        let flags = DriveFlags {
            quick_turn_button: self.decoder.quick_turn_pressed(sample.buttons),
        };
        let mode = self.machine.update(&inputs);

        let (left, right) = if mode.is_moving() {
            let target = self.strategy.compute(input, flags).scaled(mode.multiplier());
            let target = self.limit(target, dt);
            (
                MotorCommand::Speed(target.left * self.max_erpm),
                MotorCommand::Speed(target.right * self.max_erpm),
            )
        } else {
            // Park and Neutral never see the kinematics output
            self.left.reset_slew();
            self.right.reset_slew();
            let command = if mode == DriveMode::Park {
                MotorCommand::Hold
            } else {
                MotorCommand::Release
            };
            (command, command)
        };

        if self.command_due(left, right) {
            self.left.command(left);
            self.right.command(right);
            self.last_issue = Some((Instant::now(), left, right));
        }

        self.publish(mode, RuntimeHealth::Ok)
    }

    /// Wheel slew limiting and the over-speed cutoff on the scaled targets
    fn limit(&mut self, target: WheelCommand, dt: f64) -> WheelCommand {
        let speed = self.snapshot.speed_mph.abs();
        let over = self.control.max_safe_speed_mph.is_some_and(|max| speed > max);
        if over {
            if !self.over_speed {
                warn!("Speed {:.1} mph over limit, cutting wheel targets", speed);
                self.over_speed = true;
            }
            self.left.reset_slew();
            self.right.reset_slew();
            return WheelCommand::zero();
        }
        if self.over_speed {
            info!("Speed back under limit");
            self.over_speed = false;
        }
        WheelCommand::new(self.left.limit(target.left, dt), self.right.limit(target.right, dt))
    }

    fn command_due(&self, left: MotorCommand, right: MotorCommand) -> bool {
        let Some(interval) = self.control.min_command_interval() else {
            return true;
        };
        let Some((at, last_left, last_right)) = self.last_issue else {
            return true;
        };
        at.elapsed() >= interval
            || left.bypasses_throttle(last_left)
            || right.bypasses_throttle(last_right)
    }

    fn publish(&mut self, mode: DriveMode, health: RuntimeHealth) -> TelemetrySnapshot {
        let stale_after = self.control.feedback_stale_ticks;
        let (left, left_stale) = self.left.read_feedback(stale_after);
        let (right, right_stale) = self.right.read_feedback(stale_after);
        let health = if health == RuntimeHealth::Ok && (left_stale || right_stale) {
            RuntimeHealth::FeedbackStale
        } else {
            health
        };

        self.snapshot = derive_snapshot(&left, &right, mode, health, &self.vehicle);
        self.snapshots.send_replace(self.snapshot);
        self.snapshot
    }

    /// Joystick lost: hold the wheels once, then forget all input state
    pub fn on_disconnect(&mut self) -> TelemetrySnapshot {
        warn!("Joystick disconnected, holding wheels");
        self.left.command(MotorCommand::Hold);
        self.right.command(MotorCommand::Hold);

        self.conditioner.reset();
        self.decoder.reset();
        self.machine.reset();
        self.left.reset_slew();
        self.right.reset_slew();
        self.last_issue = None;
        self.over_speed = false;

        self.publish(DriveMode::Park, RuntimeHealth::JoystickDisconnected)
    }

    /// Keep telemetry live while waiting for the joystick; issues no commands
    pub fn idle(&mut self) -> TelemetrySnapshot {
        self.publish(self.machine.mode(), RuntimeHealth::JoystickDisconnected)
    }

    /// Release both wheels before the control context exits
    pub fn shutdown(&mut self) {
        info!("Releasing motors");
        self.left.command(MotorCommand::Release);
        self.right.command(MotorCommand::Release);
        self.machine.reset();
    }
}
