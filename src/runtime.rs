// Drive runtime: the control thread, the telemetry task and their lifecycle
//
// Control runs on its own OS thread because joystick and motor I/O is blocking;
// telemetry is a tokio task. The two share nothing but the snapshot watch slot
// and the stop signal.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

use crate::config::RuntimeConfig;
use crate::control::ControlLoop;
use crate::input::{JoystickDevice, KeyboardJoystick, LinuxJoystick};
use crate::messages::TelemetrySnapshot;
use crate::motor::{MotorController, SimMotor, VescMotor};
use crate::telemetry::{TelemetryPublisher, TelemetrySink, ZenohSink};

// Upper bound on how long a sleep can ignore the stop signal
const STOP_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Runtime already started")]
    AlreadyStarted,

    #[error("Failed to spawn control thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Parts<S> {
    joystick: Box<dyn JoystickDevice>,
    control: ControlLoop,
    sink: S,
}

pub struct DriveRuntime<S> {
    config: RuntimeConfig,
    parts: Option<Parts<S>>,
    snapshots: watch::Receiver<TelemetrySnapshot>,
    stop: watch::Sender<bool>,
    control_thread: Option<JoinHandle<()>>,
    telemetry_task: Option<tokio::task::JoinHandle<()>>,
}

impl<S: TelemetrySink> DriveRuntime<S> {
    pub fn new(
        config: RuntimeConfig,
        joystick: Box<dyn JoystickDevice>,
        left: Box<dyn MotorController>,
        right: Box<dyn MotorController>,
        sink: S,
    ) -> Self {
        let (snapshot_tx, snapshots) = watch::channel(TelemetrySnapshot::default());
        let (stop, _) = watch::channel(false);
        let control = ControlLoop::new(&config, left, right, snapshot_tx);
        Self {
            config,
            parts: Some(Parts {
                joystick,
                control,
                sink,
            }),
            snapshots,
            stop,
            control_thread: None,
            telemetry_task: None,
        }
    }

    /// Spawn the control thread and the telemetry task. Needs a tokio runtime.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        let Parts {
            joystick,
            control,
            sink,
        } = self.parts.take().ok_or(RuntimeError::AlreadyStarted)?;

        let period = self.config.control.period();
        let reconnect = self.config.control.reconnect_interval();
        let stop = self.stop.subscribe();
        self.control_thread = Some(
            thread::Builder::new()
                .name("drive-control".to_string())
                .spawn(move || control_thread(joystick, control, stop, period, reconnect))?,
        );

        let publisher = TelemetryPublisher::new(
            sink,
            Duration::from_millis(self.config.telemetry.publish_timeout_ms),
        );
        self.telemetry_task = Some(tokio::spawn(publisher.run(
            self.snapshots.clone(),
            self.stop.subscribe(),
            self.config.control.telemetry_period(),
        )));

        info!(
            "Runtime started: {}Hz control, {}Hz telemetry",
            self.config.control.loop_hz, self.config.control.telemetry_hz
        );
        Ok(())
    }

    /// Signal both contexts and wait for them; the motors are released before this returns
    pub async fn stop(&mut self) {
        info!("Stopping runtime...");
        self.stop.send_replace(true);

        if let Some(handle) = self.control_thread.take() {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => error!("Control thread panicked"),
                Err(e) => error!("Failed to join control thread: {}", e),
            }
        }
        if let Some(task) = self.telemetry_task.take() {
            if let Err(e) = task.await {
                error!("Telemetry task failed: {}", e);
            }
        }
        info!("Runtime stopped");
    }

    /// Latest telemetry snapshot
    pub fn snapshot(&self) -> TelemetrySnapshot {
        *self.snapshots.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.snapshots.clone()
    }
}

impl<S> Drop for DriveRuntime<S> {
    fn drop(&mut self) {
        // The control thread still releases the motors on its way out
        self.stop.send_replace(true);
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

/// Sleep in short slices; false if stop was requested meanwhile
fn sleep_or_stop(duration: Duration, stop: &watch::Receiver<bool>) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop_requested(stop) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}

/// Poll for the joystick every `reconnect` until connected; false if stopped first
fn wait_for_joystick(
    joystick: &mut dyn JoystickDevice,
    control: &mut ControlLoop,
    stop: &watch::Receiver<bool>,
    period: Duration,
    reconnect: Duration,
) -> bool {
    let mut reported = false;
    let mut last_attempt: Option<Instant> = None;
    loop {
        if last_attempt.is_none_or(|at| at.elapsed() >= reconnect) {
            last_attempt = Some(Instant::now());
            if joystick.is_available() {
                match joystick.connect() {
                    Ok(()) => return true,
                    Err(e) => warn!("Joystick connect failed: {}", e),
                }
            } else if !reported {
                info!("Waiting for joystick...");
                reported = true;
            }
        }
        control.idle();
        if !sleep_or_stop(period, stop) {
            return false;
        }
    }
}

fn control_thread(
    mut joystick: Box<dyn JoystickDevice>,
    mut control: ControlLoop,
    stop: watch::Receiver<bool>,
    period: Duration,
    reconnect: Duration,
) {
    'session: while !stop_requested(&stop) {
        if !joystick.is_connected()
            && !wait_for_joystick(joystick.as_mut(), &mut control, &stop, period, reconnect)
        {
            break;
        }

        let mut last_tick = Instant::now().checked_sub(period).unwrap_or_else(Instant::now);
        let mut next_tick = Instant::now();
        while !stop_requested(&stop) {
            if !joystick.is_connected() {
                control.on_disconnect();
                joystick.disconnect();
                continue 'session;
            }

            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_secs_f64();
            last_tick = now;
            control.tick(&joystick.sample(), dt);

            // Fixed cadence; after an overrun start counting again from now
            next_tick += period;
            let now = Instant::now();
            if next_tick < now {
                next_tick = now;
            }
            if !sleep_or_stop(next_tick - now, &stop) {
                break;
            }
        }
    }

    control.shutdown();
    joystick.disconnect();
    info!("Control thread stopped");
}

fn build_joystick(config: &RuntimeConfig) -> (Box<dyn JoystickDevice>, Arc<Notify>) {
    if config.joystick.keyboard {
        let keyboard = KeyboardJoystick::new(config.drive.bindings.clone());
        let quit = keyboard.quit_signal();
        (Box::new(keyboard), quit)
    } else {
        info!("Using joystick {}", config.joystick.device);
        (
            Box::new(LinuxJoystick::new(config.joystick.clone())),
            Arc::new(Notify::new()),
        )
    }
}

fn build_motors(config: &RuntimeConfig) -> (Box<dyn MotorController>, Box<dyn MotorController>) {
    let motors = &config.motors;
    if motors.enabled {
        info!(
            "Motor control: VESC on {} (left), {} (right)",
            motors.left.port, motors.right.port
        );
        let reconnect = config.control.reconnect_interval();
        (
            Box::new(VescMotor::new(motors.left.clone(), motors.baudrate, reconnect)),
            Box::new(VescMotor::new(motors.right.clone(), motors.baudrate, reconnect)),
        )
    } else {
        info!("Motor control: simulated");
        (
            Box::new(SimMotor::new("sim-left")),
            Box::new(SimMotor::new("sim-right")),
        )
    }
}

pub async fn run(config: RuntimeConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    config.validate()?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers...");
    let sink = ZenohSink::new(&session, &config.telemetry).await?;

    let (joystick, quit) = build_joystick(&config);
    let (left, right) = build_motors(&config);

    let mut runtime = DriveRuntime::new(config, joystick, left, right, sink);
    runtime.start()?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Ctrl-C received");
        }
        _ = quit.notified() => {}
    }

    runtime.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveMode;
    use crate::messages::{ButtonSet, JoystickSample, RuntimeHealth};
    use crate::testing::{MemorySink, MotorCall, RecordingMotor, ScriptedJoystick};

    fn fast_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.control.loop_hz = 50;
        config.control.telemetry_hz = 20;
        config.control.reconnect_interval_ms = 20;
        config
    }

    fn driving(config: &RuntimeConfig) -> JoystickSample {
        let buttons: ButtonSet = [config.drive.bindings.drive_enable].into_iter().collect();
        JoystickSample::new(1.0, 0.0).with_buttons(buttons)
    }

    struct Fixture {
        runtime: DriveRuntime<MemorySink>,
        joystick: ScriptedJoystick,
        left: RecordingMotor,
        right: RecordingMotor,
        sink: MemorySink,
    }

    fn fixture(config: RuntimeConfig, joystick: ScriptedJoystick) -> Fixture {
        let left = RecordingMotor::new("left");
        let right = RecordingMotor::new("right");
        let sink = MemorySink::new();
        let runtime = DriveRuntime::new(
            config,
            Box::new(joystick.clone()),
            Box::new(left.clone()),
            Box::new(right.clone()),
            sink.clone(),
        );
        Fixture {
            runtime,
            joystick,
            left,
            right,
            sink,
        }
    }

    #[tokio::test]
    async fn test_stop_mid_run_releases_motors() {
        let config = fast_config();
        let period = config.control.period();
        let joystick = ScriptedJoystick::new(driving(&config));
        let mut f = fixture(config, joystick);
        f.runtime.start().unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.runtime.snapshot().mode, DriveMode::Chill);
        assert!(
            f.left.calls().iter().any(|c| matches!(c, MotorCall::Rpm(erpm) if *erpm > 0.0)),
            "left wheel was never driven"
        );

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(1), f.runtime.stop())
            .await
            .expect("stop hung");
        let elapsed = started.elapsed();
        assert!(
            elapsed < period * 5,
            "stop took {:?}, more than a few {:?} control periods",
            elapsed,
            period
        );

        assert_eq!(f.left.last_call(), Some(MotorCall::Current(0.0)));
        assert_eq!(f.right.last_call(), Some(MotorCall::Current(0.0)));
        assert!(!f.sink.messages().is_empty());

        // Nothing runs after stop
        let issued = f.left.calls().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(f.left.calls().len(), issued);
    }

    #[tokio::test]
    async fn test_waits_for_joystick_without_commands() {
        let config = fast_config();
        let sample = driving(&config);
        let mut f = fixture(config, ScriptedJoystick::unplugged());
        f.joystick.set_sample(sample);
        f.runtime.start().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.left.calls().is_empty(), "no commands before a joystick connects");
        assert_eq!(f.runtime.snapshot().health, RuntimeHealth::JoystickDisconnected);

        f.joystick.plug();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.joystick.connects(), 1);
        assert_eq!(f.runtime.snapshot().health, RuntimeHealth::Ok);
        assert!(!f.left.calls().is_empty());

        f.runtime.stop().await;
    }

    #[tokio::test]
    async fn test_disconnect_halts_commands_until_reconnect() {
        let config = fast_config();
        let joystick = ScriptedJoystick::new(driving(&config));
        let mut f = fixture(config, joystick);
        f.runtime.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        f.joystick.unplug();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.left.last_call(), Some(MotorCall::Rpm(0.0)));
        let snapshot = f.runtime.snapshot();
        assert_eq!(snapshot.mode, DriveMode::Park);
        assert_eq!(snapshot.health, RuntimeHealth::JoystickDisconnected);

        let issued = f.left.calls().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.left.calls().len(), issued, "commands issued while disconnected");

        f.joystick.plug();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.joystick.connects(), 2);
        assert!(f.left.calls().len() > issued);

        f.runtime.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let config = fast_config();
        let mut f = fixture(config, ScriptedJoystick::unplugged());
        f.runtime.start().unwrap();
        assert!(matches!(f.runtime.start(), Err(RuntimeError::AlreadyStarted)));
        f.runtime.stop().await;
    }

    #[tokio::test]
    async fn test_subscribers_see_whole_snapshots() {
        let config = fast_config();
        let joystick = ScriptedJoystick::new(driving(&config));
        let mut f = fixture(config, joystick);
        let feedback = crate::messages::MotorFeedback {
            rpm: 1500.0,
            avg_current: 2.0,
            bus_voltage: 40.0,
            fet_temp: 30.0,
        };
        f.left.set_feedback(feedback);
        f.right.set_feedback(feedback);
        let mut rx = f.runtime.subscribe();
        f.runtime.start().unwrap();

        for _ in 0..5 {
            rx.changed().await.unwrap();
            let snapshot = *rx.borrow_and_update();
            // Every field comes from the same tick's feedback
            assert!((snapshot.power_watts - 160.0).abs() < 1e-9);
            assert_eq!(snapshot.bus_voltage, 40.0);
        }
        f.runtime.stop().await;
    }
}
