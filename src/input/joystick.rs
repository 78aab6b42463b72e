// Joystick device interface and the Linux joystick (/dev/input/jsN) driver
//
// The driver reads events on a background thread and keeps the latest axis and
// button state; the control loop only ever takes a snapshot of that state.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::messages::{ButtonSet, JoystickSample};

/// Error types for joystick devices
#[derive(Debug, thiserror::Error)]
pub enum JoystickError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Joystick not available: {0}")]
    NotAvailable(String),

    #[error("Terminal error: {0}")]
    Terminal(std::io::Error),
}

/// A joystick the control loop can wait for, connect to and poll
pub trait JoystickDevice: Send {
    /// Whether the device is present and can be connected
    fn is_available(&mut self) -> bool;

    /// Open the device and start background polling
    fn connect(&mut self) -> Result<(), JoystickError>;

    fn is_connected(&self) -> bool;

    /// Latest axis and button state
    fn sample(&self) -> JoystickSample;

    fn disconnect(&mut self);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JoystickConfig {
    /// Drive from the keyboard instead of a joystick device
    pub keyboard: bool,
    pub device: String,
    pub vertical_axis: u8,
    pub horizontal_axis: u8,
    /// Most sticks report "up" as negative
    pub invert_vertical: bool,
    pub invert_horizontal: bool,
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self {
            keyboard: false,
            device: crate::config::JOYSTICK_DEVICE.to_string(),
            vertical_axis: 1,
            horizontal_axis: 0,
            invert_vertical: true,
            invert_horizontal: false,
        }
    }
}

/// js_event size: u32 time, i16 value, u8 type, u8 number
const EVENT_SIZE: usize = 8;
const JS_EVENT_BUTTON: u8 = 0x01;
const JS_EVENT_AXIS: u8 = 0x02;
const JS_EVENT_INIT: u8 = 0x80;
const MAX_AXES: usize = 16;
const AXIS_SCALE: f64 = 32767.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsEventKind {
    Button,
    Axis,
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsEvent {
    pub time_ms: u32,
    pub value: i16,
    pub kind: JsEventKind,
    pub number: u8,
    /// Synthetic event describing initial state
    pub init: bool,
}

/// Decode one js_event record (host byte order)
pub fn parse_event(raw: &[u8; EVENT_SIZE]) -> JsEvent {
    let time_ms = u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let value = i16::from_ne_bytes([raw[4], raw[5]]);
    let kind = match raw[6] & !JS_EVENT_INIT {
        JS_EVENT_BUTTON => JsEventKind::Button,
        JS_EVENT_AXIS => JsEventKind::Axis,
        other => JsEventKind::Other(other),
    };
    JsEvent {
        time_ms,
        value,
        kind,
        number: raw[7],
        init: raw[6] & JS_EVENT_INIT != 0,
    }
}

#[derive(Debug, Default)]
struct JsState {
    axes: [f64; MAX_AXES],
    buttons: ButtonSet,
    connected: bool,
}

impl JsState {
    fn apply(&mut self, event: &JsEvent) {
        match event.kind {
            JsEventKind::Axis => {
                if let Some(axis) = self.axes.get_mut(usize::from(event.number)) {
                    *axis = (f64::from(event.value) / AXIS_SCALE).clamp(-1.0, 1.0);
                }
            }
            JsEventKind::Button => self.buttons.set(event.number, event.value != 0),
            JsEventKind::Other(kind) => debug!("Ignoring joystick event type 0x{:02X}", kind),
        }
    }
}

pub struct LinuxJoystick {
    config: JoystickConfig,
    state: Arc<Mutex<JsState>>,
    stop: Arc<AtomicBool>,
}

impl LinuxJoystick {
    pub fn new(config: JoystickConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(JsState::default())),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_events(mut file: File, state: Arc<Mutex<JsState>>, stop: Arc<AtomicBool>) {
    let mut raw = [0u8; EVENT_SIZE];
    loop {
        if let Err(e) = file.read_exact(&mut raw) {
            warn!("Joystick read failed: {}", e);
            break;
        }
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let event = parse_event(&raw);
        state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(&event);
    }
    state.lock().unwrap_or_else(PoisonError::into_inner).connected = false;
}

impl JoystickDevice for LinuxJoystick {
    fn is_available(&mut self) -> bool {
        Path::new(&self.config.device).exists()
    }

    fn connect(&mut self) -> Result<(), JoystickError> {
        let file = File::open(&self.config.device)?;
        info!("Joystick connected on {}", self.config.device);

        // Fresh state and stop flag per connection; an old reader thread keeps its own
        self.state = Arc::new(Mutex::new(JsState {
            connected: true,
            ..JsState::default()
        }));
        self.stop = Arc::new(AtomicBool::new(false));

        let state = Arc::clone(&self.state);
        let stop = Arc::clone(&self.stop);
        thread::Builder::new()
            .name("joystick-reader".to_string())
            .spawn(move || read_events(file, state, stop))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn sample(&self) -> JoystickSample {
        let state = self.lock();
        let axis = |index: u8, invert: bool| {
            let value = state.axes.get(usize::from(index)).copied().unwrap_or(0.0);
            if invert { -value } else { value }
        };
        JoystickSample {
            vertical: axis(self.config.vertical_axis, self.config.invert_vertical),
            horizontal: axis(self.config.horizontal_axis, self.config.invert_horizontal),
            buttons: state.buttons,
        }
    }

    fn disconnect(&mut self) {
        // The reader thread may be parked in read(); it exits on its next event
        self.stop.store(true, Ordering::Relaxed);
        self.lock().connected = false;
        info!("Joystick {} disconnected", self.config.device);
    }
}
