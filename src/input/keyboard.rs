// Keyboard stand-in for the joystick: WASD axes, E drive, N neutral, 1-4 tiers,
// Space quick-turn, Q/Esc/Ctrl-C quit

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::Notify;
use tracing::{info, warn};

use super::joystick::{JoystickDevice, JoystickError};
use crate::drive::ModeBindings;
use crate::messages::{ButtonId, ButtonSet, JoystickSample};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
// Axes fall back to centre after this much time with no movement key
const INPUT_TIMEOUT: Duration = Duration::from_millis(150);
// Momentary buttons stay pressed long enough for the control loop to see them
const BUTTON_HOLD: Duration = Duration::from_millis(150);

#[derive(Debug)]
struct KeyState {
    vertical: f64,
    horizontal: f64,
    last_movement: Instant,
    drive_enable: bool,
    neutral_enable: bool,
    momentary: Vec<(ButtonId, Instant)>,
    connected: bool,
}

impl KeyState {
    fn new() -> Self {
        Self {
            vertical: 0.0,
            horizontal: 0.0,
            last_movement: Instant::now(),
            drive_enable: false,
            neutral_enable: false,
            momentary: Vec::new(),
            connected: false,
        }
    }

    fn press(&mut self, button: ButtonId) {
        self.momentary.retain(|&(b, _)| b != button);
        self.momentary.push((button, Instant::now()));
    }
}

pub struct KeyboardJoystick {
    bindings: ModeBindings,
    state: Arc<Mutex<KeyState>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    quit: Arc<Notify>,
}

impl KeyboardJoystick {
    pub fn new(bindings: ModeBindings) -> Self {
        Self {
            bindings,
            state: Arc::new(Mutex::new(KeyState::new())),
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
            quit: Arc::new(Notify::new()),
        }
    }

    /// Notified when the operator presses Q, Esc or Ctrl-C
    pub fn quit_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.quit)
    }

    fn lock(&self) -> MutexGuard<'_, KeyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn handle_key(key: KeyEvent, bindings: &ModeBindings, state: &mut KeyState) -> bool {
    if key.kind != KeyEventKind::Press && key.kind != KeyEventKind::Repeat {
        return true;
    }
    let moved = |state: &mut KeyState| state.last_movement = Instant::now();

    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return false,
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::Char('w') => {
            state.vertical = 1.0;
            moved(state);
        }
        KeyCode::Char('s') => {
            state.vertical = -1.0;
            moved(state);
        }
        KeyCode::Char('a') => {
            state.horizontal = -1.0;
            moved(state);
        }
        KeyCode::Char('d') => {
            state.horizontal = 1.0;
            moved(state);
        }
        KeyCode::Char('e') if key.kind == KeyEventKind::Press => {
            state.drive_enable = !state.drive_enable;
            info!("Drive enable: {}", state.drive_enable);
        }
        KeyCode::Char('n') if key.kind == KeyEventKind::Press => {
            state.neutral_enable = !state.neutral_enable;
            info!("Neutral enable: {}", state.neutral_enable);
        }
        KeyCode::Char('1') => state.press(bindings.chill),
        KeyCode::Char('2') => state.press(bindings.standard),
        KeyCode::Char('3') => state.press(bindings.sport),
        KeyCode::Char('4') => state.press(bindings.insane),
        KeyCode::Char(' ') => {
            if let Some(button) = bindings.quick_turn {
                state.press(button);
            }
        }
        _ => {}
    }
    true
}

fn read_keys(
    bindings: ModeBindings,
    state: Arc<Mutex<KeyState>>,
    stop: Arc<AtomicBool>,
    quit: Arc<Notify>,
) {
    while !stop.load(Ordering::Relaxed) {
        match event::poll(POLL_INTERVAL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                warn!("Keyboard poll failed: {}", e);
                break;
            }
        }
        match event::read() {
            Ok(Event::Key(key)) => {
                let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                if !handle_key(key, &bindings, &mut guard) {
                    info!("Quit requested from keyboard");
                    stop.store(true, Ordering::Relaxed);
                    quit.notify_one();
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Keyboard read failed: {}", e);
                break;
            }
        }
    }
    state.lock().unwrap_or_else(PoisonError::into_inner).connected = false;
}

impl JoystickDevice for KeyboardJoystick {
    // Once quit (or a terminal failure) stopped the reader, the keyboard stays unavailable
    fn is_available(&mut self) -> bool {
        !self.stop.load(Ordering::Relaxed) && std::io::stdin().is_terminal()
    }

    fn connect(&mut self) -> Result<(), JoystickError> {
        if !std::io::stdin().is_terminal() {
            return Err(JoystickError::NotAvailable("stdin is not a terminal".to_string()));
        }
        enable_raw_mode().map_err(JoystickError::Terminal)?;
        *self.lock() = KeyState {
            connected: true,
            ..KeyState::new()
        };
        self.stop.store(false, Ordering::Relaxed);

        let bindings = self.bindings.clone();
        let state = Arc::clone(&self.state);
        let stop = Arc::clone(&self.stop);
        let quit = Arc::clone(&self.quit);
        let reader = thread::Builder::new()
            .name("keyboard-reader".to_string())
            .spawn(move || read_keys(bindings, state, stop, quit));
        match reader {
            Ok(handle) => self.reader = Some(handle),
            Err(e) => {
                if let Err(raw) = disable_raw_mode() {
                    warn!("Failed to restore terminal: {}", raw);
                }
                return Err(JoystickError::Io(e));
            }
        }

        info!("Keyboard joystick: WASD=move, E=drive, N=neutral, 1-4=tier, Space=quick-turn, Q=quit");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn sample(&self) -> JoystickSample {
        let mut state = self.lock();
        if state.last_movement.elapsed() > INPUT_TIMEOUT {
            state.vertical = 0.0;
            state.horizontal = 0.0;
        }
        state.momentary.retain(|&(_, at)| at.elapsed() <= BUTTON_HOLD);

        let mut buttons = ButtonSet::empty();
        buttons.set(self.bindings.drive_enable, state.drive_enable);
        buttons.set(self.bindings.neutral_enable, state.neutral_enable);
        for &(button, _) in &state.momentary {
            buttons.insert(button);
        }

        JoystickSample {
            vertical: state.vertical,
            horizontal: state.horizontal,
            buttons,
        }
    }

    fn disconnect(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            // Bounded by POLL_INTERVAL
            if reader.join().is_err() {
                warn!("Keyboard reader thread panicked");
            }
        }
        self.lock().connected = false;
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

impl Drop for KeyboardJoystick {
    fn drop(&mut self) {
        if self.reader.is_some() {
            self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_movement_keys_set_axes() {
        let bindings = ModeBindings::default();
        let mut state = KeyState::new();
        assert!(handle_key(press(KeyCode::Char('w')), &bindings, &mut state));
        assert!(handle_key(press(KeyCode::Char('d')), &bindings, &mut state));
        assert_eq!(state.vertical, 1.0);
        assert_eq!(state.horizontal, 1.0);
    }

    #[test]
    fn test_enable_keys_toggle() {
        let bindings = ModeBindings::default();
        let mut state = KeyState::new();
        handle_key(press(KeyCode::Char('e')), &bindings, &mut state);
        assert!(state.drive_enable);
        handle_key(press(KeyCode::Char('e')), &bindings, &mut state);
        assert!(!state.drive_enable);
    }

    #[test]
    fn test_quit_keys() {
        let bindings = ModeBindings::default();
        let mut state = KeyState::new();
        assert!(!handle_key(press(KeyCode::Char('q')), &bindings, &mut state));
        assert!(!handle_key(press(KeyCode::Esc), &bindings, &mut state));
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(!handle_key(ctrl_c, &bindings, &mut state));
    }

    #[test]
    fn test_sample_reports_toggles_and_tiers() {
        let bindings = ModeBindings::default();
        let keyboard = KeyboardJoystick::new(bindings.clone());
        {
            let mut state = keyboard.lock();
            handle_key(press(KeyCode::Char('e')), &bindings, &mut state);
            handle_key(press(KeyCode::Char('3')), &bindings, &mut state);
        }
        let sample = keyboard.sample();
        assert!(sample.buttons.contains(bindings.drive_enable));
        assert!(sample.buttons.contains(bindings.sport));
        assert!(!sample.buttons.contains(bindings.neutral_enable));
    }

    #[test]
    fn test_axes_time_out() {
        let bindings = ModeBindings::default();
        let keyboard = KeyboardJoystick::new(bindings.clone());
        {
            let mut state = keyboard.lock();
            handle_key(press(KeyCode::Char('w')), &bindings, &mut state);
            state.last_movement = Instant::now() - Duration::from_secs(1);
        }
        assert_eq!(keyboard.sample().vertical, 0.0);
    }
}
