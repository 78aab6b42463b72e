// Joystick input conditioning
//
// raw axis -> sanitize -> deadzone (with hysteresis) -> signed square
//          -> exponential smoothing -> slew-rate limit
//
// Smoothing and slew limiting damp the feedback loop between the rider
// bouncing on the couch and the stick moving under their hand.

use serde::{Deserialize, Serialize};

use crate::messages::{ConditionedInput, JoystickSample};

/// Bounds for the elapsed time fed to the slew limiter (seconds)
pub const MIN_DT: f64 = 0.001;
pub const MAX_DT: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub deadband: f64,
    pub hysteresis: f64,
    pub square_speed: bool,
    pub square_rotation: bool,
    /// 0.0 = no smoothing, closer to 1.0 = heavier damping
    pub smoothing: f64,
    /// Maximum change of either axis per second
    pub max_accel_per_sec: f64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            deadband: 0.05,
            hysteresis: 0.02,
            square_speed: true,
            square_rotation: true,
            smoothing: 0.15,
            max_accel_per_sec: 2.0,
        }
    }
}

/// NaN becomes 0, everything else is clamped to [-1, 1]
pub fn sanitize_axis(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(-1.0, 1.0) }
}

/// Clamp elapsed time into [MIN_DT, MAX_DT]; zero, negative and NaN map to MIN_DT
pub fn clamp_dt(dt: f64) -> f64 {
    if dt.is_nan() {
        MIN_DT
    } else {
        dt.clamp(MIN_DT, MAX_DT)
    }
}

/// Deadzone with a linear ramp across [deadband - h, deadband + h].
///
/// Below the band the output is 0, above it the input passes through, and the
/// ramp joins the two without a jump. Odd in `x`.
pub fn deadzone_with_hysteresis(x: f64, deadband: f64, hysteresis: f64) -> f64 {
    let magnitude = x.abs();
    let lower = (deadband - hysteresis).max(0.0);
    let upper = deadband + hysteresis.max(0.0);

    if magnitude < lower {
        0.0
    } else if magnitude < upper {
        x.signum() * upper * (magnitude - lower) / (upper - lower)
    } else {
        x
    }
}

/// Square the magnitude, keep the sign
pub fn signed_square(x: f64) -> f64 {
    x.abs() * x
}

/// Exponential moving average: `(1 - k) * raw + k * previous`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExpSmoother {
    factor: f64,
    value: f64,
}

impl ExpSmoother {
    pub fn new(factor: f64) -> Self {
        Self {
            factor: factor.clamp(0.0, 0.999),
            value: 0.0,
        }
    }

    pub fn apply(&mut self, raw: f64) -> f64 {
        self.value = (1.0 - self.factor) * raw + self.factor * self.value;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

/// Caps the change in output to `max_rate_per_sec * dt` per call
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlewLimiter {
    max_rate_per_sec: f64,
    value: f64,
}

impl SlewLimiter {
    pub fn new(max_rate_per_sec: f64) -> Self {
        Self {
            max_rate_per_sec: max_rate_per_sec.abs(),
            value: 0.0,
        }
    }

    pub fn apply(&mut self, target: f64, dt: f64) -> f64 {
        let max_change = self.max_rate_per_sec * clamp_dt(dt);
        let diff = target - self.value;
        self.value = if diff.abs() > max_change {
            self.value + max_change.copysign(diff)
        } else {
            target
        };
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

/// Filter state for one axis
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisState {
    pub smoother: ExpSmoother,
    pub slew: SlewLimiter,
}

impl AxisState {
    fn new(config: &InputConfig) -> Self {
        Self {
            smoother: ExpSmoother::new(config.smoothing),
            slew: SlewLimiter::new(config.max_accel_per_sec),
        }
    }

    fn reset(&mut self) {
        self.smoother.reset();
        self.slew.reset();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SmootherState {
    pub speed: AxisState,
    pub rotation: AxisState,
}

impl SmootherState {
    pub fn new(config: &InputConfig) -> Self {
        Self {
            speed: AxisState::new(config),
            rotation: AxisState::new(config),
        }
    }
}

/// Condition one joystick sample. `dt` is the time since the previous call in seconds.
pub fn condition(
    raw: &JoystickSample,
    dt: f64,
    config: &InputConfig,
    state: &mut SmootherState,
) -> ConditionedInput {
    let shape = |value: f64, square: bool| {
        let value = deadzone_with_hysteresis(sanitize_axis(value), config.deadband, config.hysteresis);
        if square { signed_square(value) } else { value }
    };

    let speed = shape(raw.vertical, config.square_speed);
    let rotation = shape(raw.horizontal, config.square_rotation);

    let speed = state.speed.slew.apply(state.speed.smoother.apply(speed), dt);
    let rotation = state
        .rotation
        .slew
        .apply(state.rotation.smoother.apply(rotation), dt);

    ConditionedInput {
        speed: speed.clamp(-1.0, 1.0),
        rotation: rotation.clamp(-1.0, 1.0),
    }
}

/// Config plus filter state, owned by a single control loop
pub struct InputConditioner {
    config: InputConfig,
    state: SmootherState,
}

impl InputConditioner {
    pub fn new(config: InputConfig) -> Self {
        let state = SmootherState::new(&config);
        Self { config, state }
    }

    pub fn condition(&mut self, raw: &JoystickSample, dt: f64) -> ConditionedInput {
        condition(raw, dt, &self.config, &mut self.state)
    }

    pub fn state(&self) -> &SmootherState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state.speed.reset();
        self.state.rotation.reset();
    }
}
