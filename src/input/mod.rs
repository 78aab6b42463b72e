// Joystick input: device drivers and conditioning
//
// Provides:
// - The `JoystickDevice` interface the control loop polls
// - Linux joystick driver (/dev/input/jsN) and a keyboard stand-in
// - Input conditioning (deadzone, shaping, smoothing, slew limiting)

pub mod conditioner;
pub mod joystick;
pub mod keyboard;

pub use conditioner::{InputConditioner, InputConfig, SlewLimiter};
pub use joystick::{JoystickConfig, JoystickDevice, JoystickError, LinuxJoystick};
pub use keyboard::KeyboardJoystick;
