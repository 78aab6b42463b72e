// Drive logic for the two-wheel couch base
//
// Provides:
// - Differential-drive inverse kinematics (arcade, curvature, curvature with quick-turn)
// - Wheel-speed desaturation
// - Drive-mode state machine and button bindings

pub mod kinematics;
pub mod mode;

pub use kinematics::{desaturate, DriveFlags, DriveStrategy, QuickTurnPolicy};
pub use mode::{DriveMode, DriveModeMachine, ModeBindings, ModeInputDecoder, ModeInputs};
