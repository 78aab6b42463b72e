// Drive-mode state machine
//
// Park and Neutral gate the motors (brake hold / freewheel); the four moving
// tiers scale the kinematics output by a fixed multiplier.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::messages::{ButtonId, ButtonSet};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    #[default]
    Park,
    Neutral,
    Chill,
    Standard,
    Sport,
    Insane,
}

impl DriveMode {
    /// Moving tiers in button priority order; the slowest held tier wins
    pub const TIERS_BY_PRIORITY: [DriveMode; 4] = [
        DriveMode::Chill,
        DriveMode::Standard,
        DriveMode::Sport,
        DriveMode::Insane,
    ];

    /// Speed multiplier applied to the wheel command
    pub fn multiplier(self) -> f64 {
        match self {
            DriveMode::Park | DriveMode::Neutral => 0.0,
            DriveMode::Chill => 0.25,
            DriveMode::Standard => 0.5,
            DriveMode::Sport => 0.75,
            DriveMode::Insane => 1.0,
        }
    }

    pub fn is_moving(self) -> bool {
        !matches!(self, DriveMode::Park | DriveMode::Neutral)
    }

    /// Position in the full mode list (dashboard `speedMode`)
    pub fn index(self) -> u8 {
        self as u8
    }

    /// 1-based moving tier, 0 for Park and Neutral (dashboard `gear`)
    pub fn gear(self) -> u8 {
        if self.is_moving() {
            self.index() - 1
        } else {
            0
        }
    }
}

impl std::fmt::Display for DriveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DriveMode::Park => "park",
            DriveMode::Neutral => "neutral",
            DriveMode::Chill => "chill",
            DriveMode::Standard => "standard",
            DriveMode::Sport => "sport",
            DriveMode::Insane => "insane",
        };
        f.write_str(name)
    }
}

/// Mode-select inputs sampled once per tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeInputs {
    pub drive_enable: bool,
    pub neutral_enable: bool,
    /// Highest-priority tier button held this tick
    pub tier: Option<DriveMode>,
}

pub struct DriveModeMachine {
    mode: DriveMode,
}

impl DriveModeMachine {
    pub fn new() -> Self {
        Self {
            mode: DriveMode::Park,
        }
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    /// Apply one tick of mode-select inputs and return the resulting mode
    pub fn update(&mut self, inputs: &ModeInputs) -> DriveMode {
        let next = if !inputs.drive_enable && !inputs.neutral_enable {
            DriveMode::Park
        } else if inputs.neutral_enable {
            DriveMode::Neutral
        } else {
            let base = if self.mode.is_moving() {
                self.mode
            } else {
                DriveMode::Chill
            };
            inputs.tier.filter(|tier| tier.is_moving()).unwrap_or(base)
        };

        if next != self.mode {
            info!("Drive mode {} -> {}", self.mode, next);
            self.mode = next;
        }
        self.mode
    }

    /// Force back to Park (joystick lost)
    pub fn reset(&mut self) {
        if self.mode != DriveMode::Park {
            info!("Drive mode {} -> {} (reset)", self.mode, DriveMode::Park);
        }
        self.mode = DriveMode::Park;
    }
}

impl Default for DriveModeMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Joystick buttons bound to mode selection and quick-turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModeBindings {
    pub drive_enable: ButtonId,
    pub neutral_enable: ButtonId,
    pub chill: ButtonId,
    pub standard: ButtonId,
    pub sport: ButtonId,
    pub insane: ButtonId,
    pub quick_turn: Option<ButtonId>,
    /// Treat the enable buttons as press-to-toggle instead of held switches
    pub latch_enables: bool,
}

impl Default for ModeBindings {
    fn default() -> Self {
        Self {
            drive_enable: 1,
            neutral_enable: 2,
            chill: 3,
            standard: 4,
            sport: 5,
            insane: 6,
            quick_turn: None,
            latch_enables: false,
        }
    }
}

impl ModeBindings {
    fn tier_button(&self, tier: DriveMode) -> Option<ButtonId> {
        match tier {
            DriveMode::Chill => Some(self.chill),
            DriveMode::Standard => Some(self.standard),
            DriveMode::Sport => Some(self.sport),
            DriveMode::Insane => Some(self.insane),
            DriveMode::Park | DriveMode::Neutral => None,
        }
    }
}

/// Turns raw button state into `ModeInputs`, handling latched enables
pub struct ModeInputDecoder {
    bindings: ModeBindings,
    previous: ButtonSet,
    drive_latched: bool,
    neutral_latched: bool,
}

impl ModeInputDecoder {
    pub fn new(bindings: ModeBindings) -> Self {
        Self {
            bindings,
            previous: ButtonSet::empty(),
            drive_latched: false,
            neutral_latched: false,
        }
    }

    pub fn decode(&mut self, buttons: ButtonSet) -> ModeInputs {
        let (drive_enable, neutral_enable) = if self.bindings.latch_enables {
            if self.rising(buttons, self.bindings.drive_enable) {
                self.drive_latched = !self.drive_latched;
            }
            if self.rising(buttons, self.bindings.neutral_enable) {
                self.neutral_latched = !self.neutral_latched;
            }
            (self.drive_latched, self.neutral_latched)
        } else {
            (
                buttons.contains(self.bindings.drive_enable),
                buttons.contains(self.bindings.neutral_enable),
            )
        };

        let tier = DriveMode::TIERS_BY_PRIORITY.into_iter().find(|&tier| {
            self.bindings
                .tier_button(tier)
                .is_some_and(|button| buttons.contains(button))
        });

        self.previous = buttons;
        ModeInputs {
            drive_enable,
            neutral_enable,
            tier,
        }
    }

    pub fn quick_turn_pressed(&self, buttons: ButtonSet) -> bool {
        self.bindings
            .quick_turn
            .is_some_and(|button| buttons.contains(button))
    }

    pub fn reset(&mut self) {
        self.previous = ButtonSet::empty();
        self.drive_latched = false;
        self.neutral_latched = false;
    }

    fn rising(&self, buttons: ButtonSet, button: ButtonId) -> bool {
        buttons.contains(button) && !self.previous.contains(button)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driving(tier: Option<DriveMode>) -> ModeInputs {
        ModeInputs {
            drive_enable: true,
            neutral_enable: false,
            tier,
        }
    }

    #[test]
    fn test_initial_state_is_park() {
        assert_eq!(DriveModeMachine::new().mode(), DriveMode::Park);
    }

    #[test]
    fn test_multiplier_is_total_and_ordered() {
        let all = [
            DriveMode::Park,
            DriveMode::Neutral,
            DriveMode::Chill,
            DriveMode::Standard,
            DriveMode::Sport,
            DriveMode::Insane,
        ];
        assert_eq!(DriveMode::Park.multiplier(), 0.0);
        assert_eq!(DriveMode::Neutral.multiplier(), 0.0);
        assert_eq!(DriveMode::Standard.multiplier(), 0.5);
        for pair in all.windows(2) {
            assert!(pair[0].multiplier() <= pair[1].multiplier());
            assert!((0.0..=1.0).contains(&pair[1].multiplier()));
        }
    }

    #[test]
    fn test_no_enable_means_park() {
        let mut machine = DriveModeMachine::new();
        machine.update(&driving(Some(DriveMode::Sport)));
        assert_eq!(machine.mode(), DriveMode::Sport);

        // Tier button alone cannot keep the vehicle moving
        let inputs = ModeInputs {
            tier: Some(DriveMode::Insane),
            ..ModeInputs::default()
        };
        assert_eq!(machine.update(&inputs), DriveMode::Park);
    }

    #[test]
    fn test_neutral_wins_over_drive() {
        let mut machine = DriveModeMachine::new();
        let inputs = ModeInputs {
            drive_enable: true,
            neutral_enable: true,
            tier: Some(DriveMode::Insane),
        };
        assert_eq!(machine.update(&inputs), DriveMode::Neutral);
    }

    #[test]
    fn test_drive_defaults_to_chill_and_tier_persists() {
        let mut machine = DriveModeMachine::new();
        assert_eq!(machine.update(&driving(None)), DriveMode::Chill);
        assert_eq!(machine.update(&driving(Some(DriveMode::Sport))), DriveMode::Sport);
        // No tier button: stays in Sport
        assert_eq!(machine.update(&driving(None)), DriveMode::Sport);
        assert_eq!(machine.update(&driving(Some(DriveMode::Standard))), DriveMode::Standard);
    }

    #[test]
    fn test_return_from_neutral_restarts_at_chill() {
        let mut machine = DriveModeMachine::new();
        machine.update(&driving(Some(DriveMode::Insane)));
        machine.update(&ModeInputs {
            neutral_enable: true,
            ..ModeInputs::default()
        });
        assert_eq!(machine.update(&driving(None)), DriveMode::Chill);
    }

    #[test]
    fn test_decoder_picks_slowest_held_tier() {
        let mut decoder = ModeInputDecoder::new(ModeBindings::default());
        let buttons: ButtonSet = [1, 4, 5].into_iter().collect();
        let inputs = decoder.decode(buttons);
        assert!(inputs.drive_enable);
        assert!(!inputs.neutral_enable);
        assert_eq!(inputs.tier, Some(DriveMode::Standard));

        // Chill and Insane together: Chill
        let buttons: ButtonSet = [1, 3, 6].into_iter().collect();
        assert_eq!(decoder.decode(buttons).tier, Some(DriveMode::Chill));
    }

    #[test]
    fn test_decoder_latched_enables_toggle_on_press() {
        let bindings = ModeBindings {
            latch_enables: true,
            ..ModeBindings::default()
        };
        let mut decoder = ModeInputDecoder::new(bindings);
        let drive: ButtonSet = [1].into_iter().collect();

        assert!(decoder.decode(drive).drive_enable);
        // Held: still on, no re-toggle
        assert!(decoder.decode(drive).drive_enable);
        // Released: latched on
        assert!(decoder.decode(ButtonSet::empty()).drive_enable);
        // Pressed again: off
        assert!(!decoder.decode(drive).drive_enable);
    }

    #[test]
    fn test_gear_and_index() {
        assert_eq!(DriveMode::Park.gear(), 0);
        assert_eq!(DriveMode::Neutral.gear(), 0);
        assert_eq!(DriveMode::Chill.gear(), 1);
        assert_eq!(DriveMode::Insane.gear(), 4);
        assert_eq!(DriveMode::Insane.index(), 5);
    }
}
