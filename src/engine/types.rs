//! Core value types for indicator and button state
//!
//! Defines the bitmask held by a scene controller's indicator register, the
//! reading reported by the hardware, and the on/off state carried by virtual
//! button devices.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Physical node identifier on the mesh network
pub type NodeId = u32;

/// Number of buttons (and association groups) on a scene controller
pub const BUTTON_COUNT: u8 = 5;

/// Property holding a virtual device's level ("on"/"off" or 0-99)
pub const LEVEL_PROPERTY: &str = "metrics:level";

/// Property holding a virtual device's type
pub const DEVICE_TYPE_PROPERTY: &str = "deviceType";

/// Device type of a virtual button device
pub const TOGGLE_BUTTON_TYPE: &str = "toggleButton";

/// Device type of the controller's generic on/off event device
pub const SWITCH_CONTROL_TYPE: &str = "switchControl";

/// Device type of a dimmable load
pub const SWITCH_MULTILEVEL_TYPE: &str = "switchMultilevel";

/// On/off state of a virtual button device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonState {
    On,
    Off,
}

impl ButtonState {
    /// Parse from a `metrics:level` property value
    ///
    /// Only the strings "on" and "off" are recognized.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_str()? {
            "on" => Some(ButtonState::On),
            "off" => Some(ButtonState::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonState::On => "on",
            ButtonState::Off => "off",
        }
    }

    /// Convert to a `metrics:level` property value
    pub fn to_value(self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

impl std::fmt::Display for ButtonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Indicator register bitmask, one bit per button
///
/// Button 1 is bit value 1, button 2 is 2, button 3 is 4, button 4 is 8 and
/// button 5 is 16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorMask(u8);

impl IndicatorMask {
    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Bit value for a button, `None` outside 1..=5
    pub fn button_bit(button: u8) -> Option<u8> {
        match button {
            1 => Some(1),
            2 => Some(2),
            3 => Some(4),
            4 => Some(8),
            5 => Some(16),
            _ => None,
        }
    }

    /// Whether the LED for `button` is lit
    pub fn is_lit(self, button: u8) -> bool {
        Self::button_bit(button)
            .map(|bit| self.0 & bit != 0)
            .unwrap_or(false)
    }

    /// Flip exactly the bit for `button` toward `state`
    ///
    /// Returns `None` when the bit already holds `state` or the button is out
    /// of range; callers must not write the register in that case.
    pub fn with_button(self, button: u8, state: ButtonState) -> Option<Self> {
        let bit = Self::button_bit(button)?;
        let lit = self.0 & bit != 0;
        match (state, lit) {
            (ButtonState::Off, true) => Some(Self(self.0 & !bit)),
            (ButtonState::On, false) => Some(Self(self.0 | bit)),
            _ => None,
        }
    }

    /// Buttons whose bit is clear
    pub fn dark_buttons(self) -> impl Iterator<Item = u8> {
        (1..=BUTTON_COUNT).filter(move |button| !self.is_lit(*button))
    }
}

impl std::fmt::Display for IndicatorMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#07b}", self.0)
    }
}

/// Indicator register value as reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndicatorReading {
    /// Register bitmask
    pub value: IndicatorMask,
    /// When the value was last updated
    pub update_time: u64,
    /// When the value was last invalidated (pending re-read)
    pub invalidate_time: u64,
}

impl IndicatorReading {
    /// A reading is fresh when it was updated after its last invalidation
    /// and strictly after `last_processed`
    pub fn is_fresh(&self, last_processed: u64) -> bool {
        self.update_time > self.invalidate_time && self.update_time > last_processed
    }
}

/// Node-level metadata strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    VendorString,
    DeviceTypeString,
}
