//! Interactive button keyboard values.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Completion state of a keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyboardState {
    Pending,
    Completed,
    Canceled,
}

impl KeyboardState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, KeyboardState::Pending)
    }
}

impl fmt::Display for KeyboardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyboardState::Pending => write!(f, "pending"),
            KeyboardState::Completed => write!(f, "completed"),
            KeyboardState::Canceled => write!(f, "canceled"),
        }
    }
}

impl FromStr for KeyboardState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(KeyboardState::Pending),
            "completed" => Ok(KeyboardState::Completed),
            "canceled" => Ok(KeyboardState::Canceled),
            other => Err(format!("invalid keyboard state: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub id: String,
    pub text: String,
}

/// The visitor's answer to a keyboard, bound to one button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardResponse {
    pub button_id: String,
    pub message_id: String,
}

/// A set of quick-reply buttons attached to an operator message.
///
/// Buttons are laid out in rows; ids are unique across the whole keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub buttons: Vec<Vec<KeyboardButton>>,
    pub state: KeyboardState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<KeyboardResponse>,
}

impl Keyboard {
    pub fn button(&self, button_id: &str) -> Option<&KeyboardButton> {
        self.buttons.iter().flatten().find(|b| b.id == button_id)
    }
}

/// Carried by `keyboard_response` messages: which button answered which keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardRequest {
    pub button: KeyboardButton,
    pub message_id: String,
}
