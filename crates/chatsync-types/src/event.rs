//! Incremental notifications delivered to message listeners.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// One change to a tracker's visible window.
///
/// Applying a sequence of events in order to a listener-side list reproduces
/// the tracker's window exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Insert `message` right before the message whose `client_side_id` is
    /// `before`. `None`, or an id the listener does not know, appends at the
    /// end of the list.
    Added {
        message: Message,
        before: Option<String>,
    },
    /// Replace `old` in place; both carry the same `client_side_id`.
    Changed { old: Message, new: Message },
    Removed { message: Message },
}

impl MessageEvent {
    /// Identity of the message the event is about.
    pub fn client_side_id(&self) -> &str {
        match self {
            MessageEvent::Added { message, .. } => &message.client_side_id,
            MessageEvent::Changed { new, .. } => &new.client_side_id,
            MessageEvent::Removed { message } => &message.client_side_id,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, MessageEvent::Added { .. })
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, MessageEvent::Changed { .. })
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, MessageEvent::Removed { .. })
    }
}
