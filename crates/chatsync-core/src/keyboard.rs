//! Keyboard state machine.
//!
//! `Pending -> Completed` (bound to one button) or `Pending -> Canceled`.
//! Terminal keyboards never change again.

use chatsync_types::error::KeyboardResponseError;
use chatsync_types::keyboard::{Keyboard, KeyboardResponse, KeyboardState};
use tracing::warn;

/// Complete a pending keyboard with `button_id`.
///
/// `message_id` is the id of the message carrying the keyboard.
pub fn respond(
    keyboard: &Keyboard,
    button_id: &str,
    message_id: &str,
) -> Result<Keyboard, KeyboardResponseError> {
    if button_id.is_empty() {
        return Err(KeyboardResponseError::ButtonIdNotSet);
    }
    if message_id.is_empty() {
        return Err(KeyboardResponseError::RequestMessageIdNotSet);
    }
    if keyboard.state.is_terminal() {
        warn!(state = %keyboard.state, button_id, "response to a settled keyboard rejected");
        return Err(KeyboardResponseError::CanNotCreateResponse);
    }
    if keyboard.button(button_id).is_none() {
        warn!(button_id, "response names a button the keyboard does not have");
        return Err(KeyboardResponseError::CanNotCreateResponse);
    }
    Ok(Keyboard {
        state: KeyboardState::Completed,
        response: Some(KeyboardResponse {
            button_id: button_id.to_string(),
            message_id: message_id.to_string(),
        }),
        ..keyboard.clone()
    })
}

/// Cancel a pending keyboard. Settled keyboards are returned unchanged.
pub fn cancel(keyboard: &Keyboard) -> Keyboard {
    if keyboard.state.is_terminal() {
        return keyboard.clone();
    }
    Keyboard {
        state: KeyboardState::Canceled,
        response: None,
        ..keyboard.clone()
    }
}

/// Combine the keyboard already shown with the one a snapshot reports.
///
/// A settled keyboard keeps its state and response; everything else follows
/// the snapshot.
pub fn merge(previous: Option<&Keyboard>, incoming: Keyboard) -> Keyboard {
    match previous {
        Some(prev) if prev.state.is_terminal() && incoming.state != prev.state => {
            if incoming.state.is_terminal() {
                warn!(
                    shown = %prev.state,
                    reported = %incoming.state,
                    "conflicting terminal keyboard states, keeping the first"
                );
            }
            Keyboard {
                buttons: incoming.buttons,
                state: prev.state,
                response: prev.response.clone(),
            }
        }
        Some(prev) if prev.state.is_terminal() && incoming.response.is_none() => Keyboard {
            response: prev.response.clone(),
            ..incoming
        },
        _ => incoming,
    }
}
