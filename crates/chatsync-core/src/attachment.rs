//! Attachment state machine.
//!
//! `Upload -> ExternalChecks -> ExternalVerification -> Ready`, with `Error`
//! reachable from any non-terminal state. Forward skips are allowed, backward
//! moves are not. Progress exists only while uploading and never decreases.

use chatsync_types::attachment::{Attachment, AttachmentState, FileInfo};
use thiserror::Error;
use tracing::warn;

/// A transition the state machine refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("attachment cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: AttachmentState,
    pub to: AttachmentState,
}

/// A freshly picked file, about to be uploaded.
pub fn uploading(file: FileInfo) -> Attachment {
    Attachment {
        file,
        state: AttachmentState::Upload,
        progress: Some(0.0),
        error_type: None,
        error_message: None,
    }
}

/// Whether `from -> to` is allowed. Staying put is allowed.
pub fn can_transition(from: AttachmentState, to: AttachmentState) -> bool {
    if from == to {
        return true;
    }
    if from.is_terminal() {
        return false;
    }
    match (from.stage(), to.stage()) {
        (_, None) => true,
        (Some(a), Some(b)) => b > a,
        (None, Some(_)) => false,
    }
}

pub fn advance(current: &Attachment, to: AttachmentState) -> Result<Attachment, InvalidTransition> {
    if !can_transition(current.state, to) {
        return Err(InvalidTransition {
            from: current.state,
            to,
        });
    }
    let progress = if to == AttachmentState::Upload {
        current.progress
    } else {
        None
    };
    Ok(Attachment {
        state: to,
        progress,
        ..current.clone()
    })
}

/// Move to `Error` with the server's reason.
pub fn fail(
    current: &Attachment,
    error_type: Option<String>,
    error_message: Option<String>,
) -> Result<Attachment, InvalidTransition> {
    let mut failed = advance(current, AttachmentState::Error)?;
    failed.error_type = error_type;
    failed.error_message = error_message;
    Ok(failed)
}

/// Record upload progress. Returns `None` when nothing changes: the
/// attachment is past `Upload` or the value does not move forward.
pub fn record_progress(current: &Attachment, progress: f64) -> Option<Attachment> {
    if current.state != AttachmentState::Upload || progress.is_nan() {
        return None;
    }
    let progress = progress.clamp(0.0, 1.0);
    let previous = current.progress.unwrap_or(0.0);
    if current.progress.is_some() && progress <= previous {
        return None;
    }
    Some(Attachment {
        progress: Some(progress.max(previous)),
        ..current.clone()
    })
}

/// Combine the attachment already shown with the one a snapshot reports.
///
/// Rejected transitions keep the shown state; progress keeps its high-water
/// mark while still uploading.
pub fn merge(previous: Option<&Attachment>, incoming: Attachment) -> Attachment {
    let Some(prev) = previous else {
        return incoming;
    };
    if !can_transition(prev.state, incoming.state) {
        warn!(
            from = %prev.state,
            to = %incoming.state,
            "ignoring backward attachment transition"
        );
        return Attachment {
            file: incoming.file,
            ..prev.clone()
        };
    }
    if incoming.state == AttachmentState::Upload {
        let progress = match (prev.progress, incoming.progress) {
            (Some(a), Some(b)) => Some(a.max(b.clamp(0.0, 1.0))),
            (a, b) => a.or(b),
        };
        return Attachment {
            progress,
            ..incoming
        };
    }
    Attachment {
        progress: None,
        ..incoming
    }
}
