//! File attachment values.
//!
//! The transition rules live in `chatsync_core::attachment`; this module only
//! carries the data a message exposes about its file.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Processing stage of a file attached to a message.
///
/// Wire values: `upload`, `external_checks`, `external_verification`,
/// `ready`, `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentState {
    Upload,
    ExternalChecks,
    ExternalVerification,
    Ready,
    Error,
}

impl AttachmentState {
    /// `Ready` and `Error` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, AttachmentState::Ready | AttachmentState::Error)
    }

    /// Position along the processing pipeline. `Error` has no stage.
    pub fn stage(self) -> Option<u8> {
        match self {
            AttachmentState::Upload => Some(0),
            AttachmentState::ExternalChecks => Some(1),
            AttachmentState::ExternalVerification => Some(2),
            AttachmentState::Ready => Some(3),
            AttachmentState::Error => None,
        }
    }
}

impl fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentState::Upload => write!(f, "upload"),
            AttachmentState::ExternalChecks => write!(f, "external_checks"),
            AttachmentState::ExternalVerification => write!(f, "external_verification"),
            AttachmentState::Ready => write!(f, "ready"),
            AttachmentState::Error => write!(f, "error"),
        }
    }
}

impl FromStr for AttachmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(AttachmentState::Upload),
            "external_checks" => Ok(AttachmentState::ExternalChecks),
            "external_verification" => Ok(AttachmentState::ExternalVerification),
            "ready" => Ok(AttachmentState::Ready),
            "error" => Ok(AttachmentState::Error),
            other => Err(format!("invalid attachment state: '{other}'")),
        }
    }
}

/// Descriptive metadata of an attached file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_name: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub guid: Option<String>,
    pub url: Option<String>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
}

/// A file attached to a message together with its processing state.
///
/// `progress` is only meaningful while `state == Upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub file: FileInfo,
    pub state: AttachmentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
