//! Message values.
//!
//! A `Message` is an immutable, identity-bearing value. "Changing" a message
//! means building a new value with the same `client_side_id` and substituting
//! it by key in whatever collection owns the old one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::attachment::Attachment;
use crate::keyboard::{Keyboard, KeyboardRequest};

/// Kind of a message as exposed to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    VisitorMessage,
    OperatorMessage,
    FileFromVisitor,
    FileFromOperator,
    Info,
    OperatorBusy,
    ActionRequest,
    ContactInformationRequest,
    Keyboard,
    KeyboardResponse,
    StickerVisitor,
}

impl MessageType {
    /// Whether messages of this kind are authored by the local visitor.
    pub fn is_visitor_authored(self) -> bool {
        matches!(
            self,
            MessageType::VisitorMessage | MessageType::FileFromVisitor | MessageType::StickerVisitor
        )
    }

    pub fn is_file(self) -> bool {
        matches!(
            self,
            MessageType::FileFromVisitor | MessageType::FileFromOperator
        )
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Sending,
    Sent,
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendStatus::Sending => write!(f, "sending"),
            SendStatus::Sent => write!(f, "sent"),
        }
    }
}

/// Fetch state of a quoted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteState {
    Pending,
    Filled,
    NotFound,
}

impl FromStr for QuoteState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QuoteState::Pending),
            "filled" => Ok(QuoteState::Filled),
            "not-found" | "not_found" => Ok(QuoteState::NotFound),
            other => Err(format!("invalid quote state: '{other}'")),
        }
    }
}

/// A reference from one message to an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub state: QuoteState,
    pub author_id: Option<String>,
    pub quoted_message_id: Option<String>,
    pub text: Option<String>,
    pub sender_name: Option<String>,
    pub timestamp_micros: Option<i64>,
}

/// Position of a message inside a run of consecutive messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: String,
    pub index_in_group: u32,
    pub group_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sticker {
    pub sticker_id: i64,
}

/// Visitor reaction to an operator message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reaction::Like => write!(f, "like"),
            Reaction::Dislike => write!(f, "dislike"),
        }
    }
}

impl FromStr for Reaction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Reaction::Like),
            "dislike" => Ok(Reaction::Dislike),
            other => Err(format!("invalid reaction: '{other}'")),
        }
    }
}

/// A single chat message as seen by listeners.
///
/// Ordering within a window is by `timestamp_micros`, ties broken by arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Locally stable identity; never changes across edits.
    pub client_side_id: String,
    /// Server identity, present once the server confirmed the message.
    pub server_side_id: Option<String>,
    pub kind: MessageType,
    pub text: String,
    /// Undecoded text when `text` is derived (e.g. a file name).
    pub raw_text: Option<String>,
    pub timestamp_micros: i64,
    pub send_status: SendStatus,
    pub sender_name: String,
    pub sender_avatar_url: Option<String>,
    /// Author id as reported by the server (operators only).
    pub operator_id: Option<String>,
    pub attachment: Option<Attachment>,
    pub quote: Option<Quote>,
    pub keyboard: Option<Keyboard>,
    pub keyboard_request: Option<KeyboardRequest>,
    pub sticker: Option<Sticker>,
    pub group: Option<Group>,
    pub edited: bool,
    pub deleted: bool,
    pub read: bool,
    pub can_be_edited: bool,
    pub can_be_replied: bool,
    pub can_visitor_react: bool,
    pub can_visitor_change_reaction: bool,
    pub visitor_reaction: Option<Reaction>,
}

impl Message {
    /// A bare message with every optional part empty.
    pub fn new(
        client_side_id: impl Into<String>,
        kind: MessageType,
        text: impl Into<String>,
        timestamp_micros: i64,
    ) -> Self {
        Self {
            client_side_id: client_side_id.into(),
            server_side_id: None,
            kind,
            text: text.into(),
            raw_text: None,
            timestamp_micros,
            send_status: SendStatus::Sent,
            sender_name: String::new(),
            sender_avatar_url: None,
            operator_id: None,
            attachment: None,
            quote: None,
            keyboard: None,
            keyboard_request: None,
            sticker: None,
            group: None,
            edited: false,
            deleted: false,
            read: false,
            can_be_edited: false,
            can_be_replied: false,
            can_visitor_react: false,
            can_visitor_change_reaction: false,
            visitor_reaction: None,
        }
    }

    /// An optimistic visitor message that has not reached the server yet.
    pub fn outgoing(kind: MessageType, text: impl Into<String>, sender_name: &str) -> Self {
        let mut message = Self::new(generate_client_side_id(), kind, text, now_micros());
        message.send_status = SendStatus::Sending;
        message.sender_name = sender_name.to_string();
        message
    }

    /// The id the server knows this message by, falling back to the local one.
    pub fn current_chat_id(&self) -> &str {
        self.server_side_id.as_deref().unwrap_or(&self.client_side_id)
    }

    pub fn is_sending(&self) -> bool {
        self.send_status == SendStatus::Sending
    }

    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.timestamp_micros).unwrap_or_default()
    }

    /// Same message, confirmed by the server under `server_side_id`.
    pub fn confirmed(&self, server_side_id: impl Into<String>) -> Self {
        Self {
            server_side_id: Some(server_side_id.into()),
            send_status: SendStatus::Sent,
            ..self.clone()
        }
    }

    pub fn with_send_status(&self, send_status: SendStatus) -> Self {
        Self {
            send_status,
            ..self.clone()
        }
    }
}

/// Fresh locally-unique message id (32 hex chars, time-ordered).
pub fn generate_client_side_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Current wall-clock time in microseconds since the epoch.
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}
