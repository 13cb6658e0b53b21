//! Chat-level state and the updates a transport pushes into a session.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::error::FatalErrorKind;
use crate::item::MessageItem;

/// State of the current chat as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    Chatting,
    ChattingWithRobot,
    ClosedByOperator,
    ClosedByVisitor,
    Invitation,
    /// No chat exists.
    Closed,
    Queue,
    Unknown,
}

impl ChatState {
    pub fn is_open(self) -> bool {
        matches!(
            self,
            ChatState::Chatting | ChatState::ChattingWithRobot | ChatState::Queue
        )
    }
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatState::Chatting => write!(f, "chatting"),
            ChatState::ChattingWithRobot => write!(f, "chatting_with_robot"),
            ChatState::ClosedByOperator => write!(f, "closed_by_operator"),
            ChatState::ClosedByVisitor => write!(f, "closed_by_visitor"),
            ChatState::Invitation => write!(f, "invitation"),
            ChatState::Closed => write!(f, "closed"),
            ChatState::Queue => write!(f, "queue"),
            ChatState::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for ChatState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chatting" => Ok(ChatState::Chatting),
            "chatting_with_robot" => Ok(ChatState::ChattingWithRobot),
            "closed_by_operator" => Ok(ChatState::ClosedByOperator),
            "closed_by_visitor" => Ok(ChatState::ClosedByVisitor),
            "invitation" => Ok(ChatState::Invitation),
            "closed" => Ok(ChatState::Closed),
            "queue" => Ok(ChatState::Queue),
            "unknown" => Ok(ChatState::Unknown),
            other => Err(format!("invalid chat state: '{other}'")),
        }
    }
}

/// The operator assigned to the current chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Whether the visitor can reach an operator right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnlineStatus {
    /// Online and offline messages are accepted.
    Online,
    /// Offline messages only, and the server may still reject them.
    BusyOnline,
    /// Offline messages only.
    Offline,
    /// No messages at all.
    BusyOffline,
    /// Nothing received yet.
    #[default]
    Unknown,
}

impl OnlineStatus {
    /// Whether the visitor may send messages at all.
    pub fn accepts_messages(self) -> bool {
        !matches!(self, OnlineStatus::BusyOffline)
    }
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnlineStatus::Online => write!(f, "online"),
            OnlineStatus::BusyOnline => write!(f, "busy_online"),
            OnlineStatus::Offline => write!(f, "offline"),
            OnlineStatus::BusyOffline => write!(f, "busy_offline"),
            OnlineStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for OnlineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(OnlineStatus::Online),
            "busy_online" => Ok(OnlineStatus::BusyOnline),
            "offline" => Ok(OnlineStatus::Offline),
            "busy_offline" => Ok(OnlineStatus::BusyOffline),
            "unknown" => Ok(OnlineStatus::Unknown),
            other => Err(format!("invalid online status: '{other}'")),
        }
    }
}

/// A fatal condition reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub kind: FatalErrorKind,
    /// Raw server code, kept for diagnostics.
    pub code: String,
}

impl FatalError {
    pub fn from_code(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: FatalErrorKind::from_code(&code),
            code,
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal session error: {}", self.code)
    }
}

impl std::error::Error for FatalError {}

/// Something the transport learned from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    /// New or changed message records, in server order.
    Messages(Vec<MessageItem>),
    /// The server deleted the message known by `id`.
    MessageDeleted { id: String },
    /// Upload progress (0.0..=1.0) of an outgoing file.
    UploadProgress {
        client_side_id: String,
        progress: f64,
    },
    ChatState(ChatState),
    /// Operator now assigned to the chat; `None` when nobody is.
    Operator(Option<Operator>),
    OperatorTyping(bool),
    OnlineStatus(OnlineStatus),
    Fatal(FatalError),
}
