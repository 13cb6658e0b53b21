//! Raw message records as delivered by the transport.
//!
//! Every field is optional: the reconciler defaults what is missing instead of
//! rejecting the record. Kind-specific payloads stay as `serde_json::Value`
//! under `data` and are decoded lazily by the accessors below.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire kind of a message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ActionRequest,
    ContactInformationRequest,
    ContactInformation,
    FileFromOperator,
    FileFromVisitor,
    ForOperator,
    Info,
    Keyboard,
    KeyboardResponse,
    OperatorMessage,
    OperatorBusy,
    StickerVisitor,
    VisitorMessage,
}

impl MessageKind {
    /// Parse the wire spelling; unknown kinds yield `None`.
    pub fn from_wire(kind: &str) -> Option<Self> {
        Some(match kind {
            "action_request" => MessageKind::ActionRequest,
            "cont_req" => MessageKind::ContactInformationRequest,
            "contacts" => MessageKind::ContactInformation,
            "file_operator" => MessageKind::FileFromOperator,
            "file_visitor" => MessageKind::FileFromVisitor,
            "for_operator" => MessageKind::ForOperator,
            "info" => MessageKind::Info,
            "keyboard" => MessageKind::Keyboard,
            "keyboard_response" => MessageKind::KeyboardResponse,
            "operator" => MessageKind::OperatorMessage,
            "operator_busy" => MessageKind::OperatorBusy,
            "sticker_visitor" => MessageKind::StickerVisitor,
            "visitor" => MessageKind::VisitorMessage,
            _ => return None,
        })
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            MessageKind::ActionRequest => "action_request",
            MessageKind::ContactInformationRequest => "cont_req",
            MessageKind::ContactInformation => "contacts",
            MessageKind::FileFromOperator => "file_operator",
            MessageKind::FileFromVisitor => "file_visitor",
            MessageKind::ForOperator => "for_operator",
            MessageKind::Info => "info",
            MessageKind::Keyboard => "keyboard",
            MessageKind::KeyboardResponse => "keyboard_response",
            MessageKind::OperatorMessage => "operator",
            MessageKind::OperatorBusy => "operator_busy",
            MessageKind::StickerVisitor => "sticker_visitor",
            MessageKind::VisitorMessage => "visitor",
        }
    }
}

/// One message record of a chat snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_side_id: Option<String>,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub server_side_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "ts_m", default, skip_serializing_if = "Option::is_none")]
    pub timestamp_micros: Option<i64>,
    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    pub timestamp_seconds: Option<f64>,
    /// Servers send this either as a string or as a number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<Value>,
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(rename = "avatar", default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_be_edited: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_be_replied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_visitor_react: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_visitor_change_reaction: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<QuoteItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MessageItem {
    /// A deletion marker for the message known by `id`.
    pub fn tombstone(id: impl Into<String>) -> Self {
        Self {
            server_side_id: Some(id.into()),
            deleted: Some(true),
            ..Self::default()
        }
    }

    /// Key the record is matched by: client id, else server id.
    pub fn key(&self) -> Option<&str> {
        self.client_side_id
            .as_deref()
            .or(self.server_side_id.as_deref())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted == Some(true)
    }

    pub fn message_kind(&self) -> Option<MessageKind> {
        self.kind.as_deref().and_then(MessageKind::from_wire)
    }

    /// `ts_m` when present, else `ts` scaled to microseconds.
    pub fn time_micros(&self) -> Option<i64> {
        self.timestamp_micros
            .or_else(|| self.timestamp_seconds.map(|s| (s * 1_000_000.0) as i64))
    }

    pub fn author_id(&self) -> Option<String> {
        value_to_id(self.author_id.as_ref())
    }

    pub fn file(&self) -> Option<FileItem> {
        self.data_field("file")
    }

    pub fn group(&self) -> Option<GroupItem> {
        self.data_field("group")
    }

    /// Keyboard payload of a `keyboard` record (`data` itself).
    pub fn keyboard(&self) -> Option<KeyboardItem> {
        self.data
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Payload of a `keyboard_response` record (`data` itself).
    pub fn keyboard_request(&self) -> Option<KeyboardRequestItem> {
        self.data
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    pub fn sticker_id(&self) -> Option<i64> {
        self.data
            .as_ref()
            .and_then(|d| d.get("stickerId"))
            .and_then(Value::as_i64)
    }

    fn data_field<T: serde::de::DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|d| d.get(field))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

fn value_to_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `quote` record: fetch state plus the quoted message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteItem {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub message: Option<QuotedMessageItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedMessageItem {
    #[serde(default)]
    pub author_id: Option<Value>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(rename = "name", default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(rename = "ts", default)]
    pub timestamp_millis: Option<i64>,
}

impl QuotedMessageItem {
    pub fn author_id(&self) -> Option<String> {
        value_to_id(self.author_id.as_ref())
    }
}

/// `data.file` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileItem {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub desc: Option<FileDescItem>,
    #[serde(rename = "error", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDescItem {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<ImageItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    #[serde(default)]
    pub size: Option<ImageSizeItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSizeItem {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// `data.group` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "msg_number", default)]
    pub message_number: Option<u32>,
    #[serde(rename = "msg_count", default)]
    pub message_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyboardItem {
    #[serde(default)]
    pub buttons: Vec<Vec<KeyboardButtonItem>>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub response: Option<KeyboardResponseItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyboardButtonItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardResponseItem {
    #[serde(default)]
    pub button_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyboardRequestItem {
    #[serde(default)]
    pub button: Option<KeyboardButtonItem>,
    #[serde(default)]
    pub request: Option<KeyboardRequestRefItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardRequestRefItem {
    #[serde(default)]
    pub message_id: Option<String>,
}
