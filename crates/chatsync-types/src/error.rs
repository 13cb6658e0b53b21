//! Error taxonomies.
//!
//! Operation errors parse from the server's kebab-case codes via `from_code`;
//! codes an operation does not know map to its `Unknown` variant. Every
//! operation error wraps `AccessError` so that a completion still in flight
//! when its session dies resolves with `InvalidSession`.

use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Raised synchronously by every gated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AccessError {
    #[error("called from a thread other than the one that created the session")]
    InvalidThread,

    #[error("session or tracker has been destroyed")]
    InvalidSession,
}

/// Rejected session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionBuilderError {
    #[error("account name is not set")]
    NilAccountName,

    #[error("location is not set")]
    NilLocation,

    #[error("remote notification system and device token must be set together")]
    InvalidRemoteNotificationConfiguration,

    #[error("visitor fields and a provided authorization token are mutually exclusive")]
    InvalidAuthenticationParameters,

    #[error("device token is not valid hex: '{0}'")]
    InvalidHex(String),

    #[error("no async runtime to run transport requests on")]
    NoRuntime,
}

/// Conditions after which the session cannot continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalErrorKind {
    AccountBlocked,
    ProvidedVisitorFieldsExpired,
    VisitorBanned,
    WrongProvidedVisitorHash,
    Unknown,
}

impl FatalErrorKind {
    pub fn from_code(code: &str) -> Self {
        code.parse().unwrap_or(FatalErrorKind::Unknown)
    }
}

impl fmt::Display for FatalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalErrorKind::AccountBlocked => write!(f, "account-blocked"),
            FatalErrorKind::ProvidedVisitorFieldsExpired => write!(f, "provided-visitor-expired"),
            FatalErrorKind::VisitorBanned => write!(f, "visitor-banned"),
            FatalErrorKind::WrongProvidedVisitorHash => {
                write!(f, "wrong-provided-visitor-hash-value")
            }
            FatalErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for FatalErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account-blocked" => Ok(FatalErrorKind::AccountBlocked),
            "provided-visitor-expired" => Ok(FatalErrorKind::ProvidedVisitorFieldsExpired),
            "visitor-banned" => Ok(FatalErrorKind::VisitorBanned),
            "wrong-provided-visitor-hash-value" => Ok(FatalErrorKind::WrongProvidedVisitorHash),
            other => Err(format!("invalid fatal error code: '{other}'")),
        }
    }
}

/// Failure reported by a `Transport` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server answered with an error code.
    #[error("server rejected request: {code}")]
    Rejected { code: String },

    /// The request never produced an answer.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn rejected(code: impl Into<String>) -> Self {
        TransportError::Rejected { code: code.into() }
    }

    /// Server code, if the server produced one.
    pub fn code(&self) -> Option<&str> {
        match self {
            TransportError::Rejected { code } => Some(code),
            TransportError::Unavailable(_) => None,
        }
    }
}

/// Implements `From<TransportError>` by parsing the server code.
macro_rules! from_transport_error {
    ($ty:ty) => {
        impl From<TransportError> for $ty {
            fn from(err: TransportError) -> Self {
                match err.code() {
                    Some(code) => <$ty>::from_code(code),
                    None => <$ty>::Unknown,
                }
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendMessageError {
    #[error("message is empty")]
    MessageEmpty,

    #[error("message exceeds the maximum length")]
    MaxLengthExceeded,

    #[error("quoted message cannot be replied to")]
    QuoteNotAllowed,

    #[error("unknown send error")]
    Unknown,

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl SendMessageError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "message-empty" => SendMessageError::MessageEmpty,
            "max-message-length-exceeded" => SendMessageError::MaxLengthExceeded,
            "quoting-message-that-cannot-be-replied" => SendMessageError::QuoteNotAllowed,
            _ => SendMessageError::Unknown,
        }
    }
}

from_transport_error!(SendMessageError);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendFileError {
    #[error("file is larger than allowed")]
    FileSizeExceeded,

    #[error("file is empty")]
    FileSizeTooSmall,

    #[error("file type '{0}' is not allowed")]
    FileTypeNotAllowed(String),

    #[error("maximum number of files in this chat reached")]
    MaxFilesCountPerChatExceeded,

    #[error("visitor is not authorized to upload files")]
    Unauthorized,

    #[error("unknown file error")]
    Unknown,

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl SendFileError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "file-size-exceeded" => SendFileError::FileSizeExceeded,
            "file-size-too-small" => SendFileError::FileSizeTooSmall,
            "file-type-not-allowed" | "not-allowed-mime-type" => {
                SendFileError::FileTypeNotAllowed(String::new())
            }
            "max-files-count-per-chat-exceeded" => SendFileError::MaxFilesCountPerChatExceeded,
            "unauthorized" => SendFileError::Unauthorized,
            _ => SendFileError::Unknown,
        }
    }
}

from_transport_error!(SendFileError);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditMessageError {
    #[error("editing is not allowed for this message")]
    NotAllowed,

    #[error("message is empty")]
    MessageEmpty,

    #[error("message is not owned by the visitor")]
    MessageNotOwned,

    #[error("message exceeds the maximum length")]
    MaxLengthExceeded,

    #[error("only text messages can be edited")]
    WrongMessageKind,

    #[error("unknown edit error")]
    Unknown,

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl EditMessageError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" => EditMessageError::NotAllowed,
            "message-empty" => EditMessageError::MessageEmpty,
            "message-not-owned" => EditMessageError::MessageNotOwned,
            "max-message-length-exceeded" => EditMessageError::MaxLengthExceeded,
            "wrong-message-kind" => EditMessageError::WrongMessageKind,
            _ => EditMessageError::Unknown,
        }
    }
}

from_transport_error!(EditMessageError);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeleteMessageError {
    #[error("deleting is not allowed for this message")]
    NotAllowed,

    #[error("message is not owned by the visitor")]
    MessageNotOwned,

    #[error("message not found")]
    MessageNotFound,

    #[error("unknown delete error")]
    Unknown,

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl DeleteMessageError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" => DeleteMessageError::NotAllowed,
            "message-not-owned" => DeleteMessageError::MessageNotOwned,
            "message-not-found" => DeleteMessageError::MessageNotFound,
            _ => DeleteMessageError::Unknown,
        }
    }
}

from_transport_error!(DeleteMessageError);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactionError {
    #[error("reacting to this message is not allowed")]
    NotAllowed,

    #[error("message not found")]
    MessageNotFound,

    #[error("unknown reaction error")]
    Unknown,

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl ReactionError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "not-allowed" => ReactionError::NotAllowed,
            "message-not-found" => ReactionError::MessageNotFound,
            _ => ReactionError::Unknown,
        }
    }
}

from_transport_error!(ReactionError);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateOperatorError {
    #[error("there is no chat to rate")]
    NoChat,

    #[error("operator id is not known")]
    WrongOperatorId,

    #[error("rating note is too long")]
    NoteIsTooLong,

    #[error("rating must be between 1 and 5, got {0}")]
    RatingOutOfRange(u8),

    #[error("operator rating is disabled")]
    RateDisabled,

    #[error("operator is not in the chat")]
    OperatorNotInChat,

    #[error("unknown rating error")]
    Unknown,

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl RateOperatorError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-chat" => RateOperatorError::NoChat,
            "wrong-operator-id" => RateOperatorError::WrongOperatorId,
            "note-is-too-long" => RateOperatorError::NoteIsTooLong,
            "rate-value-incorrect" => RateOperatorError::RatingOutOfRange(0),
            "rate-disabled" => RateOperatorError::RateDisabled,
            "operator-not-in-chat" => RateOperatorError::OperatorNotInChat,
            _ => RateOperatorError::Unknown,
        }
    }
}

from_transport_error!(RateOperatorError);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyboardResponseError {
    #[error("there is no chat")]
    NoChat,

    #[error("button id is not set")]
    ButtonIdNotSet,

    #[error("keyboard request message id is not set")]
    RequestMessageIdNotSet,

    #[error("response cannot be created for this keyboard")]
    CanNotCreateResponse,

    #[error("unknown keyboard response error")]
    Unknown,

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl KeyboardResponseError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-chat" => KeyboardResponseError::NoChat,
            "button-id-not-set" => KeyboardResponseError::ButtonIdNotSet,
            "request-message-id-not-set" => KeyboardResponseError::RequestMessageIdNotSet,
            "can-not-create-response" => KeyboardResponseError::CanNotCreateResponse,
            _ => KeyboardResponseError::Unknown,
        }
    }
}

from_transport_error!(KeyboardResponseError);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendStickerError {
    #[error("there is no chat")]
    NoChat,

    #[error("sticker id is not set")]
    NoStickerId,

    #[error("unknown sticker error")]
    Unknown,

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl SendStickerError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-chat" => SendStickerError::NoChat,
            "no-sticker-id" => SendStickerError::NoStickerId,
            _ => SendStickerError::Unknown,
        }
    }
}

from_transport_error!(SendStickerError);

/// Failure of a chat-level request (start, close, typing).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatActionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Access(#[from] AccessError),
}

/// Failure of a history request issued by a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("history request failed: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Access(#[from] AccessError),
}
