//! Transport port: how the engine talks to the chat backend.
//!
//! Implementations live outside this crate (see `chatsync-infra`). Requests
//! carry the locally generated `client_side_id`; acknowledgements carry the
//! server id the message is known by from then on.

use std::future::Future;
use std::pin::Pin;

use chatsync_types::error::TransportError;
use chatsync_types::item::MessageItem;
use chatsync_types::message::Reaction;

/// A text message (or reply) leaving the client.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub client_side_id: String,
    pub text: String,
    /// Server id of the quoted message, for replies.
    pub quoted_message_id: Option<String>,
}

/// A file upload leaving the client.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingFile {
    pub client_side_id: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingSticker {
    pub client_side_id: String,
    pub sticker_id: i64,
}

/// Server acknowledgement of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAck {
    pub server_side_id: String,
}

/// Where a history page ends: strictly older than this message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryCursor {
    /// `None` asks for the newest page.
    pub before_timestamp_micros: Option<i64>,
    pub before_id: Option<String>,
}

/// One page of history, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub items: Vec<MessageItem>,
    pub has_more: bool,
}

/// Requests the engine sends to the backend.
///
/// Uses native async fn in traits (RPITIT). For runtime selection wrap an
/// implementation in [`BoxTransport`].
pub trait Transport: Send + Sync {
    fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<SendAck, TransportError>> + Send;

    fn edit_message(
        &self,
        server_side_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn delete_message(
        &self,
        server_side_id: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn react(
        &self,
        server_side_id: &str,
        reaction: Reaction,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn send_file(
        &self,
        file: &OutgoingFile,
    ) -> impl Future<Output = Result<SendAck, TransportError>> + Send;

    fn send_sticker(
        &self,
        sticker: &OutgoingSticker,
    ) -> impl Future<Output = Result<SendAck, TransportError>> + Send;

    /// Answer the keyboard carried by `request_message_id` with `button_id`.
    fn send_keyboard_response(
        &self,
        request_message_id: &str,
        button_id: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn rate_operator(
        &self,
        operator_id: &str,
        rating: u8,
        note: Option<&str>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Up to `limit` messages older than `cursor`, oldest first.
    fn fetch_history(
        &self,
        cursor: &HistoryCursor,
        limit: usize,
    ) -> impl Future<Output = Result<HistoryPage, TransportError>> + Send;

    fn fetch_all_history(
        &self,
    ) -> impl Future<Output = Result<Vec<MessageItem>, TransportError>> + Send;

    fn start_chat(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close_chat(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// `None` clears the draft.
    fn set_visitor_typing(
        &self,
        draft: Option<&str>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

type BoxedResult<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Object-safe version of [`Transport`] with boxed futures.
pub trait TransportDyn: Send + Sync {
    fn send_message_boxed<'a>(&'a self, message: &'a OutgoingMessage) -> BoxedResult<'a, SendAck>;
    fn edit_message_boxed<'a>(&'a self, server_side_id: &'a str, text: &'a str)
    -> BoxedResult<'a, ()>;
    fn delete_message_boxed<'a>(&'a self, server_side_id: &'a str) -> BoxedResult<'a, ()>;
    fn react_boxed<'a>(&'a self, server_side_id: &'a str, reaction: Reaction)
    -> BoxedResult<'a, ()>;
    fn send_file_boxed<'a>(&'a self, file: &'a OutgoingFile) -> BoxedResult<'a, SendAck>;
    fn send_sticker_boxed<'a>(&'a self, sticker: &'a OutgoingSticker) -> BoxedResult<'a, SendAck>;
    fn send_keyboard_response_boxed<'a>(
        &'a self,
        request_message_id: &'a str,
        button_id: &'a str,
    ) -> BoxedResult<'a, ()>;
    fn rate_operator_boxed<'a>(
        &'a self,
        operator_id: &'a str,
        rating: u8,
        note: Option<&'a str>,
    ) -> BoxedResult<'a, ()>;
    fn fetch_history_boxed<'a>(
        &'a self,
        cursor: &'a HistoryCursor,
        limit: usize,
    ) -> BoxedResult<'a, HistoryPage>;
    fn fetch_all_history_boxed(&self) -> BoxedResult<'_, Vec<MessageItem>>;
    fn start_chat_boxed(&self) -> BoxedResult<'_, ()>;
    fn close_chat_boxed(&self) -> BoxedResult<'_, ()>;
    fn set_visitor_typing_boxed<'a>(&'a self, draft: Option<&'a str>) -> BoxedResult<'a, ()>;
}

/// Blanket implementation: any `Transport` is a `TransportDyn`.
impl<T: Transport> TransportDyn for T {
    fn send_message_boxed<'a>(&'a self, message: &'a OutgoingMessage) -> BoxedResult<'a, SendAck> {
        Box::pin(self.send_message(message))
    }

    fn edit_message_boxed<'a>(
        &'a self,
        server_side_id: &'a str,
        text: &'a str,
    ) -> BoxedResult<'a, ()> {
        Box::pin(self.edit_message(server_side_id, text))
    }

    fn delete_message_boxed<'a>(&'a self, server_side_id: &'a str) -> BoxedResult<'a, ()> {
        Box::pin(self.delete_message(server_side_id))
    }

    fn react_boxed<'a>(
        &'a self,
        server_side_id: &'a str,
        reaction: Reaction,
    ) -> BoxedResult<'a, ()> {
        Box::pin(self.react(server_side_id, reaction))
    }

    fn send_file_boxed<'a>(&'a self, file: &'a OutgoingFile) -> BoxedResult<'a, SendAck> {
        Box::pin(self.send_file(file))
    }

    fn send_sticker_boxed<'a>(&'a self, sticker: &'a OutgoingSticker) -> BoxedResult<'a, SendAck> {
        Box::pin(self.send_sticker(sticker))
    }

    fn send_keyboard_response_boxed<'a>(
        &'a self,
        request_message_id: &'a str,
        button_id: &'a str,
    ) -> BoxedResult<'a, ()> {
        Box::pin(self.send_keyboard_response(request_message_id, button_id))
    }

    fn rate_operator_boxed<'a>(
        &'a self,
        operator_id: &'a str,
        rating: u8,
        note: Option<&'a str>,
    ) -> BoxedResult<'a, ()> {
        Box::pin(self.rate_operator(operator_id, rating, note))
    }

    fn fetch_history_boxed<'a>(
        &'a self,
        cursor: &'a HistoryCursor,
        limit: usize,
    ) -> BoxedResult<'a, HistoryPage> {
        Box::pin(self.fetch_history(cursor, limit))
    }

    fn fetch_all_history_boxed(&self) -> BoxedResult<'_, Vec<MessageItem>> {
        Box::pin(self.fetch_all_history())
    }

    fn start_chat_boxed(&self) -> BoxedResult<'_, ()> {
        Box::pin(self.start_chat())
    }

    fn close_chat_boxed(&self) -> BoxedResult<'_, ()> {
        Box::pin(self.close_chat())
    }

    fn set_visitor_typing_boxed<'a>(&'a self, draft: Option<&'a str>) -> BoxedResult<'a, ()> {
        Box::pin(self.set_visitor_typing(draft))
    }
}

/// Type-erased transport.
///
/// `Transport` uses RPITIT and cannot be a trait object; `BoxTransport`
/// offers the same methods over a `dyn TransportDyn`.
pub struct BoxTransport {
    inner: Box<dyn TransportDyn>,
}

impl BoxTransport {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            inner: Box::new(transport),
        }
    }

    pub async fn send_message(&self, message: &OutgoingMessage) -> Result<SendAck, TransportError> {
        self.inner.send_message_boxed(message).await
    }

    pub async fn edit_message(&self, server_side_id: &str, text: &str) -> Result<(), TransportError> {
        self.inner.edit_message_boxed(server_side_id, text).await
    }

    pub async fn delete_message(&self, server_side_id: &str) -> Result<(), TransportError> {
        self.inner.delete_message_boxed(server_side_id).await
    }

    pub async fn react(&self, server_side_id: &str, reaction: Reaction) -> Result<(), TransportError> {
        self.inner.react_boxed(server_side_id, reaction).await
    }

    pub async fn send_file(&self, file: &OutgoingFile) -> Result<SendAck, TransportError> {
        self.inner.send_file_boxed(file).await
    }

    pub async fn send_sticker(&self, sticker: &OutgoingSticker) -> Result<SendAck, TransportError> {
        self.inner.send_sticker_boxed(sticker).await
    }

    pub async fn send_keyboard_response(
        &self,
        request_message_id: &str,
        button_id: &str,
    ) -> Result<(), TransportError> {
        self.inner
            .send_keyboard_response_boxed(request_message_id, button_id)
            .await
    }

    pub async fn rate_operator(
        &self,
        operator_id: &str,
        rating: u8,
        note: Option<&str>,
    ) -> Result<(), TransportError> {
        self.inner.rate_operator_boxed(operator_id, rating, note).await
    }

    pub async fn fetch_history(
        &self,
        cursor: &HistoryCursor,
        limit: usize,
    ) -> Result<HistoryPage, TransportError> {
        self.inner.fetch_history_boxed(cursor, limit).await
    }

    pub async fn fetch_all_history(&self) -> Result<Vec<MessageItem>, TransportError> {
        self.inner.fetch_all_history_boxed().await
    }

    pub async fn start_chat(&self) -> Result<(), TransportError> {
        self.inner.start_chat_boxed().await
    }

    pub async fn close_chat(&self) -> Result<(), TransportError> {
        self.inner.close_chat_boxed().await
    }

    pub async fn set_visitor_typing(&self, draft: Option<&str>) -> Result<(), TransportError> {
        self.inner.set_visitor_typing_boxed(draft).await
    }
}
