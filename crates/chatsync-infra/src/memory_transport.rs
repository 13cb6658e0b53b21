//! In-process chat backend.
//!
//! [`InMemoryTransport`] keeps the server side of one conversation in memory:
//! it assigns server ids and timestamps, enforces ownership, answers history
//! pages and pushes the resulting records back to an attached session through
//! its [`UpdateSender`], the way a real backend's long-poll would.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatsync_core::UpdateSender;
use chatsync_core::transport::{
    HistoryCursor, HistoryPage, OutgoingFile, OutgoingMessage, OutgoingSticker, SendAck, Transport,
};
use chatsync_types::chat::{ChatState, OnlineStatus, Operator};
use chatsync_types::error::TransportError;
use chatsync_types::item::{MessageItem, QuoteItem, QuotedMessageItem};
use chatsync_types::message::{Reaction, now_micros};
use serde_json::{Value, json};
use uuid::Uuid;

/// Requests that can be told to fail with [`InMemoryTransport::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SendMessage,
    EditMessage,
    DeleteMessage,
    React,
    SendFile,
    SendSticker,
    KeyboardResponse,
    RateOperator,
    FetchHistory,
    StartChat,
    CloseChat,
    VisitorTyping,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::SendMessage => "send_message",
            Operation::EditMessage => "edit_message",
            Operation::DeleteMessage => "delete_message",
            Operation::React => "react",
            Operation::SendFile => "send_file",
            Operation::SendSticker => "send_sticker",
            Operation::KeyboardResponse => "keyboard_response",
            Operation::RateOperator => "rate_operator",
            Operation::FetchHistory => "fetch_history",
            Operation::StartChat => "start_chat",
            Operation::CloseChat => "close_chat",
            Operation::VisitorTyping => "visitor_typing",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Default)]
struct Backend {
    /// Server history, oldest first.
    history: Vec<MessageItem>,
    last_ts: i64,
    chat_state: Option<ChatState>,
    operator: Option<Operator>,
    online_status: OnlineStatus,
    typing: Option<String>,
    ratings: HashMap<String, (u8, Option<String>)>,
    failures: HashMap<Operation, String>,
    subscriber: Option<UpdateSender>,
}

impl Backend {
    /// Strictly increasing server clock.
    fn next_ts(&mut self) -> i64 {
        self.last_ts = now_micros().max(self.last_ts + 1);
        self.last_ts
    }

    fn check(&mut self, op: Operation) -> Result<(), TransportError> {
        match self.failures.remove(&op) {
            Some(code) => {
                tracing::debug!(%op, code = %code, "injected failure");
                Err(TransportError::rejected(code))
            }
            None => Ok(()),
        }
    }

    fn position(&self, server_side_id: &str) -> Option<usize> {
        self.history
            .iter()
            .position(|item| item.server_side_id.as_deref() == Some(server_side_id))
    }

    fn find_mut(&mut self, server_side_id: &str) -> Result<&mut MessageItem, TransportError> {
        let index = self
            .position(server_side_id)
            .ok_or_else(|| TransportError::rejected("message-not-found"))?;
        Ok(&mut self.history[index])
    }

    fn visitor_item(&mut self, client_side_id: &str, kind: &str, text: &str) -> MessageItem {
        MessageItem {
            client_side_id: Some(client_side_id.to_string()),
            server_side_id: Some(Uuid::now_v7().simple().to_string()),
            kind: Some(kind.to_string()),
            text: Some(text.to_string()),
            timestamp_micros: Some(self.next_ts()),
            sender_name: Some("Visitor".to_string()),
            can_be_edited: Some(kind == "visitor"),
            can_be_replied: Some(false),
            ..MessageItem::default()
        }
    }

    fn publish(&self, items: Vec<MessageItem>) {
        if let Some(sender) = &self.subscriber {
            if !sender.messages(items) {
                tracing::debug!("session gone, update dropped");
            }
        }
    }

    /// Store a new record and push it to the session.
    fn append(&mut self, item: MessageItem) -> SendAck {
        let server_side_id = item.server_side_id.clone().unwrap_or_default();
        self.history.push(item.clone());
        self.publish(vec![item]);
        SendAck { server_side_id }
    }
}

/// Loopback backend for tests and local embedding. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    backend: Arc<Mutex<Backend>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn backend(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push every future server-side change to `sender`.
    pub fn attach(&self, sender: UpdateSender) {
        self.backend().subscriber = Some(sender);
    }

    /// Make the next `op` request fail with server code `code`.
    pub fn fail_next(&self, op: Operation, code: impl Into<String>) {
        self.backend().failures.insert(op, code.into());
    }

    /// Post an operator message and return its server id.
    pub fn post_operator_message(&self, operator_id: &str, name: &str, text: &str) -> String {
        let mut backend = self.backend();
        let item = MessageItem {
            server_side_id: Some(Uuid::now_v7().simple().to_string()),
            kind: Some("operator".to_string()),
            text: Some(text.to_string()),
            timestamp_micros: Some(backend.next_ts()),
            author_id: Some(Value::String(operator_id.to_string())),
            sender_name: Some(name.to_string()),
            can_be_replied: Some(true),
            can_visitor_react: Some(true),
            can_visitor_change_reaction: Some(true),
            ..MessageItem::default()
        };
        backend.append(item).server_side_id
    }

    /// Post a keyboard with one row of `(id, text)` buttons.
    pub fn post_keyboard(&self, buttons: &[(&str, &str)]) -> String {
        let mut backend = self.backend();
        let row: Vec<Value> = buttons
            .iter()
            .map(|(id, text)| json!({"id": id, "text": text}))
            .collect();
        let item = MessageItem {
            server_side_id: Some(Uuid::now_v7().simple().to_string()),
            kind: Some("keyboard".to_string()),
            timestamp_micros: Some(backend.next_ts()),
            data: Some(json!({"buttons": [row], "state": "pending"})),
            ..MessageItem::default()
        };
        backend.append(item).server_side_id
    }

    /// Seed history without notifying anyone.
    pub fn seed(&self, items: Vec<MessageItem>) {
        let mut backend = self.backend();
        for item in &items {
            if let Some(ts) = item.time_micros() {
                backend.last_ts = backend.last_ts.max(ts);
            }
        }
        backend.history.extend(items);
        backend
            .history
            .sort_by_key(|item| item.time_micros().unwrap_or_default());
    }

    /// Delete a message server-side (as an operator would).
    pub fn remove_message(&self, server_side_id: &str) -> bool {
        let mut backend = self.backend();
        let Some(index) = backend.position(server_side_id) else {
            return false;
        };
        backend.history.remove(index);
        if let Some(sender) = &backend.subscriber {
            sender.message_deleted(server_side_id);
        }
        true
    }

    /// Move the chat to `state` and tell the session.
    pub fn set_chat_state(&self, state: ChatState) {
        let mut backend = self.backend();
        backend.chat_state = Some(state);
        if let Some(sender) = &backend.subscriber {
            sender.chat_state(state);
        }
    }

    /// Assign `operator` to the chat (or unassign with `None`) and tell the
    /// session.
    pub fn assign_operator(&self, operator: Option<Operator>) {
        let mut backend = self.backend();
        backend.operator = operator.clone();
        if let Some(sender) = &backend.subscriber {
            sender.operator(operator);
        }
    }

    pub fn set_operator_typing(&self, is_typing: bool) {
        if let Some(sender) = &self.backend().subscriber {
            sender.operator_typing(is_typing);
        }
    }

    pub fn set_online_status(&self, status: OnlineStatus) {
        let mut backend = self.backend();
        backend.online_status = status;
        if let Some(sender) = &backend.subscriber {
            sender.online_status(status);
        }
    }

    /// Report a fatal condition to the session.
    pub fn raise_fatal(&self, code: &str) {
        if let Some(sender) = &self.backend().subscriber {
            sender.fatal(code);
        }
    }

    pub fn history(&self) -> Vec<MessageItem> {
        self.backend().history.clone()
    }

    pub fn chat_state(&self) -> Option<ChatState> {
        self.backend().chat_state
    }

    pub fn operator(&self) -> Option<Operator> {
        self.backend().operator.clone()
    }

    pub fn online_status(&self) -> OnlineStatus {
        self.backend().online_status
    }

    pub fn typing_draft(&self) -> Option<String> {
        self.backend().typing.clone()
    }

    pub fn rating_of(&self, operator_id: &str) -> Option<u8> {
        self.backend().ratings.get(operator_id).map(|(r, _)| *r)
    }
}

impl Transport for InMemoryTransport {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<SendAck, TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::SendMessage)?;
        let mut item = backend.visitor_item(&message.client_side_id, "visitor", &message.text);
        if let Some(quoted_id) = &message.quoted_message_id {
            let quoted = backend
                .position(quoted_id)
                .map(|i| backend.history[i].clone());
            item.quote = Some(match quoted {
                Some(q) => QuoteItem {
                    state: Some("filled".to_string()),
                    message: Some(QuotedMessageItem {
                        author_id: q.author_id.clone(),
                        id: q.server_side_id.clone(),
                        kind: q.kind.clone(),
                        sender_name: q.sender_name.clone(),
                        text: q.text.clone(),
                        timestamp_millis: q.time_micros().map(|ts| ts / 1_000),
                    }),
                },
                None => QuoteItem {
                    state: Some("not-found".to_string()),
                    message: None,
                },
            });
        }
        Ok(backend.append(item))
    }

    async fn edit_message(&self, server_side_id: &str, text: &str) -> Result<(), TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::EditMessage)?;
        let item = backend.find_mut(server_side_id)?;
        if item.kind.as_deref() != Some("visitor") {
            return Err(TransportError::rejected("message-not-owned"));
        }
        if item.can_be_edited != Some(true) {
            return Err(TransportError::rejected("not-allowed"));
        }
        item.text = Some(text.to_string());
        item.edited = Some(true);
        let updated = item.clone();
        backend.publish(vec![updated]);
        Ok(())
    }

    async fn delete_message(&self, server_side_id: &str) -> Result<(), TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::DeleteMessage)?;
        let item = backend.find_mut(server_side_id)?;
        if !matches!(
            item.kind.as_deref(),
            Some("visitor" | "file_visitor" | "sticker_visitor")
        ) {
            return Err(TransportError::rejected("message-not-owned"));
        }
        if let Some(index) = backend.position(server_side_id) {
            backend.history.remove(index);
        }
        if let Some(sender) = &backend.subscriber {
            sender.message_deleted(server_side_id);
        }
        Ok(())
    }

    async fn react(&self, server_side_id: &str, reaction: Reaction) -> Result<(), TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::React)?;
        let item = backend.find_mut(server_side_id)?;
        let can_change = item.can_visitor_change_reaction == Some(true);
        if item.can_visitor_react != Some(true) || (item.reaction.is_some() && !can_change) {
            return Err(TransportError::rejected("not-allowed"));
        }
        item.reaction = Some(reaction.to_string());
        let updated = item.clone();
        backend.publish(vec![updated]);
        Ok(())
    }

    async fn send_file(&self, file: &OutgoingFile) -> Result<SendAck, TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::SendFile)?;
        let mut item = backend.visitor_item(&file.client_side_id, "file_visitor", &file.file_name);
        item.data = Some(json!({
            "file": {
                "state": "ready",
                "desc": {
                    "filename": file.file_name,
                    "size": file.data.len(),
                    "content_type": file.content_type,
                    "guid": Uuid::now_v7().simple().to_string(),
                }
            }
        }));
        Ok(backend.append(item))
    }

    async fn send_sticker(&self, sticker: &OutgoingSticker) -> Result<SendAck, TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::SendSticker)?;
        let mut item = backend.visitor_item(&sticker.client_side_id, "sticker_visitor", "");
        item.data = Some(json!({"stickerId": sticker.sticker_id}));
        Ok(backend.append(item))
    }

    async fn send_keyboard_response(
        &self,
        request_message_id: &str,
        button_id: &str,
    ) -> Result<(), TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::KeyboardResponse)?;
        let item = backend
            .find_mut(request_message_id)
            .map_err(|_| TransportError::rejected("can-not-create-response"))?;
        let Some(data) = item.data.as_mut() else {
            return Err(TransportError::rejected("can-not-create-response"));
        };
        let known = data["buttons"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_array)
            .flatten()
            .any(|b| b["id"].as_str() == Some(button_id));
        if data["state"].as_str() != Some("pending") || !known {
            return Err(TransportError::rejected("can-not-create-response"));
        }
        data["state"] = json!("completed");
        data["response"] = json!({"buttonId": button_id, "messageId": request_message_id});
        let updated = item.clone();
        backend.publish(vec![updated]);
        Ok(())
    }

    async fn rate_operator(
        &self,
        operator_id: &str,
        rating: u8,
        note: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::RateOperator)?;
        let known = backend
            .history
            .iter()
            .any(|item| item.author_id().as_deref() == Some(operator_id));
        if !known {
            return Err(TransportError::rejected("wrong-operator-id"));
        }
        backend
            .ratings
            .insert(operator_id.to_string(), (rating, note.map(str::to_string)));
        Ok(())
    }

    async fn fetch_history(
        &self,
        cursor: &HistoryCursor,
        limit: usize,
    ) -> Result<HistoryPage, TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::FetchHistory)?;
        let end = match cursor.before_timestamp_micros {
            Some(before) => backend
                .history
                .iter()
                .take_while(|item| item.time_micros().is_some_and(|ts| ts < before))
                .count(),
            None => backend.history.len(),
        };
        let start = end.saturating_sub(limit);
        tracing::debug!(start, end, "serving history page");
        Ok(HistoryPage {
            items: backend.history[start..end].to_vec(),
            has_more: start > 0,
        })
    }

    async fn fetch_all_history(&self) -> Result<Vec<MessageItem>, TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::FetchHistory)?;
        Ok(backend.history.clone())
    }

    async fn start_chat(&self) -> Result<(), TransportError> {
        self.backend().check(Operation::StartChat)?;
        self.set_chat_state(ChatState::Queue);
        Ok(())
    }

    async fn close_chat(&self) -> Result<(), TransportError> {
        self.backend().check(Operation::CloseChat)?;
        self.set_chat_state(ChatState::ClosedByVisitor);
        if self.operator().is_some() {
            self.set_operator_typing(false);
            self.assign_operator(None);
        }
        Ok(())
    }

    async fn set_visitor_typing(&self, draft: Option<&str>) -> Result<(), TransportError> {
        let mut backend = self.backend();
        backend.check(Operation::VisitorTyping)?;
        backend.typing = draft.map(str::to_string);
        Ok(())
    }
}
