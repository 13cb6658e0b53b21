//! Test doubles shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chatsync_types::error::TransportError;
use chatsync_types::event::MessageEvent;
use chatsync_types::item::MessageItem;
use chatsync_types::message::Reaction;
use tokio::sync::Notify;

use crate::listener::MessageListener;
use crate::lock;
use crate::reconcile::MessageWindow;
use crate::session::{Session, SessionBuilder, UpdateSender};
use crate::transport::{
    HistoryCursor, HistoryPage, OutgoingFile, OutgoingMessage, OutgoingSticker, SendAck, Transport,
};

#[derive(Default)]
struct Script {
    history: Mutex<Vec<MessageItem>>,
    failures: Mutex<HashMap<&'static str, String>>,
    hold: Mutex<Option<Arc<Notify>>>,
    history_requests: AtomicUsize,
    next_id: AtomicUsize,
    sent_texts: Mutex<Vec<String>>,
    deleted_ids: Mutex<Vec<String>>,
}

/// Transport answering from a fixed history, with one-shot failures.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    script: Arc<Script>,
}

impl ScriptedTransport {
    pub(crate) fn with_history(history: Vec<MessageItem>) -> Self {
        let transport = Self::default();
        *lock(&transport.script.history) = history;
        transport
    }

    /// Make the next `op` request fail with `code`.
    pub(crate) fn fail_next(&self, op: &'static str, code: &str) {
        lock(&self.script.failures).insert(op, code.to_string());
    }

    /// Park history requests until the returned notify fires.
    pub(crate) fn hold_history(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *lock(&self.script.hold) = Some(Arc::clone(&notify));
        notify
    }

    pub(crate) fn history_requests(&self) -> usize {
        self.script.history_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        lock(&self.script.sent_texts).clone()
    }

    pub(crate) fn deleted_ids(&self) -> Vec<String> {
        lock(&self.script.deleted_ids).clone()
    }

    fn take_failure(&self, op: &str) -> Result<(), TransportError> {
        match lock(&self.script.failures).remove(op) {
            Some(code) => Err(TransportError::rejected(code)),
            None => Ok(()),
        }
    }

    fn ack(&self) -> SendAck {
        let n = self.script.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        SendAck {
            server_side_id: format!("srv-{n}"),
        }
    }
}

impl Transport for ScriptedTransport {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<SendAck, TransportError> {
        self.take_failure("send")?;
        lock(&self.script.sent_texts).push(message.text.clone());
        Ok(self.ack())
    }

    async fn edit_message(&self, _server_side_id: &str, _text: &str) -> Result<(), TransportError> {
        self.take_failure("edit")
    }

    async fn delete_message(&self, server_side_id: &str) -> Result<(), TransportError> {
        self.take_failure("delete")?;
        lock(&self.script.deleted_ids).push(server_side_id.to_string());
        Ok(())
    }

    async fn react(&self, _server_side_id: &str, _reaction: Reaction) -> Result<(), TransportError> {
        self.take_failure("react")
    }

    async fn send_file(&self, _file: &OutgoingFile) -> Result<SendAck, TransportError> {
        self.take_failure("file")?;
        Ok(self.ack())
    }

    async fn send_sticker(&self, _sticker: &OutgoingSticker) -> Result<SendAck, TransportError> {
        self.take_failure("sticker")?;
        Ok(self.ack())
    }

    async fn send_keyboard_response(
        &self,
        _request_message_id: &str,
        _button_id: &str,
    ) -> Result<(), TransportError> {
        self.take_failure("keyboard")
    }

    async fn rate_operator(
        &self,
        _operator_id: &str,
        _rating: u8,
        _note: Option<&str>,
    ) -> Result<(), TransportError> {
        self.take_failure("rate")
    }

    async fn fetch_history(
        &self,
        cursor: &HistoryCursor,
        limit: usize,
    ) -> Result<HistoryPage, TransportError> {
        self.script.history_requests.fetch_add(1, Ordering::SeqCst);
        let hold = lock(&self.script.hold).take();
        if let Some(notify) = hold {
            notify.notified().await;
        }
        self.take_failure("history")?;

        let history = lock(&self.script.history);
        let older: Vec<&MessageItem> = history
            .iter()
            .filter(|item| match cursor.before_timestamp_micros {
                Some(before) => item.time_micros().is_some_and(|ts| ts < before),
                None => true,
            })
            .collect();
        let start = older.len().saturating_sub(limit);
        Ok(HistoryPage {
            items: older[start..].iter().map(|item| (*item).clone()).collect(),
            has_more: start > 0,
        })
    }

    async fn fetch_all_history(&self) -> Result<Vec<MessageItem>, TransportError> {
        self.take_failure("history")?;
        Ok(lock(&self.script.history).clone())
    }

    async fn start_chat(&self) -> Result<(), TransportError> {
        self.take_failure("chat")
    }

    async fn close_chat(&self) -> Result<(), TransportError> {
        self.take_failure("chat")
    }

    async fn set_visitor_typing(&self, _draft: Option<&str>) -> Result<(), TransportError> {
        self.take_failure("typing")
    }
}

/// Listener that keeps every event it receives.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<MessageEvent>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn listener(&self) -> Box<dyn MessageListener> {
        let events = Arc::clone(&self.events);
        Box::new(move |event: &MessageEvent| lock(&events).push(event.clone()))
    }

    pub(crate) fn events(&self) -> Vec<MessageEvent> {
        lock(&self.events).clone()
    }

    /// Ids of the list a listener would hold after replaying every event.
    pub(crate) fn window_ids(&self) -> Vec<String> {
        let mut window = MessageWindow::new();
        for event in lock(&self.events).iter() {
            window.apply(event);
        }
        window
            .messages()
            .iter()
            .map(|m| m.client_side_id.clone())
            .collect()
    }
}

pub(crate) fn operator_record(id: &str, ts: i64) -> MessageItem {
    MessageItem {
        server_side_id: Some(id.to_string()),
        kind: Some("operator".to_string()),
        text: Some(format!("message {id}")),
        timestamp_micros: Some(ts),
        can_be_replied: Some(true),
        ..MessageItem::default()
    }
}

/// A session over `transport`, built on the current runtime.
pub(crate) fn session_with(transport: ScriptedTransport) -> (Session, UpdateSender) {
    let session = SessionBuilder::new()
        .account_name("demo")
        .location("mobile")
        .build(transport)
        .unwrap();
    let sender = session.update_sender();
    (session, sender)
}
