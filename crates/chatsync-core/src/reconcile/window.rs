//! Ordered message window.

use chatsync_types::event::MessageEvent;
use chatsync_types::item::MessageItem;
use chatsync_types::message::Message;

/// An ordered, deduplicated list of messages.
///
/// Applying the events a tracker emits, in order, to an empty window (or to a
/// copy of the tracker's previous window) reproduces the tracker's window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageWindow {
    messages: Vec<Message>,
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn first(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, client_side_id: &str) -> Option<&Message> {
        self.position(client_side_id).map(|i| &self.messages[i])
    }

    pub fn position(&self, client_side_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.client_side_id == client_side_id)
    }

    pub fn position_by_server_id(&self, server_side_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.server_side_id.as_deref() == Some(server_side_id))
    }

    /// Position of the message `item` refers to.
    ///
    /// Lookup order: the item's client id, then its server id among server
    /// ids, then its server id among client ids (messages first seen without
    /// a client id are keyed by their server id).
    pub fn resolve(&self, item: &MessageItem) -> Option<usize> {
        if let Some(pos) = item.client_side_id.as_deref().and_then(|id| self.position(id)) {
            return Some(pos);
        }
        let server_id = item.server_side_id.as_deref()?;
        self.position_by_server_id(server_id)
            .or_else(|| self.position(server_id))
    }

    /// Apply one event the way a listener would.
    pub fn apply(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::Added { message, before } => {
                let index = before
                    .as_deref()
                    .and_then(|anchor| self.position(anchor))
                    .unwrap_or(self.messages.len());
                self.messages.insert(index, message.clone());
            }
            MessageEvent::Changed { new, .. } => {
                if let Some(i) = self.position(&new.client_side_id) {
                    self.messages[i] = new.clone();
                }
            }
            MessageEvent::Removed { message } => {
                if let Some(i) = self.position(&message.client_side_id) {
                    self.messages.remove(i);
                }
            }
        }
    }

    /// Insert at `index` and describe the insertion as an event.
    pub(crate) fn insert_at(&mut self, index: usize, message: Message) -> MessageEvent {
        let index = index.min(self.messages.len());
        let before = self
            .messages
            .get(index)
            .map(|m| m.client_side_id.clone());
        self.messages.insert(index, message.clone());
        MessageEvent::Added { message, before }
    }

    /// Insert after the last message not newer than `message`.
    pub(crate) fn insert_by_time(&mut self, message: Message) -> MessageEvent {
        let index = self
            .messages
            .iter()
            .rposition(|m| m.timestamp_micros <= message.timestamp_micros)
            .map_or(0, |i| i + 1);
        self.insert_at(index, message)
    }

    /// Replace the message at `index`; `None` when the value is unchanged.
    pub(crate) fn replace_at(&mut self, index: usize, new: Message) -> Option<MessageEvent> {
        let old = &self.messages[index];
        if *old == new {
            return None;
        }
        let old = std::mem::replace(&mut self.messages[index], new.clone());
        Some(MessageEvent::Changed { old, new })
    }

    /// Rebuild the message keyed by `client_side_id` with `f`.
    pub(crate) fn update<F>(&mut self, client_side_id: &str, f: F) -> Option<MessageEvent>
    where
        F: FnOnce(&Message) -> Message,
    {
        let index = self.position(client_side_id)?;
        let new = f(&self.messages[index]);
        self.replace_at(index, new)
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> MessageEvent {
        MessageEvent::Removed {
            message: self.messages.remove(index),
        }
    }

    pub(crate) fn remove(&mut self, client_side_id: &str) -> Option<MessageEvent> {
        let index = self.position(client_side_id)?;
        Some(self.remove_at(index))
    }
}
