//! Visitor-side actions on the conversation.
//!
//! Every action is optimistic: local validation happens synchronously, the
//! visible windows change right away, and the transport's answer either
//! confirms the change or rolls it back.

use std::sync::Arc;

use chatsync_types::attachment::FileInfo;
use chatsync_types::chat::{ChatState, OnlineStatus, Operator};
use chatsync_types::error::{
    AccessError, ChatActionError, DeleteMessageError, EditMessageError, KeyboardResponseError,
    RateOperatorError, ReactionError, SendFileError, SendMessageError, SendStickerError,
};
use chatsync_types::message::{
    Message, MessageType, Quote, QuoteState, Reaction, SendStatus, Sticker,
};
use tracing::{debug, info, warn};

use crate::completion::Completion;
use crate::context::SessionContext;
use crate::listener::{
    ChatStateListener, MessageListener, OnlineStatusListener, OperatorChangeListener,
    OperatorTypingListener,
};
use crate::tracker::MessageTracker;
use crate::transport::{OutgoingFile, OutgoingMessage, OutgoingSticker};
use crate::{attachment, keyboard, lock};

/// A file the visitor wants to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Entry point for everything the visitor does in the chat.
///
/// Cheap to clone; every clone talks to the same session.
#[derive(Clone)]
pub struct MessageStream {
    ctx: Arc<SessionContext>,
}

impl MessageStream {
    pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    fn check_text(&self, text: &str) -> Result<(), SendMessageError> {
        if text.trim().is_empty() {
            return Err(SendMessageError::MessageEmpty);
        }
        if text.chars().count() > self.ctx.config.max_message_length {
            return Err(SendMessageError::MaxLengthExceeded);
        }
        Ok(())
    }

    /// Show `message` in every window.
    fn show(&self, message: &Message) {
        let msg = message.clone();
        self.ctx
            .broadcast(|window| vec![window.insert_by_time(msg.clone())]);
    }

    /// Replace the message keyed by `client_side_id` in every window.
    fn restore(ctx: &SessionContext, client_side_id: &str, f: impl Fn(&Message) -> Message) {
        ctx.broadcast(|window| window.update(client_side_id, &f).into_iter().collect());
    }

    /// Confirm or withdraw an optimistic message once the server answered.
    fn settle<E>(
        ctx: &SessionContext,
        pending: &Message,
        outcome: Result<Result<String, E>, AccessError>,
    ) -> Result<Message, E>
    where
        E: From<AccessError> + std::fmt::Display,
    {
        match outcome {
            Err(access) => Err(access.into()),
            Ok(Ok(server_side_id)) => {
                let sent = pending.confirmed(server_side_id);
                let update = sent.clone();
                ctx.broadcast(|window| {
                    window
                        .update(&update.client_side_id, |current| Message {
                            server_side_id: update.server_side_id.clone(),
                            send_status: SendStatus::Sent,
                            ..current.clone()
                        })
                        .into_iter()
                        .collect()
                });
                debug!(
                    client_side_id = %sent.client_side_id,
                    server_side_id = ?sent.server_side_id,
                    "message confirmed"
                );
                Ok(sent)
            }
            Ok(Err(err)) => {
                warn!(client_side_id = %pending.client_side_id, error = %err, "message rejected");
                ctx.broadcast(|window| {
                    window
                        .remove(&pending.client_side_id)
                        .into_iter()
                        .collect()
                });
                Err(err)
            }
        }
    }

    fn send_text(
        &self,
        text: &str,
        quote: Option<Quote>,
    ) -> Result<Completion<Message, SendMessageError>, AccessError> {
        let mut message =
            Message::outgoing(MessageType::VisitorMessage, text, &self.ctx.config.visitor_name);
        let quoted_message_id = quote.as_ref().and_then(|q| q.quoted_message_id.clone());
        message.quote = quote;
        self.show(&message);
        debug!(client_side_id = %message.client_side_id, reply = quoted_message_id.is_some(), "sending message");

        let outgoing = OutgoingMessage {
            client_side_id: message.client_side_id.clone(),
            text: text.to_string(),
            quoted_message_id,
        };
        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.ctx.transport);
        let request = self.ctx.gate.guard(async move {
            transport
                .send_message(&outgoing)
                .await
                .map(|ack| ack.server_side_id)
                .map_err(SendMessageError::from)
        });
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            Self::settle(&ctx, &message, request.await)
        }))
    }

    /// Send a text message.
    ///
    /// The message shows up immediately with `Sending` status and switches to
    /// `Sent` once the server acknowledges it. A rejected message is removed.
    pub fn send(&self, text: &str) -> Result<Completion<Message, SendMessageError>, AccessError> {
        self.ctx.enter()?;
        if let Err(err) = self.check_text(text) {
            return Ok(Completion::ready(Err(err)));
        }
        self.send_text(text, None)
    }

    /// Send a text message quoting `quoted`.
    pub fn reply(
        &self,
        text: &str,
        quoted: &Message,
    ) -> Result<Completion<Message, SendMessageError>, AccessError> {
        self.ctx.enter()?;
        if let Err(err) = self.check_text(text) {
            return Ok(Completion::ready(Err(err)));
        }
        let Some(quoted_id) = quoted.server_side_id.clone().filter(|_| quoted.can_be_replied)
        else {
            return Ok(Completion::ready(Err(SendMessageError::QuoteNotAllowed)));
        };
        let quote = Quote {
            state: QuoteState::Pending,
            author_id: quoted.operator_id.clone(),
            quoted_message_id: Some(quoted_id),
            text: Some(quoted.text.clone()),
            sender_name: Some(quoted.sender_name.clone()),
            timestamp_micros: Some(quoted.timestamp_micros),
        };
        self.send_text(text, Some(quote))
    }

    /// Replace the text of a visitor message the server already has.
    pub fn edit(
        &self,
        message: &Message,
        text: &str,
    ) -> Result<Completion<(), EditMessageError>, AccessError> {
        self.ctx.enter()?;
        let server_side_id = match Self::check_edit(message) {
            Ok(id) => id,
            Err(err) => return Ok(Completion::ready(Err(err))),
        };
        match self.check_text(text) {
            Err(SendMessageError::MessageEmpty) => {
                return Ok(Completion::ready(Err(EditMessageError::MessageEmpty)));
            }
            Err(_) => return Ok(Completion::ready(Err(EditMessageError::MaxLengthExceeded))),
            Ok(()) => {}
        }

        let id = message.client_side_id.clone();
        let before = self.ctx.current_message(&id).unwrap_or_else(|| message.clone());
        let new_text = text.to_string();
        {
            let new_text = new_text.clone();
            Self::restore(&self.ctx, &id, move |current| Message {
                text: new_text.clone(),
                send_status: SendStatus::Sending,
                ..current.clone()
            });
        }
        debug!(client_side_id = %id, server_side_id = %server_side_id, "editing message");

        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.ctx.transport);
        let request = self.ctx.gate.guard(async move {
            transport.edit_message(&server_side_id, &new_text).await?;
            Ok::<_, chatsync_types::error::TransportError>(new_text)
        });
        let pending_text = text.to_string();
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            match request.await? {
                Ok(new_text) => {
                    Self::restore(&ctx, &id, move |current| Message {
                        text: new_text.clone(),
                        send_status: SendStatus::Sent,
                        edited: true,
                        ..current.clone()
                    });
                    Ok(())
                }
                Err(err) => {
                    warn!(client_side_id = %id, error = %err, "edit rejected");
                    // Fields a server update rewrote meanwhile are kept.
                    Self::restore(&ctx, &id, |current| {
                        let mut next = current.clone();
                        if current.text == pending_text {
                            next.text = before.text.clone();
                        }
                        if current.send_status == SendStatus::Sending {
                            next.send_status = before.send_status;
                        }
                        next
                    });
                    Err(err.into())
                }
            }
        }))
    }

    fn check_edit(message: &Message) -> Result<String, EditMessageError> {
        if !message.kind.is_visitor_authored() {
            return Err(EditMessageError::MessageNotOwned);
        }
        if message.kind != MessageType::VisitorMessage {
            return Err(EditMessageError::WrongMessageKind);
        }
        match &message.server_side_id {
            Some(id) if message.can_be_edited && !message.deleted => Ok(id.clone()),
            _ => Err(EditMessageError::NotAllowed),
        }
    }

    /// Delete a visitor message. It is marked deleted right away and removed
    /// from the windows once the server agrees.
    pub fn delete(
        &self,
        message: &Message,
    ) -> Result<Completion<(), DeleteMessageError>, AccessError> {
        self.ctx.enter()?;
        if !message.kind.is_visitor_authored() {
            return Ok(Completion::ready(Err(DeleteMessageError::MessageNotOwned)));
        }
        let Some(server_side_id) = message.server_side_id.clone().filter(|_| message.can_be_edited)
        else {
            return Ok(Completion::ready(Err(DeleteMessageError::NotAllowed)));
        };

        let id = message.client_side_id.clone();
        let before = self.ctx.current_message(&id).unwrap_or_else(|| message.clone());
        Self::restore(&self.ctx, &id, |current| Message {
            deleted: true,
            send_status: SendStatus::Sending,
            ..current.clone()
        });
        debug!(client_side_id = %id, server_side_id = %server_side_id, "deleting message");

        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.ctx.transport);
        let request = self
            .ctx
            .gate
            .guard(async move { transport.delete_message(&server_side_id).await });
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            match request.await? {
                Ok(()) => {
                    ctx.broadcast(|window| window.remove(&id).into_iter().collect());
                    Ok(())
                }
                Err(err) => {
                    warn!(client_side_id = %id, error = %err, "delete rejected");
                    Self::restore(&ctx, &id, |current| {
                        let mut next = current.clone();
                        if current.deleted {
                            next.deleted = before.deleted;
                        }
                        if current.send_status == SendStatus::Sending {
                            next.send_status = before.send_status;
                        }
                        next
                    });
                    Err(err.into())
                }
            }
        }))
    }

    /// Upload a file as a visitor message carrying an attachment in `Upload`
    /// state. Progress arrives through session updates.
    pub fn send_file(
        &self,
        file: FileUpload,
    ) -> Result<Completion<Message, SendFileError>, AccessError> {
        self.ctx.enter()?;
        let size = file.data.len() as u64;
        if size == 0 {
            return Ok(Completion::ready(Err(SendFileError::FileSizeTooSmall)));
        }
        if size > self.ctx.config.max_file_size_bytes {
            return Ok(Completion::ready(Err(SendFileError::FileSizeExceeded)));
        }
        if !self.ctx.config.allows_file_type(&file.content_type) {
            return Ok(Completion::ready(Err(SendFileError::FileTypeNotAllowed(
                file.content_type,
            ))));
        }

        let mut message = Message::outgoing(
            MessageType::FileFromVisitor,
            file.file_name.as_str(),
            &self.ctx.config.visitor_name,
        );
        message.attachment = Some(attachment::uploading(FileInfo {
            file_name: file.file_name.clone(),
            size: Some(size),
            content_type: Some(file.content_type.clone()),
            guid: None,
            url: None,
            image_width: None,
            image_height: None,
        }));
        self.show(&message);
        info!(client_side_id = %message.client_side_id, file_name = %file.file_name, size, "uploading file");

        let outgoing = OutgoingFile {
            client_side_id: message.client_side_id.clone(),
            file_name: file.file_name,
            content_type: file.content_type,
            data: file.data,
        };
        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.ctx.transport);
        let request = self.ctx.gate.guard(async move {
            transport
                .send_file(&outgoing)
                .await
                .map(|ack| ack.server_side_id)
                .map_err(SendFileError::from)
        });
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            Self::settle(&ctx, &message, request.await)
        }))
    }

    pub fn send_sticker(
        &self,
        sticker_id: i64,
    ) -> Result<Completion<Message, SendStickerError>, AccessError> {
        self.ctx.enter()?;
        let mut message =
            Message::outgoing(MessageType::StickerVisitor, "", &self.ctx.config.visitor_name);
        message.sticker = Some(Sticker { sticker_id });
        self.show(&message);

        let outgoing = OutgoingSticker {
            client_side_id: message.client_side_id.clone(),
            sticker_id,
        };
        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.ctx.transport);
        let request = self.ctx.gate.guard(async move {
            transport
                .send_sticker(&outgoing)
                .await
                .map(|ack| ack.server_side_id)
                .map_err(SendStickerError::from)
        });
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            Self::settle(&ctx, &message, request.await)
        }))
    }

    /// Answer a keyboard by pressing `button_id`.
    pub fn send_keyboard_response(
        &self,
        message: &Message,
        button_id: &str,
    ) -> Result<Completion<(), KeyboardResponseError>, AccessError> {
        self.ctx.enter()?;
        let id = message.client_side_id.clone();
        let shown = self.ctx.current_message(&id).unwrap_or_else(|| message.clone());
        let Some(current) = shown.keyboard.as_ref() else {
            return Ok(Completion::ready(Err(
                KeyboardResponseError::CanNotCreateResponse,
            )));
        };
        let Some(server_side_id) = shown.server_side_id.clone() else {
            return Ok(Completion::ready(Err(
                KeyboardResponseError::RequestMessageIdNotSet,
            )));
        };
        let answered = match keyboard::respond(current, button_id, &server_side_id) {
            Ok(answered) => answered,
            Err(err) => return Ok(Completion::ready(Err(err))),
        };

        Self::restore(&self.ctx, &id, |m| match &m.keyboard {
            Some(k) if !k.state.is_terminal() => Message {
                keyboard: Some(answered.clone()),
                ..m.clone()
            },
            _ => m.clone(),
        });
        debug!(client_side_id = %id, button_id, "keyboard response sent");

        let previous = shown.keyboard.clone();
        let button_id = button_id.to_string();
        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.ctx.transport);
        let request = self.ctx.gate.guard(async move {
            transport
                .send_keyboard_response(&server_side_id, &button_id)
                .await
        });
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            match request.await? {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!(client_side_id = %id, error = %err, "keyboard response rejected");
                    Self::restore(&ctx, &id, |m| {
                        if m.keyboard.as_ref() == Some(&answered) {
                            Message {
                                keyboard: previous.clone(),
                                ..m.clone()
                            }
                        } else {
                            m.clone()
                        }
                    });
                    Err(err.into())
                }
            }
        }))
    }

    /// Rate an operator from 1 to 5, optionally with a note.
    pub fn rate_operator(
        &self,
        operator_id: &str,
        rating: u8,
        note: Option<String>,
    ) -> Result<Completion<(), RateOperatorError>, AccessError> {
        self.ctx.enter()?;
        if operator_id.trim().is_empty() {
            return Ok(Completion::ready(Err(RateOperatorError::WrongOperatorId)));
        }
        if !(1..=5).contains(&rating) {
            return Ok(Completion::ready(Err(RateOperatorError::RatingOutOfRange(
                rating,
            ))));
        }
        if note
            .as_deref()
            .is_some_and(|n| n.chars().count() > self.ctx.config.max_rating_note_length)
        {
            return Ok(Completion::ready(Err(RateOperatorError::NoteIsTooLong)));
        }

        let operator_id = operator_id.to_string();
        let previous = self.ctx.ratings.insert(operator_id.clone(), rating);
        debug!(operator_id = %operator_id, rating, "rating operator");

        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.ctx.transport);
        let request = {
            let operator_id = operator_id.clone();
            self.ctx.gate.guard(async move {
                transport
                    .rate_operator(&operator_id, rating, note.as_deref())
                    .await
            })
        };
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            match request.await? {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!(operator_id = %operator_id, error = %err, "rating rejected");
                    match previous {
                        Some(old) => {
                            ctx.ratings.insert(operator_id, old);
                        }
                        None => {
                            ctx.ratings.remove(&operator_id);
                        }
                    }
                    Err(err.into())
                }
            }
        }))
    }

    /// Last rating this session gave `operator_id`.
    pub fn last_rating_of_operator(&self, operator_id: &str) -> Result<Option<u8>, AccessError> {
        self.ctx.enter()?;
        Ok(self.ctx.ratings.get(operator_id).map(|r| *r.value()))
    }

    /// Set (or replace) the visitor's reaction to an operator message.
    pub fn react(
        &self,
        message: &Message,
        reaction: Reaction,
    ) -> Result<Completion<(), ReactionError>, AccessError> {
        self.ctx.enter()?;
        if !message.can_visitor_react
            || (message.visitor_reaction.is_some() && !message.can_visitor_change_reaction)
        {
            return Ok(Completion::ready(Err(ReactionError::NotAllowed)));
        }
        let Some(server_side_id) = message.server_side_id.clone() else {
            return Ok(Completion::ready(Err(ReactionError::MessageNotFound)));
        };

        let id = message.client_side_id.clone();
        let previous = self
            .ctx
            .current_message(&id)
            .map_or(message.visitor_reaction, |m| m.visitor_reaction);
        Self::restore(&self.ctx, &id, |m| Message {
            visitor_reaction: Some(reaction),
            ..m.clone()
        });
        debug!(client_side_id = %id, %reaction, "reacting to message");

        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.ctx.transport);
        let request = self
            .ctx
            .gate
            .guard(async move { transport.react(&server_side_id, reaction).await });
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            match request.await? {
                Ok(()) => Ok(()),
                Err(err) => {
                    warn!(client_side_id = %id, error = %err, "reaction rejected");
                    Self::restore(&ctx, &id, |m| {
                        if m.visitor_reaction == Some(reaction) {
                            Message {
                                visitor_reaction: previous,
                                ..m.clone()
                            }
                        } else {
                            m.clone()
                        }
                    });
                    Err(err.into())
                }
            }
        }))
    }

    fn chat_action<F, Fut>(&self, action: &'static str, f: F) -> Result<Completion<(), ChatActionError>, AccessError>
    where
        F: FnOnce(Arc<crate::transport::BoxTransport>) -> Fut,
        Fut: std::future::Future<Output = Result<(), chatsync_types::error::TransportError>>
            + Send
            + 'static,
    {
        self.ctx.enter()?;
        debug!(action, "chat action");
        let request = self.ctx.gate.guard(f(Arc::clone(&self.ctx.transport)));
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            request.await?.map_err(|err| {
                warn!(action, error = %err, "chat action failed");
                ChatActionError::from(err)
            })
        }))
    }

    pub fn start_chat(&self) -> Result<Completion<(), ChatActionError>, AccessError> {
        self.chat_action("start_chat", |transport| async move {
            transport.start_chat().await
        })
    }

    pub fn close_chat(&self) -> Result<Completion<(), ChatActionError>, AccessError> {
        self.chat_action("close_chat", |transport| async move {
            transport.close_chat().await
        })
    }

    /// Tell the operator what the visitor is typing; `None` clears the draft.
    pub fn set_visitor_typing(
        &self,
        draft: Option<String>,
    ) -> Result<Completion<(), ChatActionError>, AccessError> {
        self.chat_action("set_visitor_typing", |transport| async move {
            transport.set_visitor_typing(draft.as_deref()).await
        })
    }

    pub fn chat_state(&self) -> Result<ChatState, AccessError> {
        self.ctx.enter()?;
        Ok(self.ctx.chat_state())
    }

    /// Replace the chat state listener; `None` removes it.
    pub fn set_chat_state_listener(
        &self,
        listener: Option<Box<dyn ChatStateListener>>,
    ) -> Result<(), AccessError> {
        self.ctx.enter()?;
        self.ctx.dispatcher.set_chat_state_listener(listener);
        Ok(())
    }

    /// Operator currently assigned to the chat.
    pub fn current_operator(&self) -> Result<Option<Operator>, AccessError> {
        self.ctx.enter()?;
        Ok(self.ctx.operator())
    }

    pub fn is_operator_typing(&self) -> Result<bool, AccessError> {
        self.ctx.enter()?;
        Ok(self.ctx.operator_typing())
    }

    pub fn online_status(&self) -> Result<OnlineStatus, AccessError> {
        self.ctx.enter()?;
        Ok(self.ctx.online_status())
    }

    pub fn set_operator_change_listener(
        &self,
        listener: Option<Box<dyn OperatorChangeListener>>,
    ) -> Result<(), AccessError> {
        self.ctx.enter()?;
        self.ctx.dispatcher.set_operator_listener(listener);
        Ok(())
    }

    pub fn set_operator_typing_listener(
        &self,
        listener: Option<Box<dyn OperatorTypingListener>>,
    ) -> Result<(), AccessError> {
        self.ctx.enter()?;
        self.ctx.dispatcher.set_typing_listener(listener);
        Ok(())
    }

    pub fn set_online_status_listener(
        &self,
        listener: Option<Box<dyn OnlineStatusListener>>,
    ) -> Result<(), AccessError> {
        self.ctx.enter()?;
        self.ctx.dispatcher.set_online_status_listener(listener);
        Ok(())
    }

    /// Start tracking the conversation. The tracker's window is empty until
    /// its first `get_next_messages`.
    pub fn new_message_tracker(
        &self,
        listener: Box<dyn MessageListener>,
    ) -> Result<MessageTracker, AccessError> {
        self.ctx.enter()?;
        Ok(MessageTracker::register(&self.ctx, listener))
    }

    /// Number of live trackers.
    pub fn tracker_count(&self) -> Result<usize, AccessError> {
        self.ctx.enter()?;
        Ok(self.ctx.live_trackers().len())
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("chat_state", &*lock(&self.ctx.chat_state))
            .finish_non_exhaustive()
    }
}
