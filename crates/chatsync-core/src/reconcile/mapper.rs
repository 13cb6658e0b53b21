//! Turns wire records into `Message` candidates.

use chatsync_types::attachment::{Attachment, AttachmentState, FileInfo};
use chatsync_types::item::{FileItem, MessageItem, MessageKind, QuoteItem};
use chatsync_types::keyboard::{Keyboard, KeyboardButton, KeyboardRequest, KeyboardResponse};
use chatsync_types::message::{Group, Message, MessageType, Quote, QuoteState, SendStatus, Sticker};
use tracing::warn;

use crate::{attachment, keyboard};

/// Kind as exposed to listeners; `None` for kinds the engine does not show.
pub fn message_type(kind: MessageKind) -> Option<MessageType> {
    Some(match kind {
        MessageKind::ActionRequest => MessageType::ActionRequest,
        MessageKind::ContactInformationRequest => MessageType::ContactInformationRequest,
        MessageKind::FileFromOperator => MessageType::FileFromOperator,
        MessageKind::FileFromVisitor => MessageType::FileFromVisitor,
        MessageKind::Info => MessageType::Info,
        MessageKind::Keyboard => MessageType::Keyboard,
        MessageKind::KeyboardResponse => MessageType::KeyboardResponse,
        MessageKind::OperatorMessage => MessageType::OperatorMessage,
        MessageKind::OperatorBusy => MessageType::OperatorBusy,
        MessageKind::StickerVisitor => MessageType::StickerVisitor,
        MessageKind::VisitorMessage => MessageType::VisitorMessage,
        MessageKind::ContactInformation | MessageKind::ForOperator => return None,
    })
}

/// Build the candidate for `item`.
///
/// `previous` is the version already in the window, if any: it supplies the
/// identity, the timestamp when the record has none, and the prior keyboard
/// and attachment states the new ones are merged with. `fallback_micros` is
/// used when neither the record nor `previous` has a timestamp.
pub fn map_item(
    item: &MessageItem,
    previous: Option<&Message>,
    fallback_micros: Option<i64>,
) -> Option<Message> {
    let Some(kind_name) = item.kind.as_deref() else {
        warn!(key = ?item.key(), "message record without kind skipped");
        return None;
    };
    let Some(kind) = MessageKind::from_wire(kind_name).and_then(message_type) else {
        warn!(kind = kind_name, key = ?item.key(), "unsupported message kind skipped");
        return None;
    };

    let client_side_id = match previous {
        Some(prev) => prev.client_side_id.clone(),
        None => match item.key() {
            Some(key) => key.to_string(),
            None => {
                warn!(kind = kind_name, "message record without any id skipped");
                return None;
            }
        },
    };

    let timestamp_micros = item
        .time_micros()
        .or_else(|| previous.map(|p| p.timestamp_micros))
        .or(fallback_micros)
        .unwrap_or_else(|| {
            warn!(%client_side_id, "message record without timestamp");
            0
        });

    let mut message = Message::new(
        client_side_id,
        kind,
        item.text.clone().unwrap_or_default(),
        timestamp_micros,
    );
    message.server_side_id = item
        .server_side_id
        .clone()
        .or_else(|| previous.and_then(|p| p.server_side_id.clone()));
    message.send_status = SendStatus::Sent;
    message.sender_name = item.sender_name.clone().unwrap_or_default();
    message.sender_avatar_url = item.avatar_url.clone();
    message.operator_id = item.author_id();
    message.edited = item.edited.unwrap_or(false);
    message.read = item.read.unwrap_or(false);
    message.can_be_edited = item.can_be_edited.unwrap_or(false);
    message.can_be_replied = item.can_be_replied.unwrap_or(false);
    message.can_visitor_react = item.can_visitor_react.unwrap_or(false);
    message.can_visitor_change_reaction = item.can_visitor_change_reaction.unwrap_or(false);
    message.visitor_reaction = item.reaction.as_deref().and_then(|r| r.parse().ok());
    message.quote = item.quote.as_ref().and_then(map_quote);
    message.group = item.group().and_then(|g| {
        Some(Group {
            group_id: g.id?,
            index_in_group: g.message_number.unwrap_or(0),
            group_size: g.message_count.unwrap_or(1),
        })
    });

    match kind {
        MessageType::FileFromOperator | MessageType::FileFromVisitor => {
            if let Some(file) = item.file() {
                let incoming = map_attachment(file);
                message.raw_text = item.text.clone();
                if !incoming.file.file_name.is_empty() {
                    message.text = incoming.file.file_name.clone();
                }
                let prior = previous.and_then(|p| p.attachment.as_ref());
                message.attachment = Some(attachment::merge(prior, incoming));
            }
        }
        MessageType::Keyboard => {
            if let Some(incoming) = item.keyboard().map(map_keyboard) {
                let prior = previous.and_then(|p| p.keyboard.as_ref());
                message.keyboard = Some(keyboard::merge(prior, incoming));
            }
        }
        MessageType::KeyboardResponse => {
            message.keyboard_request = item.keyboard_request().and_then(|r| {
                let button = r.button?;
                Some(KeyboardRequest {
                    button: KeyboardButton {
                        id: button.id?,
                        text: button.text.unwrap_or_default(),
                    },
                    message_id: r.request?.message_id?,
                })
            });
        }
        MessageType::StickerVisitor => {
            message.sticker = item.sticker_id().map(|sticker_id| Sticker { sticker_id });
        }
        _ => {}
    }

    Some(message)
}

fn map_quote(quote: &QuoteItem) -> Option<Quote> {
    let state = quote
        .state
        .as_deref()
        .map_or(Ok(QuoteState::Pending), str::parse::<QuoteState>);
    let state = match state {
        Ok(state) => state,
        Err(reason) => {
            warn!(%reason, "quote with unknown state ignored");
            return None;
        }
    };
    let quoted = quote.message.as_ref();
    Some(Quote {
        state,
        author_id: quoted.and_then(|m| m.author_id()),
        quoted_message_id: quoted.and_then(|m| m.id.clone()),
        text: quoted.and_then(|m| m.text.clone()),
        sender_name: quoted.and_then(|m| m.sender_name.clone()),
        timestamp_micros: quoted
            .and_then(|m| m.timestamp_millis)
            .map(|ms| ms.saturating_mul(1_000)),
    })
}

fn map_attachment(file: FileItem) -> Attachment {
    let state = match file.state.as_deref() {
        None => AttachmentState::Ready,
        Some(raw) => raw.parse().unwrap_or_else(|reason: String| {
            warn!(%reason, "unknown attachment state, treating as error");
            AttachmentState::Error
        }),
    };
    let desc = file.desc.unwrap_or_default();
    let size = desc.image.and_then(|i| i.size);
    let progress = (state == AttachmentState::Upload)
        .then(|| file.progress.unwrap_or(0.0).clamp(0.0, 1.0));
    Attachment {
        file: FileInfo {
            file_name: desc.filename.unwrap_or_default(),
            size: desc.size,
            content_type: desc.content_type,
            guid: desc.guid,
            url: desc.url,
            image_width: size.as_ref().and_then(|s| s.width),
            image_height: size.as_ref().and_then(|s| s.height),
        },
        state,
        progress,
        error_type: file.error_type,
        error_message: file.error_message,
    }
}

fn map_keyboard(item: chatsync_types::item::KeyboardItem) -> Keyboard {
    let buttons = item
        .buttons
        .into_iter()
        .map(|row| {
            row.into_iter()
                .filter_map(|b| {
                    Some(KeyboardButton {
                        id: b.id?,
                        text: b.text.unwrap_or_default(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();
    let state = item
        .state
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(chatsync_types::keyboard::KeyboardState::Pending);
    let response = item.response.and_then(|r| {
        Some(KeyboardResponse {
            button_id: r.button_id?,
            message_id: r.message_id?,
        })
    });
    Keyboard {
        buttons,
        state,
        response,
    }
}
