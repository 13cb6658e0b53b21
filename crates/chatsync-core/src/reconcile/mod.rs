//! Snapshot reconciliation.
//!
//! `reconcile` diffs the window a listener currently sees against a batch of
//! server records and returns the minimal event sequence that brings the
//! listener up to date. Events are computed against a working copy that is
//! updated as each event is produced, so every anchor names a message that
//! exists at the moment the event is applied.
//!
//! Rules:
//! - records are matched by client id, then server id (see
//!   [`MessageWindow::resolve`]); a record repeated in one batch counts once,
//!   as its last occurrence;
//! - unmatched records are `Added` right after the record preceding them in
//!   the batch (unless that record is newer), moving past older window
//!   messages so timestamps stay ordered; otherwise they are placed purely by
//!   timestamp. The event names the message it lands in front of, or none
//!   when it lands at the end;
//! - matched records that differ become `Changed` in place;
//! - deleted records remove the matched message and are otherwise ignored.

pub mod mapper;
pub mod window;

use std::collections::{HashMap, HashSet};

use chatsync_types::event::MessageEvent;
use chatsync_types::item::MessageItem;
use chatsync_types::message::Message;
use tracing::{debug, warn};

pub use window::MessageWindow;

/// Events that turn `previous` into the reconciled window.
pub fn reconcile(previous: &[Message], snapshot: &[MessageItem]) -> Vec<MessageEvent> {
    let mut window = MessageWindow::from_messages(previous.to_vec());
    reconcile_into(&mut window, snapshot)
}

/// Reconcile `snapshot` into `window` in place, returning the applied events.
pub fn reconcile_into(window: &mut MessageWindow, snapshot: &[MessageItem]) -> Vec<MessageEvent> {
    let items = dedupe(snapshot);

    // Window message each record refers to, taken before anything moves.
    let resolved: Vec<Option<String>> = items
        .iter()
        .map(|item| {
            window
                .resolve(item)
                .map(|i| window.messages()[i].client_side_id.clone())
        })
        .collect();
    let mut last_reference: HashMap<&str, usize> = HashMap::new();
    for (i, id) in resolved.iter().enumerate() {
        if let Some(id) = id {
            last_reference.insert(id.as_str(), i);
        }
    }

    let mut events = Vec::new();
    let mut preceding: Option<(String, i64)> = None;

    for (i, item) in items.iter().enumerate() {
        let existing = window.resolve(item);

        if item.is_deleted() {
            if let Some(index) = existing {
                let event = window.remove_at(index);
                debug!(client_side_id = event.client_side_id(), "message deleted");
                events.push(event);
            }
            continue;
        }

        let previous = existing.map(|index| &window.messages()[index]);
        let fallback = preceding.as_ref().map(|(_, ts)| *ts);
        let Some(candidate) = mapper::map_item(item, previous, fallback) else {
            continue;
        };
        let anchor = (candidate.client_side_id.clone(), candidate.timestamp_micros);

        match existing {
            Some(index) => {
                if let Some(event) = window.replace_at(index, candidate) {
                    events.push(event);
                }
            }
            None => {
                let start = preceding
                    .as_ref()
                    .filter(|(_, ts)| *ts <= candidate.timestamp_micros)
                    .and_then(|(id, _)| window.position(id))
                    .map_or(0, |p| p + 1);
                let index = insertion_index(window, start, &candidate, i, &last_reference);
                events.push(window.insert_at(index, candidate));
            }
        }
        preceding = Some(anchor);
    }

    events
}

/// Walk forward from `start` over messages not newer than `candidate`,
/// stopping at any message a later record of this batch refers to.
fn insertion_index(
    window: &MessageWindow,
    start: usize,
    candidate: &Message,
    record_index: usize,
    last_reference: &HashMap<&str, usize>,
) -> usize {
    let messages = window.messages();
    let mut index = start.min(messages.len());
    while let Some(next) = messages.get(index) {
        if next.timestamp_micros > candidate.timestamp_micros {
            break;
        }
        let referenced_later = last_reference
            .get(next.client_side_id.as_str())
            .is_some_and(|&j| j > record_index);
        if referenced_later {
            break;
        }
        index += 1;
    }
    index
}

/// Keep only the last occurrence of every key, in order of those last
/// occurrences. Records without any id are dropped.
fn dedupe(snapshot: &[MessageItem]) -> Vec<&MessageItem> {
    let mut seen = HashSet::new();
    let mut kept: Vec<&MessageItem> = Vec::with_capacity(snapshot.len());
    for item in snapshot.iter().rev() {
        let Some(key) = item.key() else {
            warn!(kind = ?item.kind, "message record without id skipped");
            continue;
        };
        if seen.insert(key) {
            kept.push(item);
        }
    }
    kept.reverse();
    if kept.len() < snapshot.len() {
        debug!(
            records = snapshot.len(),
            unique = kept.len(),
            "collapsed repeated records"
        );
    }
    kept
}
