//! Message trackers: a listener-visible window paged backward through history.

use std::sync::{Arc, Mutex};

use chatsync_types::error::{AccessError, TrackerError};
use chatsync_types::event::MessageEvent;
use chatsync_types::item::MessageItem;
use chatsync_types::message::Message;
use tracing::{debug, info, warn};

use crate::completion::Completion;
use crate::context::SessionContext;
use crate::gate::SessionGate;
use crate::listener::{Dispatcher, ListenerId, ListenerSlot, MessageListener};
use crate::lock;
use crate::reconcile::{MessageWindow, reconcile_into};
use crate::transport::{HistoryCursor, HistoryPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Paging {
    Idle,
    InFlight,
}

#[derive(Debug)]
struct TrackerState {
    window: MessageWindow,
    paging: Paging,
    /// Oldest timestamp the window covers; `None` until the first page.
    lower_bound: Option<i64>,
    reached_start: bool,
}

impl TrackerState {
    fn cursor(&self) -> HistoryCursor {
        let head = self.window.first();
        let head_ts = head.map(|m| m.timestamp_micros);
        let before = match (self.lower_bound, head_ts) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        HistoryCursor {
            before_timestamp_micros: before,
            before_id: head.and_then(|m| m.server_side_id.clone()),
        }
    }

    fn extend_lower_bound(&mut self) {
        if let Some(head) = self.window.first() {
            let ts = head.timestamp_micros;
            self.lower_bound = Some(self.lower_bound.map_or(ts, |lb| lb.min(ts)));
        }
    }
}

/// Shared part of a tracker: what the session, the stream and in-flight
/// requests touch.
pub(crate) struct TrackerCore {
    slot: Arc<ListenerSlot>,
    gate: SessionGate,
    state: Mutex<TrackerState>,
}

impl TrackerCore {
    fn new(gate: SessionGate, listener: Box<dyn MessageListener>) -> Self {
        Self {
            slot: Arc::new(ListenerSlot::new(gate.clone(), listener)),
            gate,
            state: Mutex::new(TrackerState {
                window: MessageWindow::new(),
                paging: Paging::Idle,
                lower_bound: None,
                reached_start: false,
            }),
        }
    }

    pub(crate) fn id(&self) -> ListenerId {
        self.slot.id()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.gate.is_destroyed()
    }

    /// The window's copy of the message keyed by `client_side_id`.
    pub(crate) fn message(&self, client_side_id: &str) -> Option<Message> {
        lock(&self.state).window.get(client_side_id).cloned()
    }

    /// Mutate the window with `f` and queue the events it reports.
    pub(crate) fn apply<F>(&self, dispatcher: &Dispatcher, f: F) -> Vec<MessageEvent>
    where
        F: FnOnce(&mut MessageWindow) -> Vec<MessageEvent>,
    {
        let mut state = lock(&self.state);
        if self.gate.is_destroyed() {
            return Vec::new();
        }
        let events = f(&mut state.window);
        for event in &events {
            dispatcher.post_message(&self.slot, event.clone());
        }
        events
    }

    /// Reconcile a live batch. New records older than the window's lower
    /// bound are left for paging to pick up.
    pub(crate) fn ingest(&self, dispatcher: &Dispatcher, items: &[MessageItem]) {
        let mut state = lock(&self.state);
        if self.gate.is_destroyed() {
            return;
        }
        let bound = state.lower_bound;
        let accepted: Vec<MessageItem> = items
            .iter()
            .filter(|item| {
                item.is_deleted()
                    || state.window.resolve(item).is_some()
                    || match (bound, item.time_micros()) {
                        (Some(lb), Some(ts)) => ts >= lb,
                        _ => true,
                    }
            })
            .cloned()
            .collect();
        if accepted.len() < items.len() {
            debug!(
                tracker = %self.id(),
                ignored = items.len() - accepted.len(),
                "records older than the window left for paging"
            );
        }
        let events = reconcile_into(&mut state.window, &accepted);
        for event in events {
            dispatcher.post_message(&self.slot, event);
        }
    }

    fn finish_page(&self, dispatcher: &Dispatcher, page: HistoryPage) -> Vec<Message> {
        let mut state = lock(&self.state);
        state.paging = Paging::Idle;
        if self.gate.is_destroyed() {
            return Vec::new();
        }
        if page.items.is_empty() || !page.has_more {
            state.reached_start = true;
        }
        let events = reconcile_into(&mut state.window, &page.items);
        state.extend_lower_bound();
        let mut added = Vec::new();
        for event in events {
            if let MessageEvent::Added { message, .. } = &event {
                added.push(message.clone());
            }
            dispatcher.post_message(&self.slot, event);
        }
        added.sort_by_key(|m| state.window.position(&m.client_side_id));
        debug!(
            tracker = %self.id(),
            added = added.len(),
            reached_start = state.reached_start,
            "history page applied"
        );
        added
    }

    fn abort_page(&self) {
        lock(&self.state).paging = Paging::Idle;
    }
}

/// A paginated, listener-backed view of the conversation.
///
/// Created by [`crate::MessageStream::new_message_tracker`]. Dropping the
/// tracker unregisters its listener.
pub struct MessageTracker {
    core: Arc<TrackerCore>,
    ctx: Arc<SessionContext>,
}

impl MessageTracker {
    pub(crate) fn register(ctx: &Arc<SessionContext>, listener: Box<dyn MessageListener>) -> Self {
        let core = Arc::new(TrackerCore::new(ctx.gate.child(), listener));
        ctx.trackers.insert(core.id(), Arc::clone(&core));
        info!(tracker = %core.id(), "message tracker created");
        Self {
            core,
            ctx: Arc::clone(ctx),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.core.id()
    }

    fn enter(&self) -> Result<(), AccessError> {
        self.core.gate.check()?;
        self.ctx.dispatcher.flush();
        Ok(())
    }

    /// Ask for up to `limit` messages older than the window.
    ///
    /// Resolves immediately with nothing (and emits nothing) when `limit` is
    /// zero, a request is already in flight, or the start of history has been
    /// reached. Otherwise the page is reconciled into the window, its events
    /// are delivered, and the completion yields the messages it added.
    pub fn get_next_messages(
        &self,
        limit: usize,
    ) -> Result<Completion<Vec<Message>, TrackerError>, AccessError> {
        self.enter()?;
        if limit == 0 {
            return Ok(Completion::ready(Ok(Vec::new())));
        }
        let cursor = {
            let mut state = lock(&self.core.state);
            if state.paging == Paging::InFlight || state.reached_start {
                debug!(
                    tracker = %self.id(),
                    in_flight = state.paging == Paging::InFlight,
                    reached_start = state.reached_start,
                    "page request ignored"
                );
                return Ok(Completion::ready(Ok(Vec::new())));
            }
            state.paging = Paging::InFlight;
            state.cursor()
        };
        debug!(tracker = %self.id(), limit, ?cursor, "requesting history page");

        let core = Arc::clone(&self.core);
        let ctx = Arc::clone(&self.ctx);
        let transport = Arc::clone(&self.ctx.transport);
        let request = core
            .gate
            .guard(async move { transport.fetch_history(&cursor, limit).await });
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            match request.await {
                Err(access) => {
                    core.abort_page();
                    Err(TrackerError::Access(access))
                }
                Ok(Err(err)) => {
                    core.abort_page();
                    warn!(tracker = %core.id(), error = %err, "history request failed");
                    Err(TrackerError::Transport(err))
                }
                Ok(Ok(page)) => {
                    let added = core.finish_page(&ctx.dispatcher, page);
                    ctx.dispatcher.flush();
                    Ok(added)
                }
            }
        }))
    }

    /// Complete history as the server has it, without touching the window.
    pub fn get_all_messages(&self) -> Result<Completion<Vec<Message>, TrackerError>, AccessError> {
        self.enter()?;
        let transport = Arc::clone(&self.ctx.transport);
        let request = self
            .core
            .gate
            .guard(async move { transport.fetch_all_history().await });
        Ok(Completion::spawn(&self.ctx.runtime, async move {
            let items = request.await??;
            let mut scratch = MessageWindow::new();
            reconcile_into(&mut scratch, &items);
            Ok(scratch.into_messages())
        }))
    }

    /// Narrow the window so `message` is its oldest entry.
    ///
    /// Everything older is removed (with events) and paging restarts from
    /// `message`. Ignored while a page request is in flight.
    pub fn reset_to(&self, message: &Message) -> Result<(), AccessError> {
        self.enter()?;
        {
            let mut state = lock(&self.core.state);
            if state.paging == Paging::InFlight {
                debug!(tracker = %self.id(), "reset ignored while paging");
                return Ok(());
            }
            let cut = state
                .window
                .position(&message.client_side_id)
                .unwrap_or_else(|| {
                    state
                        .window
                        .messages()
                        .iter()
                        .take_while(|m| m.timestamp_micros < message.timestamp_micros)
                        .count()
                });
            for _ in 0..cut {
                let event = state.window.remove_at(0);
                self.ctx.dispatcher.post_message(&self.core.slot, event);
            }
            state.lower_bound = Some(message.timestamp_micros);
            state.reached_start = false;
            debug!(tracker = %self.id(), removed = cut, "window reset");
        }
        self.ctx.dispatcher.flush();
        Ok(())
    }

    /// Current window contents, oldest first.
    pub fn messages(&self) -> Result<Vec<Message>, AccessError> {
        self.enter()?;
        Ok(lock(&self.core.state).window.messages().to_vec())
    }

    pub fn is_loading(&self) -> Result<bool, AccessError> {
        self.enter()?;
        Ok(lock(&self.core.state).paging == Paging::InFlight)
    }

    pub fn reached_start_of_history(&self) -> Result<bool, AccessError> {
        self.enter()?;
        Ok(lock(&self.core.state).reached_start)
    }

    /// Stop tracking. Idempotent; afterwards every other call fails with
    /// `InvalidSession`.
    pub fn destroy(&self) -> Result<(), AccessError> {
        if !self.core.gate.is_owner_thread() {
            return Err(AccessError::InvalidThread);
        }
        if self.core.gate.is_destroyed() {
            return Ok(());
        }
        self.core.gate.destroy();
        self.ctx.trackers.remove(&self.id());
        info!(tracker = %self.id(), "message tracker destroyed");
        Ok(())
    }
}

impl Drop for MessageTracker {
    fn drop(&mut self) {
        self.core.gate.destroy();
        self.ctx.trackers.remove(&self.core.id());
    }
}

impl std::fmt::Debug for MessageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTracker")
            .field("id", &self.core.id())
            .finish_non_exhaustive()
    }
}
