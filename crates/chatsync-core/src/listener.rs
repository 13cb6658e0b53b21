//! Listener registration and owner-thread delivery.
//!
//! Events can be produced on any thread (transport tasks run wherever the
//! runtime puts them). They are queued here and handed to listeners only on
//! the session's owner thread, one at a time, in the order they were posted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chatsync_types::chat::{ChatState, OnlineStatus, Operator};
use chatsync_types::event::MessageEvent;
use tracing::debug;

use crate::gate::SessionGate;
use crate::lock;

/// Receives window changes of one tracker.
pub trait MessageListener: Send {
    fn on_event(&mut self, event: &MessageEvent);
}

impl<F> MessageListener for F
where
    F: FnMut(&MessageEvent) + Send,
{
    fn on_event(&mut self, event: &MessageEvent) {
        self(event)
    }
}

/// Receives chat state transitions of a session.
pub trait ChatStateListener: Send {
    fn on_chat_state_changed(&mut self, previous: ChatState, current: ChatState);
}

impl<F> ChatStateListener for F
where
    F: FnMut(ChatState, ChatState) + Send,
{
    fn on_chat_state_changed(&mut self, previous: ChatState, current: ChatState) {
        self(previous, current)
    }
}

/// Told when the chat's operator changes. Either side is `None` when no
/// operator is assigned.
pub trait OperatorChangeListener: Send {
    fn on_operator_changed(&mut self, previous: Option<&Operator>, current: Option<&Operator>);
}

impl<F> OperatorChangeListener for F
where
    F: FnMut(Option<&Operator>, Option<&Operator>) + Send,
{
    fn on_operator_changed(&mut self, previous: Option<&Operator>, current: Option<&Operator>) {
        self(previous, current)
    }
}

pub trait OperatorTypingListener: Send {
    fn on_operator_typing_changed(&mut self, is_typing: bool);
}

impl<F> OperatorTypingListener for F
where
    F: FnMut(bool) + Send,
{
    fn on_operator_typing_changed(&mut self, is_typing: bool) {
        self(is_typing)
    }
}

pub trait OnlineStatusListener: Send {
    fn on_online_status_changed(&mut self, previous: OnlineStatus, current: OnlineStatus);
}

impl<F> OnlineStatusListener for F
where
    F: FnMut(OnlineStatus, OnlineStatus) + Send,
{
    fn on_online_status_changed(&mut self, previous: OnlineStatus, current: OnlineStatus) {
        self(previous, current)
    }
}

/// Opaque handle of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ListenerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// A registered message listener plus the gate of the tracker that owns it.
pub(crate) struct ListenerSlot {
    id: ListenerId,
    gate: SessionGate,
    listener: Mutex<Box<dyn MessageListener>>,
}

impl ListenerSlot {
    pub(crate) fn new(gate: SessionGate, listener: Box<dyn MessageListener>) -> Self {
        Self {
            id: ListenerId::next(),
            gate,
            listener: Mutex::new(listener),
        }
    }

    pub(crate) fn id(&self) -> ListenerId {
        self.id
    }
}

enum Delivery {
    Message {
        slot: Arc<ListenerSlot>,
        event: MessageEvent,
    },
    ChatState {
        previous: ChatState,
        current: ChatState,
    },
    Operator {
        previous: Option<Operator>,
        current: Option<Operator>,
    },
    OperatorTyping(bool),
    OnlineStatus {
        previous: OnlineStatus,
        current: OnlineStatus,
    },
}

/// Call the listener in `slot` without holding its lock, so the callback may
/// replace itself. A replacement installed during the call wins.
fn call_taken<L: ?Sized>(slot: &Mutex<Option<Box<L>>>, f: impl FnOnce(&mut L)) -> bool {
    let taken = lock(slot).take();
    let Some(mut listener) = taken else {
        return false;
    };
    f(&mut *listener);
    let mut current = lock(slot);
    if current.is_none() {
        *current = Some(listener);
    }
    true
}

/// Owner-thread event queue of one session.
pub(crate) struct Dispatcher {
    gate: SessionGate,
    queue: Mutex<VecDeque<Delivery>>,
    delivering: AtomicBool,
    chat_state_listener: Mutex<Option<Box<dyn ChatStateListener>>>,
    operator_listener: Mutex<Option<Box<dyn OperatorChangeListener>>>,
    typing_listener: Mutex<Option<Box<dyn OperatorTypingListener>>>,
    online_status_listener: Mutex<Option<Box<dyn OnlineStatusListener>>>,
}

struct DeliveringFlag<'a>(&'a AtomicBool);

impl Drop for DeliveringFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dispatcher {
    pub(crate) fn new(gate: SessionGate) -> Self {
        Self {
            gate,
            queue: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            chat_state_listener: Mutex::new(None),
            operator_listener: Mutex::new(None),
            typing_listener: Mutex::new(None),
            online_status_listener: Mutex::new(None),
        }
    }

    pub(crate) fn post_message(&self, slot: &Arc<ListenerSlot>, event: MessageEvent) {
        lock(&self.queue).push_back(Delivery::Message {
            slot: Arc::clone(slot),
            event,
        });
    }

    pub(crate) fn post_chat_state(&self, previous: ChatState, current: ChatState) {
        lock(&self.queue).push_back(Delivery::ChatState { previous, current });
    }

    pub(crate) fn post_operator(&self, previous: Option<Operator>, current: Option<Operator>) {
        lock(&self.queue).push_back(Delivery::Operator { previous, current });
    }

    pub(crate) fn post_operator_typing(&self, is_typing: bool) {
        lock(&self.queue).push_back(Delivery::OperatorTyping(is_typing));
    }

    pub(crate) fn post_online_status(&self, previous: OnlineStatus, current: OnlineStatus) {
        lock(&self.queue).push_back(Delivery::OnlineStatus { previous, current });
    }

    pub(crate) fn set_chat_state_listener(&self, listener: Option<Box<dyn ChatStateListener>>) {
        *lock(&self.chat_state_listener) = listener;
    }

    pub(crate) fn set_operator_listener(&self, listener: Option<Box<dyn OperatorChangeListener>>) {
        *lock(&self.operator_listener) = listener;
    }

    pub(crate) fn set_typing_listener(&self, listener: Option<Box<dyn OperatorTypingListener>>) {
        *lock(&self.typing_listener) = listener;
    }

    pub(crate) fn set_online_status_listener(
        &self,
        listener: Option<Box<dyn OnlineStatusListener>>,
    ) {
        *lock(&self.online_status_listener) = listener;
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Deliver everything queued, if called on the owner thread and not
    /// already inside a delivery. Returns the number of events handed out.
    pub(crate) fn flush(&self) -> usize {
        if !self.gate.is_owner_thread() {
            return 0;
        }
        if self.delivering.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let _flag = DeliveringFlag(&self.delivering);

        let mut delivered = 0;
        loop {
            if self.gate.is_destroyed() {
                let dropped = {
                    let mut queue = lock(&self.queue);
                    let n = queue.len();
                    queue.clear();
                    n
                };
                if dropped > 0 {
                    debug!(dropped, "session destroyed, dropping queued events");
                }
                break;
            }
            let next = lock(&self.queue).pop_front();
            let Some(delivery) = next else {
                break;
            };
            if self.deliver(delivery) {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(&self, delivery: Delivery) -> bool {
        match delivery {
            Delivery::Message { slot, event } => {
                if slot.gate.is_destroyed() {
                    debug!(listener = %slot.id, "dropping event for destroyed tracker");
                    return false;
                }
                lock(&slot.listener).on_event(&event);
                true
            }
            Delivery::ChatState { previous, current } => {
                call_taken(&self.chat_state_listener, |l| {
                    l.on_chat_state_changed(previous, current)
                })
            }
            Delivery::Operator { previous, current } => {
                call_taken(&self.operator_listener, |l| {
                    l.on_operator_changed(previous.as_ref(), current.as_ref())
                })
            }
            Delivery::OperatorTyping(is_typing) => {
                call_taken(&self.typing_listener, |l| l.on_operator_typing_changed(is_typing))
            }
            Delivery::OnlineStatus { previous, current } => {
                call_taken(&self.online_status_listener, |l| {
                    l.on_online_status_changed(previous, current)
                })
            }
        }
    }
}
