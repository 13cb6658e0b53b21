//! Session engine for chatsync.
//!
//! Keeps a local, ordered view of one visitor's conversation in sync with a
//! chat backend reached through the [`transport::Transport`] port:
//!
//! - [`session`] owns the thread gate, the update inbox and every tracker;
//! - [`tracker`] pages history backward into a listener-visible window;
//! - [`stream`] runs optimistic visitor actions (send, edit, delete, ...);
//! - [`reconcile`] turns server records into add/change/remove events;
//! - [`keyboard`] and [`attachment`] hold the per-message state machines.
//!
//! All public calls must come from the thread that built the session.
//! Transport work runs on the tokio runtime; its results reach listeners on
//! the owner thread through the session's dispatcher.

pub mod attachment;
pub mod completion;
pub(crate) mod context;
pub mod gate;
pub mod keyboard;
pub mod listener;
pub mod reconcile;
pub mod session;
pub mod stream;
pub mod tracker;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use completion::Completion;
pub use listener::{
    ChatStateListener, ListenerId, MessageListener, OnlineStatusListener, OperatorChangeListener,
    OperatorTypingListener,
};
pub use session::{FatalErrorHandler, Session, SessionBuilder, UpdateSender};
pub use stream::{FileUpload, MessageStream};
pub use tracker::MessageTracker;
pub use transport::{BoxTransport, Transport};

/// Lock ignoring poison: every guarded value stays consistent between
/// statements, so a panicking listener cannot leave it half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
