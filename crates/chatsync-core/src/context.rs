//! State shared by a session and every handle it gives out.

use std::sync::{Arc, Mutex};

use chatsync_types::chat::{ChatState, OnlineStatus, Operator};
use chatsync_types::config::EngineConfig;
use chatsync_types::error::AccessError;
use chatsync_types::event::MessageEvent;
use chatsync_types::message::Message;
use dashmap::DashMap;
use tokio::runtime::Handle;

use crate::gate::SessionGate;
use crate::listener::{Dispatcher, ListenerId};
use crate::lock;
use crate::reconcile::MessageWindow;
use crate::tracker::TrackerCore;
use crate::transport::BoxTransport;

pub(crate) struct SessionContext {
    pub(crate) gate: SessionGate,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) trackers: DashMap<ListenerId, Arc<TrackerCore>>,
    pub(crate) transport: Arc<BoxTransport>,
    pub(crate) runtime: Handle,
    pub(crate) config: EngineConfig,
    pub(crate) chat_state: Mutex<ChatState>,
    pub(crate) operator: Mutex<Option<Operator>>,
    pub(crate) operator_typing: Mutex<bool>,
    pub(crate) online_status: Mutex<OnlineStatus>,
    /// Last rating given to each operator, optimistic until confirmed.
    pub(crate) ratings: DashMap<String, u8>,
}

impl SessionContext {
    pub(crate) fn new(
        gate: SessionGate,
        transport: BoxTransport,
        runtime: Handle,
        config: EngineConfig,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(gate.clone()),
            gate,
            trackers: DashMap::new(),
            transport: Arc::new(transport),
            runtime,
            config,
            chat_state: Mutex::new(ChatState::Unknown),
            operator: Mutex::new(None),
            operator_typing: Mutex::new(false),
            online_status: Mutex::new(OnlineStatus::Unknown),
            ratings: DashMap::new(),
        }
    }

    /// Gate check plus delivery of anything queued for the owner thread.
    pub(crate) fn enter(&self) -> Result<(), AccessError> {
        self.gate.check()?;
        self.dispatcher.flush();
        Ok(())
    }

    pub(crate) fn live_trackers(&self) -> Vec<Arc<TrackerCore>> {
        self.trackers
            .iter()
            .filter(|entry| !entry.value().is_destroyed())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// The message as the windows show it now; every live window receives
    /// the same changes, so the first copy found is current.
    pub(crate) fn current_message(&self, client_side_id: &str) -> Option<Message> {
        self.live_trackers()
            .iter()
            .find_map(|tracker| tracker.message(client_side_id))
    }

    /// Run `f` against every live tracker window and publish what it did.
    pub(crate) fn broadcast<F>(&self, mut f: F)
    where
        F: FnMut(&mut MessageWindow) -> Vec<MessageEvent>,
    {
        if self.gate.is_destroyed() {
            return;
        }
        for tracker in self.live_trackers() {
            tracker.apply(&self.dispatcher, &mut f);
        }
        self.dispatcher.flush();
    }

    pub(crate) fn chat_state(&self) -> ChatState {
        *lock(&self.chat_state)
    }

    pub(crate) fn operator(&self) -> Option<Operator> {
        lock(&self.operator).clone()
    }

    pub(crate) fn operator_typing(&self) -> bool {
        *lock(&self.operator_typing)
    }

    pub(crate) fn online_status(&self) -> OnlineStatus {
        *lock(&self.online_status)
    }
}
