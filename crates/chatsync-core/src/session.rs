//! Session lifecycle: construction, the update inbox and destruction.
//!
//! A session is bound to the thread that builds it. Transports (or anything
//! else that learns about server state) push [`ChatUpdate`]s through an
//! [`UpdateSender`] from any thread; the owner thread applies them with
//! [`Session::process_updates`] or [`Session::run`].

use std::sync::Arc;

use chatsync_types::chat::{ChatState, ChatUpdate, FatalError, OnlineStatus, Operator};
use chatsync_types::config::EngineConfig;
use chatsync_types::error::{AccessError, SessionBuilderError};
use chatsync_types::item::MessageItem;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::attachment;
use crate::context::SessionContext;
use crate::gate::SessionGate;
use crate::lock;
use crate::stream::MessageStream;
use crate::transport::{BoxTransport, Transport};

/// Told once about a fatal server error, right before the session is
/// destroyed.
pub trait FatalErrorHandler: Send {
    fn on_fatal_error(&mut self, error: &FatalError);
}

impl<F> FatalErrorHandler for F
where
    F: FnMut(&FatalError) + Send,
{
    fn on_fatal_error(&mut self, error: &FatalError) {
        self(error)
    }
}

/// Thread-safe handle for pushing server updates into a session.
#[derive(Debug, Clone)]
pub struct UpdateSender(mpsc::UnboundedSender<ChatUpdate>);

impl UpdateSender {
    /// Queue `update`; `false` once the session is gone.
    pub fn send(&self, update: ChatUpdate) -> bool {
        self.0.send(update).is_ok()
    }

    pub fn messages(&self, items: Vec<MessageItem>) -> bool {
        self.send(ChatUpdate::Messages(items))
    }

    pub fn message_deleted(&self, id: impl Into<String>) -> bool {
        self.send(ChatUpdate::MessageDeleted { id: id.into() })
    }

    pub fn upload_progress(&self, client_side_id: impl Into<String>, progress: f64) -> bool {
        self.send(ChatUpdate::UploadProgress {
            client_side_id: client_side_id.into(),
            progress,
        })
    }

    pub fn chat_state(&self, state: ChatState) -> bool {
        self.send(ChatUpdate::ChatState(state))
    }

    pub fn operator(&self, operator: Option<Operator>) -> bool {
        self.send(ChatUpdate::Operator(operator))
    }

    pub fn operator_typing(&self, is_typing: bool) -> bool {
        self.send(ChatUpdate::OperatorTyping(is_typing))
    }

    pub fn online_status(&self, status: OnlineStatus) -> bool {
        self.send(ChatUpdate::OnlineStatus(status))
    }

    pub fn fatal(&self, code: impl Into<String>) -> bool {
        self.send(ChatUpdate::Fatal(FatalError::from_code(code)))
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Remote notification registration: push system plus hex device token.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteNotifications {
    system: Option<String>,
    device_token: Option<String>,
}

/// Validating builder for [`Session`].
#[derive(Default)]
pub struct SessionBuilder {
    account_name: Option<String>,
    location: Option<String>,
    remote_notifications: Option<RemoteNotifications>,
    visitor_fields_json: Option<String>,
    provided_authorization_token: Option<String>,
    config: EngineConfig,
    fatal_error_handler: Option<Box<dyn FatalErrorHandler>>,
    runtime: Option<Handle>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_name(mut self, account_name: impl Into<String>) -> Self {
        self.account_name = Some(account_name.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Register for push notifications. Both parts must be given together;
    /// the device token is hex.
    pub fn remote_notifications(
        mut self,
        system: Option<String>,
        device_token_hex: Option<String>,
    ) -> Self {
        self.remote_notifications = Some(RemoteNotifications {
            system,
            device_token: device_token_hex,
        });
        self
    }

    pub fn visitor_fields_json(mut self, json: impl Into<String>) -> Self {
        self.visitor_fields_json = Some(json.into());
        self
    }

    pub fn provided_authorization_token(mut self, token: impl Into<String>) -> Self {
        self.provided_authorization_token = Some(token.into());
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fatal_error_handler(mut self, handler: Box<dyn FatalErrorHandler>) -> Self {
        self.fatal_error_handler = Some(handler);
        self
    }

    /// Runtime transport requests are spawned on. Defaults to the runtime
    /// `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn validate(&self) -> Result<(), SessionBuilderError> {
        if self.account_name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            return Err(SessionBuilderError::NilAccountName);
        }
        if self.location.as_deref().is_none_or(|l| l.trim().is_empty()) {
            return Err(SessionBuilderError::NilLocation);
        }
        if let Some(remote) = &self.remote_notifications {
            match (&remote.system, &remote.device_token) {
                (Some(_), Some(token)) => {
                    if token.is_empty()
                        || token.len() % 2 != 0
                        || !token.chars().all(|c| c.is_ascii_hexdigit())
                    {
                        return Err(SessionBuilderError::InvalidHex(token.clone()));
                    }
                }
                (None, None) => {}
                _ => return Err(SessionBuilderError::InvalidRemoteNotificationConfiguration),
            }
        }
        if self.visitor_fields_json.is_some() && self.provided_authorization_token.is_some() {
            return Err(SessionBuilderError::InvalidAuthenticationParameters);
        }
        Ok(())
    }

    /// Validate the configuration and create a session bound to the calling
    /// thread.
    pub fn build<T: Transport + 'static>(self, transport: T) -> Result<Session, SessionBuilderError> {
        self.validate()?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| SessionBuilderError::NoRuntime)?,
        };
        let account_name = self.account_name.unwrap_or_default();
        let location = self.location.unwrap_or_default();

        let gate = SessionGate::new();
        let ctx = Arc::new(SessionContext::new(
            gate,
            BoxTransport::new(transport),
            runtime,
            self.config.sanitized(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        info!(account = %account_name, location = %location, "session created");

        Ok(Session {
            ctx,
            inbox: rx,
            sender: UpdateSender(tx),
            fatal_error_handler: self.fatal_error_handler,
            account_name,
            location,
        })
    }
}

/// One visitor's chat session.
pub struct Session {
    ctx: Arc<SessionContext>,
    inbox: mpsc::UnboundedReceiver<ChatUpdate>,
    sender: UpdateSender,
    fatal_error_handler: Option<Box<dyn FatalErrorHandler>>,
    account_name: String,
    location: String,
}

impl Session {
    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn message_stream(&self) -> Result<MessageStream, AccessError> {
        self.ctx.enter()?;
        Ok(MessageStream::new(Arc::clone(&self.ctx)))
    }

    /// Handle for pushing updates from any thread.
    pub fn update_sender(&self) -> UpdateSender {
        self.sender.clone()
    }

    /// Apply every update queued so far. Returns how many were applied.
    pub fn process_updates(&mut self) -> Result<usize, AccessError> {
        self.ctx.enter()?;
        let mut applied = 0;
        while !self.ctx.gate.is_destroyed() {
            let Ok(update) = self.inbox.try_recv() else {
                break;
            };
            self.apply(update);
            applied += 1;
        }
        self.ctx.dispatcher.flush();
        Ok(applied)
    }

    /// Apply updates as they arrive until the session is destroyed.
    ///
    /// Must be polled on the owner thread (a current-thread runtime or a
    /// `LocalSet`).
    pub async fn run(&mut self) -> Result<(), AccessError> {
        self.ctx.enter()?;
        loop {
            let update = tokio::select! {
                biased;
                _ = self.ctx.gate.destroyed() => return Ok(()),
                update = self.inbox.recv() => update,
            };
            match update {
                Some(update) => {
                    self.ctx.gate.check()?;
                    self.apply(update);
                    self.ctx.dispatcher.flush();
                }
                None => return Ok(()),
            }
        }
    }

    fn apply(&mut self, update: ChatUpdate) {
        match update {
            ChatUpdate::Messages(items) => {
                debug!(count = items.len(), "applying message update");
                for tracker in self.ctx.live_trackers() {
                    tracker.ingest(&self.ctx.dispatcher, &items);
                }
            }
            ChatUpdate::MessageDeleted { id } => {
                debug!(server_side_id = %id, "applying server deletion");
                let tombstone = [MessageItem::tombstone(id)];
                for tracker in self.ctx.live_trackers() {
                    tracker.ingest(&self.ctx.dispatcher, &tombstone);
                }
            }
            ChatUpdate::UploadProgress {
                client_side_id,
                progress,
            } => {
                self.ctx.broadcast(|window| {
                    window
                        .update(&client_side_id, |m| {
                            let mut next = m.clone();
                            next.attachment = m
                                .attachment
                                .as_ref()
                                .and_then(|a| attachment::record_progress(a, progress))
                                .or_else(|| m.attachment.clone());
                            next
                        })
                        .into_iter()
                        .collect()
                });
            }
            ChatUpdate::ChatState(state) => {
                let previous = std::mem::replace(&mut *lock(&self.ctx.chat_state), state);
                if previous != state {
                    info!(%previous, current = %state, "chat state changed");
                    self.ctx.dispatcher.post_chat_state(previous, state);
                }
            }
            ChatUpdate::Operator(operator) => {
                let previous = std::mem::replace(&mut *lock(&self.ctx.operator), operator.clone());
                if previous != operator {
                    info!(
                        previous = ?previous.as_ref().map(|o| o.id.as_str()),
                        current = ?operator.as_ref().map(|o| o.id.as_str()),
                        "operator changed"
                    );
                    self.ctx.dispatcher.post_operator(previous, operator);
                }
            }
            ChatUpdate::OperatorTyping(is_typing) => {
                let previous = std::mem::replace(&mut *lock(&self.ctx.operator_typing), is_typing);
                if previous != is_typing {
                    debug!(is_typing, "operator typing changed");
                    self.ctx.dispatcher.post_operator_typing(is_typing);
                }
            }
            ChatUpdate::OnlineStatus(status) => {
                let previous = std::mem::replace(&mut *lock(&self.ctx.online_status), status);
                if previous != status {
                    info!(%previous, current = %status, "online status changed");
                    self.ctx.dispatcher.post_online_status(previous, status);
                }
            }
            ChatUpdate::Fatal(error) => {
                warn!(code = %error.code, kind = ?error.kind, "fatal session error");
                if let Some(mut handler) = self.fatal_error_handler.take() {
                    handler.on_fatal_error(&error);
                }
                self.shutdown();
            }
        }
    }

    fn shutdown(&self) {
        self.ctx.gate.destroy();
        self.ctx.trackers.clear();
        self.ctx.dispatcher.flush();
    }

    /// Tear the session down. Idempotent; afterwards every call on the
    /// session, its stream and its trackers fails with `InvalidSession`, and
    /// in-flight completions resolve the same way.
    pub fn destroy(&self) -> Result<(), AccessError> {
        if !self.ctx.gate.is_owner_thread() {
            return Err(AccessError::InvalidThread);
        }
        if self.ctx.gate.is_destroyed() {
            return Ok(());
        }
        self.shutdown();
        info!(account = %self.account_name, "session destroyed");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.ctx.gate.is_destroyed()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ctx.gate.destroy();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_name", &self.account_name)
            .field("location", &self.location)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Recorder, ScriptedTransport, operator_record, session_with};
    use chatsync_types::error::{FatalErrorKind, SendMessageError, TrackerError};
    use std::sync::Mutex;

    fn builder() -> SessionBuilder {
        SessionBuilder::new().account_name("demo").location("mobile")
    }

    #[tokio::test]
    async fn test_builder_requires_account_and_location() {
        let err = SessionBuilder::new()
            .location("mobile")
            .build(ScriptedTransport::default())
            .unwrap_err();
        assert_eq!(err, SessionBuilderError::NilAccountName);

        let err = SessionBuilder::new()
            .account_name("demo")
            .build(ScriptedTransport::default())
            .unwrap_err();
        assert_eq!(err, SessionBuilderError::NilLocation);
    }

    #[tokio::test]
    async fn test_builder_checks_remote_notifications() {
        let err = builder()
            .remote_notifications(Some("fcm".to_string()), None)
            .build(ScriptedTransport::default())
            .unwrap_err();
        assert_eq!(err, SessionBuilderError::InvalidRemoteNotificationConfiguration);

        let err = builder()
            .remote_notifications(Some("fcm".to_string()), Some("zz12".to_string()))
            .build(ScriptedTransport::default())
            .unwrap_err();
        assert_eq!(err, SessionBuilderError::InvalidHex("zz12".to_string()));

        assert!(
            builder()
                .remote_notifications(Some("fcm".to_string()), Some("0a1B".to_string()))
                .build(ScriptedTransport::default())
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_builder_rejects_conflicting_auth() {
        let err = builder()
            .visitor_fields_json("{}")
            .provided_authorization_token("token")
            .build(ScriptedTransport::default())
            .unwrap_err();
        assert_eq!(err, SessionBuilderError::InvalidAuthenticationParameters);
    }

    #[test]
    fn test_builder_needs_runtime() {
        let err = builder().build(ScriptedTransport::default()).unwrap_err();
        assert_eq!(err, SessionBuilderError::NoRuntime);
    }

    #[tokio::test]
    async fn test_live_update_reaches_loaded_tracker() {
        let transport = ScriptedTransport::with_history(vec![operator_record("1", 10)]);
        let (mut session, sender) = session_with(transport);
        let recorder = Recorder::new();
        let tracker = session
            .message_stream()
            .unwrap()
            .new_message_tracker(recorder.listener())
            .unwrap();
        tracker.get_next_messages(10).unwrap().await.unwrap();

        assert!(sender.messages(vec![operator_record("2", 20)]));
        assert_eq!(session.process_updates(), Ok(1));
        assert_eq!(recorder.window_ids(), vec!["1", "2"]);

        assert!(sender.message_deleted("1"));
        session.process_updates().unwrap();
        assert_eq!(recorder.window_ids(), vec!["2"]);
    }

    #[tokio::test]
    async fn test_live_update_older_than_window_is_left_for_paging() {
        let transport = ScriptedTransport::with_history(vec![
            operator_record("1", 10),
            operator_record("3", 30),
        ]);
        let (mut session, sender) = session_with(transport);
        let recorder = Recorder::new();
        let tracker = session
            .message_stream()
            .unwrap()
            .new_message_tracker(recorder.listener())
            .unwrap();
        tracker.get_next_messages(1).unwrap().await.unwrap();
        assert_eq!(recorder.window_ids(), vec!["3"]);

        sender.messages(vec![operator_record("old", 5)]);
        session.process_updates().unwrap();
        assert_eq!(recorder.window_ids(), vec!["3"]);
    }

    #[tokio::test]
    async fn test_chat_state_listener_sees_transitions() {
        let (mut session, sender) = session_with(ScriptedTransport::default());
        let stream = session.message_stream().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        stream
            .set_chat_state_listener(Some(Box::new(move |prev: ChatState, cur: ChatState| {
                sink.lock().unwrap().push((prev, cur));
            })))
            .unwrap();

        sender.chat_state(ChatState::Queue);
        sender.chat_state(ChatState::Queue);
        sender.chat_state(ChatState::Chatting);
        session.process_updates().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ChatState::Unknown, ChatState::Queue),
                (ChatState::Queue, ChatState::Chatting)
            ]
        );
        assert_eq!(stream.chat_state(), Ok(ChatState::Chatting));
    }

    fn operator(id: &str) -> Operator {
        Operator {
            id: id.to_string(),
            name: format!("Operator {id}"),
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn test_operator_changes_reach_listener() {
        let (mut session, sender) = session_with(ScriptedTransport::default());
        let stream = session.message_stream().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        stream
            .set_operator_change_listener(Some(Box::new(
                move |prev: Option<&Operator>, cur: Option<&Operator>| {
                    sink.lock()
                        .unwrap()
                        .push((prev.map(|o| o.id.clone()), cur.map(|o| o.id.clone())));
                },
            )))
            .unwrap();

        sender.operator(Some(operator("op1")));
        sender.operator(Some(operator("op1")));
        sender.operator(Some(operator("op2")));
        sender.operator(None);
        session.process_updates().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (None, Some("op1".to_string())),
                (Some("op1".to_string()), Some("op2".to_string())),
                (Some("op2".to_string()), None),
            ]
        );
        assert_eq!(stream.current_operator(), Ok(None));
    }

    #[tokio::test]
    async fn test_operator_typing_reported_on_change_only() {
        let (mut session, sender) = session_with(ScriptedTransport::default());
        let stream = session.message_stream().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        stream
            .set_operator_typing_listener(Some(Box::new(move |typing: bool| {
                sink.lock().unwrap().push(typing);
            })))
            .unwrap();

        sender.operator_typing(false);
        sender.operator_typing(true);
        sender.operator_typing(true);
        session.process_updates().unwrap();
        assert_eq!(stream.is_operator_typing(), Ok(true));

        sender.operator_typing(false);
        session.process_updates().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_online_status_listener_sees_transitions() {
        let (mut session, sender) = session_with(ScriptedTransport::default());
        let stream = session.message_stream().unwrap();
        assert_eq!(stream.online_status(), Ok(OnlineStatus::Unknown));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        stream
            .set_online_status_listener(Some(Box::new(
                move |prev: OnlineStatus, cur: OnlineStatus| {
                    sink.lock().unwrap().push((prev, cur));
                },
            )))
            .unwrap();

        sender.online_status(OnlineStatus::Online);
        sender.online_status(OnlineStatus::BusyOffline);
        session.process_updates().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (OnlineStatus::Unknown, OnlineStatus::Online),
                (OnlineStatus::Online, OnlineStatus::BusyOffline),
            ]
        );
        assert_eq!(stream.online_status(), Ok(OnlineStatus::BusyOffline));
    }

    #[tokio::test]
    async fn test_upload_progress_updates_attachment() {
        let (mut session, sender) = session_with(ScriptedTransport::default());
        let stream = session.message_stream().unwrap();
        let recorder = Recorder::new();
        let tracker = stream.new_message_tracker(recorder.listener()).unwrap();
        let pending = stream
            .send_file(crate::FileUpload {
                file_name: "a.txt".to_string(),
                content_type: "text/plain".to_string(),
                data: vec![1],
            })
            .unwrap();
        let id = tracker.messages().unwrap()[0].client_side_id.clone();

        sender.upload_progress(id.as_str(), 0.5);
        sender.upload_progress(id.as_str(), 0.25);
        session.process_updates().unwrap();
        let progress = tracker.messages().unwrap()[0]
            .attachment
            .as_ref()
            .and_then(|a| a.progress);
        assert_eq!(progress, Some(0.5));
        pending.await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_error_destroys_session_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let mut session = builder()
            .fatal_error_handler(Box::new(move |err: &FatalError| {
                sink.lock().unwrap().push(err.kind);
            }))
            .build(ScriptedTransport::default())
            .unwrap();
        let sender = session.update_sender();
        let stream = session.message_stream().unwrap();

        sender.fatal("visitor-banned");
        sender.fatal("account-blocked");
        assert_eq!(session.process_updates(), Ok(1));
        assert_eq!(*calls.lock().unwrap(), vec![FatalErrorKind::VisitorBanned]);
        assert!(session.is_destroyed());
        assert_eq!(stream.send("hi").unwrap_err(), AccessError::InvalidSession);
        assert_eq!(session.process_updates(), Err(AccessError::InvalidSession));
    }

    #[tokio::test]
    async fn test_destroy_settles_in_flight_work() {
        let transport = ScriptedTransport::with_history(vec![operator_record("1", 10)]);
        let hold = transport.hold_history();
        let (session, _) = session_with(transport);
        let recorder = Recorder::new();
        let tracker = session
            .message_stream()
            .unwrap()
            .new_message_tracker(recorder.listener())
            .unwrap();
        let page = tracker.get_next_messages(10).unwrap();
        tokio::task::yield_now().await;

        session.destroy().unwrap();
        session.destroy().unwrap();
        hold.notify_one();
        assert_eq!(
            page.await.unwrap_err(),
            TrackerError::Access(AccessError::InvalidSession)
        );
        assert!(recorder.events().is_empty());
        assert_eq!(tracker.messages(), Err(AccessError::InvalidSession));
    }

    #[tokio::test]
    async fn test_destroy_from_other_thread_is_rejected() {
        let (session, _) = session_with(ScriptedTransport::default());
        let session = Arc::new(Mutex::new(session));
        let remote = Arc::clone(&session);
        let result = std::thread::spawn(move || remote.lock().unwrap().destroy())
            .join()
            .unwrap();
        assert_eq!(result, Err(AccessError::InvalidThread));
        assert!(!session.lock().unwrap().is_destroyed());
    }

    #[tokio::test]
    async fn test_updates_from_other_threads_apply_on_owner() {
        let transport = ScriptedTransport::with_history(vec![operator_record("1", 10)]);
        let (mut session, sender) = session_with(transport);
        let recorder = Recorder::new();
        let tracker = session
            .message_stream()
            .unwrap()
            .new_message_tracker(recorder.listener())
            .unwrap();
        tracker.get_next_messages(10).unwrap().await.unwrap();

        std::thread::spawn(move || {
            sender.messages(vec![operator_record("2", 20)]);
        })
        .join()
        .unwrap();
        assert_eq!(recorder.window_ids(), vec!["1"]);
        session.process_updates().unwrap();
        assert_eq!(recorder.window_ids(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_send_after_drop_of_session_resolves() {
        let (session, _) = session_with(ScriptedTransport::default());
        let stream = session.message_stream().unwrap();
        let pending = stream.send("hello").unwrap();
        drop(session);
        assert_eq!(
            pending.await.unwrap_err(),
            SendMessageError::Access(AccessError::InvalidSession)
        );
    }
}
