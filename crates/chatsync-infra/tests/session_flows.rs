//! End-to-end flows of a session driven against the in-memory backend.

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use chatsync_core::reconcile::MessageWindow;
use chatsync_core::{FileUpload, MessageListener, MessageTracker, Session, SessionBuilder};
use chatsync_infra::{InMemoryTransport, Operation};
use chatsync_types::chat::{ChatState, FatalError, OnlineStatus, Operator};
use chatsync_types::error::{
    AccessError, DeleteMessageError, FatalErrorKind, KeyboardResponseError, SendMessageError,
};
use chatsync_types::event::MessageEvent;
use chatsync_types::item::MessageItem;
use chatsync_types::keyboard::KeyboardState;
use chatsync_types::message::{Message, MessageType, Reaction, SendStatus};

#[derive(Clone, Default)]
struct Events {
    seen: Arc<Mutex<Vec<(ThreadId, MessageEvent)>>>,
}

impl Events {
    fn listener(&self) -> Box<dyn MessageListener> {
        let seen = Arc::clone(&self.seen);
        Box::new(move |event: &MessageEvent| {
            seen.lock()
                .unwrap()
                .push((thread::current().id(), event.clone()));
        })
    }

    fn all(&self) -> Vec<MessageEvent> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.seen.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    /// The list a listener ends up with after applying every event.
    fn replay(&self) -> Vec<Message> {
        let mut window = MessageWindow::new();
        for event in self.all() {
            window.apply(&event);
        }
        window.into_messages()
    }
}

fn connect(transport: &InMemoryTransport) -> Session {
    let session = SessionBuilder::new()
        .account_name("demo")
        .location("mobile")
        .build(transport.clone())
        .unwrap();
    transport.attach(session.update_sender());
    session
}

fn track(session: &Session) -> (MessageTracker, Events) {
    let events = Events::default();
    let tracker = session
        .message_stream()
        .unwrap()
        .new_message_tracker(events.listener())
        .unwrap();
    (tracker, events)
}

fn operator_item(id: &str, ts: i64) -> MessageItem {
    MessageItem {
        server_side_id: Some(id.to_string()),
        kind: Some("operator".to_string()),
        text: Some(format!("text {id}")),
        timestamp_micros: Some(ts),
        author_id: Some(serde_json::Value::String("op".to_string())),
        ..MessageItem::default()
    }
}

#[tokio::test]
async fn optimistic_send_round_trip() {
    let transport = InMemoryTransport::new();
    let mut session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let (tracker, events) = track(&session);

    let pending = stream.send("hello").unwrap();
    let added = events.all();
    assert_eq!(added.len(), 1);
    let MessageEvent::Added { message, .. } = &added[0] else {
        panic!("expected Added, got {:?}", added[0]);
    };
    assert_eq!(message.send_status, SendStatus::Sending);
    assert!(message.server_side_id.is_none());
    let client_side_id = message.client_side_id.clone();

    let sent = pending.await.unwrap();
    assert_eq!(sent.client_side_id, client_side_id);
    assert_eq!(sent.send_status, SendStatus::Sent);

    // The server echo of the same message must not duplicate it.
    session.process_updates().unwrap();
    let window = tracker.messages().unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].client_side_id, client_side_id);
    assert_eq!(window[0].server_side_id, sent.server_side_id);
    assert_eq!(window[0].send_status, SendStatus::Sent);
    assert_eq!(events.replay(), window);
}

#[tokio::test]
async fn send_failure_emits_removed() {
    let transport = InMemoryTransport::new();
    transport.fail_next(Operation::SendMessage, "max-message-length-exceeded");
    let session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let (tracker, events) = track(&session);

    let err = stream.send("hello").unwrap().await.unwrap_err();
    assert_eq!(err, SendMessageError::MaxLengthExceeded);
    let all = events.all();
    assert_eq!(all.len(), 2);
    assert!(all[0].is_added());
    assert!(all[1].is_removed());
    assert_eq!(all[0].client_side_id(), all[1].client_side_id());
    assert!(tracker.messages().unwrap().is_empty());
    assert!(transport.history().is_empty());
}

#[tokio::test]
async fn pagination_discipline() {
    let transport = InMemoryTransport::new();
    transport.seed((1..=5).map(|i| operator_item(&i.to_string(), i * 10)).collect());
    let session = connect(&transport);
    let (tracker, events) = track(&session);

    let first = tracker.get_next_messages(2).unwrap();
    assert_eq!(tracker.is_loading(), Ok(true));
    let concurrent = tracker.get_next_messages(2).unwrap().await.unwrap();
    assert!(concurrent.is_empty());

    let newest = first.await.unwrap();
    assert_eq!(
        newest.iter().map(|m| m.client_side_id.as_str()).collect::<Vec<_>>(),
        vec!["4", "5"]
    );
    let middle = tracker.get_next_messages(2).unwrap().await.unwrap();
    assert_eq!(middle.len(), 2);
    assert!(!tracker.reached_start_of_history().unwrap());
    let oldest = tracker.get_next_messages(2).unwrap().await.unwrap();
    assert_eq!(oldest.len(), 1);
    assert!(tracker.reached_start_of_history().unwrap());

    let before = events.all().len();
    assert!(tracker.get_next_messages(2).unwrap().await.unwrap().is_empty());
    assert_eq!(events.all().len(), before);

    let ids: Vec<String> = events
        .replay()
        .into_iter()
        .map(|m| m.client_side_id)
        .collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
    assert_eq!(events.replay(), tracker.messages().unwrap());
}

#[tokio::test]
async fn keyboard_rejection() {
    let transport = InMemoryTransport::new();
    let mut session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let (tracker, events) = track(&session);

    transport.post_keyboard(&[("yes", "Yes"), ("no", "No")]);
    session.process_updates().unwrap();
    let keyboard_message = tracker.messages().unwrap()[0].clone();
    assert_eq!(keyboard_message.kind, MessageType::Keyboard);

    let before = events.all().len();
    let err = stream
        .send_keyboard_response(&keyboard_message, "maybe")
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(err, KeyboardResponseError::CanNotCreateResponse);
    assert_eq!(events.all().len(), before);

    stream
        .send_keyboard_response(&keyboard_message, "yes")
        .unwrap()
        .await
        .unwrap();
    session.process_updates().unwrap();
    let answered = tracker.messages().unwrap()[0].clone();
    let keyboard = answered.keyboard.clone().unwrap();
    assert_eq!(keyboard.state, KeyboardState::Completed);
    assert_eq!(keyboard.response.unwrap().button_id, "yes");

    let err = stream
        .send_keyboard_response(&answered, "no")
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(err, KeyboardResponseError::CanNotCreateResponse);
}

#[tokio::test]
async fn delete_ownership() {
    let transport = InMemoryTransport::new();
    let mut session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let (tracker, events) = track(&session);

    transport.post_operator_message("op", "Anna", "hello");
    session.process_updates().unwrap();
    let operator_message = tracker.messages().unwrap()[0].clone();

    let before = events.all().len();
    let err = stream.delete(&operator_message).unwrap().await.unwrap_err();
    assert_eq!(err, DeleteMessageError::MessageNotOwned);
    assert_eq!(events.all().len(), before);

    stream.send("mine").unwrap().await.unwrap();
    session.process_updates().unwrap();
    let mine = tracker.messages().unwrap()[1].clone();
    assert_eq!(mine.kind, MessageType::VisitorMessage);

    stream.delete(&mine).unwrap().await.unwrap();
    assert!(events.all().last().unwrap().is_removed());
    session.process_updates().unwrap();
    let window = tracker.messages().unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].client_side_id, operator_message.client_side_id);
    assert_eq!(events.replay(), window);
}

#[tokio::test]
async fn edit_and_react_round_trip() {
    let transport = InMemoryTransport::new();
    let mut session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let (tracker, events) = track(&session);

    stream.send("first draft").unwrap().await.unwrap();
    transport.post_operator_message("op", "Anna", "nice");
    session.process_updates().unwrap();
    let window = tracker.messages().unwrap();
    let (mine, theirs) = (window[0].clone(), window[1].clone());

    stream.edit(&mine, "final").unwrap().await.unwrap();
    stream.react(&theirs, Reaction::Like).unwrap().await.unwrap();
    session.process_updates().unwrap();

    let window = tracker.messages().unwrap();
    assert_eq!(window[0].client_side_id, mine.client_side_id);
    assert_eq!(window[0].text, "final");
    assert!(window[0].edited);
    assert_eq!(window[1].visitor_reaction, Some(Reaction::Like));
    assert_eq!(events.replay(), window);

    stream.rate_operator("op", 5, None).unwrap().await.unwrap();
    assert_eq!(transport.rating_of("op"), Some(5));
    assert_eq!(stream.last_rating_of_operator("op"), Ok(Some(5)));
}

#[tokio::test]
async fn file_upload_reaches_ready() {
    let transport = InMemoryTransport::new();
    let mut session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let (tracker, _events) = track(&session);

    let sent = stream
        .send_file(FileUpload {
            file_name: "cat.png".to_string(),
            content_type: "image/png".to_string(),
            data: vec![0; 16],
        })
        .unwrap()
        .await
        .unwrap();
    session.process_updates().unwrap();
    let window = tracker.messages().unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].client_side_id, sent.client_side_id);
    let attachment = window[0].attachment.clone().unwrap();
    assert_eq!(
        attachment.state,
        chatsync_types::attachment::AttachmentState::Ready
    );
    assert_eq!(attachment.progress, None);
    assert_eq!(attachment.file.file_name, "cat.png");
}

#[tokio::test]
async fn chat_state_follows_server() {
    let transport = InMemoryTransport::new();
    let mut session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    stream
        .set_chat_state_listener(Some(Box::new(move |prev: ChatState, cur: ChatState| {
            sink.lock().unwrap().push((prev, cur));
        })))
        .unwrap();

    stream.start_chat().unwrap().await.unwrap();
    session.process_updates().unwrap();
    transport.set_chat_state(ChatState::Chatting);
    stream.close_chat().unwrap().await.unwrap();
    session.process_updates().unwrap();

    assert_eq!(
        *changes.lock().unwrap(),
        vec![
            (ChatState::Unknown, ChatState::Queue),
            (ChatState::Queue, ChatState::Chatting),
            (ChatState::Chatting, ChatState::ClosedByVisitor),
        ]
    );
    stream
        .set_visitor_typing(Some("typing...".to_string()))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(transport.typing_draft().as_deref(), Some("typing..."));
}

#[tokio::test]
async fn operator_presence_follows_server() {
    let transport = InMemoryTransport::new();
    let mut session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    stream
        .set_operator_change_listener(Some(Box::new(
            move |_prev: Option<&Operator>, cur: Option<&Operator>| {
                sink.lock().unwrap().push(cur.map(|o| o.name.clone()));
            },
        )))
        .unwrap();
    let typing = Arc::new(Mutex::new(Vec::new()));
    let typing_sink = Arc::clone(&typing);
    stream
        .set_operator_typing_listener(Some(Box::new(move |is_typing: bool| {
            typing_sink.lock().unwrap().push(is_typing);
        })))
        .unwrap();

    transport.set_online_status(OnlineStatus::Online);
    transport.assign_operator(Some(Operator {
        id: "op-7".to_string(),
        name: "Ann".to_string(),
        avatar_url: None,
    }));
    transport.set_operator_typing(true);
    session.process_updates().unwrap();

    assert_eq!(stream.online_status(), Ok(OnlineStatus::Online));
    assert_eq!(
        stream.current_operator().unwrap().map(|o| o.id),
        Some("op-7".to_string())
    );
    assert_eq!(stream.is_operator_typing(), Ok(true));

    stream.close_chat().unwrap().await.unwrap();
    session.process_updates().unwrap();

    assert_eq!(stream.current_operator(), Ok(None));
    assert_eq!(*changes.lock().unwrap(), vec![Some("Ann".to_string()), None]);
    assert_eq!(*typing.lock().unwrap(), vec![true, false]);
}

#[tokio::test]
async fn wrong_thread() {
    let transport = InMemoryTransport::new();
    let session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let (tracker, _events) = track(&session);

    let (send_result, page_result) = thread::spawn(move || {
        let send = stream.send("hi").map(|_| ());
        let page = tracker.get_next_messages(10).map(|_| ());
        (send, page)
    })
    .join()
    .unwrap();
    assert_eq!(send_result, Err(AccessError::InvalidThread));
    assert_eq!(page_result, Err(AccessError::InvalidThread));
    assert!(!session.is_destroyed());
}

#[tokio::test]
async fn destroyed_session() {
    let transport = InMemoryTransport::new();
    let mut session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let (tracker, events) = track(&session);

    session.destroy().unwrap();
    session.destroy().unwrap();
    assert!(session.is_destroyed());
    assert_eq!(stream.send("hi").unwrap_err(), AccessError::InvalidSession);
    assert_eq!(
        tracker.get_next_messages(5).unwrap_err(),
        AccessError::InvalidSession
    );
    assert_eq!(
        session.message_stream().unwrap_err(),
        AccessError::InvalidSession
    );

    transport.post_operator_message("op", "Anna", "anyone?");
    assert_eq!(session.process_updates(), Err(AccessError::InvalidSession));
    assert!(events.all().is_empty());
}

#[tokio::test]
async fn fatal_error_destroys_session() {
    let transport = InMemoryTransport::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut session = SessionBuilder::new()
        .account_name("demo")
        .location("mobile")
        .fatal_error_handler(Box::new(move |err: &FatalError| {
            sink.lock().unwrap().push(err.kind);
        }))
        .build(transport.clone())
        .unwrap();
    transport.attach(session.update_sender());
    let stream = session.message_stream().unwrap();

    transport.raise_fatal("account-blocked");
    transport.raise_fatal("visitor-banned");
    session.process_updates().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![FatalErrorKind::AccountBlocked]);
    assert!(session.is_destroyed());
    assert_eq!(stream.chat_state(), Err(AccessError::InvalidSession));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn off_thread_marshaling() {
    let transport = InMemoryTransport::new();
    let session = connect(&transport);
    let stream = session.message_stream().unwrap();
    let (tracker, events) = track(&session);
    let owner = thread::current().id();

    let sent = stream.send("hello").unwrap().await.unwrap();
    // Confirmation ran on a worker; it is delivered on the next owner call.
    let window = tracker.messages().unwrap();
    assert_eq!(window[0].server_side_id, sent.server_side_id);
    assert_eq!(events.all().len(), 2);
    assert!(events.threads().iter().all(|t| *t == owner));
    assert_eq!(events.replay(), window);
}

#[tokio::test]
async fn run_applies_updates_until_stopped() {
    let transport = InMemoryTransport::new();
    let mut session = connect(&transport);
    let (tracker, events) = track(&session);

    let sender = session.update_sender();
    thread::spawn(move || {
        sender.messages(vec![operator_item("a", 10), operator_item("b", 20)]);
    })
    .join()
    .unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(50), session.run()).await;
    assert!(outcome.is_err(), "run returns only once the session is destroyed");
    assert_eq!(events.replay().len(), 2);
    assert_eq!(tracker.messages().unwrap().len(), 2);
}
