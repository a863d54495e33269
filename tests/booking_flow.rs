//! Whole conversations through the dispatcher, against the HTTP provider stub
//! and an in-memory database.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::Method;
use chrono::NaiveDate;
use tokio::time::timeout;

use booking_assist::booking::{
    BookingScene, BookingService, InboundEvent, Keyboard, Reply, Selection, SessionStore,
    StaffChoice,
};
use booking_assist::bot::{Dispatcher, MenuHandler, UpdateHandler};
use booking_assist::channels::{Channel, ChannelManager, IncomingUpdate, UpdateStream};
use booking_assist::config::BookingConfig;
use booking_assist::error::ChannelError;
use booking_assist::provider::YclientsClient;
use booking_assist::store::{LibSqlBackend, NewChatUser, ReservationStore, UserStore};

use common::{COMPANY_ID, StubServer, start_provider};

const TEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Channel that replays a fixed list of updates and records what it is asked
/// to send.
struct ScriptedChannel {
    script: Mutex<Option<Vec<IncomingUpdate>>>,
    delivered: Arc<Mutex<Vec<(String, Reply)>>>,
    acks: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn name(&self) -> &str {
        "script"
    }

    async fn start(&self) -> Result<UpdateStream, ChannelError> {
        let updates = self.script.lock().unwrap().take().unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(updates)))
    }

    async fn deliver(&self, chat_id: &str, reply: &Reply) -> Result<(), ChannelError> {
        self.delivered
            .lock()
            .unwrap()
            .push((chat_id.to_string(), reply.clone()));
        Ok(())
    }

    async fn acknowledge(&self, callback_id: &str, text: Option<&str>) -> Result<(), ChannelError> {
        self.acks
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.map(String::from)));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

struct App {
    server: StubServer,
    db: Arc<LibSqlBackend>,
    delivered: Arc<Mutex<Vec<(String, Reply)>>>,
    acks: Arc<Mutex<Vec<(String, Option<String>)>>>,
    tomorrow: NaiveDate,
}

impl App {
    fn replies_to(&self, chat: &str) -> Vec<Reply> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == chat)
            .map(|(_, reply)| reply.clone())
            .collect()
    }
}

/// Wire the whole bot and run the script to completion.
async fn run_script(build: impl FnOnce(NaiveDate) -> Vec<IncomingUpdate>) -> App {
    let server = start_provider().await;
    let client = Arc::new(YclientsClient::new(&server.config(None)).unwrap());
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let bookings = Arc::new(BookingService::new(
        client,
        db.clone(),
        BookingConfig::new(COMPANY_ID),
    ));

    let scene = BookingScene::new(bookings.clone(), db.clone());
    let tomorrow = scene.date_window()[1];

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let acks = Arc::new(Mutex::new(Vec::new()));
    let mut channels = ChannelManager::new();
    channels.add(Box::new(ScriptedChannel {
        script: Mutex::new(Some(build(tomorrow))),
        delivered: delivered.clone(),
        acks: acks.clone(),
    }));
    let channels = Arc::new(channels);

    let handler = Arc::new(UpdateHandler::new(
        db.clone(),
        scene,
        MenuHandler::new(bookings),
        SessionStore::new(),
        channels.clone(),
    ));
    let updates = channels.start_all().await.unwrap();
    Dispatcher::new(handler).run(updates).await;

    App {
        server,
        db,
        delivered,
        acks,
        tomorrow,
    }
}

fn sender(chat: &str) -> NewChatUser {
    NewChatUser {
        telegram_id: chat.parse().unwrap(),
        first_name: "Ivan".into(),
        last_name: Some("Petrov".into()),
        username: Some("ivanp".into()),
    }
}

fn say(chat: &str, text: &str) -> IncomingUpdate {
    IncomingUpdate::new("script", chat, sender(chat), InboundEvent::from_text(text))
}

fn press(chat: &str, selection: Selection) -> IncomingUpdate {
    let callback = format!("cb-{chat}-{selection}");
    IncomingUpdate::new("script", chat, sender(chat), InboundEvent::Selection(selection))
        .with_callback(callback)
}

fn slot_at(date: NaiveDate, time: &str) -> Selection {
    Selection::Time(format!("{}T{time}:00+05:00", date.format("%Y-%m-%d")))
}

#[tokio::test]
async fn new_user_books_with_any_staff() {
    timeout(TEST_TIMEOUT, async {
        let app = run_script(|day| {
            vec![
                say("100", "📅 Book"),
                press("100", Selection::Service(1)),
                press("100", Selection::Staff(StaffChoice::Any)),
                press("100", Selection::Date(day)),
                press("100", slot_at(day, "10:00")),
                say("100", "+7 (999) 123-45-67"),
                say("100", "ivan@example.com"),
                press("100", Selection::Confirm),
                say("100", "/my_bookings"),
            ]
        })
        .await;

        let replies = app.replies_to("100");
        assert_eq!(replies.len(), 10, "replies: {replies:#?}");

        // Only the online service is offered.
        assert!(replies[0].button(&Selection::Service(1)).is_some());
        assert!(replies[0].button(&Selection::Service(2)).is_none());
        // The fired staff member is not offered.
        assert!(replies[1].button(&Selection::Staff(StaffChoice::Member(1))).is_some());
        assert!(replies[1].button(&Selection::Staff(StaffChoice::Member(2))).is_none());
        // Times of the eligible staff member.
        assert!(replies[3].button(&slot_at(app.tomorrow, "11:30")).is_some());
        assert!(replies[4].text.contains("phone"));
        assert!(replies[6].text.contains("Email saved"));
        assert!(replies[7].text.contains("Any available staff"));
        assert!(replies[8].text.contains("confirmed"));
        assert_eq!(replies[8].keyboard, Keyboard::MainMenu);
        assert!(replies[9].text.contains("Haircut"));

        // The booking went out with staff 0 and the typed contact details.
        let post = app
            .server
            .requests()
            .into_iter()
            .find(|r| r.method == Method::POST)
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&post.body).unwrap();
        assert_eq!(body["appointments"][0]["staff_id"], 0);
        assert_eq!(body["phone"], "79991234567");
        assert_eq!(body["email"], "ivan@example.com");
        assert_eq!(body["fullname"], "Ivan Petrov");

        let reservation = app.db.find_by_remote_id(123456).await.unwrap().unwrap();
        assert_eq!(reservation.service_name, "Haircut");
        assert_eq!(reservation.staff_id, None);

        let user = app.db.get_user(reservation.user_id).await.unwrap().unwrap();
        assert_eq!(user.phone.as_deref(), Some("79991234567"));
        assert_eq!(user.email.as_deref(), Some("ivan@example.com"));

        // Every button press was acknowledged.
        assert_eq!(app.acks.lock().unwrap().len(), 5);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn named_staff_queries_only_that_staff() {
    timeout(TEST_TIMEOUT, async {
        let app = run_script(|day| {
            vec![
                say("200", "/book"),
                press("200", Selection::Service(1)),
                press("200", Selection::Staff(StaffChoice::Member(1))),
                press("200", Selection::Date(day)),
                press("200", Selection::Cancel),
            ]
        })
        .await;

        let slot_calls: Vec<_> = app
            .server
            .requests()
            .into_iter()
            .filter(|r| r.path.starts_with("/api/v1/book_times"))
            .collect();
        assert_eq!(slot_calls.len(), 1);
        assert!(slot_calls[0].path.starts_with("/api/v1/book_times/42/1/"));

        let replies = app.replies_to("200");
        assert_eq!(replies.last().unwrap().keyboard, Keyboard::MainMenu);
        assert_eq!(app.server.count(Method::POST, "/api/v1/book_record"), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn menu_command_interrupts_and_drops_the_session() {
    timeout(TEST_TIMEOUT, async {
        let app = run_script(|_| {
            vec![
                say("300", "/book"),
                press("300", Selection::Service(1)),
                say("300", "/services"),
                // The session is gone, so this press is stale.
                press("300", Selection::Staff(StaffChoice::Any)),
            ]
        })
        .await;

        let replies = app.replies_to("300");
        assert_eq!(replies.len(), 4, "replies: {replies:#?}");
        assert!(replies[2].text.contains("Haircut"));
        assert!(replies[3].text.contains("expired"));

        let acks = app.acks.lock().unwrap();
        assert_eq!(acks.last().unwrap().1.as_deref(), Some("Session expired"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn interleaved_chats_keep_their_own_sessions() {
    timeout(TEST_TIMEOUT, async {
        let app = run_script(|day| {
            vec![
                say("401", "/book"),
                say("402", "/book"),
                press("401", Selection::Service(1)),
                press("402", Selection::Cancel),
                press("401", Selection::Staff(StaffChoice::Any)),
                press("401", Selection::Date(day)),
            ]
        })
        .await;

        let first = app.replies_to("401");
        assert_eq!(first.len(), 4);
        assert!(first[3].text.starts_with("⏰"));

        let second = app.replies_to("402");
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].keyboard, Keyboard::MainMenu);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn known_contact_goes_straight_to_confirmation() {
    timeout(TEST_TIMEOUT, async {
        // Seed the profile by running a first booking, then book again.
        let app = run_script(|day| {
            let first = [
                say("500", "/book"),
                press("500", Selection::Service(1)),
                press("500", Selection::Staff(StaffChoice::Member(1))),
                press("500", Selection::Date(day)),
                press("500", slot_at(day, "10:00")),
                say("500", "89991234567"),
                say("500", "ivan@example.com"),
                press("500", Selection::Confirm),
            ];
            let second = [
                say("500", "/book"),
                press("500", Selection::Service(1)),
                press("500", Selection::Staff(StaffChoice::Member(1))),
                press("500", Selection::Date(day)),
                press("500", slot_at(day, "11:30")),
            ];
            first.into_iter().chain(second).collect()
        })
        .await;

        let replies = app.replies_to("500");
        let last = replies.last().unwrap();
        assert!(last.text.starts_with("✅ Please confirm"), "got {}", last.text);
        assert!(last.text.contains("Peter"));
        assert!(last.button(&Selection::Confirm).is_some());
    })
    .await
    .expect("test timed out");
}
