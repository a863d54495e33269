//! REST endpoints against an in-memory database and the provider stub.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use axum::http::Method;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use booking_assist::booking::BookingService;
use booking_assist::config::BookingConfig;
use booking_assist::provider::YclientsClient;
use booking_assist::routes::api_routes;
use booking_assist::store::{
    LibSqlBackend, NewChatUser, NewReservation, ReservationStore, User, UserStore,
};

use common::{COMPANY_ID, StubServer, start_provider};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Api {
    base: String,
    db: Arc<LibSqlBackend>,
    http: reqwest::Client,
    provider: StubServer,
}

/// Start the REST server on a random port.
async fn start_server() -> Api {
    let provider = start_provider().await;
    let client = Arc::new(YclientsClient::new(&provider.config(None)).unwrap());
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let bookings = Arc::new(BookingService::new(
        client,
        db.clone(),
        BookingConfig::new(COMPANY_ID),
    ));
    let app = api_routes(db.clone(), bookings);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    Api {
        base: format!("http://{addr}"),
        db,
        http: reqwest::Client::new(),
        provider,
    }
}

async fn seed_user(db: &LibSqlBackend) -> User {
    db.upsert_chat_user(&NewChatUser {
        telegram_id: 100,
        first_name: "Ivan".into(),
        last_name: Some("Petrov".into()),
        username: Some("ivanp".into()),
    })
    .await
    .unwrap()
}

async fn seed_reservation(db: &LibSqlBackend, user_id: i64, remote_id: i64, days: i64) {
    db.create(&NewReservation {
        user_id,
        remote_reservation_id: remote_id,
        company_id: COMPANY_ID,
        company_name: "Main branch".into(),
        service_id: 1,
        service_name: "Haircut".into(),
        staff_id: Some(1),
        staff_name: Some("Peter".into()),
        scheduled_at: Utc::now() + ChronoDuration::days(days),
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn health_reports_ok() {
    timeout(TEST_TIMEOUT, async {
        let api = start_server().await;
        let resp = api
            .http
            .get(format!("{}/api/health", api.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_user_is_404() {
    timeout(TEST_TIMEOUT, async {
        let api = start_server().await;
        for path in ["/api/users/999", "/api/users/999/reservations"] {
            let resp = api
                .http
                .get(format!("{}{path}", api.base))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{path}");
            let body: Value = resp.json().await.unwrap();
            assert_eq!(body["error"], "User not found");
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn user_with_upcoming_reservations() {
    timeout(TEST_TIMEOUT, async {
        let api = start_server().await;
        let user = seed_user(&api.db).await;
        seed_reservation(&api.db, user.id, 1001, 2).await;
        seed_reservation(&api.db, user.id, 1002, -2).await;

        let body: Value = api
            .http
            .get(format!("{}/api/users/{}", api.base, user.id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["user"]["first_name"], "Ivan");
        let upcoming = body["reservations"].as_array().unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0]["remote_reservation_id"], 1001);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn reservation_history_includes_past() {
    timeout(TEST_TIMEOUT, async {
        let api = start_server().await;
        let user = seed_user(&api.db).await;
        seed_reservation(&api.db, user.id, 1001, 2).await;
        seed_reservation(&api.db, user.id, 1002, -2).await;

        let url = format!("{}/api/users/{}/reservations", api.base, user.id);
        let active: Vec<Value> = api.http.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(active.len(), 1);

        let all: Vec<Value> = api
            .http
            .get(format!("{url}?all=true"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn provider_token_link_and_unlink() {
    timeout(TEST_TIMEOUT, async {
        let api = start_server().await;
        let user = seed_user(&api.db).await;
        let url = format!("{}/api/users/{}/provider-token", api.base, user.id);

        let linked: Value = api
            .http
            .put(&url)
            .json(&json!({ "token": " acting " }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(linked["linked"], true);
        let stored = api.db.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.provider_user_token.as_deref(), Some("acting"));

        let unlinked: Value = api
            .http
            .put(&url)
            .json(&json!({ "token": null }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(unlinked["linked"], false);

        let missing = api
            .http
            .put(format!("{}/api/users/999/provider-token", api.base))
            .json(&json!({ "token": "x" }))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unmirrored_lists_provider_only_records() {
    timeout(TEST_TIMEOUT, async {
        let api = start_server().await;
        let user = seed_user(&api.db).await;
        seed_reservation(&api.db, user.id, 123456, 2).await;
        api.db
            .set_provider_token(user.id, Some("acting"))
            .await
            .unwrap();

        let records: Vec<Value> = api
            .http
            .get(format!("{}/api/users/{}/unmirrored", api.base, user.id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], 777);
        assert_eq!(
            api.provider.last().authorization.as_deref(),
            Some("Bearer partner, User acting")
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unmirrored_needs_a_linked_account() {
    timeout(TEST_TIMEOUT, async {
        let api = start_server().await;
        let user = seed_user(&api.db).await;

        let resp = api
            .http
            .get(format!("{}/api/users/{}/unmirrored", api.base, user.id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "No provider account linked");
        assert_eq!(api.provider.count(Method::GET, "/api/v1/user/records"), 0);
    })
    .await
    .expect("test timed out");
}
