//! Stub of the YClients REST API for integration tests.
//!
//! One fallback handler answers every route and records what it saw, so
//! tests can assert on headers, query strings and bodies.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use booking_assist::config::ProviderConfig;

pub const COMPANY_ID: i64 = 42;
pub const PARTNER_ID: i64 = 7;
/// Company id for which every call fails with HTTP 500.
pub const BROKEN_COMPANY_ID: i64 = 999;
/// Company id for which every call answers 200 with `success: false`.
pub const REFUSING_COMPANY_ID: i64 = 998;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: String,
}

pub type Seen = Arc<Mutex<Vec<Recorded>>>;

pub struct StubServer {
    pub base_url: String,
    pub seen: Seen,
}

impl StubServer {
    pub fn config(&self, user_token: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            base_url: self.base_url.clone(),
            partner_token: SecretString::from("partner"),
            user_token: user_token.map(SecretString::from),
            partner_id: PARTNER_ID,
            company_id: COMPANY_ID,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last(&self) -> Recorded {
        self.requests().last().cloned().expect("no request recorded")
    }

    pub fn count(&self, method: Method, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path.starts_with(prefix))
            .count()
    }
}

/// Start the stub on a random port.
pub async fn start_provider() -> StubServer {
    let seen: Seen = Arc::default();
    let app = Router::new().fallback(handle).with_state(seen.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    StubServer {
        base_url: format!("http://{addr}"),
        seen,
    }
}

fn ok(data: Value) -> Response {
    Json(json!({ "success": true, "data": data, "meta": [] })).into_response()
}

async fn handle(
    State(seen): State<Seen>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let header_text = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    seen.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        authorization: header_text(header::AUTHORIZATION),
        accept: header_text(header::ACCEPT),
        body: body.clone(),
    });

    let segments: Vec<&str> = uri.path().trim_matches('/').split('/').collect();
    let company = |s: &str| s.parse::<i64>().unwrap_or_default();

    match (method.as_str(), segments.as_slice()) {
        (_, ["api", "v1", _, c, ..]) if company(c) == BROKEN_COMPANY_ID => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "data": null, "meta": { "message": "boom" } })),
        )
            .into_response(),
        (_, ["api", "v1", _, c, ..]) if company(c) == REFUSING_COMPANY_ID => Json(
            json!({ "success": false, "data": null, "meta": { "message": "denied" } }),
        )
        .into_response(),

        ("GET", ["api", "v1", "company", _, "services"]) => ok(json!([
            { "id": 1, "title": "Haircut", "duration": 1800, "price_min": 500,
              "price_max": 500, "is_online": true },
            { "id": 2, "title": "Home visit", "duration": 3600, "price_min": 2000,
              "price_max": 3000, "is_online": false, "category_id": 5 },
        ])),
        ("GET", ["api", "v1", "company", _, "staff"]) => ok(json!([
            { "id": 1, "name": "Peter", "fired": 0, "hidden": 0 },
            { "id": 2, "name": "Oleg", "fired": 1, "hidden": 0 },
        ])),
        ("GET", ["api", "v1", "book_times", _, staff, date]) => {
            if *staff == "1" {
                ok(json!([
                    { "time": "10:00", "datetime": format!("{date}T10:00:00+05:00"),
                      "seance_length": 1800 },
                    { "time": "11:30", "datetime": format!("{date}T11:30:00+05:00"),
                      "seance_length": 1800 },
                ]))
            } else {
                ok(json!([]))
            }
        }
        ("POST", ["api", "v1", "book_record", _]) => ok(json!([
            { "id": 1, "record_id": 123456, "record_hash": "abc" }
        ])),
        ("DELETE", ["api", "v1", "records", _]) => StatusCode::NO_CONTENT.into_response(),
        ("PUT", ["api", "v1", "records", id]) => {
            let datetime = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|b| b.get("datetime").cloned())
                .unwrap_or(Value::Null);
            ok(json!({
                "id": company(id), "company_id": COMPANY_ID, "staff_id": 1,
                "services": [{ "id": 1, "title": "Haircut" }],
                "datetime": datetime, "length": 1800
            }))
        }
        ("GET", ["api", "v1", "user", "records"]) => ok(json!([
            { "id": 123456, "company_id": COMPANY_ID, "staff_id": 1,
              "services": [{ "id": 1, "title": "Haircut" }],
              "datetime": "2026-01-22T10:00:00+05:00" },
            { "id": 777, "company_id": COMPANY_ID, "staff_id": 1,
              "services": [{ "id": 1 }],
              "datetime": "2026-01-23T12:00:00+05:00", "comment": "phone booking" },
        ])),
        _ => (StatusCode::NOT_FOUND, "no such route").into_response(),
    }
}
