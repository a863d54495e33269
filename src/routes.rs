//! REST endpoints for inspecting users and their reservations.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::booking::BookingService;
use crate::store::{User, UserStore};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub users: Arc<dyn UserStore>,
    pub bookings: Arc<BookingService>,
}

/// Build the Axum router with the REST routes.
pub fn api_routes(users: Arc<dyn UserStore>, bookings: Arc<BookingService>) -> Router {
    let state = ApiState { users, bookings };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/{id}/reservations", get(list_reservations))
        .route("/api/users/{id}/provider-token", put(set_provider_token))
        .route("/api/users/{id}/unmirrored", get(list_unmirrored))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "booking-assist"
    }))
}

// ── Users ───────────────────────────────────────────────────────────────

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "User not found"})),
    )
        .into_response()
}

fn internal(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "API request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
        .into_response()
}

async fn load_user(state: &ApiState, id: i64) -> Result<User, Response> {
    match state.users.get_user(id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(not_found()),
        Err(e) => Err(internal(e)),
    }
}

async fn get_user(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    let user = match load_user(&state, id).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    match state.bookings.get_user_bookings(id).await {
        Ok(reservations) => Json(json!({
            "user": user,
            "reservations": reservations,
        }))
        .into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReservationsQuery {
    #[serde(default)]
    all: bool,
}

async fn list_reservations(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(query): Query<ReservationsQuery>,
) -> Response {
    if let Err(response) = load_user(&state, id).await {
        return response;
    }
    let result = if query.all {
        state.bookings.get_booking_history(id).await
    } else {
        state.bookings.get_user_bookings(id).await
    };
    match result {
        Ok(reservations) => Json(reservations).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Deserialize)]
struct ProviderTokenRequest {
    token: Option<String>,
}

async fn set_provider_token(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<ProviderTokenRequest>,
) -> Response {
    let token = body.token.as_deref().map(str::trim).filter(|t| !t.is_empty());
    match state.users.set_provider_token(id, token).await {
        Ok(Some(user)) => Json(json!({
            "user": user,
            "linked": user.provider_user_token.is_some(),
        }))
        .into_response(),
        Ok(None) => not_found(),
        Err(e) => internal(e),
    }
}

async fn list_unmirrored(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    let user = match load_user(&state, id).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    // Without a linked account the provider would answer for the default one.
    let Some(token) = user.provider_user_token.as_deref() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": "No provider account linked"})),
        )
            .into_response();
    };
    match state
        .bookings
        .unmirrored_reservations(None, None, Some(token))
        .await
    {
        Ok(appointments) => Json(appointments).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
