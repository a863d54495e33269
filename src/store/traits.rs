//! Persistence traits and the records they store.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// Lifecycle of a locally mirrored reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Only `active` moves, and only to `cancelled` or `completed`.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Cancelled) | (Self::Active, Self::Completed)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

/// A confirmed booking mirrored from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i64,
    pub user_id: i64,
    /// Provider-issued record id. Unique across the table.
    pub remote_reservation_id: i64,
    pub company_id: i64,
    pub company_name: String,
    pub service_id: i64,
    pub service_name: String,
    pub staff_id: Option<i64>,
    pub staff_name: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for a new reservation row. Status is always `active` on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub user_id: i64,
    pub remote_reservation_id: i64,
    pub company_id: i64,
    pub company_name: String,
    pub service_id: i64,
    pub service_name: String,
    pub staff_id: Option<i64>,
    pub staff_name: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

/// A chat user known to the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Acting-user token at the provider, when the user has linked one.
    #[serde(skip_serializing)]
    pub provider_user_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// First and last name, trimmed.
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name,
            self.last_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }

    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("{} (@{username})", self.full_name()),
            None => self.full_name(),
        }
    }
}

/// Identity of a chat sender as seen by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatUser {
    pub telegram_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Insert a reservation with status `active`.
    ///
    /// A duplicate `remote_reservation_id` fails with `DatabaseError::Constraint`.
    async fn create(&self, data: &NewReservation) -> Result<Reservation, DatabaseError>;

    /// Active reservations scheduled from now on, latest first.
    async fn find_active_by_user(&self, user_id: i64) -> Result<Vec<Reservation>, DatabaseError>;

    /// Every reservation of a user, latest first.
    async fn find_all_by_user(&self, user_id: i64) -> Result<Vec<Reservation>, DatabaseError>;

    async fn find_by_remote_id(
        &self,
        remote_reservation_id: i64,
    ) -> Result<Option<Reservation>, DatabaseError>;

    /// Move a reservation to `status` and bump `updated_at`.
    ///
    /// Returns `None` when no row has `id`. Disallowed transitions fail with
    /// `DatabaseError::Constraint`.
    async fn set_status(
        &self,
        id: i64,
        status: ReservationStatus,
    ) -> Result<Option<Reservation>, DatabaseError>;

    async fn cancel(&self, id: i64) -> Result<Option<Reservation>, DatabaseError> {
        self.set_status(id, ReservationStatus::Cancelled).await
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user by `telegram_id`, or refresh the names of an existing one.
    async fn upsert_chat_user(&self, user: &NewChatUser) -> Result<User, DatabaseError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError>;

    /// Store contact data. `None` leaves the stored value untouched.
    async fn update_contact_info(
        &self,
        id: i64,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, DatabaseError>;

    /// Link (or with `None`, unlink) the user's acting token at the provider.
    async fn set_provider_token(
        &self,
        id: i64,
        token: Option<&str>,
    ) -> Result<Option<User>, DatabaseError>;
}

/// A complete backend: both stores plus schema management.
#[async_trait]
pub trait Database: ReservationStore + UserStore {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;
}
