//! Wire types of the scheduling provider.
//!
//! Field names follow the provider's JSON. Rust-side names follow the
//! booking domain, with `serde(rename)` bridging the two.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Response envelope wrapping every provider payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

fn default_success() -> bool {
    true
}

/// A bookable service as listed by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: i64,
    pub title: String,
    #[serde(rename = "duration", default)]
    pub duration_seconds: i64,
    #[serde(default)]
    pub price_min: Decimal,
    #[serde(default)]
    pub price_max: Decimal,
    #[serde(rename = "is_online", default, deserialize_with = "flag")]
    pub online_bookable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
}

impl ServiceOffering {
    pub fn duration_minutes(&self) -> i64 {
        self.duration_seconds / 60
    }
}

/// A staff member as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: i64,
    pub name: String,
    #[serde(default, deserialize_with = "flag")]
    pub fired: bool,
    #[serde(default, deserialize_with = "flag")]
    pub hidden: bool,
}

impl StaffMember {
    /// Selectable in a booking: neither fired nor hidden.
    pub fn eligible(&self) -> bool {
        !self.fired && !self.hidden
    }
}

/// An open time slot for one staff member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// `HH:MM` in the salon's local time.
    #[serde(rename = "time")]
    pub display_time: String,
    /// Full ISO 8601 datetime with offset, e.g. `2026-01-22T10:00:00+05:00`.
    #[serde(rename = "datetime")]
    pub iso_datetime: String,
    #[serde(rename = "seance_length", default)]
    pub slot_length_seconds: i64,
}

/// Body of `POST /book_record`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub phone: String,
    pub fullname: String,
    pub email: String,
    pub appointments: Vec<AppointmentRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    /// Always 0 for a new appointment.
    pub id: i64,
    /// 0 means any staff member.
    pub staff_id: i64,
    pub services: Vec<i64>,
    pub datetime: String,
}

/// One entry of the `book_record` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReservation {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub record_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_hash: Option<String>,
}

impl ProviderReservation {
    /// The provider record id, if the provider handed back a real one.
    pub fn usable_id(&self) -> Option<i64> {
        self.record_id.filter(|id| *id > 0)
    }
}

/// An appointment as returned by record reads and reschedules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAppointment {
    pub id: i64,
    #[serde(default)]
    pub company_id: i64,
    #[serde(default)]
    pub staff_id: i64,
    #[serde(default)]
    pub services: Vec<AppointmentService>,
    pub datetime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentService {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Query of `GET /user/records`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordsQuery {
    pub company_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
}

/// Boolean flags arrive as `0`/`1` on some endpoints and `true`/`false` on others.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Null(()),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
        Flag::Null(()) => false,
    })
}
