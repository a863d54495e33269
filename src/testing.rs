//! In-process stand-ins for the scheduling provider, used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::error::ProviderError;
use crate::provider::{
    AvailabilityClient, ProviderAppointment, ProviderReservation, RecordsQuery,
    ReservationRequest, ServiceOffering, StaffMember, TimeSlot,
};
use crate::provider::types::AppointmentService;
use crate::store::{LibSqlBackend, NewChatUser, User, UserStore};

/// Scriptable provider that records every call it receives.
#[derive(Default)]
pub struct StubProvider {
    pub services: Mutex<Vec<ServiceOffering>>,
    pub staff: Mutex<Vec<StaffMember>>,
    /// Open slots keyed by staff id.
    pub slots: Mutex<HashMap<i64, Vec<TimeSlot>>>,
    pub reservation_response: Mutex<Vec<ProviderReservation>>,
    pub user_records: Mutex<Vec<ProviderAppointment>>,
    pub fail_services: Mutex<bool>,
    pub fail_staff: Mutex<bool>,
    pub fail_slots: Mutex<bool>,
    pub fail_create: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
    pub created: Mutex<Vec<(ReservationRequest, Option<String>)>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scenario catalogue: one online haircut and one offline service,
    /// one eligible and one fired staff member.
    pub fn salon() -> Self {
        let stub = Self::new();
        *stub.services.lock().unwrap() = vec![
            service(1, "Haircut", 500, 500, true),
            service(2, "Home visit", 2000, 3000, false),
        ];
        *stub.staff.lock().unwrap() = vec![staff(1, "Peter", false, false), staff(2, "Oleg", true, false)];
        *stub.reservation_response.lock().unwrap() = vec![ProviderReservation {
            id: 1,
            record_id: Some(123456),
            record_hash: Some("hash".into()),
        }];
        stub
    }

    pub fn set_slots(&self, staff_id: i64, slots: Vec<TimeSlot>) {
        self.slots.lock().unwrap().insert(staff_id, slots);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn failure(flag: &Mutex<bool>, status: u16) -> Result<(), ProviderError> {
        if *flag.lock().unwrap() {
            Err(ProviderError::Http {
                status,
                body: "{\"success\":false}".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AvailabilityClient for StubProvider {
    async fn list_services(
        &self,
        _company_id: i64,
        category_id: Option<i64>,
    ) -> Result<Vec<ServiceOffering>, ProviderError> {
        self.record("list_services");
        Self::failure(&self.fail_services, 500)?;
        let services = self.services.lock().unwrap().clone();
        Ok(match category_id {
            Some(category) => services
                .into_iter()
                .filter(|s| s.category_id == Some(category))
                .collect(),
            None => services,
        })
    }

    async fn list_staff(
        &self,
        _company_id: i64,
        _service_ids: &[i64],
    ) -> Result<Vec<StaffMember>, ProviderError> {
        self.record("list_staff");
        Self::failure(&self.fail_staff, 500)?;
        Ok(self.staff.lock().unwrap().clone())
    }

    async fn list_open_slots(
        &self,
        staff_id: i64,
        _date: NaiveDate,
        _service_ids: &[i64],
    ) -> Result<Vec<TimeSlot>, ProviderError> {
        self.record("list_open_slots");
        Self::failure(&self.fail_slots, 503)?;
        Ok(self
            .slots
            .lock()
            .unwrap()
            .get(&staff_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_reservation(
        &self,
        request: &ReservationRequest,
        user_token: Option<&str>,
    ) -> Result<Vec<ProviderReservation>, ProviderError> {
        self.record("create_reservation");
        Self::failure(&self.fail_create, 422)?;
        self.created
            .lock()
            .unwrap()
            .push((request.clone(), user_token.map(String::from)));
        Ok(self.reservation_response.lock().unwrap().clone())
    }

    async fn cancel_reservation(
        &self,
        _record_id: i64,
        _user_token: Option<&str>,
    ) -> Result<(), ProviderError> {
        self.record("cancel_reservation");
        Ok(())
    }

    async fn reschedule_reservation(
        &self,
        record_id: i64,
        datetime: &str,
        _user_token: Option<&str>,
    ) -> Result<ProviderAppointment, ProviderError> {
        self.record("reschedule_reservation");
        Ok(appointment(record_id, datetime))
    }

    async fn list_user_reservations(
        &self,
        _query: &RecordsQuery,
        _user_token: Option<&str>,
    ) -> Result<Vec<ProviderAppointment>, ProviderError> {
        self.record("list_user_reservations");
        Ok(self.user_records.lock().unwrap().clone())
    }
}

pub fn service(id: i64, title: &str, min: i64, max: i64, online: bool) -> ServiceOffering {
    ServiceOffering {
        id,
        title: title.into(),
        duration_seconds: 1800,
        price_min: Decimal::from(min),
        price_max: Decimal::from(max),
        online_bookable: online,
        category_id: None,
    }
}

pub fn staff(id: i64, name: &str, fired: bool, hidden: bool) -> StaffMember {
    StaffMember {
        id,
        name: name.into(),
        fired,
        hidden,
    }
}

pub fn slot(time: &str, iso: &str) -> TimeSlot {
    TimeSlot {
        display_time: time.into(),
        iso_datetime: iso.into(),
        slot_length_seconds: 1800,
    }
}

pub fn appointment(id: i64, datetime: &str) -> ProviderAppointment {
    ProviderAppointment {
        id,
        company_id: 1,
        staff_id: 1,
        services: vec![AppointmentService {
            id: 1,
            title: Some("Haircut".into()),
        }],
        datetime: datetime.into(),
        length: Some(1800),
        comment: None,
    }
}

/// Slot datetime `days` from now at 10:00 in the `+05:00` offset.
pub fn future_iso(days: i64) -> String {
    let date = Utc::now().date_naive() + chrono::Duration::days(days);
    format!("{}T10:00:00+05:00", date.format("%Y-%m-%d"))
}

pub async fn chat_user(db: &LibSqlBackend, telegram_id: i64) -> User {
    db.upsert_chat_user(&NewChatUser {
        telegram_id,
        first_name: "Ivan".into(),
        last_name: Some("Petrov".into()),
        username: Some("ivanp".into()),
    })
    .await
    .unwrap()
}
