//! Scheduling provider integration.
//!
//! `AvailabilityClient` is the typed seam the booking core talks through.
//! `YclientsClient` is the HTTP implementation.

pub mod types;
pub mod yclients;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::ProviderError;

pub use types::{
    AppointmentRequest, ProviderAppointment, ProviderReservation, RecordsQuery,
    ReservationRequest, ServiceOffering, StaffMember, TimeSlot,
};
pub use yclients::YclientsClient;

/// Staff id the provider reads as "any available staff member".
pub const ANY_STAFF: i64 = 0;

/// Operations the booking core needs from the scheduling provider.
///
/// Read operations have no side effects. Nothing here retries; every
/// failure comes back as a `ProviderError`.
#[async_trait]
pub trait AvailabilityClient: Send + Sync {
    /// Services of an organization, optionally narrowed to one category.
    /// Callers filter to online-bookable entries.
    async fn list_services(
        &self,
        company_id: i64,
        category_id: Option<i64>,
    ) -> Result<Vec<ServiceOffering>, ProviderError>;

    /// Staff able to perform all of `service_ids`. Callers drop fired/hidden staff.
    async fn list_staff(
        &self,
        company_id: i64,
        service_ids: &[i64],
    ) -> Result<Vec<StaffMember>, ProviderError>;

    /// Open slots of one staff member on one date. Empty when nothing is open.
    async fn list_open_slots(
        &self,
        staff_id: i64,
        date: NaiveDate,
        service_ids: &[i64],
    ) -> Result<Vec<TimeSlot>, ProviderError>;

    /// Create a reservation. The provider answers with one entry per appointment.
    async fn create_reservation(
        &self,
        request: &ReservationRequest,
        user_token: Option<&str>,
    ) -> Result<Vec<ProviderReservation>, ProviderError>;

    async fn cancel_reservation(
        &self,
        record_id: i64,
        user_token: Option<&str>,
    ) -> Result<(), ProviderError>;

    async fn reschedule_reservation(
        &self,
        record_id: i64,
        datetime: &str,
        user_token: Option<&str>,
    ) -> Result<ProviderAppointment, ProviderError>;

    /// Appointments the acting user holds at the provider.
    async fn list_user_reservations(
        &self,
        query: &RecordsQuery,
        user_token: Option<&str>,
    ) -> Result<Vec<ProviderAppointment>, ProviderError>;
}
