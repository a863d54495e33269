//! Booking orchestration: availability queries and the
//! "create at the provider, then mirror locally" transaction.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use tracing::{error, info, warn};

use crate::config::BookingConfig;
use crate::error::{BookingError, DatabaseError};
use crate::provider::{
    ANY_STAFF, AppointmentRequest, AvailabilityClient, ProviderAppointment, RecordsQuery,
    ReservationRequest, ServiceOffering, StaffMember, TimeSlot,
};
use crate::store::{NewReservation, Reservation, ReservationStore, User};

/// Label stored when the booked service can no longer be resolved.
const FALLBACK_SERVICE_NAME: &str = "Service";

/// Business logic between the conversation and the provider/store.
pub struct BookingService {
    provider: Arc<dyn AvailabilityClient>,
    reservations: Arc<dyn ReservationStore>,
    config: BookingConfig,
}

impl BookingService {
    pub fn new(
        provider: Arc<dyn AvailabilityClient>,
        reservations: Arc<dyn ReservationStore>,
        config: BookingConfig,
    ) -> Self {
        Self {
            provider,
            reservations,
            config,
        }
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Services open for online booking.
    pub async fn get_bookable_services(&self) -> Result<Vec<ServiceOffering>, BookingError> {
        let services = self
            .provider
            .list_services(self.config.company_id, None)
            .await?;
        Ok(services.into_iter().filter(|s| s.online_bookable).collect())
    }

    pub async fn get_services_by_category(
        &self,
        category_id: i64,
    ) -> Result<Vec<ServiceOffering>, BookingError> {
        let services = self
            .provider
            .list_services(self.config.company_id, Some(category_id))
            .await?;
        Ok(services.into_iter().filter(|s| s.online_bookable).collect())
    }

    /// Staff able to perform the service, minus fired and hidden members.
    pub async fn get_eligible_staff(
        &self,
        service_id: i64,
    ) -> Result<Vec<StaffMember>, BookingError> {
        let staff = self
            .provider
            .list_staff(self.config.company_id, &[service_id])
            .await?;
        Ok(staff.into_iter().filter(StaffMember::eligible).collect())
    }

    /// Open slots of one staff member.
    ///
    /// Without a staff id there is nothing to ask the provider, so the
    /// result is empty and no call is made.
    pub async fn get_open_slots(
        &self,
        service_id: i64,
        staff_id: Option<i64>,
        date: NaiveDate,
    ) -> Result<Vec<TimeSlot>, BookingError> {
        let Some(staff_id) = staff_id else {
            return Ok(Vec::new());
        };
        Ok(self
            .provider
            .list_open_slots(staff_id, date, &[service_id])
            .await?)
    }

    /// Open slots of any of `staff`, merged by datetime in chronological order.
    pub async fn get_open_slots_any_staff(
        &self,
        service_id: i64,
        staff: &[StaffMember],
        date: NaiveDate,
    ) -> Result<Vec<TimeSlot>, BookingError> {
        let per_staff = try_join_all(
            staff
                .iter()
                .filter(|s| s.eligible())
                .map(|s| self.get_open_slots(service_id, Some(s.id), date)),
        )
        .await?;

        let mut seen = HashSet::new();
        let mut merged: Vec<TimeSlot> = per_staff
            .into_iter()
            .flatten()
            .filter(|slot| seen.insert(slot.iso_datetime.clone()))
            .collect();
        merged.sort_by_key(|slot| {
            (
                DateTime::parse_from_rfc3339(&slot.iso_datetime).ok(),
                slot.iso_datetime.clone(),
            )
        });
        Ok(merged)
    }

    /// Provider request for a booking, with contact placeholders applied.
    pub fn build_request(
        &self,
        service_id: i64,
        staff_id: Option<i64>,
        iso_datetime: &str,
        user: &User,
    ) -> ReservationRequest {
        let defaults = &self.config.contact_defaults;
        ReservationRequest {
            phone: user.phone.clone().unwrap_or_else(|| defaults.phone.clone()),
            fullname: user.full_name(),
            email: user.email.clone().unwrap_or_else(|| defaults.email.clone()),
            appointments: vec![AppointmentRequest {
                id: 0,
                staff_id: staff_id.unwrap_or(ANY_STAFF),
                services: vec![service_id],
                datetime: iso_datetime.to_string(),
            }],
            comment: None,
        }
    }

    /// Book at the provider, then record the reservation locally.
    ///
    /// Idempotent on the provider record id: a reservation already mirrored
    /// under that id is returned as is.
    pub async fn create_booking(
        &self,
        service_id: i64,
        staff_id: Option<i64>,
        iso_datetime: &str,
        user: &User,
        user_token: Option<&str>,
    ) -> Result<Reservation, BookingError> {
        let scheduled_at = DateTime::parse_from_rfc3339(iso_datetime)
            .map_err(|e| BookingError::InvalidDatetime {
                value: iso_datetime.to_string(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        let request = self.build_request(service_id, staff_id, iso_datetime, user);
        let response = self
            .provider
            .create_reservation(&request, user_token)
            .await?;

        let Some(remote_id) = response.iter().find_map(|r| r.usable_id()) else {
            error!(
                user_id = user.id,
                response = ?response,
                "Provider returned no reservation id"
            );
            return Err(BookingError::NoReservationId);
        };

        let unmirrored = |source: DatabaseError| {
            error!(
                user_id = user.id,
                remote_id,
                error = %source,
                "Reservation exists at the provider but was not recorded locally"
            );
            BookingError::Unmirrored { remote_id, source }
        };

        if let Some(existing) = self
            .reservations
            .find_by_remote_id(remote_id)
            .await
            .map_err(&unmirrored)?
        {
            info!(remote_id, id = existing.id, "Reservation already mirrored");
            return Ok(existing);
        }

        let service_name = match self.get_bookable_services().await {
            Ok(services) => services
                .into_iter()
                .find(|s| s.id == service_id)
                .map(|s| s.title),
            Err(e) => {
                warn!(service_id, error = %e, "Could not resolve service name");
                None
            }
        }
        .unwrap_or_else(|| FALLBACK_SERVICE_NAME.to_string());

        let staff_name = match staff_id {
            Some(staff_id) => match self.get_eligible_staff(service_id).await {
                Ok(staff) => staff.into_iter().find(|s| s.id == staff_id).map(|s| s.name),
                Err(e) => {
                    warn!(staff_id, error = %e, "Could not resolve staff name");
                    None
                }
            },
            None => None,
        };

        let data = NewReservation {
            user_id: user.id,
            remote_reservation_id: remote_id,
            company_id: self.config.company_id,
            company_name: self.config.branch_name.clone(),
            service_id,
            service_name,
            staff_id,
            staff_name,
            scheduled_at,
        };

        let reservation = match self.reservations.create(&data).await {
            Ok(reservation) => reservation,
            Err(DatabaseError::Constraint(msg)) => {
                // A concurrent booking mirrored the same remote id first.
                match self.reservations.find_by_remote_id(remote_id).await {
                    Ok(Some(existing)) => existing,
                    Ok(None) => return Err(unmirrored(DatabaseError::Constraint(msg))),
                    Err(e) => return Err(unmirrored(e)),
                }
            }
            Err(e) => return Err(unmirrored(e)),
        };

        info!(
            user_id = user.id,
            remote_id,
            service_id,
            "Booking created"
        );
        Ok(reservation)
    }

    /// Upcoming active reservations of a user.
    pub async fn get_user_bookings(&self, user_id: i64) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.reservations.find_active_by_user(user_id).await?)
    }

    /// Every reservation of a user, whatever its status.
    pub async fn get_booking_history(
        &self,
        user_id: i64,
    ) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.reservations.find_all_by_user(user_id).await?)
    }

    /// Cancel at the provider. The local mirror is not touched.
    pub async fn cancel_booking(
        &self,
        remote_id: i64,
        user_token: Option<&str>,
    ) -> Result<(), BookingError> {
        Ok(self
            .provider
            .cancel_reservation(remote_id, user_token)
            .await?)
    }

    /// Move a reservation at the provider. The local mirror is not touched.
    pub async fn reschedule_booking(
        &self,
        remote_id: i64,
        new_datetime: &str,
        user_token: Option<&str>,
    ) -> Result<ProviderAppointment, BookingError> {
        Ok(self
            .provider
            .reschedule_reservation(remote_id, new_datetime, user_token)
            .await?)
    }

    /// Provider appointments of the acting user that have no local mirror.
    pub async fn unmirrored_reservations(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        user_token: Option<&str>,
    ) -> Result<Vec<ProviderAppointment>, BookingError> {
        let query = RecordsQuery {
            company_id: self.config.company_id,
            from,
            to,
        };
        let remote = self
            .provider
            .list_user_reservations(&query, user_token)
            .await?;

        let mut missing = Vec::new();
        for appointment in remote {
            if self
                .reservations
                .find_by_remote_id(appointment.id)
                .await?
                .is_none()
            {
                missing.push(appointment);
            }
        }
        if !missing.is_empty() {
            warn!(count = missing.len(), "Provider reservations without a local mirror");
        }
        Ok(missing)
    }
}
