//! The multi-step booking conversation.
//!
//! `BookingScene` is stateless; everything a conversation accumulates lives
//! in the `BookingSessionState` the caller passes in. Each call consumes one
//! inbound event and answers with a `SceneTurn`.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::booking::DATE_WINDOW_DAYS;
use crate::booking::contact::{normalize_phone, validate_email};
use crate::booking::event::{InboundEvent, MenuCommand, Selection, StaffChoice};
use crate::booking::render::{Button, Reply, date_button_label, format_date, format_price};
use crate::booking::service::BookingService;
use crate::booking::session::{BookingSessionState, BookingStage, ContactField};
use crate::error::BookingError;
use crate::store::{Reservation, User, UserStore};

const PHONE_PROMPT: &str = "📱 We need your phone number to book.\n\n\
     Send it as +79991234567 or 89991234567.";
const INVALID_PHONE: &str = "❌ Invalid phone number. Send it as +79991234567 or 89991234567.";
const EMAIL_PROMPT: &str = "📧 We need your email to book.\n\nSend your email address:";
const INVALID_EMAIL: &str = "❌ Invalid email address. Please try again.";
const USE_BUTTONS: &str = "Please use the buttons above to continue, or press ❌ Cancel.";
const STALE_BUTTON: &str = "⌛ This button is no longer active.";

/// How a turn left the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneOutcome {
    /// Still collecting choices; keep the session.
    Active,
    /// Booking created and mirrored.
    Committed(Reservation),
    /// Cancelled by the user or aborted after a failure.
    Cancelled,
    /// A menu command arrived; the caller runs it after dropping the session.
    Interrupted(MenuCommand),
}

impl SceneOutcome {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Result of handling one inbound event.
#[derive(Debug, Clone)]
pub struct SceneTurn {
    /// Short acknowledgement for the pressed button, if any.
    pub toast: Option<String>,
    pub replies: Vec<Reply>,
    pub outcome: SceneOutcome,
}

impl SceneTurn {
    fn active(replies: Vec<Reply>) -> Self {
        Self {
            toast: None,
            replies,
            outcome: SceneOutcome::Active,
        }
    }

    fn stale() -> Self {
        Self {
            toast: Some(STALE_BUTTON.to_string()),
            replies: Vec::new(),
            outcome: SceneOutcome::Active,
        }
    }

    fn ended(reply: Reply) -> Self {
        Self {
            toast: None,
            replies: vec![reply],
            outcome: SceneOutcome::Cancelled,
        }
    }

    fn with_toast(mut self, toast: impl Into<String>) -> Self {
        self.toast = Some(toast.into());
        self
    }
}

/// Drives a booking from service choice to a committed reservation.
pub struct BookingScene {
    bookings: Arc<BookingService>,
    users: Arc<dyn UserStore>,
    utc_offset: FixedOffset,
}

impl BookingScene {
    pub fn new(bookings: Arc<BookingService>, users: Arc<dyn UserStore>) -> Self {
        let utc_offset = bookings.config().utc_offset;
        Self {
            bookings,
            users,
            utc_offset,
        }
    }

    /// Today in the salon's offset.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.utc_offset).date_naive()
    }

    /// Dates offered for booking, today first.
    pub fn date_window(&self) -> Vec<NaiveDate> {
        let today = self.today();
        (0..DATE_WINDOW_DAYS)
            .map(|offset| today + Duration::days(offset))
            .collect()
    }

    /// Start a fresh booking. Any previous session data is dropped.
    pub async fn enter(&self, session: &mut BookingSessionState) -> SceneTurn {
        *session = BookingSessionState::new();
        self.show_services(session, false).await
    }

    /// Handle one event of a conversation in progress.
    pub async fn handle(
        &self,
        session: &mut BookingSessionState,
        user: &mut User,
        event: InboundEvent,
    ) -> SceneTurn {
        match event {
            InboundEvent::Menu(MenuCommand::Book) => self.enter(session).await,
            InboundEvent::Menu(command) => {
                info!(user_id = user.id, command = command.command(), stage = %session.stage(), "Booking interrupted");
                SceneTurn {
                    toast: None,
                    replies: Vec::new(),
                    outcome: SceneOutcome::Interrupted(command),
                }
            }
            InboundEvent::Text(text) => match session.stage().contact_field() {
                Some(ContactField::Phone) => self.on_phone(session, user, &text).await,
                Some(ContactField::Email) => self.on_email(session, user, &text).await,
                None => SceneTurn::active(vec![Reply::text(USE_BUTTONS)]),
            },
            InboundEvent::Selection(selection) => {
                if !session.stage().accepts(&selection) {
                    warn!(stage = %session.stage(), selection = %selection, "Stale selection");
                    return SceneTurn::stale();
                }
                self.on_selection(session, user, selection).await
            }
        }
    }

    async fn on_selection(
        &self,
        session: &mut BookingSessionState,
        user: &mut User,
        selection: Selection,
    ) -> SceneTurn {
        match selection {
            Selection::Cancel => {
                info!(user_id = user.id, stage = %session.stage(), "Booking cancelled");
                SceneTurn::ended(Reply::main_menu("❌ Booking cancelled.")).with_toast("Cancelled")
            }
            Selection::Service(id) => self.on_service(session, id).await,
            Selection::Staff(choice) => self.on_staff(session, choice),
            Selection::Date(date) => self.on_date(session, date).await,
            Selection::Time(iso) => self.on_time(session, user, iso),
            Selection::Confirm => self.on_confirm(session, user).await,
            Selection::BackToServices => {
                session.advance(BookingStage::ServiceSelection);
                session.selected_service_id = None;
                session.clear_staff_onward();
                session.cached_staff = None;
                self.show_services(session, true).await
            }
            Selection::BackToStaff => {
                session.advance(BookingStage::StaffSelection);
                session.clear_staff_onward();
                SceneTurn::active(vec![self.render_staff(session)])
            }
            Selection::BackToDates => {
                if session.stage() == BookingStage::TimeSelection {
                    session.advance(BookingStage::DateSelection);
                }
                session.clear_date_onward();
                SceneTurn::active(vec![self.render_dates()])
            }
            Selection::BackToTimes => {
                let Some(date) = session.selected_date else {
                    return self.abort(session, "slots", None);
                };
                session.advance(BookingStage::TimeSelection);
                session.clear_time();
                self.show_times(session, date).await
            }
        }
    }

    async fn show_services(&self, session: &mut BookingSessionState, use_cache: bool) -> SceneTurn {
        let services = match (&session.cached_services, use_cache) {
            (Some(cached), true) => cached.clone(),
            _ => match self.bookings.get_bookable_services().await {
                Ok(services) => services,
                Err(e) => return self.abort(session, "services", Some(e)),
            },
        };

        if services.is_empty() {
            return SceneTurn::ended(Reply::main_menu(
                "😔 No services are open for online booking right now.",
            ));
        }

        let mut rows: Vec<Vec<Button>> = services
            .iter()
            .map(|s| {
                vec![Button::new(
                    format!(
                        "{} ({}, {} min)",
                        s.title,
                        format_price(s.price_min, s.price_max),
                        s.duration_minutes()
                    ),
                    Selection::Service(s.id),
                )]
            })
            .collect();
        rows.push(vec![Button::cancel()]);
        session.cached_services = Some(services);

        SceneTurn::active(vec![Reply::inline("💇 Choose a service:", rows)])
    }

    async fn on_service(&self, session: &mut BookingSessionState, service_id: i64) -> SceneTurn {
        let offered = session
            .cached_services
            .as_ref()
            .and_then(|services| services.iter().find(|s| s.id == service_id))
            .map(|s| s.title.clone());
        let Some(title) = offered else {
            return SceneTurn::stale();
        };

        session.selected_service_id = Some(service_id);
        session.clear_staff_onward();

        let staff = match self.bookings.get_eligible_staff(service_id).await {
            Ok(staff) => staff,
            Err(e) => return self.abort(session, "staff", Some(e)),
        };
        if staff.is_empty() {
            return SceneTurn::ended(Reply::main_menu(
                "😔 Nobody is available for this service right now.",
            ));
        }

        session.cached_staff = Some(staff);
        session.advance(BookingStage::StaffSelection);
        SceneTurn::active(vec![self.render_staff(session)]).with_toast(format!("Service: {title}"))
    }

    fn render_staff(&self, session: &BookingSessionState) -> Reply {
        let mut rows = vec![vec![Button::new(
            "👥 Any available staff",
            Selection::Staff(StaffChoice::Any),
        )]];
        for member in session.cached_staff.iter().flatten() {
            rows.push(vec![Button::new(
                format!("👤 {}", member.name),
                Selection::Staff(StaffChoice::Member(member.id)),
            )]);
        }
        rows.push(vec![
            Button::back(Selection::BackToServices),
            Button::cancel(),
        ]);
        Reply::inline("👨‍💼 Choose a staff member:", rows)
    }

    fn on_staff(&self, session: &mut BookingSessionState, choice: StaffChoice) -> SceneTurn {
        let toast = match choice {
            StaffChoice::Any => "Any available staff".to_string(),
            StaffChoice::Member(id) => {
                let name = session
                    .cached_staff
                    .iter()
                    .flatten()
                    .find(|s| s.id == id)
                    .map(|s| s.name.clone());
                match name {
                    Some(name) => format!("Staff: {name}"),
                    None => return SceneTurn::stale(),
                }
            }
        };

        session.clear_staff_onward();
        session.selected_staff_id = choice.staff_id();
        session.advance(BookingStage::DateSelection);
        SceneTurn::active(vec![self.render_dates()]).with_toast(toast)
    }

    fn render_dates(&self) -> Reply {
        let mut rows: Vec<Vec<Button>> = self
            .date_window()
            .into_iter()
            .map(|date| vec![Button::new(date_button_label(date), Selection::Date(date))])
            .collect();
        rows.push(vec![Button::back(Selection::BackToStaff), Button::cancel()]);
        Reply::inline("📅 Choose a date:", rows)
    }

    async fn on_date(&self, session: &mut BookingSessionState, date: NaiveDate) -> SceneTurn {
        if !self.date_window().contains(&date) {
            return SceneTurn::stale();
        }
        session.clear_date_onward();
        session.selected_date = Some(date);
        self.show_times(session, date)
            .await
            .with_toast(format!("Date: {}", format_date(date)))
    }

    /// Fetch and offer the slots of `date` for the current service/staff.
    async fn show_times(&self, session: &mut BookingSessionState, date: NaiveDate) -> SceneTurn {
        let Some(service_id) = session.selected_service_id else {
            return self.abort(session, "slots", None);
        };

        let slots = match session.selected_staff_id {
            Some(staff_id) => {
                self.bookings
                    .get_open_slots(service_id, Some(staff_id), date)
                    .await
            }
            None => {
                let staff = session.cached_staff.clone().unwrap_or_default();
                self.bookings
                    .get_open_slots_any_staff(service_id, &staff, date)
                    .await
            }
        };
        let slots = match slots {
            Ok(slots) => slots,
            Err(e) => return self.abort(session, "slots", Some(e)),
        };

        if slots.is_empty() {
            if session.stage() == BookingStage::TimeSelection {
                session.advance(BookingStage::DateSelection);
            }
            session.selected_date = None;
            return SceneTurn::active(vec![Reply::inline(
                format!(
                    "😔 No free slots on {}. Please pick another date.",
                    format_date(date)
                ),
                vec![vec![
                    Button::new("⬅️ Back to dates", Selection::BackToDates),
                    Button::cancel(),
                ]],
            )]);
        }

        let mut rows: Vec<Vec<Button>> = slots
            .chunks(3)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|slot| {
                        Button::new(
                            slot.display_time.clone(),
                            Selection::Time(slot.iso_datetime.clone()),
                        )
                    })
                    .collect()
            })
            .collect();
        rows.push(vec![Button::back(Selection::BackToDates), Button::cancel()]);

        session.offered_slots = slots;
        if session.stage() == BookingStage::DateSelection {
            session.advance(BookingStage::TimeSelection);
        }
        SceneTurn::active(vec![Reply::inline(
            format!("⏰ Choose a time for {}:", format_date(date)),
            rows,
        )])
    }

    fn on_time(&self, session: &mut BookingSessionState, user: &User, iso: String) -> SceneTurn {
        let Some(slot) = session
            .offered_slots
            .iter()
            .find(|s| s.iso_datetime == iso)
        else {
            return SceneTurn::stale();
        };
        let toast = format!("Time: {}", slot.display_time);
        session.selected_datetime = Some(iso);

        let has_phone = user.phone.is_some() || session.pending_phone.is_some();
        let has_email = user.email.is_some() || session.pending_email.is_some();

        let reply = if !has_phone {
            session.advance(BookingStage::ContactCollection(ContactField::Phone));
            Reply::inline(PHONE_PROMPT, vec![vec![Button::cancel()]])
        } else if !has_email {
            session.advance(BookingStage::ContactCollection(ContactField::Email));
            Reply::inline(EMAIL_PROMPT, vec![vec![Button::cancel()]])
        } else {
            session.advance(BookingStage::Confirmation);
            self.render_confirmation(session)
        };
        SceneTurn::active(vec![reply]).with_toast(toast)
    }

    async fn on_phone(
        &self,
        session: &mut BookingSessionState,
        user: &mut User,
        text: &str,
    ) -> SceneTurn {
        let phone = match normalize_phone(text) {
            Ok(phone) => phone,
            Err(_) => return SceneTurn::active(vec![Reply::text(INVALID_PHONE)]),
        };
        session.pending_phone = Some(phone.clone());

        if user.email.is_none() && session.pending_email.is_none() {
            session.advance(BookingStage::ContactCollection(ContactField::Email));
            return SceneTurn::active(vec![Reply::inline(
                "✅ Phone saved!\n\n📧 Now send your email address:",
                vec![vec![Button::cancel()]],
            )]);
        }

        self.persist_contact(user, Some(&phone), None).await;
        session.advance(BookingStage::Confirmation);
        SceneTurn::active(vec![
            Reply::text("✅ Phone saved!"),
            self.render_confirmation(session),
        ])
    }

    async fn on_email(
        &self,
        session: &mut BookingSessionState,
        user: &mut User,
        text: &str,
    ) -> SceneTurn {
        let email = match validate_email(text) {
            Ok(email) => email,
            Err(_) => return SceneTurn::active(vec![Reply::text(INVALID_EMAIL)]),
        };
        session.pending_email = Some(email.clone());

        let phone = session.pending_phone.clone();
        self.persist_contact(user, phone.as_deref(), Some(&email))
            .await;
        session.advance(BookingStage::Confirmation);
        SceneTurn::active(vec![
            Reply::text("✅ Email saved!"),
            self.render_confirmation(session),
        ])
    }

    /// Store contact details on the profile. A failure only costs the
    /// profile update; the session still carries the values.
    async fn persist_contact(&self, user: &mut User, phone: Option<&str>, email: Option<&str>) {
        match self.users.update_contact_info(user.id, phone, email).await {
            Ok(Some(updated)) => *user = updated,
            Ok(None) => warn!(user_id = user.id, "Contact update for unknown user"),
            Err(e) => warn!(user_id = user.id, error = %e, "Failed to save contact info"),
        }
    }

    fn render_confirmation(&self, session: &BookingSessionState) -> Reply {
        let service = session.selected_service();
        let staff = match (session.selected_staff_id, session.selected_staff()) {
            (None, _) => "Any available staff".to_string(),
            (Some(_), Some(member)) => member.name.clone(),
            (Some(id), None) => format!("#{id}"),
        };
        let slot = session
            .selected_datetime
            .as_deref()
            .and_then(|iso| DateTime::parse_from_rfc3339(iso).ok());

        let mut text = String::from("✅ Please confirm your booking:\n\n");
        if let Some(service) = service {
            text.push_str(&format!("💇 Service: {}\n", service.title));
        }
        text.push_str(&format!("👨‍💼 Staff: {staff}\n"));
        if let Some(slot) = slot {
            text.push_str(&format!("📅 Date: {}\n", format_date(slot.date_naive())));
            text.push_str(&format!("⏰ Time: {}\n", slot.format("%H:%M")));
        }
        let priced = service.filter(|s| !(s.price_min.is_zero() && s.price_max.is_zero()));
        if let Some(service) = priced {
            text.push_str(&format!(
                "💰 Price: {}\n",
                format_price(service.price_min, service.price_max)
            ));
        }

        Reply::inline(
            text,
            vec![
                vec![Button::new("✅ Confirm", Selection::Confirm), Button::cancel()],
                vec![Button::back(Selection::BackToTimes)],
            ],
        )
    }

    async fn on_confirm(&self, session: &mut BookingSessionState, user: &User) -> SceneTurn {
        let (Some(service_id), Some(iso)) = (
            session.selected_service_id,
            session.selected_datetime.clone(),
        ) else {
            return self.abort(session, "booking", None);
        };

        let mut booking_user = user.clone();
        session.apply_contact(&mut booking_user);

        match self
            .bookings
            .create_booking(
                service_id,
                session.selected_staff_id,
                &iso,
                &booking_user,
                user.provider_user_token.as_deref(),
            )
            .await
        {
            Ok(reservation) => {
                let when = DateTime::parse_from_rfc3339(&iso)
                    .map(|dt| format!("{} at {}", format_date(dt.date_naive()), dt.format("%H:%M")))
                    .unwrap_or(iso);
                let text = format!(
                    "🎉 Your booking is confirmed!\n\n📅 {when}\n💇 {}\n\nSee you soon!",
                    reservation.service_name
                );
                SceneTurn {
                    toast: Some("✅ Booked".to_string()),
                    replies: vec![Reply::main_menu(text)],
                    outcome: SceneOutcome::Committed(reservation),
                }
            }
            Err(e) => {
                error!(user_id = user.id, error = %e, "Booking failed");
                SceneTurn::ended(Reply::main_menu(
                    "⚠️ Sorry, we could not complete your booking. Please try again later.",
                ))
                .with_toast("Booking failed")
            }
        }
    }

    /// End the conversation after a failure, with an apology and the main menu.
    fn abort(
        &self,
        session: &BookingSessionState,
        what: &str,
        cause: Option<BookingError>,
    ) -> SceneTurn {
        match cause {
            Some(e) => error!(stage = %session.stage(), error = %e, "Failed to load {what}"),
            None => error!(stage = %session.stage(), "Session is missing data to load {what}"),
        }
        SceneTurn::ended(Reply::main_menu(format!(
            "⚠️ Sorry, something went wrong while loading {what}. Please try again later."
        )))
    }
}
