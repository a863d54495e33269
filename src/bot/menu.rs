//! Main-menu commands that live outside the booking conversation.

use std::sync::Arc;

use chrono::FixedOffset;
use tracing::error;

use crate::booking::render::{format_date, format_price};
use crate::booking::{BookingService, MenuCommand, Reply};
use crate::store::User;

const HELP: &str = "ℹ️ *Help*\n\n\
    Available commands:\n\
    /services - services and prices\n\
    /book - book an appointment\n\
    /my\\_bookings - your upcoming bookings\n\
    /help - this message\n\n\
    You can also use the menu buttons below.";

pub struct MenuHandler {
    bookings: Arc<BookingService>,
    utc_offset: FixedOffset,
}

impl MenuHandler {
    pub fn new(bookings: Arc<BookingService>) -> Self {
        let utc_offset = bookings.config().utc_offset;
        Self {
            bookings,
            utc_offset,
        }
    }

    /// Answer a menu command. `Book` is not handled here; it enters the
    /// booking conversation.
    pub async fn handle(&self, command: MenuCommand, user: &User) -> Reply {
        match command {
            MenuCommand::Start => self.start(user),
            MenuCommand::Services => self.services().await,
            MenuCommand::MyBookings => self.my_bookings(user).await,
            MenuCommand::Help | MenuCommand::Book => Reply::main_menu(HELP),
        }
    }

    fn start(&self, user: &User) -> Reply {
        let name = if user.first_name.trim().is_empty() {
            "there"
        } else {
            user.first_name.as_str()
        };
        Reply::main_menu(format!(
            "👋 Hello, {name}!\n\n\
             I can book you an appointment at {}.\n\n\
             Pick an action from the menu below or use a command:\n\
             /services - services and prices\n\
             /book - book an appointment\n\
             /my\\_bookings - your upcoming bookings",
            self.bookings.config().branch_name
        ))
    }

    async fn services(&self) -> Reply {
        let services = match self.bookings.get_bookable_services().await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "Failed to fetch services");
                return Reply::main_menu(
                    "⚠️ Sorry, we could not load the services. Please try again later.",
                );
            }
        };

        if services.is_empty() {
            return Reply::main_menu("No services are available yet.");
        }

        let mut text = String::from("💇 *Our services:*\n\n");
        for service in &services {
            text.push_str(&format!(
                "*{}*\n💰 {}\n⏱ {} min\n\n",
                service.title,
                format_price(service.price_min, service.price_max),
                service.duration_minutes()
            ));
        }
        Reply::main_menu(text.trim_end().to_string())
    }

    async fn my_bookings(&self, user: &User) -> Reply {
        let bookings = match self.bookings.get_user_bookings(user.id).await {
            Ok(bookings) => bookings,
            Err(e) => {
                error!(user_id = user.id, error = %e, "Failed to fetch user bookings");
                return Reply::main_menu(
                    "⚠️ Sorry, we could not load your bookings. Please try again later.",
                );
            }
        };

        if bookings.is_empty() {
            return Reply::main_menu("You have no upcoming bookings.");
        }

        let mut text = String::from("📋 *Your bookings:*\n\n");
        for booking in &bookings {
            let local = booking.scheduled_at.with_timezone(&self.utc_offset);
            text.push_str(&format!(
                "*{}*\n📅 {} at {}\n",
                booking.service_name,
                format_date(local.date_naive()),
                local.format("%H:%M")
            ));
            if let Some(staff) = &booking.staff_name {
                text.push_str(&format!("👨‍💼 {staff}\n"));
            }
            text.push_str(&format!(
                "📍 {}\nID: {}\n\n",
                booking.company_name, booking.remote_reservation_id
            ));
        }
        Reply::main_menu(text.trim_end().to_string())
    }
}
