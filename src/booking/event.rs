//! Inbound conversation events.
//!
//! Callback ids are decoded once, at the transport boundary, into
//! `Selection`. Everything downstream matches on the enum.

use std::fmt;

use chrono::{DateTime, NaiveDate};

/// Staff choice of a booking: a named member or whoever is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffChoice {
    Any,
    Member(i64),
}

impl StaffChoice {
    pub fn staff_id(&self) -> Option<i64> {
        match self {
            Self::Any => None,
            Self::Member(id) => Some(*id),
        }
    }
}

/// A discrete choice made by pressing a button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Service(i64),
    Staff(StaffChoice),
    Date(NaiveDate),
    /// Full ISO datetime of the chosen slot, as the provider returned it.
    Time(String),
    Confirm,
    Cancel,
    BackToServices,
    BackToStaff,
    BackToDates,
    BackToTimes,
}

impl Selection {
    /// Decode a callback id such as `service_12` or `staff_any`.
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "confirm" => return Some(Self::Confirm),
            "cancel" => return Some(Self::Cancel),
            "back_to_services" => return Some(Self::BackToServices),
            "back_to_staff" => return Some(Self::BackToStaff),
            "back_to_dates" => return Some(Self::BackToDates),
            "back_to_times" => return Some(Self::BackToTimes),
            _ => {}
        }

        let (prefix, value) = data.split_once('_')?;
        match prefix {
            "service" => value.parse().ok().map(Self::Service),
            "staff" if value == "any" => Some(Self::Staff(StaffChoice::Any)),
            "staff" => value
                .parse()
                .ok()
                .map(|id| Self::Staff(StaffChoice::Member(id))),
            "date" => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(Self::Date),
            "time" => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|_| Self::Time(value.to_string())),
            _ => None,
        }
    }

    pub fn is_back(&self) -> bool {
        matches!(
            self,
            Self::BackToServices | Self::BackToStaff | Self::BackToDates | Self::BackToTimes
        )
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(id) => write!(f, "service_{id}"),
            Self::Staff(StaffChoice::Any) => write!(f, "staff_any"),
            Self::Staff(StaffChoice::Member(id)) => write!(f, "staff_{id}"),
            Self::Date(date) => write!(f, "date_{}", date.format("%Y-%m-%d")),
            Self::Time(iso) => write!(f, "time_{iso}"),
            Self::Confirm => write!(f, "confirm"),
            Self::Cancel => write!(f, "cancel"),
            Self::BackToServices => write!(f, "back_to_services"),
            Self::BackToStaff => write!(f, "back_to_staff"),
            Self::BackToDates => write!(f, "back_to_dates"),
            Self::BackToTimes => write!(f, "back_to_times"),
        }
    }
}

/// Reserved main-menu commands. They interrupt any booking in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    Start,
    Services,
    Book,
    MyBookings,
    Help,
}

impl MenuCommand {
    pub const ALL: [MenuCommand; 5] = [
        Self::Start,
        Self::Services,
        Self::Book,
        Self::MyBookings,
        Self::Help,
    ];

    pub fn command(&self) -> &'static str {
        match self {
            Self::Start => "/start",
            Self::Services => "/services",
            Self::Book => "/book",
            Self::MyBookings => "/my_bookings",
            Self::Help => "/help",
        }
    }

    /// Caption of the main-menu keyboard button, if the command has one.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::Start => None,
            Self::Services => Some("💇 Services & prices"),
            Self::Book => Some("📅 Book"),
            Self::MyBookings => Some("📋 My bookings"),
            Self::Help => Some("ℹ️ Help"),
        }
    }

    /// Match a slash command (with or without `@botname`) or a keyboard label.
    pub fn from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        let command = text
            .split_whitespace()
            .next()
            .map(|word| word.split('@').next().unwrap_or(word))
            .unwrap_or("");

        Self::ALL
            .into_iter()
            .find(|cmd| cmd.command() == command || cmd.label() == Some(text))
    }
}

/// One turn of user input, already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text(String),
    Selection(Selection),
    Menu(MenuCommand),
}

impl InboundEvent {
    /// Classify a typed message: menu command or plain text.
    pub fn from_text(text: &str) -> Self {
        match MenuCommand::from_text(text) {
            Some(cmd) => Self::Menu(cmd),
            None => Self::Text(text.to_string()),
        }
    }

    /// Short description for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Selection(_) => "selection",
            Self::Menu(_) => "menu",
        }
    }
}
