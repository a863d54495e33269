//! Rendering directives handed to the chat transport.

use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;

use crate::booking::event::{MenuCommand, Selection};

/// A pressable choice attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: Selection,
}

impl Button {
    pub fn new(label: impl Into<String>, action: Selection) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }

    pub fn cancel() -> Self {
        Self::new("❌ Cancel", Selection::Cancel)
    }

    pub fn back(action: Selection) -> Self {
        Self::new("⬅️ Back", action)
    }
}

/// Keyboard attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    None,
    /// Rows of buttons bound to the message.
    Inline(Vec<Vec<Button>>),
    /// The persistent main-menu keyboard. Sent on scene exit.
    MainMenu,
}

impl Keyboard {
    /// Button labels of the main menu, two per row.
    pub fn main_menu_rows() -> Vec<Vec<&'static str>> {
        let labels: Vec<&'static str> = MenuCommand::ALL
            .iter()
            .filter_map(MenuCommand::label)
            .collect();
        labels.chunks(2).map(|row| row.to_vec()).collect()
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        let rows: &[Vec<Button>] = match self {
            Self::Inline(rows) => rows,
            _ => &[],
        };
        rows.iter().flatten()
    }
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Keyboard,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::None,
        }
    }

    pub fn inline(text: impl Into<String>, rows: Vec<Vec<Button>>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::Inline(rows),
        }
    }

    pub fn main_menu(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::MainMenu,
        }
    }

    /// Find a button by callback action.
    pub fn button(&self, action: &Selection) -> Option<&Button> {
        self.keyboard.buttons().find(|b| &b.action == action)
    }
}

/// `500 ₽` for a fixed price, `500-1000 ₽` for a range.
pub fn format_price(min: Decimal, max: Decimal) -> String {
    let (min, max) = (min.normalize(), max.normalize());
    if min == max {
        format!("{min} ₽")
    } else {
        format!("{min}-{max} ₽")
    }
}

/// `22.01.2026`
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// `Thu 22.01`
pub fn date_button_label(date: NaiveDate) -> String {
    date.format("%a %d.%m").to_string()
}

/// Parse a slot datetime and shift it into the salon's offset.
pub fn local_datetime(iso: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(iso)
        .ok()
        .map(|dt| dt.with_timezone(&offset))
}
