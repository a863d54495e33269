//! Booking conversation state: stages, per-conversation session data and
//! the in-memory session store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::booking::event::Selection;
use crate::provider::{ServiceOffering, StaffMember, TimeSlot};
use crate::store::User;

/// Contact field being collected from free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactField {
    Phone,
    Email,
}

/// The stages of the booking conversation.
///
/// Progresses ServiceSelection → StaffSelection → DateSelection →
/// TimeSelection → [ContactCollection]* → Confirmation, with explicit back
/// edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStage {
    ServiceSelection,
    StaffSelection,
    DateSelection,
    TimeSelection,
    ContactCollection(ContactField),
    Confirmation,
}

impl BookingStage {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: BookingStage) -> bool {
        use BookingStage::*;
        use ContactField::*;
        matches!(
            (self, target),
            // forward
            (ServiceSelection, StaffSelection)
                | (StaffSelection, DateSelection)
                | (DateSelection, TimeSelection)
                | (TimeSelection, ContactCollection(_))
                | (TimeSelection, Confirmation)
                | (ContactCollection(Phone), ContactCollection(Email))
                | (ContactCollection(_), Confirmation)
                // back
                | (StaffSelection, ServiceSelection)
                | (DateSelection, StaffSelection)
                | (TimeSelection, DateSelection)
                | (Confirmation, TimeSelection)
                // re-render after an empty slot list
                | (DateSelection, DateSelection)
        )
    }

    /// Whether `selection` is meaningful at this stage.
    ///
    /// Buttons left over from earlier messages are rejected here.
    pub fn accepts(&self, selection: &Selection) -> bool {
        use BookingStage::*;
        match selection {
            Selection::Cancel => true,
            Selection::Service(_) => *self == ServiceSelection,
            Selection::Staff(_) | Selection::BackToServices => *self == StaffSelection,
            Selection::Date(_) | Selection::BackToStaff => *self == DateSelection,
            Selection::Time(_) => *self == TimeSelection,
            Selection::BackToDates => matches!(self, DateSelection | TimeSelection),
            Selection::Confirm | Selection::BackToTimes => *self == Confirmation,
        }
    }

    pub fn contact_field(&self) -> Option<ContactField> {
        match self {
            Self::ContactCollection(field) => Some(*field),
            _ => None,
        }
    }
}

impl Default for BookingStage {
    fn default() -> Self {
        Self::ServiceSelection
    }
}

impl std::fmt::Display for BookingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ServiceSelection => "service_selection",
            Self::StaffSelection => "staff_selection",
            Self::DateSelection => "date_selection",
            Self::TimeSelection => "time_selection",
            Self::ContactCollection(ContactField::Phone) => "contact_collection(phone)",
            Self::ContactCollection(ContactField::Email) => "contact_collection(email)",
            Self::Confirmation => "confirmation",
        };
        write!(f, "{s}")
    }
}

/// Data accumulated by one booking conversation.
///
/// The awaiting-input flags are derived from the stage, so at most one of
/// them is ever set.
#[derive(Debug, Clone, Default)]
pub struct BookingSessionState {
    pub selected_service_id: Option<i64>,
    /// `None` with a stage past StaffSelection means any staff member.
    pub selected_staff_id: Option<i64>,
    pub selected_date: Option<NaiveDate>,
    pub selected_datetime: Option<String>,
    pub pending_phone: Option<String>,
    pub pending_email: Option<String>,
    pub cached_services: Option<Vec<ServiceOffering>>,
    pub cached_staff: Option<Vec<StaffMember>>,
    /// Slots shown for the selected date, used to validate a time pick.
    pub offered_slots: Vec<TimeSlot>,
    stage: BookingStage,
}

impl BookingSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> BookingStage {
        self.stage
    }

    /// Move to `target` if the stage graph allows it.
    pub fn advance(&mut self, target: BookingStage) -> bool {
        if !self.stage.can_transition_to(target) {
            return false;
        }
        debug!(from = %self.stage, to = %target, "Booking stage transition");
        self.stage = target;
        true
    }

    pub fn awaiting_phone_input(&self) -> bool {
        self.stage == BookingStage::ContactCollection(ContactField::Phone)
    }

    pub fn awaiting_email_input(&self) -> bool {
        self.stage == BookingStage::ContactCollection(ContactField::Email)
    }

    pub fn selected_service(&self) -> Option<&ServiceOffering> {
        let id = self.selected_service_id?;
        self.cached_services.as_ref()?.iter().find(|s| s.id == id)
    }

    pub fn selected_staff(&self) -> Option<&StaffMember> {
        let id = self.selected_staff_id?;
        self.cached_staff.as_ref()?.iter().find(|s| s.id == id)
    }

    /// Drop the staff choice and everything chosen after it.
    pub fn clear_staff_onward(&mut self) {
        self.selected_staff_id = None;
        self.clear_date_onward();
    }

    /// Drop the date choice and everything chosen after it.
    pub fn clear_date_onward(&mut self) {
        self.selected_date = None;
        self.clear_time();
    }

    pub fn clear_time(&mut self) {
        self.selected_datetime = None;
        self.offered_slots.clear();
    }

    /// Overlay contact values collected in this session onto `user`.
    pub fn apply_contact(&self, user: &mut User) {
        if let Some(phone) = &self.pending_phone {
            user.phone = Some(phone.clone());
        }
        if let Some(email) = &self.pending_email {
            user.email = Some(email.clone());
        }
    }
}

/// Identifies one conversation across transports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub channel: String,
    pub chat_id: String,
}

impl ConversationKey {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.channel, self.chat_id)
    }
}

struct SessionEntry {
    state: BookingSessionState,
    last_seen: Instant,
}

/// Live booking sessions, one per conversation.
pub struct SessionStore {
    sessions: RwLock<HashMap<ConversationKey, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Remove and return the session of a conversation.
    ///
    /// The caller owns the state for the turn and saves it back if the
    /// scene is still active.
    pub async fn take(&self, key: &ConversationKey) -> Option<BookingSessionState> {
        self.sessions.write().await.remove(key).map(|e| e.state)
    }

    pub async fn save(&self, key: ConversationKey, state: BookingSessionState) {
        self.sessions.write().await.insert(
            key,
            SessionEntry {
                state,
                last_seen: Instant::now(),
            },
        );
    }

    /// Drop a session. Returns whether one existed.
    pub async fn discard(&self, key: &ConversationKey) -> bool {
        self.sessions.write().await.remove(key).is_some()
    }

    pub async fn contains(&self, key: &ConversationKey) -> bool {
        self.sessions.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for longer than `ttl`. Returns how many were dropped.
    pub async fn prune_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_seen.elapsed() <= ttl);
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(pruned, "Expired idle booking sessions");
        }
        pruned
    }
}

/// Periodically drop idle sessions.
pub fn spawn_expiry_task(
    store: Arc<SessionStore>,
    ttl: Duration,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            store.prune_idle(ttl).await;
        }
    })
}
