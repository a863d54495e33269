//! Booking core: the orchestrator and the conversation that drives it.

pub mod contact;
pub mod event;
pub mod render;
pub mod scene;
pub mod service;
pub mod session;

pub use event::{InboundEvent, MenuCommand, Selection, StaffChoice};
pub use render::{Button, Keyboard, Reply};
pub use scene::{BookingScene, SceneOutcome, SceneTurn};
pub use service::BookingService;
pub use session::{
    BookingSessionState, BookingStage, ContactField, ConversationKey, SessionStore,
    spawn_expiry_task,
};

/// Number of consecutive days, starting today, offered for booking.
pub const DATE_WINDOW_DAYS: i64 = 7;
