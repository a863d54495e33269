//! Chat front end: update dispatch and the main menu.

pub mod dispatcher;
pub mod menu;

pub use dispatcher::{Dispatcher, UpdateHandler};
pub use menu::MenuHandler;
