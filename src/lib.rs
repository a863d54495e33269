//! Booking Assist — conversational appointment booking on top of YClients.

pub mod booking;
pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod provider;
pub mod routes;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
