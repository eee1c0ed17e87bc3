pub mod availability;
pub mod booking;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod limits;
pub mod mail;
pub mod model;
pub mod observability;
pub mod service;
pub mod store;
pub mod wal;

pub use error::{BookingError, Entity};
pub use service::Bookings;
