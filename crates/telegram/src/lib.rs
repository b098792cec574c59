//! Telegram transport for antares.
//!
//! Implements the framework's `Transport` on top of teloxide and feeds
//! long-polled updates into a `Dispatcher`.

pub mod bot;
pub mod convert;
pub mod error;
pub mod transport;

pub use {
    bot::start_polling,
    error::{Error, Result},
    transport::TelegramTransport,
};
