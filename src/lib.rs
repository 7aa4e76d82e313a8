//! Review slot guard: a Telegram bot that keeps a reviewer's calendar
//! honest.
//!
//! A periodic reconciler pulls calendar bookings from the school platform
//! and walks each one through a small state machine: whitelisted projects
//! are silently shifted a few minutes earlier, unknown projects trigger an
//! approve/decline prompt, everything else is cancelled after a grace
//! delay. A webhook dispatcher delivers commands and button presses.

pub mod bot;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod timeutil;

pub use config::AppConfig;
pub use error::AppError;
pub use services::reconciler::Services;
