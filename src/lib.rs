//! followmail — tracks sent emails and sends follow-up reminders when no
//! reply arrives within a configured delay.

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod mail;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod template;
