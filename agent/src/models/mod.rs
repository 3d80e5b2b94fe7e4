//! Data models

pub mod command;
pub mod health;
pub mod record;
pub mod status;
