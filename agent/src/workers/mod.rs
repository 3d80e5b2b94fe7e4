//! Background workers

pub mod dispatch;
pub mod health;
pub mod heartbeat;
pub mod mqtt;
