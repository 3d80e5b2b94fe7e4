//! Component health tracking

pub mod table;
pub mod tracker;
