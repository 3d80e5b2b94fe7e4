//! Application wiring

pub mod diagnostic;
pub mod options;
pub mod run;
pub mod state;
