//! Edge deployment agent library
//!
//! Core modules for the MQTT-driven edge orchestration agent.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod logs;
pub mod models;
pub mod mqtt;
pub mod orchestrator;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
