//! Backend adapters and the deployment record state machine

pub mod adapter;
pub mod cluster;
pub mod docker;
pub mod fsm;
