//! Unit test suite

mod stubs;
mod test_fsm;
mod test_health;
mod test_orchestrator;
