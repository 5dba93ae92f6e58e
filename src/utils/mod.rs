// Utilities shared by both cores: time sources and the persisted run log.
pub mod clock;
pub mod run_log;
