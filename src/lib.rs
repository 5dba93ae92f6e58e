//! kiln_control
//! Two-core kiln temperature controller: a hard-real-time control core (PID,
//! gain schedule, firing profiles with rate adaptation, auto-tuning, safety)
//! and a supervisory core (commands, status, run log), joined by bounded queues.

pub mod config;
pub mod control_core;
pub mod error;
pub mod link;
pub mod sim;
pub mod supervisor_core;
pub mod utils;

pub use config::KilnConfig;
pub use error::{KilnError, Result};
