
// Supervisory core: the soft-real-time side.
// Accepts user commands, keeps the latest status, persists the run log.
// Talks to the control core only through the link queues.
pub mod client;
pub mod status_pump;

pub use client::{KilnClient, SharedStatus};
pub use status_pump::{PumpStats, StatusPump};
