
// Control core: the hard-real-time side.
// Runs the 1 Hz control tick (PID, gain schedule, profile, auto-tune, safety)
// and drives the relay at 10 Hz. Owns the hardware exclusively.
pub mod pid;
pub mod gain_scheduler;
pub mod rate_monitor;
pub mod adaptive;
pub mod profile;
pub mod profile_runner;
pub mod safety;
pub mod scheduler;
pub mod tuner;
pub mod thermal_fit;
pub mod recovery;
pub mod controller;
pub mod ssr;
pub mod hardware;
pub mod control_loop;
