// Simulated plant standing in for the thermocouple and the SSR.
pub mod kiln;

pub use kiln::{KilnModel, SimHeater, SimSensor, SimulatedKiln};
