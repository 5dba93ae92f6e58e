//! hardware.rs
//! Seams between the control core and the physical kiln.
//!
//! The control core owns exactly one `ControlHardware`; it is not `Clone`, so no
//! other thread can drive the relay.

use log::warn;

use crate::error::Result;

/// Thermocouple front end. Errors are reported as `SensorFault`.
pub trait TemperatureSensor: Send {
    fn read_celsius(&mut self) -> Result<f64>;
}

/// Solid-state relay driving the heating elements.
pub trait HeatingOutput: Send {
    fn set(&mut self, on: bool);
    fn is_on(&self) -> bool;
}

pub struct ControlHardware<S, H> {
    sensor: S,
    heater: H,
    switch_count: u64,
}

impl<S: TemperatureSensor, H: HeatingOutput> ControlHardware<S, H> {
    pub fn new(sensor: S, mut heater: H) -> Self {
        heater.set(false);
        Self {
            sensor,
            heater,
            switch_count: 0,
        }
    }

    pub fn read_temperature(&mut self) -> Result<f64> {
        self.sensor.read_celsius()
    }

    #[inline]
    pub fn set_output(&mut self, on: bool) {
        if self.heater.is_on() != on {
            self.switch_count += 1;
            self.heater.set(on);
        }
    }

    pub fn force_off(&mut self) {
        if self.heater.is_on() {
            warn!("[Hardware] heating output forced off");
        }
        self.set_output(false);
    }

    pub fn is_on(&self) -> bool {
        self.heater.is_on()
    }

    pub fn switch_count(&self) -> u64 {
        self.switch_count
    }

    pub fn into_parts(self) -> (S, H) {
        (self.sensor, self.heater)
    }
}
