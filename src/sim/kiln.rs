//! kiln.rs
//! Simulated kiln: heating element, thermal mass, losses to ambient, noisy thermocouple.
//!
//! The plant integrates lazily: every sensor read and every relay switch first
//! advances the physics to the clock's current logical time, so the on-time of
//! each SSR slot is accounted exactly.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::control_core::hardware::{HeatingOutput, TemperatureSensor};
use crate::error::{KilnError, Result};
use crate::utils::clock::Clock;

/// Largest integration step, seconds.
const MAX_STEP_S: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnModel {
    pub ambient_temp: f64,
    /// First-order lag of the element's heat output
    pub element_lag_s: f64,
    /// Heating rate at full power with no losses, °C/h
    pub max_rise_per_hour: f64,
    /// Linear loss coefficient, 1/s
    pub loss_coeff: f64,
    /// Extra loss growth per °C above ambient (radiation, roughly)
    pub radiative_coeff: f64,
    /// Thermocouple noise amplitude, ± °C
    pub noise: f64,
}

impl Default for KilnModel {
    fn default() -> Self {
        Self {
            ambient_temp: 25.0,
            element_lag_s: 60.0,
            max_rise_per_hour: 600.0,
            loss_coeff: 6e-5,
            radiative_coeff: 3e-4,
            noise: 0.2,
        }
    }
}

#[derive(Debug)]
struct Plant {
    model: KilnModel,
    temp: f64,
    element: f64,
    heater_on: bool,
    power_derate: f64,
    last_update: Option<f64>,
    fail_reads: u32,
    rng: StdRng,
}

impl Plant {
    fn advance(&mut self, now: f64) {
        let Some(last) = self.last_update else {
            self.last_update = Some(now);
            return;
        };
        let mut remaining = now - last;
        if remaining <= 0.0 {
            return;
        }
        self.last_update = Some(now);

        let drive = if self.heater_on { 1.0 } else { 0.0 };
        let rise_per_s = self.model.max_rise_per_hour / 3_600.0 * self.power_derate;
        while remaining > 0.0 {
            let h = remaining.min(MAX_STEP_S);
            self.element += (drive - self.element) * (h / self.model.element_lag_s).min(1.0);
            let delta = self.temp - self.model.ambient_temp;
            let loss = self.model.loss_coeff * delta * (1.0 + self.model.radiative_coeff * delta.max(0.0));
            self.temp += (rise_per_s * self.element - loss) * h;
            remaining -= h;
        }
    }
}

/// Shared plant handle; cheap to clone.
#[derive(Clone)]
pub struct SimulatedKiln<C> {
    plant: Arc<Mutex<Plant>>,
    clock: C,
}

impl<C: Clock + Clone> SimulatedKiln<C> {
    pub fn new(model: KilnModel, clock: C, seed: u64) -> Self {
        let plant = Plant {
            temp: model.ambient_temp,
            element: 0.0,
            heater_on: false,
            power_derate: 1.0,
            last_update: None,
            fail_reads: 0,
            rng: StdRng::seed_from_u64(seed),
            model,
        };
        Self {
            plant: Arc::new(Mutex::new(plant)),
            clock,
        }
    }

    pub fn sensor(&self) -> SimSensor<C> {
        SimSensor { kiln: self.clone() }
    }

    pub fn heater(&self) -> SimHeater<C> {
        SimHeater {
            kiln: self.clone(),
            on: false,
        }
    }

    /// True chamber temperature, without noise.
    pub fn temperature(&self) -> f64 {
        let mut plant = self.plant.lock();
        plant.advance(self.clock.now());
        plant.temp
    }

    pub fn set_temperature(&self, temp: f64) {
        let mut plant = self.plant.lock();
        plant.advance(self.clock.now());
        plant.temp = temp;
    }

    /// Scale the element's heating power, e.g. 0.5 for a failing element.
    pub fn set_power_derate(&self, derate: f64) {
        let mut plant = self.plant.lock();
        plant.advance(self.clock.now());
        plant.power_derate = derate.clamp(0.0, 2.0);
    }

    /// The next `count` thermocouple reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.plant.lock().fail_reads = count;
    }

    pub fn is_heating(&self) -> bool {
        self.plant.lock().heater_on
    }

    fn set_heater(&self, on: bool) {
        let mut plant = self.plant.lock();
        plant.advance(self.clock.now());
        plant.heater_on = on;
    }

    fn read(&self) -> Result<f64> {
        let mut plant = self.plant.lock();
        plant.advance(self.clock.now());
        if plant.fail_reads > 0 {
            plant.fail_reads -= 1;
            return Err(KilnError::SensorFault("simulated open thermocouple".into()));
        }
        let noise = plant.model.noise;
        let jitter = if noise > 0.0 { plant.rng.random_range(-noise..=noise) } else { 0.0 };
        Ok(plant.temp + jitter)
    }
}

pub struct SimSensor<C> {
    kiln: SimulatedKiln<C>,
}

impl<C: Clock + Clone> TemperatureSensor for SimSensor<C> {
    fn read_celsius(&mut self) -> Result<f64> {
        self.kiln.read()
    }
}

pub struct SimHeater<C> {
    kiln: SimulatedKiln<C>,
    on: bool,
}

impl<C: Clock + Clone> HeatingOutput for SimHeater<C> {
    fn set(&mut self, on: bool) {
        self.on = on;
        self.kiln.set_heater(on);
    }

    fn is_on(&self) -> bool {
        self.on
    }
}
