//! ssr.rs
//! Time-proportional drive of the solid-state relay.
//!
//! A control tick is split into equal slots; `percent` of them are switched on,
//! front-loaded. The fractional slot left over is carried into the next tick so
//! that the long-run duty cycle matches the requested output exactly.

#[derive(Debug, Clone)]
pub struct TimeProportioner {
    slots: usize,
    on_slots: usize,
    cursor: usize,
    carry: f64,
}

impl TimeProportioner {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: slots.max(1),
            on_slots: 0,
            cursor: 0,
            carry: 0.0,
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Plan the coming tick. Returns the number of on-slots.
    pub fn begin_tick(&mut self, percent: f64) -> usize {
        let percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
        let exact = percent / 100.0 * self.slots as f64 + self.carry;
        let on = (exact.floor() as usize).min(self.slots);
        self.carry = if percent > 0.0 { (exact - on as f64).clamp(0.0, 1.0) } else { 0.0 };
        self.on_slots = on;
        self.cursor = 0;
        on
    }

    /// Relay state for the next slot of the current tick.
    #[inline]
    pub fn next_slot(&mut self) -> bool {
        let on = self.cursor < self.on_slots;
        self.cursor += 1;
        on
    }

    /// Drop the rest of the tick and any carried fraction.
    pub fn force_off(&mut self) {
        self.on_slots = 0;
        self.carry = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_duty_is_carried_across_ticks() {
        let mut ssr = TimeProportioner::new(10);
        let mut on = 0;
        for _ in 0..4 {
            ssr.begin_tick(25.0);
            on += (0..10).filter(|_| ssr.next_slot()).count();
        }
        assert_eq!(on, 10);
    }

    #[test]
    fn extremes_and_force_off() {
        let mut ssr = TimeProportioner::new(10);
        assert_eq!(ssr.begin_tick(100.0), 10);
        assert_eq!(ssr.begin_tick(150.0), 10);
        assert_eq!(ssr.begin_tick(f64::NAN), 0);
        assert_eq!(ssr.begin_tick(0.0), 0);

        ssr.begin_tick(55.0);
        assert!(ssr.next_slot());
        ssr.force_off();
        assert!(!ssr.next_slot());
        // No carry survives a forced stop
        assert_eq!(ssr.begin_tick(5.0), 0);
    }
}
