//! error.rs
//! Fault taxonomy shared by the control core and the supervisory core.
//!
//! Control-core faults fall in two groups:
//! - **Retryable:** a sensor glitch or a saturated command queue. Handled in place.
//! - **Fatal:** safety ceiling, rising temperature while cooling, exhausted rate adaptation.
//!   The heating output is forced off and the controller enters `Error`.
//!
//! Persistence errors (`Io`, `Csv`) only ever occur on the supervisory core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KilnError {
    /// Temperature read failed (open thermocouple, bus glitch). Retried up to a bounded count.
    #[error("sensor fault: {0}")]
    SensorFault(String),

    /// Temperature above the ceiling, or rising while the heating output is off.
    #[error("safety limit exceeded: {0}")]
    SafetyLimitExceeded(String),

    /// The kiln cannot reach the minimum acceptable ramp rate.
    #[error(
        "rate adaptation exhausted: measured {measured:.1}°C/h, adapted {proposed:.1}°C/h below required {required:.1}°C/h (step elapsed {elapsed_s:.0}s)"
    )]
    AdaptationExhausted {
        measured: f64,
        proposed: f64,
        required: f64,
        elapsed_s: f64,
    },

    /// Malformed profile, gain table or configuration. Rejected at load.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Command queue saturated; the caller may retry.
    #[error("command channel full, retry later")]
    ChannelFull,

    /// The other side of a cross-core queue is gone.
    #[error("cross-core channel closed")]
    ChannelClosed,

    /// Plant did not respond within the tuning phase budget.
    #[error("tuning timeout: {0}")]
    TuningTimeout(String),

    #[error("schedule rejected: {0}")]
    ScheduleRejected(String),

    /// Command not valid in the controller's current state.
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// Thermal model could not be fitted from the recorded response.
    #[error("insufficient tuning data: {0}")]
    InsufficientData(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl KilnError {
    /// Faults the caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KilnError::ChannelFull | KilnError::SensorFault(_))
    }

    /// Faults that end the current run and force the heating output off.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KilnError::SafetyLimitExceeded(_) | KilnError::AdaptationExhausted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, KilnError>;
