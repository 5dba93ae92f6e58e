//! thermal_fit.rs
//! Thermal model fitting and PID parameter calculation from a tuning recording.
//!
//! Model: first order plus dead time (FOPDT) with
//! - `L` dead time [s], from the tangent at the point of steepest rise,
//! - `τ` time constant [s] and `K` steady-state gain [°C per % output],
//!   from the plateau when the first heating phase reached one, otherwise from a
//!   least-squares energy balance `τ·dT/dt = K·u(t − L) − (T − T_ambient)` over the
//!   whole session,
//! - `h` heat-loss coefficient, regressed from plateau phases (`1/K_eff` against
//!   `T − T_ambient`), or a conservative default.
//!
//! Derivatives are taken between consecutive fixed-width time buckets so the fit
//! does not depend on the recording rate.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::config::TuningConfig;
use crate::control_core::gain_scheduler::{GainScheduleConfig, Gains};
use crate::control_core::tuner::{PhaseKind, PhaseRecord, TuningMode, TuningSample};
use crate::error::{KilnError, Result};

/// Width of the averaging bucket used for slopes.
pub const DERIVATIVE_SPAN_S: f64 = 30.0;
const MIN_DEAD_TIME_S: f64 = DERIVATIVE_SPAN_S / 2.0;
const MIN_BUCKETS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitConfidence {
    Full,
    /// Heat-loss coefficient fell back to the default
    Reduced,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalModel {
    pub dead_time_s: f64,
    pub time_constant_s: f64,
    /// °C per % output
    pub gain: f64,
    pub heat_loss_h: f64,
    pub ambient_temp: f64,
    pub confidence: FitConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningMethod {
    ZieglerNichols,
    CohenCoon,
    Amigo,
    Lambda,
}

impl TuningMethod {
    pub const ALL: [TuningMethod; 4] = [
        TuningMethod::ZieglerNichols,
        TuningMethod::CohenCoon,
        TuningMethod::Amigo,
        TuningMethod::Lambda,
    ];

    /// Closed-form PID gains for a FOPDT model (parallel form, `Ki = Kp/Ti`, `Kd = Kp·Td`).
    pub fn gains(self, model: &ThermalModel) -> Gains {
        let l = model.dead_time_s;
        let tau = model.time_constant_s;
        let k = model.gain;

        let (kp, ti, td) = match self {
            // Fastest response, most overshoot
            TuningMethod::ZieglerNichols => (1.2 * tau / (k * l), 2.0 * l, 0.5 * l),
            // Dead-time dominant plants
            TuningMethod::CohenCoon => {
                let r = l / tau;
                let kp = (tau / (k * l)) * (4.0 / 3.0 + r / 4.0);
                let ti = l * (32.0 + 6.0 * r) / (13.0 + 8.0 * r);
                let td = 4.0 * l / (11.0 + 2.0 * r);
                (kp, ti, td)
            }
            // Robust to model error: Ti is bounded by 8·L whatever τ is fitted
            TuningMethod::Amigo => {
                let kp = (0.2 + 0.45 * tau / l) / k;
                let ti = (0.4 * l + 0.8 * tau) / (l + 0.1 * tau) * l;
                let td = 0.5 * l * tau / (0.3 * l + tau);
                (kp, ti, td)
            }
            // PI only, closed-loop time constant λ = 1.5τ. Lowest Kp of the four,
            // but Ti = τ, so it trusts the fitted time constant completely
            TuningMethod::Lambda => {
                let lambda = 1.5 * tau;
                (tau / (k * (lambda + l)), tau, 0.0)
            }
        };

        Gains::new(kp, kp / ti, kp * td)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Excellent,
    Good,
    Poor,
}

impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            QualityGrade::Excellent
        } else if score >= 50.0 {
            QualityGrade::Good
        } else {
            QualityGrade::Poor
        }
    }

    /// Poor data always lands on AMIGO. The criterion is tolerance of a badly
    /// fitted τ, not the lowest Kp: Lambda has a lower Kp but sets `Ti = τ`.
    pub fn recommended_method(self) -> TuningMethod {
        match self {
            QualityGrade::Excellent => TuningMethod::CohenCoon,
            QualityGrade::Good => TuningMethod::Lambda,
            QualityGrade::Poor => TuningMethod::Amigo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestQuality {
    /// 0–100
    pub score: f64,
    pub grade: QualityGrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodGains {
    pub method: TuningMethod,
    pub gains: Gains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningResult {
    pub mode: TuningMode,
    pub model: ThermalModel,
    pub quality: TestQuality,
    pub candidates: Vec<MethodGains>,
    pub recommended_method: TuningMethod,
    pub recommended: Gains,
    pub suggested_schedule: GainScheduleConfig,
    pub sample_count: usize,
    pub duration_s: f64,
}

impl TuningResult {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| KilnError::ConfigInvalid(e.to_string()))
    }

    pub fn candidate(&self, method: TuningMethod) -> Option<Gains> {
        self.candidates.iter().find(|c| c.method == method).map(|c| c.gains)
    }
}

/// Fit the model, score the recording and compute every candidate parameter set.
pub fn analyze(
    mode: TuningMode,
    samples: &[TuningSample],
    phases: &[PhaseRecord],
    ambient_temp: f64,
    config: &TuningConfig,
) -> Result<TuningResult> {
    let (dead_time_s, time_constant_s, gain) = fit_fopdt(samples, phases, ambient_temp)?;

    let (heat_loss_h, confidence) = match fit_heat_loss(phases, ambient_temp) {
        Some(h) => (h, FitConfidence::Full),
        None => {
            warn!(
                "[ThermalFit] fewer than two plateaus; using default h = {}",
                config.default_heat_loss_h
            );
            (config.default_heat_loss_h, FitConfidence::Reduced)
        }
    };

    let model = ThermalModel {
        dead_time_s,
        time_constant_s,
        gain,
        heat_loss_h,
        ambient_temp,
        confidence,
    };
    let quality = score_quality(samples, phases, &model);

    let candidates: Vec<MethodGains> = TuningMethod::ALL
        .iter()
        .map(|&method| MethodGains { method, gains: method.gains(&model) })
        .collect();
    let recommended_method = quality.grade.recommended_method();
    let recommended = recommended_method.gains(&model);

    let duration_s = match (samples.first(), samples.last()) {
        (Some(a), Some(b)) => b.elapsed - a.elapsed,
        _ => 0.0,
    };

    Ok(TuningResult {
        mode,
        model,
        quality,
        candidates,
        recommended_method,
        recommended,
        suggested_schedule: GainScheduleConfig::Continuous {
            h: heat_loss_h,
            ambient_temp,
        },
        sample_count: samples.len(),
        duration_s,
    })
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    t: f64,
    temp: f64,
}

#[derive(Debug, Clone, Copy)]
struct Slope {
    t: f64,
    temp: f64,
    rate: f64,
}

fn bucketize(samples: &[TuningSample]) -> Vec<Bucket> {
    let Some(first) = samples.first() else {
        return Vec::new();
    };
    let origin = first.elapsed;
    let index = |s: &TuningSample| ((s.elapsed - origin) / DERIVATIVE_SPAN_S).floor() as i64;

    samples
        .chunk_by(|a, b| index(a) == index(b))
        .map(|chunk| Bucket {
            t: chunk.iter().map(|s| s.elapsed).mean(),
            temp: chunk.iter().map(|s| s.temp).mean(),
        })
        .collect()
}

fn slopes(buckets: &[Bucket]) -> Vec<Slope> {
    buckets
        .windows(2)
        .filter(|w| w[1].t > w[0].t)
        .map(|w| Slope {
            t: (w[0].t + w[1].t) / 2.0,
            temp: (w[0].temp + w[1].temp) / 2.0,
            rate: (w[1].temp - w[0].temp) / (w[1].t - w[0].t),
        })
        .collect()
}

/// Output applied at `t`, zero before the recording starts.
fn output_at(samples: &[TuningSample], t: f64) -> f64 {
    match samples.partition_point(|s| s.elapsed <= t) {
        0 => 0.0,
        i => samples[i - 1].ssr_percent,
    }
}

/// Returns `(L, τ, K)` from the first heating phase.
pub fn fit_fopdt(samples: &[TuningSample], phases: &[PhaseRecord], ambient_temp: f64) -> Result<(f64, f64, f64)> {
    let heat = phases
        .iter()
        .find(|p| p.plan.kind == PhaseKind::Heat && p.plan.power > 0.0)
        .ok_or_else(|| KilnError::InsufficientData("no heating phase recorded".into()))?;

    let in_phase: Vec<TuningSample> = samples
        .iter()
        .filter(|s| s.elapsed >= heat.start_elapsed && s.elapsed <= heat.end_elapsed)
        .copied()
        .collect();
    let buckets = bucketize(&in_phase);
    if buckets.len() < MIN_BUCKETS {
        return Err(KilnError::InsufficientData(format!(
            "heating phase too short ({} samples)",
            in_phase.len()
        )));
    }

    // Tangent at the steepest point
    let steepest = slopes(&buckets)
        .into_iter()
        .fold(None::<Slope>, |best, s| match best {
            Some(b) if b.rate >= s.rate => Some(b),
            _ => Some(s),
        })
        .filter(|s| s.rate > 0.0)
        .ok_or_else(|| KilnError::InsufficientData("no temperature rise in heating phase".into()))?;

    let tangent_base = steepest.t - (steepest.temp - heat.start_temp) / steepest.rate;
    let dead_time = (tangent_base - heat.start_elapsed).max(MIN_DEAD_TIME_S);
    debug!(
        "[ThermalFit] steepest {:.4}°C/s at t={:.0}s, L={:.1}s",
        steepest.rate, steepest.t, dead_time
    );

    if let Some(plateau) = heat.plateau_temp {
        let rise = plateau - heat.start_temp;
        if rise > 0.0 {
            return Ok((dead_time, rise / steepest.rate, rise / heat.plan.power));
        }
    }

    let (tau, gain) = energy_balance(samples, ambient_temp, dead_time)?;
    Ok((dead_time, tau, gain))
}

/// Least squares for `dT/dt = a·u(t − L) − b·(T − T_ambient)`; `τ = 1/b`, `K = a/b`.
fn energy_balance(samples: &[TuningSample], ambient_temp: f64, dead_time: f64) -> Result<(f64, f64)> {
    let (mut s11, mut s12, mut s22, mut s1y, mut s2y) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for s in slopes(&bucketize(samples)) {
        let x1 = output_at(samples, s.t - dead_time);
        let x2 = s.temp - ambient_temp;
        s11 += x1 * x1;
        s12 += x1 * x2;
        s22 += x2 * x2;
        s1y += x1 * s.rate;
        s2y += x2 * s.rate;
    }

    let det = s11 * s22 - s12 * s12;
    if !(det.is_finite() && det.abs() > 1e-12) {
        return Err(KilnError::InsufficientData("response does not separate heating from losses".into()));
    }
    let a = (s1y * s22 - s12 * s2y) / det;
    let b = -(s11 * s2y - s12 * s1y) / det;
    if !(a > 0.0 && b > 0.0) {
        return Err(KilnError::InsufficientData(format!(
            "implausible energy balance (a={:.3e}, b={:.3e})",
            a, b
        )));
    }
    Ok((1.0 / b, a / b))
}

/// `h` from plateau phases: `1/K_eff = (1 + h·ΔT)/K₀` is linear in `ΔT = T − T_ambient`.
pub fn fit_heat_loss(phases: &[PhaseRecord], ambient_temp: f64) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = phases
        .iter()
        .filter(|p| p.plan.power > 0.0)
        .filter_map(|p| {
            let delta = p.plateau_temp? - ambient_temp;
            (delta > 1.0).then(|| (delta, p.plan.power / delta))
        })
        .unzip();

    if xs.len() < 2 {
        return None;
    }
    let var = xs.iter().variance();
    if !(var.is_finite() && var > 0.0) {
        return None;
    }
    let slope = xs.iter().covariance(ys.iter()) / var;
    let intercept = ys.iter().mean() - slope * xs.iter().mean();
    if intercept <= 0.0 {
        return None;
    }
    Some((slope / intercept).max(0.0))
}

/// Weighted score: samples 15, span 20, phases 15, heating phases 15, L/τ plausibility 20, duration 15.
pub fn score_quality(samples: &[TuningSample], phases: &[PhaseRecord], model: &ThermalModel) -> TestQuality {
    let n = samples.len() as f64;
    let (lo, hi) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(s.temp), hi.max(s.temp)));
    let span = if samples.is_empty() { 0.0 } else { hi - lo };
    let duration = match (samples.first(), samples.last()) {
        (Some(a), Some(b)) => b.elapsed - a.elapsed,
        _ => 0.0,
    };
    let heating_phases = phases.iter().filter(|p| p.plan.kind == PhaseKind::Heat).count() as f64;

    let ratio = model.dead_time_s / model.time_constant_s;
    let plausibility = if !(ratio.is_finite() && ratio > 0.0) {
        0.0
    } else if (0.005..=1.0).contains(&ratio) {
        20.0
    } else if ratio <= 3.0 {
        10.0
    } else {
        0.0
    };

    let score = (n / 1_800.0).min(1.0) * 15.0
        + (span / 50.0).min(1.0) * 20.0
        + (phases.len() as f64 / 3.0).min(1.0) * 15.0
        + (heating_phases / 2.0).min(1.0) * 15.0
        + plausibility
        + (duration / 3_600.0).min(1.0) * 15.0;

    TestQuality {
        score,
        grade: QualityGrade::from_score(score),
    }
}
