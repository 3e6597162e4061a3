//! Bounded exponential-decay fitting
//!
//! Fits `HR(t) = b + (peak - b) * exp(-t / tau)` over one window of samples,
//! with `t` measured from the adjusted onset and `tau` constrained to a
//! plausible physiological range. The solver sits behind [`DecaySolver`] so
//! detection and gating never touch optimizer internals; the default
//! backend delegates to Levenberg-Marquardt least squares rather than a
//! hand-rolled iteration.
//!
//! The bound on `tau` is enforced by a logistic reparameterization: the
//! optimizer works on an unconstrained parameter that maps into
//! `[tau_min, tau_max]`, so every iterate stays inside the range.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{Const, DVector, Dyn, OMatrix, Vector2, U2};

/// Allowed range for the decay time constant, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TauBounds {
    pub min: f64,
    pub max: f64,
}

/// Outcome of one window fit.
///
/// `converged` is false on numerical failure; callers record the window as
/// unavailable and leave the interval otherwise untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayFit {
    /// Time constant in seconds, inside the configured bounds
    pub tau: f64,

    /// Fitted asymptotic heart rate
    pub baseline: f64,

    /// Coefficient of determination against the window's samples
    pub r_squared: f64,

    /// Whether the optimizer reported success with finite parameters
    pub converged: bool,
}

impl DecayFit {
    fn failed() -> Self {
        DecayFit {
            tau: f64::NAN,
            baseline: f64::NAN,
            r_squared: 0.0,
            converged: false,
        }
    }
}

/// Fit exponential decay over one window of `(time, heart_rate)` samples.
///
/// Implementations must be deterministic: identical inputs produce
/// identical fits.
pub trait DecaySolver: Send + Sync {
    fn fit(&self, times: &[f64], heart_rates: &[f64], peak_hr: f64, bounds: TauBounds) -> DecayFit;
}

/// Default solver backed by the `levenberg-marquardt` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LmDecaySolver;

impl DecaySolver for LmDecaySolver {
    fn fit(&self, times: &[f64], heart_rates: &[f64], peak_hr: f64, bounds: TauBounds) -> DecayFit {
        if times.len() < 3 || times.len() != heart_rates.len() || bounds.min >= bounds.max {
            return DecayFit::failed();
        }

        let lowest = heart_rates.iter().cloned().fold(f64::INFINITY, f64::min);
        let baseline_guess = lowest.min(peak_hr - 1.0);
        // Geometric mean keeps the initial tau well inside asymmetric bounds
        let tau_guess = (bounds.min * bounds.max).sqrt();

        let problem = DecayProblem {
            times: DVector::from_column_slice(times),
            observed: DVector::from_column_slice(heart_rates),
            peak_hr,
            tau_lo: bounds.min,
            tau_hi: bounds.max,
            params: Vector2::new(baseline_guess, inverse_logistic(tau_guess, bounds.min, bounds.max)),
        };

        let (solved, report) = LevenbergMarquardt::new().minimize(problem);
        let tau = solved.tau();
        let baseline = solved.params.x;

        if !report.termination.was_successful() || !tau.is_finite() || !baseline.is_finite() {
            return DecayFit::failed();
        }

        let r_squared = r_squared(&solved.times, &solved.observed, peak_hr, baseline, tau);
        if !r_squared.is_finite() {
            return DecayFit::failed();
        }

        DecayFit {
            tau,
            baseline,
            r_squared,
            converged: true,
        }
    }
}

/// Least-squares problem in (baseline, theta) space, where theta maps into
/// the tau bounds through a logistic curve.
struct DecayProblem {
    times: DVector<f64>,
    observed: DVector<f64>,
    peak_hr: f64,
    tau_lo: f64,
    tau_hi: f64,
    params: Vector2<f64>,
}

impl DecayProblem {
    fn tau(&self) -> f64 {
        logistic(self.params.y, self.tau_lo, self.tau_hi)
    }

    fn dtau_dtheta(&self) -> f64 {
        let s = sigmoid(self.params.y);
        (self.tau_hi - self.tau_lo) * s * (1.0 - s)
    }
}

impl LeastSquaresProblem<f64, Dyn, U2> for DecayProblem {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U2>;
    type ParameterStorage = Owned<f64, U2>;

    fn set_params(&mut self, params: &Vector2<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> Vector2<f64> {
        self.params
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let baseline = self.params.x;
        let tau = self.tau();
        let residuals = DVector::from_fn(self.times.len(), |i, _| {
            model(self.times[i], self.peak_hr, baseline, tau) - self.observed[i]
        });
        Some(residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U2>> {
        let baseline = self.params.x;
        let tau = self.tau();
        let dtau = self.dtau_dtheta();

        let jacobian = OMatrix::<f64, Dyn, U2>::from_fn_generic(
            Dyn(self.times.len()),
            Const::<2>,
            |i, column| {
                let t = self.times[i];
                let decay = (-t / tau).exp();
                if column == 0 {
                    // d/d_baseline of b + (peak - b) e^{-t/tau}
                    1.0 - decay
                } else {
                    // chain rule through the logistic tau mapping
                    (self.peak_hr - baseline) * decay * (t / (tau * tau)) * dtau
                }
            },
        );
        Some(jacobian)
    }
}

fn model(t: f64, peak_hr: f64, baseline: f64, tau: f64) -> f64 {
    baseline + (peak_hr - baseline) * (-t / tau).exp()
}

fn sigmoid(theta: f64) -> f64 {
    1.0 / (1.0 + (-theta).exp())
}

fn logistic(theta: f64, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * sigmoid(theta)
}

fn inverse_logistic(value: f64, lo: f64, hi: f64) -> f64 {
    let fraction = ((value - lo) / (hi - lo)).clamp(1e-6, 1.0 - 1e-6);
    (fraction / (1.0 - fraction)).ln()
}

fn r_squared(
    times: &DVector<f64>,
    observed: &DVector<f64>,
    peak_hr: f64,
    baseline: f64,
    tau: f64,
) -> f64 {
    let mean = observed.mean();
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for i in 0..times.len() {
        let predicted = model(times[i], peak_hr, baseline, tau);
        ss_res += (observed[i] - predicted).powi(2);
        ss_tot += (observed[i] - mean).powi(2);
    }

    if ss_tot <= f64::EPSILON {
        // A flat window carries no decay signal to explain
        return 0.0;
    }
    1.0 - ss_res / ss_tot
}
