//! Circular (sinusoidal logistic) response model
//!
//! The activation for one of two mutually exclusive responses is a logistic
//! function of a sinusoid in stimulus angle:
//!
//! ```text
//! z(theta) = 1 / (1 + exp(-(b0 + b2 * sin(theta + b1))))
//! ```
//!
//! with `b0` the vertical offset (response bias), `b1` the horizontal offset
//! (preferred angle, degrees) and `b2` the amplitude (spatial modulation). The
//! competing response has activation `1 - z`, and a softmax with inverse
//! temperature ("coldness") turns the pair into response probabilities.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::CfError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircularParams {
    pub vertical_offset: f64,
    /// Degrees
    pub horizontal_offset: f64,
    pub amplitude: f64,
    /// Softmax coldness; not used by [`activation`]
    pub inverse_temperature: f64,
}

impl Default for CircularParams {
    fn default() -> Self {
        Self {
            vertical_offset: 0.5,
            horizontal_offset: 0.0,
            amplitude: 0.3,
            inverse_temperature: 2.0,
        }
    }
}

impl CircularParams {
    pub fn new(
        vertical_offset: f64,
        horizontal_offset: f64,
        amplitude: f64,
        inverse_temperature: f64,
    ) -> Self {
        Self {
            vertical_offset,
            horizontal_offset,
            amplitude,
            inverse_temperature,
        }
    }

    pub fn validate(&self) -> Result<(), CfError> {
        if !self.vertical_offset.is_finite() || !self.horizontal_offset.is_finite() {
            return Err(CfError::InvalidConfig(
                "model offsets must be finite".to_string(),
            ));
        }
        if !self.amplitude.is_finite() || self.amplitude < 0.0 {
            return Err(CfError::InvalidConfig(
                "model amplitude must be finite and >= 0".to_string(),
            ));
        }
        if !self.inverse_temperature.is_finite() || self.inverse_temperature <= 0.0 {
            return Err(CfError::InvalidConfig(
                "model inverse_temperature must be finite and > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn label(&self) -> String {
        format!(
            "b0={} b1={} b2={} beta={}",
            self.vertical_offset, self.horizontal_offset, self.amplitude, self.inverse_temperature
        )
    }
}

/// Example observers: two sinusoids with different preferred angles, and the
/// first again at a much lower inverse temperature.
pub fn sample_models() -> [CircularParams; 3] {
    [
        CircularParams::new(0.6, -60.0, 0.5, 3.0),
        CircularParams::new(0.7, 90.0, 0.25, 3.0),
        CircularParams::new(0.6, -60.0, 0.5, 0.5),
    ]
}

fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Activation of the modelled response at `theta_degrees`.
pub fn activation(theta_degrees: f64, params: &CircularParams) -> f64 {
    let exponent = params.vertical_offset
        + params.amplitude
            * (theta_degrees.to_radians() + params.horizontal_offset.to_radians()).sin();
    logistic(exponent)
}

/// Activation of the competing response (two-alternative forced choice).
pub fn complementary_activation(theta_degrees: f64, params: &CircularParams) -> f64 {
    1.0 - activation(theta_degrees, params)
}

/// Two-way softmax with max subtraction.
///
/// Zero inverse temperature gives (0.5, 0.5); an infinite one gives a hard
/// argmax, with ties split evenly.
pub fn softmax_probability(activation_pair: [f64; 2], inverse_temperature: f64) -> [f64; 2] {
    let [z0, z1] = activation_pair;

    if inverse_temperature.is_infinite() {
        let sign = inverse_temperature.signum();
        let (a, b) = (sign * z0, sign * z1);
        return if a > b {
            [1.0, 0.0]
        } else if b > a {
            [0.0, 1.0]
        } else {
            [0.5, 0.5]
        };
    }

    let s0 = inverse_temperature * z0;
    let s1 = inverse_temperature * z1;
    let m = s0.max(s1);
    let e0 = (s0 - m).exp();
    let e1 = (s1 - m).exp();
    let total = e0 + e1;
    [e0 / total, e1 / total]
}

/// Probability of choosing the modelled response at `theta_degrees`.
pub fn response_probability(theta_degrees: f64, params: &CircularParams) -> f64 {
    let z = activation(theta_degrees, params);
    softmax_probability([z, 1.0 - z], params.inverse_temperature)[0]
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub theta: f64,
    pub activation: f64,
    pub p_response: f64,
}

pub fn response_curve(params: &CircularParams, angles: &[f64]) -> Vec<CurvePoint> {
    angles
        .iter()
        .map(|&theta| {
            let z = activation(theta, params);
            CurvePoint {
                theta,
                activation: z,
                p_response: softmax_probability([z, 1.0 - z], params.inverse_temperature)[0],
            }
        })
        .collect()
}

/// Whole-degree angles from -180 up to and including `last`.
pub fn degree_grid(last: i32) -> Vec<f64> {
    (-180..=last).map(f64::from).collect()
}

/// Observed responses at one stimulus angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitObservation {
    pub theta: f64,
    pub n_response: u64,
    pub n_trial: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitGrid {
    pub vertical_offsets: Vec<f64>,
    pub horizontal_offsets: Vec<f64>,
    pub amplitudes: Vec<f64>,
}

fn linspace_step(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let count = ((stop - start) / step).round() as usize;
    (0..=count).map(|i| start + step * i as f64).collect()
}

impl Default for FitGrid {
    fn default() -> Self {
        Self {
            vertical_offsets: linspace_step(-3.0, 3.0, 0.25),
            horizontal_offsets: linspace_step(-180.0, 175.0, 5.0),
            amplitudes: linspace_step(0.0, 10.0, 0.25),
        }
    }
}

impl FitGrid {
    pub fn validate(&self) -> Result<(), CfError> {
        if self.vertical_offsets.is_empty()
            || self.horizontal_offsets.is_empty()
            || self.amplitudes.is_empty()
        {
            return Err(CfError::InvalidConfig(
                "fit grid axes must be non-empty".to_string(),
            ));
        }
        if self.amplitudes.iter().any(|&a| a < 0.0 || !a.is_finite()) {
            return Err(CfError::InvalidConfig(
                "fit grid amplitudes must be finite and >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitResult {
    pub params: CircularParams,
    pub log_likelihood: f64,
}

fn binomial_log_likelihood(observations: &[FitObservation], params: &CircularParams) -> f64 {
    const EPS: f64 = 1e-12;
    observations
        .iter()
        .map(|obs| {
            let p = response_probability(obs.theta, params).clamp(EPS, 1.0 - EPS);
            let k = obs.n_response as f64;
            let n = obs.n_trial as f64;
            k * p.ln() + (n - k) * (1.0 - p).ln()
        })
        .sum()
}

/// Grid-search maximum likelihood fit of the response probability.
///
/// Responses are scored through the softmax choice rule with
/// `inverse_temperature` held fixed. Ties keep the first grid point in
/// (vertical, horizontal, amplitude) order.
pub fn fit_response(
    observations: &[FitObservation],
    grid: &FitGrid,
    inverse_temperature: f64,
) -> Result<FitResult, CfError> {
    grid.validate()?;
    if observations.iter().all(|o| o.n_trial == 0) {
        return Err(CfError::EmptyInput(
            "no trials to fit the circular model to".to_string(),
        ));
    }

    let best = grid
        .vertical_offsets
        .par_iter()
        .map(|&vertical_offset| {
            let mut best: Option<FitResult> = None;
            for &horizontal_offset in &grid.horizontal_offsets {
                for &amplitude in &grid.amplitudes {
                    let params = CircularParams::new(
                        vertical_offset,
                        horizontal_offset,
                        amplitude,
                        inverse_temperature,
                    );
                    let log_likelihood = binomial_log_likelihood(observations, &params);
                    if best.map_or(true, |b| log_likelihood > b.log_likelihood) {
                        best = Some(FitResult {
                            params,
                            log_likelihood,
                        });
                    }
                }
            }
            best
        })
        .reduce(
            || None,
            |left, right| match (left, right) {
                (Some(l), Some(r)) => {
                    if r.log_likelihood > l.log_likelihood {
                        Some(r)
                    } else {
                        Some(l)
                    }
                }
                (l, None) => l,
                (None, r) => r,
            },
        );

    best.ok_or_else(|| CfError::EmptyInput("empty fit grid".to_string()))
}
