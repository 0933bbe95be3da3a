//! Bootstrap resampling of binary outcomes per condition
//!
//! Conditions are tested with very different numbers of trials. Every
//! condition is resampled with replacement at the same fixed sample size over
//! many iterations so that estimates are comparable across conditions. How the
//! per-iteration results are combined is left to an [`Aggregator`]: a rate
//! (mean and spread) for percent-correct curves, or raw response and trial
//! sums for joint response-probability surfaces that are later marginalised.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::stats::{mean, population_std, sample_variance};
use crate::subjects::Frame;
use crate::trials::Trial;
use crate::CfError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Trials drawn (with replacement) per iteration
    pub sample_size: usize,
    /// Number of resampling rounds
    pub iterations: usize,
}

impl BootstrapConfig {
    pub fn new(sample_size: usize, iterations: usize) -> Result<Self, CfError> {
        let config = Self {
            sample_size,
            iterations,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CfError> {
        if self.sample_size == 0 {
            return Err(CfError::InvalidConfig(
                "bootstrap sample_size must be greater than zero".to_string(),
            ));
        }
        if self.iterations == 0 {
            return Err(CfError::InvalidConfig(
                "bootstrap iterations must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Combines per-iteration draws for one condition into a result.
pub trait Aggregator: Sync {
    type Accumulator;
    type Output: Send;

    fn start(&self, config: &BootstrapConfig) -> Self::Accumulator;

    /// Record one iteration: `successes` positive outcomes out of `drawn`.
    fn observe(&self, acc: &mut Self::Accumulator, successes: usize, drawn: usize);

    fn finish(&self, acc: Self::Accumulator, config: &BootstrapConfig) -> Self::Output;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScale {
    /// Rates in [0, 1]
    Fraction,
    /// Rates in [0, 100]
    Percent,
}

impl RateScale {
    pub fn factor(self) -> f64 {
        match self {
            RateScale::Fraction => 1.0,
            RateScale::Percent => 100.0,
        }
    }
}

/// Mean and spread of the outcome rate across bootstrap iterations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateEstimate {
    pub mean: f64,
    /// Standard deviation of per-iteration rates (not a standard error)
    pub std_dev: f64,
    pub iterations: usize,
    pub sample_size: usize,
    /// Mean number of positive outcomes per iteration
    pub mean_successes: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateAggregator {
    pub scale: RateScale,
}

#[derive(Debug, Default)]
pub struct RateAccumulator {
    rates: Vec<f64>,
    successes: usize,
}

impl Aggregator for RateAggregator {
    type Accumulator = RateAccumulator;
    type Output = RateEstimate;

    fn start(&self, config: &BootstrapConfig) -> RateAccumulator {
        RateAccumulator {
            rates: Vec::with_capacity(config.iterations),
            successes: 0,
        }
    }

    fn observe(&self, acc: &mut RateAccumulator, successes: usize, drawn: usize) {
        acc.rates.push(successes as f64 / drawn as f64);
        acc.successes += successes;
    }

    fn finish(&self, acc: RateAccumulator, config: &BootstrapConfig) -> RateEstimate {
        let factor = self.scale.factor();
        RateEstimate {
            mean: mean(&acc.rates) * factor,
            std_dev: population_std(&acc.rates) * factor,
            iterations: config.iterations,
            sample_size: config.sample_size,
            mean_successes: acc.successes as f64 / config.iterations as f64,
        }
    }
}

/// Raw response and trial totals accumulated over all iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCount {
    pub n_response: u64,
    pub n_trial: u64,
}

impl ResponseCount {
    pub fn p_response(&self) -> f64 {
        if self.n_trial == 0 {
            return 0.0;
        }
        self.n_response as f64 / self.n_trial as f64
    }
}

impl Add for ResponseCount {
    type Output = ResponseCount;

    fn add(self, rhs: ResponseCount) -> ResponseCount {
        ResponseCount {
            n_response: self.n_response + rhs.n_response,
            n_trial: self.n_trial + rhs.n_trial,
        }
    }
}

impl AddAssign for ResponseCount {
    fn add_assign(&mut self, rhs: ResponseCount) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CountAggregator;

impl Aggregator for CountAggregator {
    type Accumulator = ResponseCount;
    type Output = ResponseCount;

    fn start(&self, _config: &BootstrapConfig) -> ResponseCount {
        ResponseCount::default()
    }

    fn observe(&self, acc: &mut ResponseCount, successes: usize, drawn: usize) {
        acc.n_response += successes as u64;
        acc.n_trial += drawn as u64;
    }

    fn finish(&self, acc: ResponseCount, _config: &BootstrapConfig) -> ResponseCount {
        acc
    }
}

/// Split trials into condition groups of binary outcomes.
pub fn group_outcomes<T, K, F, G>(trials: &[T], key_fn: F, outcome_fn: G) -> BTreeMap<K, Vec<bool>>
where
    K: Ord,
    F: Fn(&T) -> K,
    G: Fn(&T) -> bool,
{
    let mut groups: BTreeMap<K, Vec<bool>> = BTreeMap::new();
    for trial in trials {
        groups.entry(key_fn(trial)).or_default().push(outcome_fn(trial));
    }
    groups
}

fn resample_group<A, R>(
    outcomes: &[bool],
    config: &BootstrapConfig,
    aggregator: &A,
    rng: &mut R,
) -> A::Output
where
    A: Aggregator,
    R: Rng + ?Sized,
{
    let index = Uniform::from(0..outcomes.len());
    let mut acc = aggregator.start(config);

    for _ in 0..config.iterations {
        let mut successes = 0_usize;
        for _ in 0..config.sample_size {
            if outcomes[index.sample(rng)] {
                successes += 1;
            }
        }
        aggregator.observe(&mut acc, successes, config.sample_size);
    }

    aggregator.finish(acc, config)
}

/// Resample every non-empty group with one shared random source.
///
/// Groups are visited in key order, so a seeded source gives reproducible
/// results. Empty groups cannot be resampled and are left out of the result.
pub fn resample_groups<K, A, R>(
    groups: &BTreeMap<K, Vec<bool>>,
    config: &BootstrapConfig,
    aggregator: &A,
    rng: &mut R,
) -> Result<BTreeMap<K, A::Output>, CfError>
where
    K: Ord + Clone + std::fmt::Debug,
    A: Aggregator,
    R: Rng + ?Sized,
{
    config.validate()?;

    let mut results = BTreeMap::new();
    for (key, outcomes) in groups {
        if outcomes.is_empty() {
            log::debug!("omitting condition {key:?}: no trials");
            continue;
        }
        results.insert(key.clone(), resample_group(outcomes, config, aggregator, rng));
    }
    Ok(results)
}

/// Resample groups in parallel.
///
/// Each group gets its own ChaCha stream derived from `seed` and the group's
/// position in key order, so output does not depend on thread scheduling.
pub fn par_resample_groups<K, A>(
    groups: &BTreeMap<K, Vec<bool>>,
    config: &BootstrapConfig,
    aggregator: &A,
    seed: u64,
) -> Result<BTreeMap<K, A::Output>, CfError>
where
    K: Ord + Clone + Send + Sync + std::fmt::Debug,
    A: Aggregator,
{
    config.validate()?;

    let entries: Vec<(u64, &K, &Vec<bool>)> = groups
        .iter()
        .enumerate()
        .map(|(idx, (key, outcomes))| (idx as u64, key, outcomes))
        .collect();

    let results: Vec<(K, A::Output)> = entries
        .par_iter()
        .filter_map(|&(stream, key, outcomes)| {
            if outcomes.is_empty() {
                log::debug!("omitting condition {key:?}: no trials");
                return None;
            }
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(stream);
            Some((key.clone(), resample_group(outcomes, config, aggregator, &mut rng)))
        })
        .collect();

    Ok(results.into_iter().collect())
}

/// Group trials by `key_fn` and resample each group.
pub fn resample_and_aggregate<T, K, F, G, A, R>(
    trials: &[T],
    key_fn: F,
    outcome_fn: G,
    config: &BootstrapConfig,
    aggregator: &A,
    rng: &mut R,
) -> Result<BTreeMap<K, A::Output>, CfError>
where
    K: Ord + Clone + std::fmt::Debug,
    F: Fn(&T) -> K,
    G: Fn(&T) -> bool,
    A: Aggregator,
    R: Rng + ?Sized,
{
    let groups = group_outcomes(trials, key_fn, outcome_fn);
    resample_groups(&groups, config, aggregator, rng)
}

/// Mean outcome rate and its spread for each condition.
pub fn estimate_rate<K, R>(
    trials_by_condition: &BTreeMap<K, Vec<bool>>,
    config: &BootstrapConfig,
    scale: RateScale,
    rng: &mut R,
) -> Result<BTreeMap<K, RateEstimate>, CfError>
where
    K: Ord + Clone + std::fmt::Debug,
    R: Rng + ?Sized,
{
    resample_groups(trials_by_condition, config, &RateAggregator { scale }, rng)
}

/// Response totals over (world angle, head-centred angle) cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JointSurface {
    pub cells: BTreeMap<(i32, i32), ResponseCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointCell {
    pub speaker_angle_world: i32,
    pub speaker_angle_platform: i32,
    pub n_response: u64,
    pub n_trial: u64,
    pub p_response: f64,
}

impl JointSurface {
    pub fn from_cells(cells: BTreeMap<(i32, i32), ResponseCount>) -> Self {
        Self { cells }
    }

    pub fn get(&self, world: i32, head: i32) -> Option<&ResponseCount> {
        self.cells.get(&(world, head))
    }

    pub fn rows(&self) -> Vec<JointCell> {
        self.cells
            .iter()
            .map(|(&(world, head), count)| JointCell {
                speaker_angle_world: world,
                speaker_angle_platform: head,
                n_response: count.n_response,
                n_trial: count.n_trial,
                p_response: count.p_response(),
            })
            .collect()
    }

    /// Sum cells over the other axis, keyed by the angle in `frame`.
    pub fn marginal(&self, frame: Frame) -> BTreeMap<i32, ResponseCount> {
        let mut marginal: BTreeMap<i32, ResponseCount> = BTreeMap::new();
        for (&(world, head), &count) in &self.cells {
            let key = match frame {
                Frame::World => world,
                Frame::Head => head,
            };
            *marginal.entry(key).or_default() += count;
        }
        marginal
    }

    /// Sample variance of the marginal response probabilities in `frame`.
    ///
    /// Responses governed by one frame vary strongly along that frame's axis
    /// and average out along the other.
    pub fn frame_variance(&self, frame: Frame) -> Option<f64> {
        let probabilities: Vec<f64> = self
            .marginal(frame)
            .values()
            .map(ResponseCount::p_response)
            .collect();
        sample_variance(&probabilities)
    }

    pub fn angles(&self, frame: Frame) -> Vec<i32> {
        self.marginal(frame).into_keys().collect()
    }
}

fn joint_key(trial: &Trial) -> (i32, i32) {
    (trial.speaker_angle_world, trial.speaker_angle_platform)
}

/// Joint-mode estimator: response and trial totals per (world, head) angle pair.
pub fn estimate_joint<R>(
    trials: &[Trial],
    config: &BootstrapConfig,
    rng: &mut R,
) -> Result<JointSurface, CfError>
where
    R: Rng + ?Sized,
{
    let cells = resample_and_aggregate(
        trials,
        joint_key,
        |t| t.response,
        config,
        &CountAggregator,
        rng,
    )?;
    Ok(JointSurface::from_cells(cells))
}

pub fn par_estimate_joint(
    trials: &[Trial],
    config: &BootstrapConfig,
    seed: u64,
) -> Result<JointSurface, CfError> {
    let groups = group_outcomes(trials, joint_key, |t| t.response);
    let cells = par_resample_groups(&groups, config, &CountAggregator, seed)?;
    Ok(JointSurface::from_cells(cells))
}
