//! Simulated observers driven by the circular model
//!
//! A model observer responds according to the stimulus angle in one frame
//! (head or world) while the task rewards responses by the angle in a possibly
//! different frame. Comparing percent correct across platform rotations shows
//! which frame the observer is using.

use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::{Bernoulli, Distribution};
use serde::Serialize;

use crate::angles::{clock_to_world_angle, platform_relative};
use crate::model::{response_probability, CircularParams};
use crate::subjects::Frame;
use crate::trials::Trial;
use crate::CfError;

/// Platform rotations used in testing, in degrees.
pub const PLATFORM_ROTATIONS: [i32; 12] = [-150, -120, -90, -60, -30, 0, 30, 60, 90, 120, 150, 180];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stimulus {
    pub speaker_angle_world: i32,
    pub platform_angle: i32,
    pub speaker_angle_platform: i32,
}

impl Stimulus {
    pub fn new(speaker_angle_world: i32, platform_angle: i32) -> Self {
        Self {
            speaker_angle_world,
            platform_angle,
            speaker_angle_platform: platform_relative(speaker_angle_world, platform_angle),
        }
    }

    pub fn angle(&self, frame: Frame) -> i32 {
        match frame {
            Frame::Head => self.speaker_angle_platform,
            Frame::World => self.speaker_angle_world,
        }
    }
}

/// Every speaker (clock positions 1 to 12) at every platform rotation.
pub fn create_stimuli() -> Vec<Stimulus> {
    let mut stimuli = Vec::with_capacity(12 * PLATFORM_ROTATIONS.len());
    for clock in 1..=12 {
        let world = clock_to_world_angle(clock);
        for &platform in &PLATFORM_ROTATIONS {
            stimuli.push(Stimulus::new(world, platform));
        }
    }
    stimuli
}

/// Rewarded response for each task-relevant angle.
///
/// Angles missing from the map are probe locations: never rewarded and left
/// out of percent correct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskMap {
    pub frame: Frame,
    pub rewarded: BTreeMap<i32, bool>,
}

impl TaskMap {
    pub fn new(frame: Frame, entries: &[(i32, bool)]) -> Self {
        Self {
            frame,
            rewarded: entries.iter().copied().collect(),
        }
    }

    /// Front (0) rewards one spout and back (-180) the other.
    pub fn front_back(frame: Frame) -> Self {
        Self::new(frame, &[(-180, false), (0, true)])
    }

    pub fn rewarded_response(&self, stimulus: &Stimulus) -> Option<bool> {
        self.rewarded.get(&stimulus.angle(self.frame)).copied()
    }
}

fn validate_simulation(params: &CircularParams, trials_per_stimulus: usize) -> Result<(), CfError> {
    params.validate()?;
    if trials_per_stimulus == 0 {
        return Err(CfError::InvalidConfig(
            "trials_per_stimulus must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Draw responses for every stimulus from a model observer.
///
/// `frame` selects which angle the observer's model is defined over; the task
/// map scores the responses.
pub fn simulate_trials<R>(
    stimuli: &[Stimulus],
    params: &CircularParams,
    frame: Frame,
    task_map: &TaskMap,
    trials_per_stimulus: usize,
    rng: &mut R,
) -> Result<Vec<Trial>, CfError>
where
    R: Rng + ?Sized,
{
    validate_simulation(params, trials_per_stimulus)?;

    let mut trials = Vec::with_capacity(stimuli.len() * trials_per_stimulus);
    for stimulus in stimuli {
        let p = response_probability(f64::from(stimulus.angle(frame)), params);
        let choice = Bernoulli::new(p).map_err(|err| {
            CfError::InvalidConfig(format!("response probability {p} is not usable: {err}"))
        })?;
        let rewarded = task_map.rewarded_response(stimulus);

        for _ in 0..trials_per_stimulus {
            let response = choice.sample(rng);
            trials.push(Trial {
                speaker_angle_world: stimulus.speaker_angle_world,
                speaker_angle_platform: stimulus.speaker_angle_platform,
                platform_angle: stimulus.platform_angle,
                response,
                correct: rewarded.map_or(false, |r| r == response),
                not_probe: rewarded.is_some(),
            });
        }
    }

    log::debug!(
        "simulated {} trials over {} stimuli ({} frame observer)",
        trials.len(),
        stimuli.len(),
        frame.label()
    );
    Ok(trials)
}

/// Percent correct per platform rotation implied by the model, without sampling.
pub fn expected_percent_correct(
    stimuli: &[Stimulus],
    params: &CircularParams,
    frame: Frame,
    task_map: &TaskMap,
) -> BTreeMap<i32, f64> {
    let mut sums: BTreeMap<i32, (f64, usize)> = BTreeMap::new();
    for stimulus in stimuli {
        let Some(rewarded) = task_map.rewarded_response(stimulus) else {
            continue;
        };
        let p = response_probability(f64::from(stimulus.angle(frame)), params);
        let p_correct = if rewarded { p } else { 1.0 - p };
        let entry = sums.entry(stimulus.platform_angle).or_insert((0.0, 0));
        entry.0 += p_correct;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(platform, (total, count))| (platform, 100.0 * total / count as f64))
        .collect()
}
