//! Analysis runs: load or simulate trials, then estimate percent correct per
//! platform angle and the joint response-probability surface

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::bootstrap::{
    group_outcomes, par_estimate_joint, par_resample_groups, BootstrapConfig, JointSurface,
    RateAggregator, RateEstimate, RateScale,
};
use crate::config::{AnalysisConfig, SimulationSettings};
use crate::model::{fit_response, FitGrid, FitObservation, FitResult};
use crate::simulate::{create_stimuli, expected_percent_correct, simulate_trials, TaskMap};
use crate::stats::binomial_test_two_sided;
use crate::subjects::{members, Frame, Subject};
use crate::trials::{non_probe_trials, Trial, TrialTable};
use crate::CfError;

/// Bootstrapped performance at one platform rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlatformPerformance {
    pub platform_angle: i32,
    /// Non-probe trials recorded at this angle
    pub n_trials: usize,
    /// Percent correct
    pub estimate: RateEstimate,
    /// Two-sided binomial test of the mean correct count against chance
    pub p_value: f64,
}

/// Percent correct per platform angle over non-probe trials.
pub fn percent_correct_by_platform(
    trials: &[Trial],
    config: &BootstrapConfig,
    seed: u64,
) -> Result<Vec<PlatformPerformance>, CfError> {
    let test_trials = non_probe_trials(trials);
    if test_trials.is_empty() {
        log::warn!("no non-probe trials; percent correct is empty");
        return Ok(Vec::new());
    }

    let groups = group_outcomes(&test_trials, |t| t.platform_angle, |t| t.correct);
    let estimates = par_resample_groups(
        &groups,
        config,
        &RateAggregator {
            scale: RateScale::Percent,
        },
        seed,
    )?;

    let mut rows = Vec::with_capacity(estimates.len());
    for (platform_angle, estimate) in estimates {
        let successes = estimate.mean_successes.round() as u64;
        let p_value = binomial_test_two_sided(successes, estimate.sample_size as u64, 0.5);
        log::info!(
            "platform {platform_angle:>4}: {:.1}% correct (sd {:.2}), binomial p = {p_value:.3e}",
            estimate.mean,
            estimate.std_dev
        );
        rows.push(PlatformPerformance {
            platform_angle,
            n_trials: groups.get(&platform_angle).map_or(0, Vec::len),
            estimate,
            p_value,
        });
    }
    Ok(rows)
}

/// Response totals per (world, head) angle pair over all trials.
pub fn joint_response(
    trials: &[Trial],
    config: &BootstrapConfig,
    seed: u64,
) -> Result<JointSurface, CfError> {
    let surface = par_estimate_joint(trials, config, seed)?;
    if let (Some(world), Some(head)) = (
        surface.frame_variance(Frame::World),
        surface.frame_variance(Frame::Head),
    ) {
        log::info!("marginal response variance: world {world:.4}, head {head:.4}");
    }
    Ok(surface)
}

/// Fit the circular model to the marginal response curve in `frame`.
pub fn fit_marginal(
    surface: &JointSurface,
    frame: Frame,
    grid: &FitGrid,
    inverse_temperature: f64,
) -> Result<FitResult, CfError> {
    let observations: Vec<FitObservation> = surface
        .marginal(frame)
        .into_iter()
        .map(|(angle, count)| FitObservation {
            theta: f64::from(angle),
            n_response: count.n_response,
            n_trial: count.n_trial,
        })
        .collect();

    let fit = fit_response(&observations, grid, inverse_temperature)?;
    log::info!(
        "{} frame fit: {} (log likelihood {:.2})",
        frame.label(),
        fit.params.label(),
        fit.log_likelihood
    );
    Ok(fit)
}

#[derive(Debug, Clone)]
pub struct SubjectAnalysis {
    pub subject: Subject,
    pub performance: Vec<PlatformPerformance>,
    pub joint: JointSurface,
}

#[derive(Debug, Clone)]
pub struct GroupAnalysis {
    pub task: Frame,
    pub training: Option<String>,
    pub subjects: Vec<SubjectAnalysis>,
    pub table: TrialTable,
    /// All subjects' trials pooled
    pub performance: Vec<PlatformPerformance>,
    pub joint: JointSurface,
}

/// Load every member of a task group from `config.data_dir` and run both
/// estimators, per subject and pooled.
///
/// Subjects without a data file are skipped with a warning.
pub fn analyse_group(
    config: &AnalysisConfig,
    task: Frame,
    training: Option<&str>,
) -> Result<GroupAnalysis, CfError> {
    let group = members(task, training);
    if group.is_empty() {
        return Err(CfError::EmptyInput(format!(
            "no subjects trained on the {} task{}",
            task.label(),
            training.map(|t| format!(" with rule {t}")).unwrap_or_default()
        )));
    }

    let mut subjects = Vec::new();
    let mut tables = Vec::new();
    for subject in group {
        let path = config.data_dir.join(format!("{}.csv", subject.file_stem()));
        if !path.exists() {
            log::warn!("{}: no data at {}", subject.name, path.display());
            continue;
        }

        let table = TrialTable::from_path(&path)?;
        let seed = config.seed.wrapping_add(u64::from(subject.num));
        let performance = percent_correct_by_platform(&table.trials, &config.percent_correct, seed)?;
        log::info!("{}: joint response surface", subject.name);
        let joint = joint_response(&table.trials, &config.joint, seed)?;
        subjects.push(SubjectAnalysis {
            subject,
            performance,
            joint,
        });
        tables.push(table);
    }

    let table = TrialTable::concat(tables);
    if table.is_empty() {
        return Err(CfError::EmptyInput(format!(
            "no trials found for the {} task in {}",
            task.label(),
            config.data_dir.display()
        )));
    }

    let performance = percent_correct_by_platform(&table.trials, &config.percent_correct, config.seed)?;
    let joint = joint_response(&table.trials, &config.joint, config.seed)?;

    Ok(GroupAnalysis {
        task,
        training: training.map(str::to_string),
        subjects,
        table,
        performance,
        joint,
    })
}

#[derive(Debug, Clone)]
pub struct SimulationAnalysis {
    pub settings: SimulationSettings,
    pub task_map: TaskMap,
    pub trials: Vec<Trial>,
    pub performance: Vec<PlatformPerformance>,
    /// Percent correct implied by the model at each platform angle
    pub expected: BTreeMap<i32, f64>,
    pub joint: JointSurface,
    /// Model refitted to the simulated responses in the observer's frame
    pub fit: FitResult,
}

/// Simulate a model observer on the front/back task and analyse it like a
/// real subject.
pub fn simulate_group(config: &AnalysisConfig) -> Result<SimulationAnalysis, CfError> {
    config.validate()?;

    let settings = config.simulation.clone();
    let params = settings.params();
    let stimuli = create_stimuli();
    let task_map = TaskMap::front_back(settings.task);

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let trials = simulate_trials(
        &stimuli,
        &params,
        settings.frame,
        &task_map,
        settings.trials_per_stimulus,
        &mut rng,
    )?;

    let performance = percent_correct_by_platform(&trials, &config.percent_correct, config.seed)?;
    let joint = joint_response(&trials, &config.joint, config.seed)?;
    let expected = expected_percent_correct(&stimuli, &params, settings.frame, &task_map);
    let fit = fit_marginal(&joint, settings.frame, &FitGrid::default(), params.inverse_temperature)?;

    Ok(SimulationAnalysis {
        settings,
        task_map,
        trials,
        performance,
        expected,
        joint,
        fit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn trial(platform_angle: i32, correct: bool, not_probe: bool) -> Trial {
        Trial {
            speaker_angle_world: 0,
            speaker_angle_platform: crate::angles::platform_relative(0, platform_angle),
            platform_angle,
            response: correct,
            correct,
            not_probe,
        }
    }

    #[test]
    fn test_percent_correct_ignores_probes() {
        let mut trials = vec![trial(0, true, true); 4];
        trials.extend(vec![trial(90, false, true); 4]);
        trials.extend(vec![trial(180, true, false); 4]);

        let config = BootstrapConfig::new(40, 10).unwrap();
        let rows = percent_correct_by_platform(&trials, &config, 3).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].platform_angle, 0);
        assert_eq!(rows[0].estimate.mean, 100.0);
        assert_eq!(rows[0].n_trials, 4);
        assert!(rows[0].p_value < 1e-6);
        assert_eq!(rows[1].estimate.mean, 0.0);
    }

    #[test]
    fn test_only_probes_gives_empty_result() {
        let trials = vec![trial(0, true, false); 3];
        let config = BootstrapConfig::new(5, 5).unwrap();
        assert!(percent_correct_by_platform(&trials, &config, 0).unwrap().is_empty());
    }

    #[test]
    fn test_analyse_group_reads_member_files() {
        let dir = tempfile::tempdir().unwrap();
        let header = "speaker_angle_world,speaker_angle_platform,CenterSpoutRotation,Response,Correct,not_probe\n";
        let rows = "0,0,0,1,1,1\n-180,-180,0,0,1,1\n0,-90,90,1,0,1\n90,0,90,1,0,0\n";
        fs::write(dir.path().join("F1901_Crumble.csv"), format!("{header}{rows}")).unwrap();

        let config = AnalysisConfig {
            data_dir: dir.path().to_path_buf(),
            percent_correct: BootstrapConfig::new(20, 5).unwrap(),
            joint: BootstrapConfig::new(3, 5).unwrap(),
            ..AnalysisConfig::default()
        };

        let analysis = analyse_group(&config, Frame::Head, None).unwrap();
        assert_eq!(analysis.subjects.len(), 1);
        assert_eq!(analysis.subjects[0].subject.name, "Crumble");
        assert_eq!(analysis.table.len(), 4);
        assert_eq!(analysis.performance.len(), 2);
        assert_eq!(analysis.joint.cells.len(), 4);
        assert_eq!(analysis.subjects[0].joint.cells.len(), 4);
    }

    #[test]
    fn test_analyse_group_keeps_a_joint_surface_per_subject() {
        let dir = tempfile::tempdir().unwrap();
        let header = "speaker_angle_world,speaker_angle_platform,CenterSpoutRotation,Response,Correct,not_probe\n";
        // Crumble always responds 1 at world 0; Sponge never does and is also tested at world 90
        fs::write(
            dir.path().join("F1901_Crumble.csv"),
            format!("{header}0,0,0,1,1,1\n0,0,0,1,1,1\n"),
        )
        .unwrap();
        fs::write(
            dir.path().join("F1905_Sponge.csv"),
            format!("{header}0,0,0,0,0,1\n90,60,30,0,0,0\n"),
        )
        .unwrap();

        let config = AnalysisConfig {
            data_dir: dir.path().to_path_buf(),
            percent_correct: BootstrapConfig::new(10, 5).unwrap(),
            joint: BootstrapConfig::new(4, 5).unwrap(),
            ..AnalysisConfig::default()
        };
        let analysis = analyse_group(&config, Frame::Head, None).unwrap();
        assert_eq!(analysis.subjects.len(), 2);

        let crumble = &analysis.subjects[0].joint;
        assert_eq!(crumble.cells.len(), 1);
        assert_eq!(crumble.get(0, 0).map(|c| c.p_response()), Some(1.0));
        assert_eq!(crumble.get(0, 0).map(|c| c.n_trial), Some(20));

        let sponge = &analysis.subjects[1].joint;
        assert_eq!(sponge.cells.len(), 2);
        assert_eq!(sponge.get(0, 0).map(|c| c.n_response), Some(0));
        assert!(sponge.get(90, 60).is_some());

        // pooled surface covers the union of both subjects' cells
        assert_eq!(analysis.joint.cells.len(), 2);
        assert_eq!(analysis.joint.get(0, 0).map(|c| c.n_trial), Some(20));
    }

    #[test]
    fn test_analyse_group_without_data_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalysisConfig {
            data_dir: dir.path().to_path_buf(),
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            analyse_group(&config, Frame::World, None),
            Err(CfError::EmptyInput(_))
        ));
        assert!(analyse_group(&config, Frame::World, Some("no such rule")).is_err());
    }

    #[test]
    fn test_fit_marginal_recovers_softmax_observer() {
        use crate::bootstrap::ResponseCount;
        use crate::model::{response_curve, response_probability, CircularParams};

        let truth = CircularParams::new(0.0, 90.0, 3.0, 2.0);
        let mut cells = BTreeMap::new();
        for i in -6..6 {
            let world = i * 30;
            let p = response_probability(f64::from(world), &truth);
            cells.insert(
                (world, 0),
                ResponseCount {
                    n_response: (p * 100_000.0).round() as u64,
                    n_trial: 100_000,
                },
            );
        }
        let surface = JointSurface::from_cells(cells);

        let fit = fit_marginal(&surface, Frame::World, &FitGrid::default(), 2.0).unwrap();
        assert_eq!(fit.params.horizontal_offset, 90.0);
        assert_eq!(fit.params.amplitude, 3.0);
        assert_eq!(fit.params.vertical_offset, 0.0);

        let marginal = surface.marginal(Frame::World);
        let angles: Vec<f64> = marginal.keys().map(|&a| f64::from(a)).collect();
        for (point, count) in response_curve(&fit.params, &angles).iter().zip(marginal.values()) {
            assert!(
                (point.p_response - count.p_response()).abs() < 0.02,
                "theta {}: fitted {} vs observed {}",
                point.theta,
                point.p_response,
                count.p_response()
            );
        }
        assert!(fit_marginal(&surface, Frame::Head, &FitGrid::default(), 2.0).is_ok());
    }

    #[test]
    fn test_simulated_head_observer_tracks_expected_performance() {
        let mut config = AnalysisConfig::default();
        config.simulation.amplitude = 4.0;
        config.simulation.coldness = 5.0;
        config.simulation.vertical_offset = 0.0;
        config.simulation.horizontal_offset = 90.0;
        config.simulation.trials_per_stimulus = 200;
        config.percent_correct = BootstrapConfig::new(400, 50).unwrap();

        let analysis = simulate_group(&config).unwrap();
        assert_eq!(analysis.performance.len(), 12);
        assert!(analysis.expected.values().all(|&pct| pct > 90.0));
        for row in &analysis.performance {
            let expected = analysis.expected[&row.platform_angle];
            assert!(
                (row.estimate.mean - expected).abs() < 10.0,
                "platform {}: {} vs {}",
                row.platform_angle,
                row.estimate.mean,
                expected
            );
        }
    }
}
