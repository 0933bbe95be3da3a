use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

use cf_behavior::config::{AnalysisConfig, FigureStyle};
use cf_behavior::format::{format_subject, write_formatted_csv};
use cf_behavior::model::{degree_grid, response_curve, sample_models, CurvePoint};
use cf_behavior::output::{
    create_timestamped_output_dir, plot_joint_heatmap, plot_percent_correct, plot_response_curve,
    write_curve_csv, write_format_summary_csv, write_joint_csv, write_manifest_json,
    write_marginal_csv, write_percent_correct_csv, Manifest, PerformanceSeries,
};
use cf_behavior::pipeline::{analyse_group, simulate_group};
use cf_behavior::subjects::{Frame, SUBJECTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Raw session files to formatted per-subject trial files
    Format,
    /// Bootstrapped percent correct per platform angle
    PercentCorrect,
    /// Joint response probability over world and head angle
    Joint,
    /// Model observer on the front/back task
    Simulate,
    /// Example model response curves
    Curves,
}

impl Mode {
    fn name(self) -> &'static str {
        match self {
            Mode::Format => "format",
            Mode::PercentCorrect => "percent-correct",
            Mode::Joint => "joint",
            Mode::Simulate => "simulate",
            Mode::Curves => "curves",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TaskArg {
    Head,
    World,
}

impl From<TaskArg> for Frame {
    fn from(task: TaskArg) -> Frame {
        match task {
            TaskArg::Head => Frame::Head,
            TaskArg::World => Frame::World,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "cf_analysis")]
#[command(about = "Bootstrap behaviour analysis for the coordinate frame localisation task")]
struct Cli {
    #[arg(long, value_enum)]
    mode: Mode,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "output-cf-behavior")]
    outdir: PathBuf,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Folder of raw session files, one sub-folder per subject
    #[arg(long)]
    raw_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "world")]
    task: TaskArg,

    /// Restrict the group to one training rule, e.g. "North=>East,South=>West"
    #[arg(long)]
    training: Option<String>,
}

fn resolve_default_config_path() -> PathBuf {
    let local = PathBuf::from("configs").join("default.toml");
    if local.exists() {
        return local;
    }

    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("configs")
        .join("default.toml")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn run_format(cfg: &AnalysisConfig, outdir: &Path) -> Result<Vec<String>> {
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("failed to create {}", cfg.data_dir.display()))?;

    let mut summaries = Vec::new();
    for subject in SUBJECTS.iter() {
        let subject_dir = cfg.raw_dir.join(subject.file_stem());
        if !subject_dir.exists() {
            log::warn!("{}: no raw data at {}", subject.name, subject_dir.display());
            continue;
        }

        let (trials, summary) = format_subject(subject, &subject_dir)
            .with_context(|| format!("failed to format {}", subject.file_stem()))?;
        let path = cfg.data_dir.join(format!("{}.csv", subject.file_stem()));
        write_formatted_csv(&path, &trials)?;
        println!(
            "{}: {} sessions, test data {} / {} trials ({} probe)",
            subject.name, summary.sessions, summary.kept, summary.rows_read, summary.probe
        );
        summaries.push(summary);
    }

    if summaries.is_empty() {
        bail!("no subject folders found in {}", cfg.raw_dir.display());
    }

    let summary_path = outdir.join("format_summary.csv");
    write_format_summary_csv(&summary_path, &summaries)?;
    Ok(vec![file_name(&summary_path)])
}

fn run_percent_correct(
    cfg: &AnalysisConfig,
    task: Frame,
    training: Option<&str>,
    style: &FigureStyle,
    outdir: &Path,
) -> Result<Vec<String>> {
    let analysis = analyse_group(cfg, task, training)?;
    if analysis.performance.is_empty() {
        bail!("no non-probe trials for the {} task", task.label());
    }

    let mut files = Vec::new();
    let pooled_path = outdir.join("percent_correct.csv");
    write_percent_correct_csv(&pooled_path, &analysis.performance)?;
    files.push(file_name(&pooled_path));

    let mut series = Vec::new();
    for subject in &analysis.subjects {
        let path = outdir.join(format!("percent_correct_{}.csv", subject.subject.file_stem()));
        write_percent_correct_csv(&path, &subject.performance)?;
        files.push(file_name(&path));
        series.push(PerformanceSeries {
            label: subject.subject.name.to_string(),
            color: subject.subject.rgb(),
            rows: subject.performance.clone(),
        });
    }

    let plot_path = outdir.join("percent_correct.png");
    plot_percent_correct(
        &plot_path,
        &format!("{} task", task.label()),
        &series,
        style,
    )?;
    files.push(file_name(&plot_path));

    println!(
        "{} task: {} subjects, {} trials ({} rows skipped)",
        task.label(),
        analysis.subjects.len(),
        analysis.table.len(),
        analysis.table.skipped()
    );
    Ok(files)
}

fn run_joint(
    cfg: &AnalysisConfig,
    task: Frame,
    training: Option<&str>,
    style: &FigureStyle,
    outdir: &Path,
) -> Result<Vec<String>> {
    let analysis = analyse_group(cfg, task, training)?;
    let mut files = Vec::new();

    for subject in &analysis.subjects {
        let stem = subject.subject.file_stem();
        let joint_path = outdir.join(format!("joint_response_{stem}.csv"));
        let world_path = outdir.join(format!("marginal_world_{stem}.csv"));
        let head_path = outdir.join(format!("marginal_head_{stem}.csv"));

        write_joint_csv(&joint_path, &subject.joint)?;
        write_marginal_csv(&world_path, &subject.joint, Frame::World)?;
        write_marginal_csv(&head_path, &subject.joint, Frame::Head)?;
        files.extend([&joint_path, &world_path, &head_path].map(|p| file_name(p)));

        if let (Some(world), Some(head)) = (
            subject.joint.frame_variance(Frame::World),
            subject.joint.frame_variance(Frame::Head),
        ) {
            println!("{}: marginal variance world {world:.4}, head {head:.4}", subject.subject.name);
        }
    }

    let surface = &analysis.joint;
    let joint_path = outdir.join("joint_response.csv");
    let world_path = outdir.join("marginal_world.csv");
    let head_path = outdir.join("marginal_head.csv");
    let plot_path = outdir.join("joint_response.png");

    write_joint_csv(&joint_path, surface)?;
    write_marginal_csv(&world_path, surface, Frame::World)?;
    write_marginal_csv(&head_path, surface, Frame::Head)?;
    plot_joint_heatmap(&plot_path, &format!("{} task", task.label()), surface, style)?;
    files.extend([&joint_path, &world_path, &head_path, &plot_path].map(|p| file_name(p)));

    if let (Some(world), Some(head)) = (
        surface.frame_variance(Frame::World),
        surface.frame_variance(Frame::Head),
    ) {
        println!("pooled marginal variance: world {world:.4}, head {head:.4}");
    }

    Ok(files)
}

fn run_simulate(cfg: &AnalysisConfig, style: &FigureStyle, outdir: &Path) -> Result<Vec<String>> {
    let analysis = simulate_group(cfg)?;

    let pct_path = outdir.join("percent_correct.csv");
    let joint_path = outdir.join("joint_response.csv");
    let curve_path = outdir.join("fitted_curve.csv");
    let pct_plot = outdir.join("percent_correct.png");
    let joint_plot = outdir.join("joint_response.png");

    write_percent_correct_csv(&pct_path, &analysis.performance)?;
    write_joint_csv(&joint_path, &analysis.joint)?;

    let angles = degree_grid(180);
    let fitted = response_curve(&analysis.fit.params, &angles);
    write_curve_csv(&curve_path, &analysis.fit.params.label(), &fitted)?;

    let observer = format!("{} observer, {} task", analysis.settings.frame.label(), analysis.settings.task.label());
    plot_percent_correct(
        &pct_plot,
        &observer,
        &[PerformanceSeries {
            label: "simulation".to_string(),
            color: (0xb8, 0x4b, 0xff),
            rows: analysis.performance.clone(),
        }],
        style,
    )?;
    plot_joint_heatmap(&joint_plot, &observer, &analysis.joint, style)?;

    println!(
        "simulated {} trials; refit {}",
        analysis.trials.len(),
        analysis.fit.params.label()
    );
    Ok([pct_path, joint_path, curve_path, pct_plot, joint_plot]
        .iter()
        .map(|p| file_name(p))
        .collect())
}

fn run_curves(cfg: &AnalysisConfig, style: &FigureStyle, outdir: &Path) -> Result<Vec<String>> {
    let angles = degree_grid(180);
    let mut models = sample_models().to_vec();
    models.push(cfg.simulation.params());

    let mut files = Vec::new();
    let mut curves: Vec<(String, Vec<CurvePoint>)> = Vec::new();
    for (idx, params) in models.iter().enumerate() {
        params
            .validate()
            .with_context(|| format!("invalid model parameters: {}", params.label()))?;
        let curve = response_curve(params, &angles);
        let path = outdir.join(format!("curve_{idx}.csv"));
        write_curve_csv(&path, &params.label(), &curve)?;
        files.push(file_name(&path));
        curves.push((params.label(), curve));
    }

    let plot_path = outdir.join("response_curves.png");
    plot_response_curve(&plot_path, "Circular models", &curves, style)?;
    files.push(file_name(&plot_path));
    Ok(files)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(resolve_default_config_path);
    let mut cfg = if config_path.exists() {
        AnalysisConfig::from_toml_file(&config_path)
            .with_context(|| format!("failed to load config {}", config_path.display()))?
    } else if cli.config.is_some() {
        bail!("config file not found: {}", config_path.display());
    } else {
        log::warn!("no config at {}; using defaults", config_path.display());
        AnalysisConfig::default()
    };

    if let Some(seed) = cli.seed {
        cfg.seed = seed;
    }
    if let Some(data_dir) = cli.data_dir.clone() {
        cfg.data_dir = data_dir;
    }
    if let Some(raw_dir) = cli.raw_dir.clone() {
        cfg.raw_dir = raw_dir;
    }
    cfg.validate()?;

    let task = Frame::from(cli.task);
    let training = cli.training.as_deref();
    let style = cfg.figure_style();
    let run_outdir = create_timestamped_output_dir(&cli.outdir)
        .with_context(|| format!("failed to create run directory under {}", cli.outdir.display()))?;

    let files = match cli.mode {
        Mode::Format => run_format(&cfg, &run_outdir)?,
        Mode::PercentCorrect => run_percent_correct(&cfg, task, training, &style, &run_outdir)?,
        Mode::Joint => run_joint(&cfg, task, training, &style, &run_outdir)?,
        Mode::Simulate => run_simulate(&cfg, &style, &run_outdir)?,
        Mode::Curves => run_curves(&cfg, &style, &run_outdir)?,
    };

    let note = match cli.mode {
        Mode::Format => format!(
            "{} formatted into {}",
            cfg.raw_dir.display(),
            cfg.data_dir.display()
        ),
        Mode::PercentCorrect | Mode::Joint => format!(
            "{} task{}",
            task.label(),
            training.map(|t| format!(", training {t}")).unwrap_or_default()
        ),
        Mode::Simulate => format!(
            "{} observer on the {} task",
            cfg.simulation.frame.label(),
            cfg.simulation.task.label()
        ),
        Mode::Curves => "sample circular models".to_string(),
    };
    write_manifest_json(&run_outdir, &Manifest::new(cli.mode.name(), &cfg, files, note))?;

    println!("wrote outputs to {}", run_outdir.display());
    Ok(())
}
