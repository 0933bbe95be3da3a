use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::Writer;
use plotters::prelude::*;
use serde::Serialize;

use crate::angles::duplicate_boundary_for_plotting;
use crate::bootstrap::JointSurface;
use crate::config::{AnalysisConfig, FigureStyle, OUTPUT_SCHEMA_VERSION};
use crate::format::FormatSummary;
use crate::model::CurvePoint;
use crate::pipeline::PlatformPerformance;
use crate::subjects::Frame;
use crate::CfError;

type PlotResult = Result<(), Box<dyn Error>>;

pub fn create_timestamped_output_dir(base: &Path) -> Result<PathBuf, CfError> {
    fs::create_dir_all(base)?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut output_dir = base.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = base.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn fmt_f64(value: f64) -> String {
    format!("{value:.10}")
}

pub fn write_percent_correct_csv(path: &Path, rows: &[PlatformPerformance]) -> Result<(), CfError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "platform_angle",
        "n_trials",
        "pct_correct",
        "std_dev",
        "mean_correct",
        "sample_size",
        "iterations",
        "p_value",
    ])?;

    for row in rows {
        writer.write_record([
            row.platform_angle.to_string(),
            row.n_trials.to_string(),
            fmt_f64(row.estimate.mean),
            fmt_f64(row.estimate.std_dev),
            fmt_f64(row.estimate.mean_successes),
            row.estimate.sample_size.to_string(),
            row.estimate.iterations.to_string(),
            fmt_f64(row.p_value),
        ])?;
    }

    writer.flush()?;
    log::info!("wrote {}", path.display());
    Ok(())
}

pub fn write_joint_csv(path: &Path, surface: &JointSurface) -> Result<(), CfError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "speaker_angle_world",
        "speaker_angle_platform",
        "nResp",
        "nTrial",
        "pResp",
    ])?;

    for cell in surface.rows() {
        writer.write_record([
            cell.speaker_angle_world.to_string(),
            cell.speaker_angle_platform.to_string(),
            cell.n_response.to_string(),
            cell.n_trial.to_string(),
            fmt_f64(cell.p_response),
        ])?;
    }

    writer.flush()?;
    log::info!("wrote {}", path.display());
    Ok(())
}

pub fn write_marginal_csv(path: &Path, surface: &JointSurface, frame: Frame) -> Result<(), CfError> {
    let column = match frame {
        Frame::World => "speaker_angle_world",
        Frame::Head => "speaker_angle_platform",
    };

    let mut writer = Writer::from_path(path)?;
    writer.write_record([column, "nResp", "nTrial", "pResp"])?;

    for (angle, count) in surface.marginal(frame) {
        writer.write_record([
            angle.to_string(),
            count.n_response.to_string(),
            count.n_trial.to_string(),
            fmt_f64(count.p_response()),
        ])?;
    }

    writer.flush()?;
    log::info!("wrote {}", path.display());
    Ok(())
}

pub fn write_curve_csv(path: &Path, label: &str, curve: &[CurvePoint]) -> Result<(), CfError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["model", "theta", "activation", "p_response"])?;

    for point in curve {
        writer.write_record([
            label.to_string(),
            fmt_f64(point.theta),
            fmt_f64(point.activation),
            fmt_f64(point.p_response),
        ])?;
    }

    writer.flush()?;
    log::info!("wrote {}", path.display());
    Ok(())
}

pub fn write_format_summary_csv(path: &Path, summaries: &[FormatSummary]) -> Result<(), CfError> {
    let mut writer = Writer::from_path(path)?;
    for summary in summaries {
        writer.serialize(summary)?;
    }
    writer.flush()?;
    log::info!("wrote {}", path.display());
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub schema_version: String,
    pub mode: String,
    pub created_utc: String,
    pub seed: u64,
    pub style: String,
    pub files: Vec<String>,
    pub config: AnalysisConfig,
    pub note: String,
}

impl Manifest {
    pub fn new(mode: &str, config: &AnalysisConfig, files: Vec<String>, note: String) -> Self {
        Self {
            schema_version: OUTPUT_SCHEMA_VERSION.to_string(),
            mode: mode.to_string(),
            created_utc: Utc::now().to_rfc3339(),
            seed: config.seed,
            style: config.figure_style().name.to_string(),
            files,
            config: config.clone(),
            note,
        }
    }
}

pub fn write_manifest_json(outdir: &Path, manifest: &Manifest) -> Result<PathBuf, CfError> {
    let path = outdir.join("manifest.json");
    let payload = serde_json::to_string_pretty(manifest)?;
    fs::write(&path, payload)?;
    Ok(path)
}

/// One labelled line on a percent-correct figure.
#[derive(Debug, Clone)]
pub struct PerformanceSeries {
    pub label: String,
    pub color: (u8, u8, u8),
    pub rows: Vec<PlatformPerformance>,
}

fn rgb((r, g, b): (u8, u8, u8)) -> RGBColor {
    RGBColor(r, g, b)
}

fn axis_text(style: &FigureStyle) -> TextStyle<'static> {
    (style.font_family, style.scaled_font(style.axis_label_size))
        .into_font()
        .color(&rgb(style.axis_font_color))
}

fn caption_font(style: &FigureStyle) -> FontDesc<'static> {
    (style.font_family, style.scaled_font(style.font_size)).into_font()
}

/// Blue for 0, white for 0.5, red for 1.
fn diverging_color(value: f64) -> RGBColor {
    let v = value.clamp(0.0, 1.0);
    let blend = |from: u8, to: u8, t: f64| (f64::from(from) + (f64::from(to) - f64::from(from)) * t).round() as u8;
    if v < 0.5 {
        let t = v / 0.5;
        RGBColor(blend(0x21, 0xff, t), blend(0x66, 0xff, t), blend(0xac, 0xff, t))
    } else {
        let t = (v - 0.5) / 0.5;
        RGBColor(blend(0xff, 0xb2, t), blend(0xff, 0x18, t), blend(0xff, 0x2b, t))
    }
}

fn draw_percent_correct(
    path: &Path,
    title: &str,
    series: &[PerformanceSeries],
    style: &FigureStyle,
) -> PlotResult {
    let root = BitMapBackend::new(path, style.figure_size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, caption_font(style))
        .margin(10)
        .x_label_area_size(style.scaled_font(style.font_size) * 2)
        .y_label_area_size(style.scaled_font(style.font_size) * 3)
        .build_cartesian_2d(-200.0..200.0, 0.0..100.0)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Platform Angle (°)")
        .y_desc("% Correct")
        .x_labels(5)
        .y_labels(5)
        .label_style(axis_text(style))
        .axis_desc_style(axis_text(style))
        .draw()?;

    chart.draw_series(LineSeries::new(
        vec![(-200.0, 50.0), (200.0, 50.0)],
        RGBColor(0x88, 0x88, 0x88).stroke_width(1),
    ))?;

    for line in series {
        let color = rgb(line.color);
        let points: Vec<(i32, (f64, f64))> = line
            .rows
            .iter()
            .map(|row| (row.platform_angle, (row.estimate.mean, row.estimate.std_dev)))
            .collect();
        // 180 is drawn again at -180 so the curve spans the whole circle
        let points = duplicate_boundary_for_plotting(&points, 180, -360);

        chart
            .draw_series(LineSeries::new(
                points.iter().map(|&(x, (y, _))| (f64::from(x), y)),
                color.stroke_width(style.line_width),
            ))?
            .label(line.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));

        chart.draw_series(points.iter().map(|&(x, (y, sd))| {
            ErrorBar::new_vertical(
                f64::from(x),
                (y - sd).max(0.0),
                y,
                (y + sd).min(100.0),
                color.filled(),
                style.marker_size * 2,
            )
        }))?;
    }

    if series.len() > 1 {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::LowerLeft)
            .label_font(axis_text(style))
            .border_style(BLACK)
            .background_style(WHITE.mix(0.7))
            .draw()?;
    }

    root.present()?;
    Ok(())
}

/// Percent correct against platform angle, with ±1 SD bars.
pub fn plot_percent_correct(
    path: &Path,
    title: &str,
    series: &[PerformanceSeries],
    style: &FigureStyle,
) -> Result<(), CfError> {
    draw_percent_correct(path, title, series, style).map_err(|err| CfError::Plot(err.to_string()))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

fn draw_joint_heatmap(path: &Path, title: &str, surface: &JointSurface, style: &FigureStyle) -> PlotResult {
    let root = BitMapBackend::new(path, style.figure_size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, caption_font(style))
        .margin(10)
        .x_label_area_size(style.scaled_font(style.font_size) * 2)
        .y_label_area_size(style.scaled_font(style.font_size) * 3)
        .build_cartesian_2d(-195.0..195.0, -195.0..195.0)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Speaker Angle: World (°)")
        .y_desc("Speaker Angle: Head (°)")
        .x_labels(5)
        .y_labels(5)
        .label_style(axis_text(style))
        .axis_desc_style(axis_text(style))
        .draw()?;

    // Close the seam on both axes: world -180 again at 180, then head
    let by_world: Vec<(i32, (i32, f64))> = surface
        .rows()
        .into_iter()
        .map(|c| (c.speaker_angle_world, (c.speaker_angle_platform, c.p_response)))
        .collect();
    let by_head: Vec<(i32, (i32, f64))> = duplicate_boundary_for_plotting(&by_world, -180, 360)
        .into_iter()
        .map(|(world, (head, p))| (head, (world, p)))
        .collect();
    let cells = duplicate_boundary_for_plotting(&by_head, -180, 360);

    chart.draw_series(cells.iter().map(|&(head, (world, p))| {
        let (x, y) = (f64::from(world), f64::from(head));
        Rectangle::new([(x - 15.0, y - 15.0), (x + 15.0, y + 15.0)], diverging_color(p).filled())
    }))?;

    root.present()?;
    Ok(())
}

/// Response probability over world (x) and head-centred (y) speaker angle.
pub fn plot_joint_heatmap(
    path: &Path,
    title: &str,
    surface: &JointSurface,
    style: &FigureStyle,
) -> Result<(), CfError> {
    draw_joint_heatmap(path, title, surface, style).map_err(|err| CfError::Plot(err.to_string()))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

fn draw_response_curve(
    path: &Path,
    title: &str,
    curves: &[(String, Vec<CurvePoint>)],
    style: &FigureStyle,
) -> PlotResult {
    let root = BitMapBackend::new(path, style.figure_size).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, caption_font(style))
        .margin(10)
        .x_label_area_size(style.scaled_font(style.font_size) * 2)
        .y_label_area_size(style.scaled_font(style.font_size) * 3)
        .build_cartesian_2d(-180.0..180.0, 0.0..1.0)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Sound Angle (°)")
        .y_desc("p(Response)")
        .x_labels(5)
        .y_labels(5)
        .label_style(axis_text(style))
        .axis_desc_style(axis_text(style))
        .draw()?;

    for (idx, (label, curve)) in curves.iter().enumerate() {
        let color = Palette99::pick(idx).to_rgba();
        chart
            .draw_series(LineSeries::new(
                curve.iter().map(|p| (p.theta, p.p_response)),
                color.stroke_width(style.line_width),
            ))?
            .label(label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .label_font(axis_text(style))
        .border_style(BLACK)
        .background_style(WHITE.mix(0.7))
        .draw()?;

    root.present()?;
    Ok(())
}

/// Model response probability against stimulus angle, one line per model.
pub fn plot_response_curve(
    path: &Path,
    title: &str,
    curves: &[(String, Vec<CurvePoint>)],
    style: &FigureStyle,
) -> Result<(), CfError> {
    draw_response_curve(path, title, curves, style).map_err(|err| CfError::Plot(err.to_string()))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::{RateEstimate, ResponseCount};
    use std::collections::BTreeMap;

    fn surface() -> JointSurface {
        let mut cells = BTreeMap::new();
        cells.insert((-180, 0), ResponseCount { n_response: 2, n_trial: 8 });
        cells.insert((0, -180), ResponseCount { n_response: 6, n_trial: 8 });
        cells.insert((0, 0), ResponseCount { n_response: 4, n_trial: 8 });
        JointSurface::from_cells(cells)
    }

    #[test]
    fn test_timestamped_dirs_are_unique() {
        let base = tempfile::tempdir().unwrap();
        let first = create_timestamped_output_dir(base.path()).unwrap();
        let second = create_timestamped_output_dir(base.path()).unwrap();
        assert!(first.is_dir());
        assert!(second.is_dir());
        assert_ne!(first, second);
    }

    #[test]
    fn test_percent_correct_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pct.csv");
        let rows = vec![PlatformPerformance {
            platform_angle: 90,
            n_trials: 31,
            estimate: RateEstimate {
                mean: 75.0,
                std_dev: 2.5,
                iterations: 100,
                sample_size: 400,
                mean_successes: 300.0,
            },
            p_value: 1e-20,
        }];
        write_percent_correct_csv(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("platform_angle,n_trials,pct_correct,std_dev,mean_correct,sample_size,iterations,p_value")
        );
        assert!(lines.next().unwrap().starts_with("90,31,75.0000000000,2.5000000000,300.0000000000,400,100,"));
    }

    #[test]
    fn test_joint_and_marginal_csv() {
        let dir = tempfile::tempdir().unwrap();
        let joint = dir.path().join("joint.csv");
        let marginal = dir.path().join("world.csv");
        write_joint_csv(&joint, &surface()).unwrap();
        write_marginal_csv(&marginal, &surface(), Frame::World).unwrap();

        let joint_text = fs::read_to_string(&joint).unwrap();
        assert_eq!(joint_text.lines().count(), 4);
        assert!(joint_text.contains("-180,0,2,8,0.2500000000"));

        let marginal_text = fs::read_to_string(&marginal).unwrap();
        assert!(marginal_text.starts_with("speaker_angle_world,nResp,nTrial,pResp"));
        assert!(marginal_text.contains("0,10,16,0.6250000000"));
    }

    #[test]
    fn test_format_summary_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("format_summary.csv");
        let summary = FormatSummary {
            subject: "F1810_Ursula".to_string(),
            files: 3,
            sessions: 2,
            rows_read: 40,
            kept: 31,
            probe: 5,
            ..FormatSummary::default()
        };
        write_format_summary_csv(&path, &[summary]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("subject,files,sessions,rows_read,rows_skipped,correction_removed,repeat_removed,response_removed,kept,probe")
        );
        assert_eq!(lines.next(), Some("F1810_Ursula,3,2,40,0,0,0,0,31,5"));
    }

    #[test]
    fn test_manifest_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalysisConfig::default();
        let manifest = Manifest::new("joint", &config, vec!["joint.csv".to_string()], String::new());
        let path = write_manifest_json(dir.path(), &manifest).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["mode"], "joint");
        assert_eq!(value["schema_version"], OUTPUT_SCHEMA_VERSION);
        assert_eq!(value["config"]["joint"]["sample_size"], 9);
    }

    #[test]
    fn test_diverging_color_endpoints() {
        assert_eq!(diverging_color(0.5), RGBColor(0xff, 0xff, 0xff));
        assert_eq!(diverging_color(0.0), RGBColor(0x21, 0x66, 0xac));
        assert_eq!(diverging_color(1.0), RGBColor(0xb2, 0x18, 0x2b));
        assert_eq!(diverging_color(7.0), diverging_color(1.0));
    }
}
