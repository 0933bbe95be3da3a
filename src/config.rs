use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::bootstrap::BootstrapConfig;
use crate::model::CircularParams;
use crate::subjects::Frame;
use crate::CfError;

pub const OUTPUT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub schema_version: String,
    pub seed: u64,
    /// Directory with formatted per-subject files (`F<num>_<name>.csv`)
    pub data_dir: PathBuf,
    /// Directory with one folder of raw session files per subject
    pub raw_dir: PathBuf,
    #[serde(deserialize_with = "de_percent_correct")]
    pub percent_correct: BootstrapConfig,
    #[serde(deserialize_with = "de_joint")]
    pub joint: BootstrapConfig,
    pub simulation: SimulationSettings,
    pub style: StyleKind,
}

const PERCENT_CORRECT_DEFAULTS: BootstrapConfig = BootstrapConfig {
    sample_size: 400,
    iterations: 100,
};

const JOINT_DEFAULTS: BootstrapConfig = BootstrapConfig {
    sample_size: 9,
    iterations: 100,
};

/// A `[percent_correct]` or `[joint]` table; keys left out fall back to that
/// section's own defaults.
#[derive(Debug, Deserialize)]
struct BootstrapSection {
    sample_size: Option<usize>,
    iterations: Option<usize>,
}

impl BootstrapSection {
    fn or(self, defaults: BootstrapConfig) -> BootstrapConfig {
        BootstrapConfig {
            sample_size: self.sample_size.unwrap_or(defaults.sample_size),
            iterations: self.iterations.unwrap_or(defaults.iterations),
        }
    }
}

fn de_percent_correct<'de, D>(deserializer: D) -> Result<BootstrapConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(BootstrapSection::deserialize(deserializer)?.or(PERCENT_CORRECT_DEFAULTS))
}

fn de_joint<'de, D>(deserializer: D) -> Result<BootstrapConfig, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(BootstrapSection::deserialize(deserializer)?.or(JOINT_DEFAULTS))
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            schema_version: OUTPUT_SCHEMA_VERSION.to_string(),
            seed: 0xCF_2021,
            data_dir: PathBuf::from("data"),
            raw_dir: PathBuf::from("data/original"),
            percent_correct: PERCENT_CORRECT_DEFAULTS,
            joint: JOINT_DEFAULTS,
            simulation: SimulationSettings::default(),
            style: StyleKind::Paper,
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, CfError> {
        let raw = fs::read_to_string(path)?;
        let config: AnalysisConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CfError> {
        if self.schema_version != OUTPUT_SCHEMA_VERSION {
            return Err(CfError::InvalidConfig(format!(
                "schema_version '{}' does not match supported version '{OUTPUT_SCHEMA_VERSION}'",
                self.schema_version
            )));
        }
        self.percent_correct.validate()?;
        self.joint.validate()?;
        self.simulation.validate()?;
        Ok(())
    }

    pub fn figure_style(&self) -> FigureStyle {
        self.style.figure_style()
    }
}

/// Model observer used by the simulate mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub vertical_offset: f64,
    /// Degrees
    pub horizontal_offset: f64,
    pub amplitude: f64,
    pub coldness: f64,
    /// Frame the observer's model is defined over
    pub frame: Frame,
    /// Frame the task rewards responses in
    pub task: Frame,
    pub trials_per_stimulus: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            vertical_offset: 0.5,
            horizontal_offset: 0.0,
            amplitude: 0.3,
            coldness: 2.0,
            frame: Frame::Head,
            task: Frame::Head,
            trials_per_stimulus: 20,
        }
    }
}

impl SimulationSettings {
    pub fn params(&self) -> CircularParams {
        CircularParams::new(
            self.vertical_offset,
            self.horizontal_offset,
            self.amplitude,
            self.coldness,
        )
    }

    pub fn validate(&self) -> Result<(), CfError> {
        self.params().validate()?;
        if self.trials_per_stimulus == 0 {
            return Err(CfError::InvalidConfig(
                "simulation.trials_per_stimulus must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleKind {
    Paper,
    Talk,
}

impl StyleKind {
    pub fn figure_style(self) -> FigureStyle {
        match self {
            StyleKind::Paper => FigureStyle::paper(),
            StyleKind::Talk => FigureStyle::talk(),
        }
    }
}

/// Figure styling passed to every renderer. Built once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FigureStyle {
    pub name: &'static str,
    pub font_family: &'static str,
    pub font_size: u32,
    pub axis_label_size: u32,
    pub axis_font_color: (u8, u8, u8),
    /// Pixels
    pub figure_size: (u32, u32),
    pub line_width: u32,
    pub marker_size: u32,
}

impl FigureStyle {
    pub fn paper() -> Self {
        Self {
            name: "paper",
            font_family: "sans-serif",
            font_size: 8,
            axis_label_size: 7,
            axis_font_color: (0x4d, 0x4d, 0x4d),
            figure_size: (480, 480),
            line_width: 1,
            marker_size: 2,
        }
    }

    pub fn talk() -> Self {
        Self {
            name: "talk",
            font_family: "sans-serif",
            font_size: 15,
            axis_label_size: 13,
            axis_font_color: (0x4d, 0x4d, 0x4d),
            figure_size: (960, 720),
            line_width: 2,
            marker_size: 4,
        }
    }

    /// Font sizes are in points; rendered sizes scale with the figure.
    pub fn scaled_font(&self, points: u32) -> u32 {
        points * self.figure_size.0.max(self.figure_size.1) / 240
    }
}
