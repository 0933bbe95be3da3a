//! Trial records and tabular loading
//!
//! A formatted behaviour file holds one row per trial. Only six columns are
//! needed downstream; everything else in the file is ignored.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CfError;

pub const REQUIRED_COLUMNS: [&str; 6] = [
    "speaker_angle_world",
    "speaker_angle_platform",
    "CenterSpoutRotation",
    "Response",
    "Correct",
    "not_probe",
];

/// One observed trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    /// Speaker angle in the room (allocentric frame)
    #[serde(deserialize_with = "de_angle")]
    pub speaker_angle_world: i32,
    /// Speaker angle relative to the platform (egocentric frame)
    #[serde(deserialize_with = "de_angle")]
    pub speaker_angle_platform: i32,
    /// Platform rotation in the room
    #[serde(rename = "CenterSpoutRotation", deserialize_with = "de_angle")]
    pub platform_angle: i32,
    /// Binary response (which of the two spouts was chosen)
    #[serde(rename = "Response", deserialize_with = "de_flag", serialize_with = "ser_flag")]
    pub response: bool,
    #[serde(rename = "Correct", deserialize_with = "de_flag", serialize_with = "ser_flag")]
    pub correct: bool,
    /// False for probe sounds presented from untrained locations
    #[serde(deserialize_with = "de_flag", serialize_with = "ser_flag")]
    pub not_probe: bool,
}

pub(crate) fn de_angle<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| serde::de::Error::custom(format!("invalid angle '{raw}'")))?;
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(serde::de::Error::custom(format!(
            "angle must be a whole number of degrees, got '{raw}'"
        )));
    }
    Ok(value as i32)
}

pub(crate) fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim() {
        "1" | "1.0" | "True" | "true" => Ok(true),
        "0" | "0.0" | "False" | "false" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected binary value, got '{other}'"
        ))),
    }
}

pub(crate) fn ser_flag<S>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u8(u8::from(*flag))
}

/// Row accounting for one loaded source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub source_name: String,
    pub rows_read: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TrialTable {
    pub trials: Vec<Trial>,
    pub reports: Vec<LoadReport>,
}

impl TrialTable {
    pub fn new(trials: Vec<Trial>) -> Self {
        Self {
            trials,
            reports: Vec::new(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, CfError> {
        let file = File::open(path)?;
        Self::from_reader(file, &path.display().to_string())
    }

    /// Parse comma-delimited trial rows.
    ///
    /// A missing required column fails the whole load. Rows that cannot be
    /// parsed are skipped and counted in the returned report.
    pub fn from_reader<R: Read>(reader: R, source_name: &str) -> Result<Self, CfError> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = trimmed_headers(rdr.headers()?);

        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(CfError::MissingColumn {
                    column,
                    source_name: source_name.to_string(),
                });
            }
        }

        let mut trials = Vec::new();
        let mut rows_read = 0_usize;
        let mut skipped = 0_usize;

        for (idx, result) in rdr.records().enumerate() {
            rows_read += 1;
            let record = match result {
                Ok(record) => record,
                Err(err) if err.is_io_error() => return Err(err.into()),
                Err(err) => {
                    log::warn!("{source_name}: skipping row {}: {err}", idx + 1);
                    skipped += 1;
                    continue;
                }
            };

            match record.deserialize::<Trial>(Some(&headers)) {
                Ok(trial) => trials.push(trial),
                Err(err) => {
                    log::warn!("{source_name}: skipping row {}: {err}", idx + 1);
                    skipped += 1;
                }
            }
        }

        log::info!(
            "{source_name}: loaded {} / {rows_read} trials ({skipped} skipped)",
            trials.len()
        );

        Ok(Self {
            trials,
            reports: vec![LoadReport {
                source_name: source_name.to_string(),
                rows_read,
                skipped,
            }],
        })
    }

    /// Combine tables from several subjects into one.
    pub fn concat(tables: Vec<TrialTable>) -> Self {
        let mut combined = TrialTable::default();
        for table in tables {
            combined.trials.extend(table.trials);
            combined.reports.extend(table.reports);
        }
        combined
    }

    /// Trials with sounds from trained (non-probe) locations.
    pub fn test_trials(&self) -> Vec<Trial> {
        non_probe_trials(&self.trials)
    }

    pub fn skipped(&self) -> usize {
        self.reports.iter().map(|r| r.skipped).sum()
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}

/// Keep only trials with sounds from trained (non-probe) locations.
pub fn non_probe_trials(trials: &[Trial]) -> Vec<Trial> {
    trials.iter().copied().filter(|t| t.not_probe).collect()
}

fn trimmed_headers(headers: &StringRecord) -> StringRecord {
    headers.iter().map(str::trim).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "Trial,speaker_angle_world,speaker_angle_platform,CenterSpoutRotation,Response,Correct,not_probe,SessionID";

    #[test]
    fn test_load_valid_rows() {
        let data = format!(
            "{HEADER}\n1,0,-90,90,1.0,1,1,4\n2,-180.0,0,180,0.0,0,0,4\n"
        );
        let table = TrialTable::from_reader(data.as_bytes(), "memory").unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.skipped(), 0);
        assert_eq!(
            table.trials[0],
            Trial {
                speaker_angle_world: 0,
                speaker_angle_platform: -90,
                platform_angle: 90,
                response: true,
                correct: true,
                not_probe: true,
            }
        );
        assert_eq!(table.trials[1].speaker_angle_world, -180);
        assert!(!table.trials[1].not_probe);
    }

    #[test]
    fn test_unparsable_rows_are_skipped_and_counted() {
        let data = format!(
            "{HEADER}\n1,0,-90,90,1,1,1,4\n2,north,0,180,0,0,1,4\n3,30,0,30,2,0,1,4\n4,30,0\n5,60,30,30,0,1,1,4\n"
        );
        let table = TrialTable::from_reader(data.as_bytes(), "memory").unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.skipped(), 3);
        assert_eq!(table.reports[0].rows_read, 5);
    }

    #[test]
    fn test_missing_column_fails_load() {
        let data = "speaker_angle_world,speaker_angle_platform,CenterSpoutRotation,Response,not_probe\n0,0,0,1,1\n";
        let err = TrialTable::from_reader(data.as_bytes(), "memory").unwrap_err();
        match err {
            CfError::MissingColumn { column, .. } => assert_eq!(column, "Correct"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_concat_and_probe_filter() {
        let a = TrialTable::from_reader(
            format!("{HEADER}\n1,0,0,0,1,1,1,1\n").as_bytes(),
            "a",
        )
        .unwrap();
        let b = TrialTable::from_reader(
            format!("{HEADER}\n1,90,90,0,0,0,0,1\n2,nan,0,0,0,0,0,1\n").as_bytes(),
            "b",
        )
        .unwrap();

        let combined = TrialTable::concat(vec![a, b]);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined.reports.len(), 2);
        assert_eq!(combined.skipped(), 1);
        assert_eq!(combined.test_trials().len(), 1);
    }

    #[test]
    fn test_serialize_flags_as_integers() {
        let trial = Trial {
            speaker_angle_world: 30,
            speaker_angle_platform: -60,
            platform_angle: 90,
            response: true,
            correct: false,
            not_probe: true,
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(trial).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();

        assert!(text.starts_with(
            "speaker_angle_world,speaker_angle_platform,CenterSpoutRotation,Response,Correct,not_probe"
        ));
        assert!(text.contains("30,-60,90,1,0,1"));
    }
}
