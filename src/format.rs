//! Raw session files to formatted trial tables
//!
//! Each test block was saved as a tab-delimited text file named like
//! `02_03_2018 level53_Pendleton 14_12_10.516 Block_J5-90.txt` (date, task
//! level, start time, block). Column names changed while data were being
//! collected, so headers are normalised before rows are read. Correction
//! trials and trials with repeated stimuli are dropped, responses are
//! binarised, angles are converted from clock positions to degrees and every
//! trial is flagged as test or probe for its subject.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use csv::{ByteRecord, ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use walkdir::WalkDir;

use crate::angles::{clock_to_world_angle, platform_relative};
use crate::subjects::Subject;
use crate::trials::{de_angle, de_flag, ser_flag, LoadReport, Trial};
use crate::CfError;

/// Task levels with rotating-platform test sessions.
pub const TEST_LEVELS: [&str; 3] = ["level53", "level54", "level55"];

/// Sessions recorded before the platform could rotate lack this column and
/// are ignored.
pub const PLATFORM_COLUMN: &str = "CenterSpoutRotation";

pub const RAW_COLUMNS: [&str; 8] = [
    "Trial",
    "StartTime",
    "Speaker Location",
    "Response",
    "Correct",
    "CorrectionTrial",
    "nStimReps",
    PLATFORM_COLUMN,
];

/// Spouts at 3 and 9 o'clock; `(Response - 3) / 6` maps them to 0 and 1.
const RESPONSE_SPOUTS: (i32, i32) = (3, 9);

const SESSION_DATE_FORMAT: &str = "%d_%m_%Y %H_%M_%S";

fn normalise_header(raw: &str) -> &str {
    match raw {
        "CorrectionTrial?" => "CorrectionTrial",
        "CenterReward?" => "CenterReward",
        "Speaker_Location" => "Speaker Location",
        "LED_Location" => "LED Location",
        other => other,
    }
}

fn de_whole<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| serde::de::Error::custom(format!("invalid whole number '{raw}'")))?;
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(serde::de::Error::custom(format!(
            "expected a whole number, got '{raw}'"
        )));
    }
    Ok(value as i32)
}

/// One row of a raw session file, before any filtering.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RawTrial {
    #[serde(rename = "Trial", deserialize_with = "de_whole")]
    pub trial: i32,
    /// Seconds since the session started
    #[serde(rename = "StartTime")]
    pub start_time: f64,
    /// Clock position of the speaker (1 to 12)
    #[serde(rename = "Speaker Location", deserialize_with = "de_whole")]
    pub speaker_location: i32,
    /// Clock position of the chosen spout
    #[serde(rename = "Response", deserialize_with = "de_whole")]
    pub response: i32,
    #[serde(rename = "Correct", deserialize_with = "de_flag")]
    pub correct: bool,
    #[serde(rename = "CorrectionTrial", deserialize_with = "de_flag")]
    pub correction_trial: bool,
    #[serde(rename = "nStimReps", deserialize_with = "de_whole")]
    pub n_stim_reps: i32,
    #[serde(rename = "CenterSpoutRotation", deserialize_with = "de_angle")]
    pub platform_angle: i32,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub started: NaiveDateTime,
    pub trials: Vec<RawTrial>,
    pub report: LoadReport,
}

/// Session start parsed from a raw file stem.
///
/// Fractional seconds in the time field are dropped.
pub fn session_datetime(file_stem: &str) -> Option<NaiveDateTime> {
    let parts: Vec<&str> = file_stem.split_whitespace().collect();
    let [date, _level, time, _block] = parts.as_slice() else {
        return None;
    };
    let time = time.get(0..8)?;
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), SESSION_DATE_FORMAT).ok()
}

/// Raw test-level session files anywhere below `dir`, in file-name order.
pub fn list_session_files(dir: &Path) -> Result<Vec<PathBuf>, CfError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let wanted = {
            let name = entry.file_name().to_string_lossy();
            name.ends_with(".txt") && TEST_LEVELS.iter().any(|level| name.contains(level))
        };
        if wanted {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Parse one tab-delimited session.
///
/// Returns `Ok(None)` when the file has no platform rotation column. Any other
/// missing column fails the load; rows that cannot be parsed are skipped and
/// counted. Fields are read as bytes so stray Latin-1 text in unused columns
/// does not cost the row.
pub fn read_session<R: Read>(
    reader: R,
    source_name: &str,
    started: NaiveDateTime,
) -> Result<Option<Session>, CfError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers: ByteRecord = rdr
        .byte_headers()?
        .iter()
        .map(|h| normalise_header(String::from_utf8_lossy(h).trim()).to_string())
        .collect::<Vec<String>>()
        .into();

    if !headers.iter().any(|h| h == PLATFORM_COLUMN.as_bytes()) {
        log::info!("{source_name}: no {PLATFORM_COLUMN} column, ignoring session");
        return Ok(None);
    }
    for column in RAW_COLUMNS {
        if !headers.iter().any(|h| h == column.as_bytes()) {
            return Err(CfError::MissingColumn {
                column,
                source_name: source_name.to_string(),
            });
        }
    }

    let mut trials = Vec::new();
    let mut rows_read = 0_usize;
    let mut skipped = 0_usize;
    let mut record = ByteRecord::new();

    loop {
        match rdr.read_byte_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => {
                rows_read += 1;
                log::warn!("{source_name}: skipping row {rows_read}: {err}");
                skipped += 1;
                continue;
            }
        }
        rows_read += 1;
        match record.deserialize::<RawTrial>(Some(&headers)) {
            Ok(trial) => trials.push(trial),
            Err(err) => {
                log::warn!("{source_name}: skipping row {rows_read}: {err}");
                skipped += 1;
            }
        }
    }

    Ok(Some(Session {
        started,
        trials,
        report: LoadReport {
            source_name: source_name.to_string(),
            rows_read,
            skipped,
        },
    }))
}

fn ser_datetime<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// One row of a formatted subject file.
///
/// The columns read by [`crate::trials::TrialTable`] are a subset; the rest
/// keep the session context of each trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FormattedTrial {
    #[serde(rename = "SessionID")]
    pub session_id: usize,
    #[serde(rename = "SessionDate", serialize_with = "ser_datetime")]
    pub session_date: NaiveDateTime,
    #[serde(rename = "Trial")]
    pub trial: i32,
    #[serde(rename = "StartTime")]
    pub start_time: f64,
    #[serde(rename = "Speaker Location")]
    pub speaker_location: i32,
    pub speaker_angle_world: i32,
    pub speaker_angle_platform: i32,
    #[serde(rename = "CenterSpoutRotation")]
    pub platform_angle: i32,
    pub response_angle_world: i32,
    pub response_angle_platform: i32,
    #[serde(rename = "Response", serialize_with = "ser_flag")]
    pub response: bool,
    #[serde(rename = "Correct", serialize_with = "ser_flag")]
    pub correct: bool,
    #[serde(serialize_with = "ser_flag")]
    pub not_probe: bool,
}

impl FormattedTrial {
    pub fn to_trial(&self) -> Trial {
        Trial {
            speaker_angle_world: self.speaker_angle_world,
            speaker_angle_platform: self.speaker_angle_platform,
            platform_angle: self.platform_angle,
            response: self.response,
            correct: self.correct,
            not_probe: self.not_probe,
        }
    }
}

/// Trial accounting for one subject's formatting run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatSummary {
    pub subject: String,
    pub files: usize,
    /// Files with platform rotation data
    pub sessions: usize,
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub correction_removed: usize,
    pub repeat_removed: usize,
    /// Responses at neither of the two spouts
    pub response_removed: usize,
    pub kept: usize,
    pub probe: usize,
}

/// Filter and annotate the trials of chronologically ordered sessions.
pub fn format_sessions(
    subject: &Subject,
    sessions: &[Session],
    summary: &mut FormatSummary,
) -> Vec<FormattedTrial> {
    let mut formatted = Vec::new();
    for (idx, session) in sessions.iter().enumerate() {
        summary.sessions += 1;
        summary.rows_read += session.report.rows_read;
        summary.rows_skipped += session.report.skipped;

        for raw in &session.trials {
            if raw.correction_trial {
                summary.correction_removed += 1;
                continue;
            }
            if raw.n_stim_reps != 1 {
                summary.repeat_removed += 1;
                continue;
            }
            let response = match raw.response {
                r if r == RESPONSE_SPOUTS.0 => false,
                r if r == RESPONSE_SPOUTS.1 => true,
                other => {
                    log::warn!(
                        "{}: trial {} has response at clock {other}, dropping",
                        session.report.source_name,
                        raw.trial
                    );
                    summary.response_removed += 1;
                    continue;
                }
            };

            let speaker_angle_world = clock_to_world_angle(raw.speaker_location);
            let response_angle_world = clock_to_world_angle(raw.response);
            let not_probe = subject.is_test_location(speaker_angle_world, raw.platform_angle);
            if !not_probe {
                summary.probe += 1;
            }

            formatted.push(FormattedTrial {
                session_id: idx + 1,
                session_date: session.started,
                trial: raw.trial,
                start_time: raw.start_time,
                speaker_location: raw.speaker_location,
                speaker_angle_world,
                speaker_angle_platform: platform_relative(speaker_angle_world, raw.platform_angle),
                platform_angle: raw.platform_angle,
                response_angle_world,
                response_angle_platform: platform_relative(response_angle_world, raw.platform_angle),
                response,
                correct: raw.correct,
                not_probe,
            });
        }
    }
    summary.kept = formatted.len();
    formatted
}

/// Load, filter and annotate every test session of `subject` found below
/// `subject_dir`.
///
/// Sessions are ordered by start time and trials within a session by their
/// start time.
pub fn format_subject(
    subject: &Subject,
    subject_dir: &Path,
) -> Result<(Vec<FormattedTrial>, FormatSummary), CfError> {
    let files = list_session_files(subject_dir)?;
    log::info!("{}: found {} files", subject.name, files.len());

    let mut summary = FormatSummary {
        subject: subject.file_stem(),
        files: files.len(),
        ..FormatSummary::default()
    };

    let mut sessions = Vec::new();
    for path in &files {
        let source_name = path.display().to_string();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(started) = session_datetime(&stem) else {
            log::warn!("{source_name}: cannot read session date from file name, ignoring");
            continue;
        };
        if let Some(mut session) = read_session(File::open(path)?, &source_name, started)? {
            session
                .trials
                .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
            sessions.push(session);
        }
    }
    sessions.sort_by_key(|s| s.started);

    if sessions.is_empty() {
        return Err(CfError::EmptyInput(format!(
            "no test sessions for {} in {}",
            subject.name,
            subject_dir.display()
        )));
    }

    let trials = format_sessions(subject, &sessions, &mut summary);
    log::info!(
        "{}: test data {} / {} trials ({} probe)",
        subject.name,
        summary.kept,
        summary.rows_read,
        summary.probe
    );
    Ok((trials, summary))
}

pub fn write_formatted_csv(path: &Path, trials: &[FormattedTrial]) -> Result<(), CfError> {
    let mut writer = Writer::from_path(path)?;
    for trial in trials {
        writer.serialize(trial)?;
    }
    writer.flush()?;
    log::info!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subjects::find;
    use crate::trials::TrialTable;
    use std::fs;

    const HEADER: &str = "Trial\tStartTime\tSpeaker_Location\tResponse\tCorrect\tCorrectionTrial?\tnStimReps\tCenterSpoutRotation\tCenterPixelVal\t\n";

    fn started() -> NaiveDateTime {
        session_datetime("02_03_2018 level53_Ursula 14_12_10.516 Block_J5-90").unwrap()
    }

    #[test]
    fn test_session_datetime_from_file_stem() {
        let dt = started();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2018-03-02 14:12:10");
        assert!(session_datetime("level53_Ursula.txt").is_none());
        assert!(session_datetime("31_02_2018 level53_Ursula 14_12_10 Block").is_none());
    }

    #[test]
    fn test_read_session_normalises_old_headers() {
        let raw = format!("{HEADER}1\t2.5\t6\t9\t1\t0\t1\t90\t\t\n2\t4.0\t12\t3\t0\t1\t1\t90\t\t\n3\tx\t6\t9\t1\t0\t1\t90\t\t\n");
        let session = read_session(raw.as_bytes(), "mem", started()).unwrap().unwrap();

        assert_eq!(session.trials.len(), 2);
        assert_eq!(session.report.rows_read, 3);
        assert_eq!(session.report.skipped, 1);
        assert_eq!(session.trials[0].speaker_location, 6);
        assert!(session.trials[1].correction_trial);
    }

    #[test]
    fn test_read_session_without_rotation_is_ignored() {
        let raw = "Trial\tStartTime\tSpeaker Location\tResponse\tCorrect\n1\t2.0\t6\t9\t1\n";
        assert!(read_session(raw.as_bytes(), "old", started()).unwrap().is_none());

        let raw = "Trial\tStartTime\tCenterSpoutRotation\n1\t2.0\t0\n";
        assert!(matches!(
            read_session(raw.as_bytes(), "partial", started()),
            Err(CfError::MissingColumn { column: "Speaker Location", .. })
        ));
    }

    #[test]
    fn test_format_sessions_filters_and_flags_probes() {
        let ursula = find("Ursula").unwrap();
        // Ursula is tested at head angles -90 and 90
        let raw = format!(
            "{HEADER}\
             1\t1.0\t6\t9\t1\t0\t1\t90\t\t\n\
             2\t2.0\t6\t3\t0\t1\t1\t90\t\t\n\
             3\t3.0\t6\t3\t0\t0\t2\t90\t\t\n\
             4\t4.0\t6\t3\t1\t0\t1\t0\t\t\n\
             5\t5.0\t3\t12\t0\t0\t1\t0\t\t\n"
        );
        let session = read_session(raw.as_bytes(), "mem", started()).unwrap().unwrap();
        let mut summary = FormatSummary::default();
        let trials = format_sessions(&ursula, &[session], &mut summary);

        assert_eq!(summary.correction_removed, 1);
        assert_eq!(summary.repeat_removed, 1);
        assert_eq!(summary.response_removed, 1);
        assert_eq!(trials.len(), 2);
        assert_eq!(summary.kept, 2);

        // speaker at 6 o'clock (0 deg), platform at 90: head angle -90
        let test = trials[0];
        assert_eq!(test.speaker_angle_world, 0);
        assert_eq!(test.speaker_angle_platform, -90);
        assert_eq!(test.response_angle_world, -90);
        assert!(test.response);
        assert!(test.not_probe);

        // platform at 0 puts the same speaker at head angle 0, a probe
        let probe = trials[1];
        assert!(!probe.response);
        assert!(!probe.not_probe);
        assert_eq!(summary.probe, 1);
    }

    #[test]
    fn test_format_subject_writes_loadable_file() {
        let raw_dir = tempfile::tempdir().unwrap();
        let pendleton = find("Pendleton").unwrap();
        let subject_dir = raw_dir.path().join(pendleton.file_stem()).join("2018");
        fs::create_dir_all(&subject_dir).unwrap();

        // later session first in file-name order
        fs::write(
            subject_dir.join("05_03_2018 level54_Pendleton 09_00_00.100 Block_J5-91.txt"),
            format!("{HEADER}1\t1.0\t12\t3\t1\t0\t1\t-150\t\t\n"),
        )
        .unwrap();
        fs::write(
            subject_dir.join("02_03_2018 level53_Pendleton 14_12_10.516 Block_J5-90.txt"),
            format!("{HEADER}2\t9.0\t3\t9\t0\t0\t1\t0\t\t\n1\t1.0\t6\t9\t1\t0\t1\t30\t\t\n"),
        )
        .unwrap();
        fs::write(subject_dir.join("02_03_2018 level40_Pendleton 10_00_00.0 Block_J1.txt"), "ignored").unwrap();

        let (trials, summary) = format_subject(&pendleton, &raw_dir.path().join(pendleton.file_stem())).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.sessions, 2);
        assert_eq!(trials.len(), 3);
        assert_eq!(trials.iter().map(|t| t.session_id).collect::<Vec<_>>(), vec![1, 1, 2]);
        assert_eq!(trials.iter().map(|t| t.trial).collect::<Vec<_>>(), vec![1, 2, 1]);
        // Pendleton is trained at 6 and 12 o'clock only
        assert_eq!(trials.iter().map(|t| t.not_probe).collect::<Vec<_>>(), vec![true, false, true]);

        let out = raw_dir.path().join("F1701_Pendleton.csv");
        write_formatted_csv(&out, &trials).unwrap();
        let table = TrialTable::from_path(&out).unwrap();
        assert_eq!(table.skipped(), 0);
        let loaded: Vec<Trial> = table.trials;
        let expected: Vec<Trial> = trials.iter().map(FormattedTrial::to_trial).collect();
        assert_eq!(loaded, expected);
    }

    #[test]
    fn test_format_subject_without_sessions_fails() {
        let raw_dir = tempfile::tempdir().unwrap();
        let crumble = find("Crumble").unwrap();
        assert!(matches!(
            format_subject(&crumble, raw_dir.path()),
            Err(CfError::EmptyInput(_))
        ));
    }
}
