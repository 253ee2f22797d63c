//! Results directory layout and report files.
//!
//! ```text
//! <resultdir>/
//!   latest -> <id>
//!   <id>/
//!     TESTS.log  TESTS.csv  SUMMARY.csv  SUMMARY.json  <test>.log ...
//! ```

use std::borrow::Cow;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{RunResult, Tally};
use crate::io::sysinfo::SystemInfo;

pub const TESTS_LOG_NAME: &str = "TESTS.log";
pub const TESTS_CSV_NAME: &str = "TESTS.csv";
pub const SUMMARY_CSV_NAME: &str = "SUMMARY.csv";
pub const SUMMARY_JSON_NAME: &str = "SUMMARY.json";
pub const LATEST_NAME: &str = "latest";

const TESTS_CSV_FIELDS: [&str; 8] = [
    "ID",
    "Timestamp",
    "Duration",
    "Name",
    "Result",
    "Benchmark",
    "Description",
    "Issues",
];

const SUMMARY_CSV_FIELDS: [&str; 15] = [
    "ID",
    "Version",
    "Start Time",
    "End Time",
    "Duration",
    "Passed",
    "Failed",
    "Skipped",
    "Labels",
    "OS",
    "OS Name",
    "OS Version",
    "System Model",
    "CPU",
    "Memory",
];

/// Structured record of one run, written as `SUMMARY.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub system: SystemInfo,
    pub labels: Vec<String>,
    /// Only results that belong to a test; skipped groups are left out.
    pub results: Vec<RunResult>,
}

impl Summary {
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or_default()
    }

    pub fn tally(&self) -> Tally {
        Tally::from_results(&self.results)
    }
}

/// Create `<result_dir>/<id>` and return its absolute path.
///
/// With `update_latest`, `<result_dir>/latest` is pointed at the new
/// directory.
pub fn setup_results_dir(result_dir: &Path, id: &str, update_latest: bool) -> Result<PathBuf> {
    let run_dir = result_dir.join(id);
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("create results directory {}", run_dir.display()))?;
    if update_latest {
        point_latest(result_dir, id)?;
    }
    std::path::absolute(&run_dir)
        .with_context(|| format!("resolve results directory {}", run_dir.display()))
}

fn point_latest(result_dir: &Path, id: &str) -> Result<()> {
    let link = result_dir.join(LATEST_NAME);
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link).with_context(|| format!("remove {}", link.display()))?;
    }
    write_latest(&link, id).with_context(|| format!("write {}", link.display()))?;
    debug!(link = %link.display(), id, "updated latest results pointer");
    Ok(())
}

#[cfg(unix)]
fn write_latest(link: &Path, id: &str) -> std::io::Result<()> {
    std::os::unix::fs::symlink(id, link)
}

#[cfg(not(unix))]
fn write_latest(link: &Path, id: &str) -> std::io::Result<()> {
    fs::write(link, format!("{id}\n"))
}

/// Quote a CSV field when it contains a separator, quote or line break.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Write one CSV record terminated by `\n`.
pub fn write_csv_row<W: Write, S: AsRef<str>>(writer: &mut W, fields: &[S]) -> std::io::Result<()> {
    let line = fields
        .iter()
        .map(|field| csv_field(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

/// One row per result, group skips included.
pub fn write_tests_csv(path: &Path, id: &str, results: &[RunResult]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let write = |writer: &mut BufWriter<fs::File>| -> std::io::Result<()> {
        write_csv_row(writer, &TESTS_CSV_FIELDS)?;
        for result in results {
            let (description, issues) = result
                .test
                .as_ref()
                .map(|test| (test.tags.summary.as_str(), test.tags.issue.as_str()))
                .unwrap_or_default();
            let ended = timestamp(result.end);
            let duration = seconds(result.duration);
            let row: [&str; 8] = [
                id,
                &ended,
                &duration,
                &result.name,
                result.result.name(),
                result.benchmark.as_deref().unwrap_or_default(),
                description,
                issues,
            ];
            write_csv_row(writer, &row)?;
        }
        writer.flush()
    };
    write(&mut writer).with_context(|| format!("write {}", path.display()))
}

/// Header plus a single row describing the run.
pub fn write_summary_csv(path: &Path, summary: &Summary, tally: &Tally) -> Result<()> {
    let system = &summary.system;
    let row = [
        summary.id.clone(),
        env!("CARGO_PKG_VERSION").to_string(),
        timestamp(summary.start),
        timestamp(summary.end),
        seconds(summary.duration()),
        tally.passed.to_string(),
        tally.failed.to_string(),
        tally.skipped.to_string(),
        summary.labels.join(" "),
        system.os.clone(),
        system.name.clone(),
        system.version.clone(),
        system.model.clone(),
        system.cpu.clone(),
        system.memory.to_string(),
    ];
    let mut out = Vec::new();
    write_csv_row(&mut out, &SUMMARY_CSV_FIELDS)
        .and_then(|()| write_csv_row(&mut out, &row))
        .context("render summary csv")?;
    fs::write(path, out).with_context(|| format!("write {}", path.display()))
}

pub fn write_summary_json(path: &Path, summary: &Summary) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(summary).context("serialize summary")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))
}

pub fn read_summary_json(path: &Path) -> Result<Summary> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}
