//! Orchestration for `rtf run`.
//!
//! Discovers the case tree, prepares the results directory and loggers, runs
//! the project and writes the report files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::core::labels::label_string;
use crate::core::types::{RunResult, Tally};
use crate::exit_codes;
use crate::io::config::ProjectConfig;
use crate::io::discover::discover;
use crate::io::report::{
    SUMMARY_CSV_NAME, SUMMARY_JSON_NAME, Summary, TESTS_CSV_NAME, TESTS_LOG_NAME,
    setup_results_dir, write_summary_csv, write_summary_json, write_tests_csv,
};
use crate::io::script::resolve_root_dir;
use crate::io::sysinfo::SystemInfo;
use crate::logger::{Level, LogConfig, LogDispatcher, file_backend};
use crate::schedule::RunConfig;

pub const DEFAULT_RESULTS_DIR: &str = "_results";

/// Backend name of the console logger.
const CONSOLE_BACKEND: &str = "Console";

/// Inputs of one `rtf run`, after merging CLI flags with `rtf.toml`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub case_dir: PathBuf,
    pub labels: String,
    pub pattern: String,
    pub result_dir: PathBuf,
    /// Run id; a UUID is generated (and `latest` updated) when absent.
    pub id: Option<String>,
    pub extra: bool,
    pub parallel: bool,
    /// `(shard, total)`, 1-based.
    pub shard: Option<(usize, usize)>,
    pub root_dir: Option<PathBuf>,
    pub script_timeout: Option<Duration>,
    pub log: LogConfig,
}

impl RunOptions {
    /// Options for `case_dir` with every other value taken from `config`.
    pub fn from_config(case_dir: PathBuf, config: &ProjectConfig) -> Self {
        Self {
            case_dir,
            labels: config.labels.clone(),
            pattern: String::new(),
            result_dir: config
                .results_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_DIR)),
            id: None,
            extra: false,
            parallel: config.parallel,
            shard: None,
            root_dir: config.root_dir.clone(),
            script_timeout: config.script_timeout(),
            log: LogConfig::default(),
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub id: String,
    /// Absolute results directory of this run.
    pub log_dir: PathBuf,
    pub tally: Tally,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.tally.failed > 0 {
            exit_codes::FAILED
        } else {
            exit_codes::OK
        }
    }
}

/// Run the project and write its reports.
///
/// A fatal group or test script failure is returned as an error after the
/// reports for everything that completed have been written.
#[instrument(skip_all, fields(case_dir = %options.case_dir.display()))]
pub fn run_tests(options: &RunOptions) -> Result<RunOutcome> {
    let mut project = discover(&options.case_dir)
        .with_context(|| format!("load cases from {}", options.case_dir.display()))?;
    if let Some((shard, total)) = options.shard {
        project.set_shard(shard, total)?;
    }

    let system_info = SystemInfo::probe();
    let mut config = RunConfig::new(&options.labels, &options.pattern, system_info.clone());
    let labels = label_list(&config);
    println!("LABELS: {}", labels.join(", "));

    let (id, generated) = match &options.id {
        Some(id) => (id.clone(), false),
        None => (Uuid::new_v4().to_string(), true),
    };
    println!("ID: {id}");
    let log_dir = setup_results_dir(&options.result_dir, &id, generated)?;

    let logger = Arc::new(LogDispatcher::new());
    logger.register(
        TESTS_LOG_NAME,
        Arc::new(file_backend(&log_dir.join(TESTS_LOG_NAME))?),
    );
    logger.register(CONSOLE_BACKEND, Arc::new(options.log.console()));

    config.extra = options.extra;
    config.parallel = options.parallel;
    config.case_dir = options.case_dir.clone();
    config.log_dir = log_dir.clone();
    config.root_dir = resolve_root_dir(options.root_dir.as_deref());
    config.logger = Arc::clone(&logger);
    config.script_timeout = options.script_timeout;
    info!(id = %id, log_dir = %log_dir.display(), parallel = config.parallel, "starting run");

    let start = Utc::now();
    let started = Instant::now();
    let mut results = Vec::new();
    let run_outcome = project.run(&config, &mut results);
    let elapsed = started.elapsed();
    let end = Utc::now();

    let tally = Tally::from_results(&results);
    let summary = Summary {
        id: id.clone(),
        start,
        end,
        system: system_info.clone(),
        labels,
        results: results
            .iter()
            .filter(|result| result.test.is_some())
            .cloned()
            .collect(),
    };
    write_reports(&log_dir, &summary, &results, &tally)?;

    logger.log(Level::Summary, format!("LogDir: {id}"));
    logger.log(Level::Summary, format!("Version: {}", system_info.version));
    logger.log(Level::Summary, format!("Passed: {}", tally.passed));
    logger.log(Level::Summary, format!("Failed: {}", tally.failed));
    logger.log(Level::Summary, format!("Cancelled: {}", tally.cancelled));
    logger.log(Level::Summary, format!("Skipped: {}", tally.skipped));
    logger.log(
        Level::Summary,
        format!("Duration: {:.2}s", elapsed.as_secs_f64()),
    );

    run_outcome?;
    Ok(RunOutcome { id, log_dir, tally })
}

/// Host labels for display and reports: positives then `!`-prefixed
/// negatives, each sorted.
fn label_list(config: &RunConfig) -> Vec<String> {
    let rendered = label_string(&config.labels, &config.not_labels, "\n");
    let (negative, positive): (Vec<String>, Vec<String>) = rendered
        .lines()
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .partition(|label| label.starts_with('!'));
    positive.into_iter().chain(negative).collect()
}

fn write_reports(
    log_dir: &Path,
    summary: &Summary,
    results: &[RunResult],
    tally: &Tally,
) -> Result<()> {
    write_tests_csv(&log_dir.join(TESTS_CSV_NAME), &summary.id, results)?;
    write_summary_csv(&log_dir.join(SUMMARY_CSV_NAME), summary, tally)?;
    write_summary_json(&log_dir.join(SUMMARY_JSON_NAME), summary)
}
