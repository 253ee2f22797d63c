//! Shared record types produced by listing and running a project.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::labels::{LabelSet, label_string};
use crate::tree::Test;

/// Outcome of one test iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Pass,
    Fail,
    Skip,
    Cancel,
}

impl TestResult {
    /// Numeric code handed to post-test scripts.
    pub fn code(self) -> u8 {
        match self {
            TestResult::Pass => 0,
            TestResult::Fail => 1,
            TestResult::Skip => 2,
            TestResult::Cancel => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TestResult::Pass => "Pass",
            TestResult::Fail => "Fail",
            TestResult::Skip => "Skip",
            TestResult::Cancel => "Cancel",
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One execution outcome: a test iteration, a group command, or a
/// synthesized skip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Test this result belongs to. `None` for skipped groups and group commands.
    #[serde(skip)]
    pub test: Option<Arc<Test>>,
    /// Display name; carries a `.N` suffix for repeated tests.
    pub name: String,
    pub result: TestResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(rename = "duration_secs", with = "duration_secs")]
    pub duration: Duration,
}

impl RunResult {
    /// A skip record stamped with the current time and zero duration.
    pub fn skipped(name: impl Into<String>, test: Option<Arc<Test>>) -> Self {
        let now = Utc::now();
        Self {
            test,
            name: name.into(),
            result: TestResult::Skip,
            benchmark: None,
            start: now,
            end: now,
            duration: Duration::ZERO,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Listing-only projection of a group or test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub name: String,
    pub will_run: bool,
    pub summary: String,
    pub issue: String,
    pub labels: LabelSet,
    pub not_labels: LabelSet,
}

impl Info {
    /// Labels rendered as `!neg, pos` for listings.
    pub fn label_string(&self) -> String {
        label_string(&self.labels, &self.not_labels, ", ")
    }
}

/// Per-kind counts over a result list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl Tally {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a RunResult>) -> Self {
        let mut tally = Tally::default();
        for result in results {
            match result.result {
                TestResult::Pass => tally.passed += 1,
                TestResult::Fail => tally.failed += 1,
                TestResult::Skip => tally.skipped += 1,
                TestResult::Cancel => tally.cancelled += 1,
            }
        }
        tally
    }
}
