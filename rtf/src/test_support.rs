//! Test-only helpers: case-tree fixtures, a capturing log backend and
//! ready-made run configurations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use tempfile::TempDir;

use crate::core::tags::parse_tags;
use crate::io::sysinfo::SystemInfo;
use crate::logger::{Backend, Level, LogDispatcher};
use crate::schedule::RunConfig;
use crate::tree::{Group, ProjectScripts, Test};

/// A case directory under a temporary directory, plus a results directory
/// next to it.
pub struct CaseTree {
    _temp: TempDir,
    root: PathBuf,
    results: PathBuf,
}

impl CaseTree {
    /// Create `<tmp>/<root_name>` and `<tmp>/_results`.
    pub fn new(root_name: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join(root_name);
        let results = temp.path().join("_results");
        fs::create_dir_all(&root).expect("create case root");
        fs::create_dir_all(&results).expect("create results dir");
        Self {
            _temp: temp,
            root,
            results,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn results(&self) -> &Path {
        &self.results
    }

    /// Create an empty directory at `rel`.
    pub fn dir(&self, rel: &str) -> PathBuf {
        let dir = self.root.join(rel);
        fs::create_dir_all(&dir).expect("create dir");
        dir
    }

    /// Write an executable `<rel>/<base>.sh` with a shebang and `body`.
    pub fn script(&self, rel: &str, base: &str, body: &str) -> PathBuf {
        let path = self.dir(rel).join(format!("{base}.sh"));
        fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
        make_executable(&path);
        path
    }

    /// Write `<rel>/group.sh`.
    pub fn group(&self, rel: &str, body: &str) -> PathBuf {
        self.script(rel, "group", body)
    }

    /// Write `<rel>/test.sh`.
    pub fn test(&self, rel: &str, body: &str) -> PathBuf {
        self.script(rel, "test", body)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}

/// Backend recording every record it receives, regardless of level.
#[derive(Default)]
pub struct CaptureBackend {
    records: Mutex<Vec<(Level, String)>>,
}

impl CaptureBackend {
    pub fn records(&self) -> Vec<(Level, String)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|(_, msg)| msg).collect()
    }
}

impl Backend for CaptureBackend {
    fn log(&self, _timestamp: DateTime<Local>, level: Level, msg: &str) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, msg.to_string()));
    }
}

/// A run configuration logging nowhere, writing logs to `log_dir`.
///
/// Host labels are `labels` plus those of [`SystemInfo::default`].
pub fn run_config(log_dir: &Path, labels: &str, pattern: &str) -> RunConfig {
    let mut config = RunConfig::new(labels, pattern, SystemInfo::default());
    config.log_dir = log_dir.to_path_buf();
    config.case_dir = log_dir.to_path_buf();
    config.root_dir = log_dir.to_path_buf();
    config.logger = Arc::new(LogDispatcher::new());
    config
}

/// An in-memory root group named `name` with `labels`.
pub fn group_with(name: &str, labels: &str, order: i64) -> Group {
    let tags = parse_tags(&format!("# LABELS: {labels}\n")).expect("tags");
    Group::root(
        PathBuf::from(name),
        name,
        order,
        tags,
        None,
        ProjectScripts::default(),
    )
}

/// An in-memory test under `parent` with its own `labels`.
pub fn test_in(parent: &Group, name: &str, labels: &str, order: i64) -> Test {
    let tags = parse_tags(&format!("# LABELS: {labels}\n")).expect("tags");
    let path = parent.path.join(name);
    let test_file = path.join("test.sh");
    Test::new(parent, path, name, order, tags, test_file)
}
