//! Project configuration stored as `rtf.toml` at the top of the case directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// File name looked up in the case directory.
pub const CONFIG_FILE_NAME: &str = "rtf.toml";

/// Project configuration (TOML).
///
/// Every field is optional; command-line flags take precedence over values
/// found here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory receiving per-run results (default `_results`).
    pub results_dir: Option<PathBuf>,

    /// Run sibling tests concurrently.
    pub parallel: bool,

    /// Extra host labels, comma separated, `!` negates.
    pub labels: String,

    /// Framework root exposed to scripts as `RT_ROOT`. `RT_ROOT` in the
    /// environment wins over this value.
    pub root_dir: Option<PathBuf>,

    /// Kill scripts still running after this many seconds. Unset waits forever.
    pub script_timeout_secs: Option<u64>,
}

impl ProjectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.script_timeout_secs == Some(0) {
            return Err(anyhow!("script_timeout_secs must be > 0"));
        }
        if let Some(dir) = &self.results_dir
            && dir.as_os_str().is_empty()
        {
            return Err(anyhow!("results_dir must be non-empty"));
        }
        Ok(())
    }

    pub fn script_timeout(&self) -> Option<Duration> {
        self.script_timeout_secs.map(Duration::from_secs)
    }
}

/// Load `rtf.toml` from `case_dir`.
///
/// If the file is missing, returns `ProjectConfig::default()`.
pub fn load_config(case_dir: &Path) -> Result<ProjectConfig> {
    let path = case_dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ProjectConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(temp.path()).expect("load");
        assert_eq!(cfg, ProjectConfig::default());
        assert_eq!(cfg.script_timeout(), None);
    }

    #[test]
    fn load_reads_all_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "results_dir = \"out\"\nparallel = true\nlabels = \"fast,!slow\"\n\
             root_dir = \"/opt/rtf\"\nscript_timeout_secs = 30\n",
        )
        .expect("write");

        let cfg = load_config(temp.path()).expect("load");
        assert_eq!(cfg.results_dir, Some(PathBuf::from("out")));
        assert!(cfg.parallel);
        assert_eq!(cfg.labels, "fast,!slow");
        assert_eq!(cfg.root_dir, Some(PathBuf::from("/opt/rtf")));
        assert_eq!(cfg.script_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "script_timeout_secs = 0\n",
        )
        .expect("write");

        let err = load_config(temp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("script_timeout_secs must be > 0"));
    }

    #[test]
    fn unknown_types_fail_to_parse() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(CONFIG_FILE_NAME), "parallel = \"yes\"\n").expect("write");
        assert!(load_config(temp.path()).is_err());
    }
}
