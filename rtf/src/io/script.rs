//! Script execution protocol.
//!
//! Every group, test, pre-test and post-test script goes through
//! [`execute_script`]: pick an interpreter from the script extension, build
//! the `RT_*` environment, stream output into the log dispatcher and map the
//! exit status onto a [`TestResult`].

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, instrument};

use crate::core::labels::label_string;
use crate::core::types::{RunResult, TestResult};
use crate::error::FatalError;
use crate::io::process::{StreamedExit, run_command_streaming};
use crate::logger::Level;
use crate::schedule::RunConfig;

/// Exit code a script uses to report that it cancelled itself.
pub const CANCEL_EXIT_CODE: i32 = 253;

/// Name passed to scripts that do not belong to a test.
const UNKNOWN_NAME: &str = "UNKNOWN";

/// Interpreter family for a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Shell,
    PowerShell,
}

impl ScriptKind {
    pub fn of(script: &Path) -> Self {
        match script.extension().and_then(OsStr::to_str) {
            Some("ps1") => ScriptKind::PowerShell,
            _ => ScriptKind::Shell,
        }
    }
}

/// Interpreters available on this host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interpreters {
    pub shell: Option<PathBuf>,
    pub powershell: Option<PathBuf>,
}

impl Interpreters {
    /// Resolve interpreters for the current platform.
    ///
    /// Windows uses the first `bash.exe` on `PATH` outside `System32` (that one
    /// belongs to WSL) and `powershell.exe`. Elsewhere the shell is `/bin/sh`
    /// and PowerShell is `pwsh` if it is on `PATH`.
    pub fn detect() -> Self {
        if cfg!(windows) {
            let shell = search_path(
                |dir| {
                    !dir.to_string_lossy()
                        .to_ascii_lowercase()
                        .contains("system32")
                },
                "bash.exe",
            );
            Self {
                shell,
                powershell: Some(PathBuf::from("powershell.exe")),
            }
        } else {
            Self {
                shell: Some(PathBuf::from("/bin/sh")),
                powershell: search_path(|_| true, "pwsh"),
            }
        }
    }

    pub fn for_kind(&self, kind: ScriptKind) -> Option<&Path> {
        match kind {
            ScriptKind::Shell => self.shell.as_deref(),
            ScriptKind::PowerShell => self.powershell.as_deref(),
        }
    }
}

fn search_path(accept_dir: impl Fn(&Path) -> bool, file_name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .filter(|dir| accept_dir(dir))
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// Locate the script called `name` (without extension) in `dir`.
///
/// The platform's native script type wins: `.ps1` on Windows, `.sh`
/// elsewhere. The other extension is used as a fallback.
pub fn find_script(dir: &Path, name: &str) -> Option<PathBuf> {
    let preferred: [&str; 2] = if cfg!(windows) {
        ["ps1", "sh"]
    } else {
        ["sh", "ps1"]
    };
    preferred
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|candidate| candidate.is_file())
}

/// Framework root: `RT_ROOT`, then the configured root, then the directory
/// above the running executable's directory, then the current directory.
pub fn resolve_root_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(root) = env::var_os("RT_ROOT").filter(|root| !root.is_empty()) {
        return PathBuf::from(root);
    }
    if let Some(root) = configured {
        return root.to_path_buf();
    }
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf))
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Set `key` to `value`, replacing an existing entry in place or appending.
pub fn set_env(env: &mut Vec<(OsString, OsString)>, key: &str, value: impl Into<OsString>) {
    let value = value.into();
    match env.iter_mut().find(|(k, _)| same_key(k, key)) {
        Some(entry) => entry.1 = value,
        None => env.push((OsString::from(key), value)),
    }
}

fn same_key(existing: &OsStr, key: &str) -> bool {
    if cfg!(windows) {
        existing.to_string_lossy().eq_ignore_ascii_case(key)
    } else {
        existing == key
    }
}

fn lookup<'a>(env: &'a [(OsString, OsString)], key: &str) -> Option<&'a OsStr> {
    env.iter()
        .find(|(k, _)| same_key(k, key))
        .map(|(_, v)| v.as_os_str())
}

/// The environment a script runs with: the inherited environment plus the
/// `RT_*` contract and a search path starting with the utility directory.
pub fn script_environment(
    inherited: Vec<(OsString, OsString)>,
    kind: ScriptKind,
    name: &str,
    config: &RunConfig,
) -> Result<Vec<(OsString, OsString)>> {
    let mut env = inherited;
    let root = &config.root_dir;
    let utils = root.join("bin");
    let lib = match kind {
        ScriptKind::Shell => root.join("lib").join("lib.sh"),
        ScriptKind::PowerShell => root.join("lib").join("lib.ps1"),
    };
    let project_dir = std::path::absolute(&config.case_dir)
        .with_context(|| format!("resolve project root {}", config.case_dir.display()))?;

    set_env(&mut env, "RT_ROOT", root.as_os_str());
    set_env(&mut env, "RT_UTILS", utils.as_os_str());
    set_env(&mut env, "RT_PROJECT_ROOT", project_dir.as_os_str());
    set_env(&mut env, "RT_OS", config.system_info.os.as_str());
    set_env(&mut env, "RT_OS_VER", config.system_info.version.as_str());
    set_env(
        &mut env,
        "RT_LABELS",
        label_string(&config.labels, &config.not_labels, ":"),
    );
    set_env(&mut env, "RT_TEST_NAME", name);
    set_env(&mut env, "RT_LIB", lib.as_os_str());
    set_env(&mut env, "RT_RESULTS", config.log_dir.as_os_str());

    let (path_key, separator) = match kind {
        ScriptKind::Shell => ("PATH", ":"),
        ScriptKind::PowerShell => ("Path", ";"),
    };
    let mut search_path = utils.into_os_string();
    if let Some(existing) = lookup(&env, path_key).filter(|existing| !existing.is_empty()) {
        search_path.push(separator);
        search_path.push(existing);
    }
    set_env(&mut env, path_key, search_path);
    if kind == ScriptKind::Shell && cfg!(windows) {
        set_env(&mut env, "MSYS_NO_PATHCONV", "1");
    }
    Ok(env)
}

/// One script invocation.
#[derive(Debug, Clone, Copy)]
pub struct ScriptRequest<'a> {
    pub script: &'a Path,
    /// Working directory of the script.
    pub cwd: &'a Path,
    /// Logical test name (`RT_TEST_NAME`); empty means "not a test".
    pub name: &'a str,
    pub args: &'a [String],
}

/// Run a script and classify its outcome.
///
/// A script that cannot be started is a `Fail` result, not an error. Errors
/// are reserved for a missing interpreter or an unusable environment.
#[instrument(skip_all, fields(script = %request.script.display(), name = request.name))]
pub fn execute_script(request: &ScriptRequest<'_>, config: &RunConfig) -> Result<RunResult> {
    let name = if request.name.is_empty() {
        UNKNOWN_NAME
    } else {
        request.name
    };
    let kind = ScriptKind::of(request.script);
    let interpreter =
        config
            .interpreters
            .for_kind(kind)
            .ok_or_else(|| FatalError::NoInterpreter {
                script: request.script.to_path_buf(),
            })?;

    let mut args: Vec<OsString> = Vec::new();
    match kind {
        ScriptKind::PowerShell => {
            args.push("-NoProfile".into());
            args.push("-NonInteractive".into());
        }
        ScriptKind::Shell if config.extra => args.push("-x".into()),
        ScriptKind::Shell => {}
    }
    args.push(request.script.as_os_str().to_owned());
    args.extend(request.args.iter().map(OsString::from));

    let env = script_environment(env::vars_os().collect(), kind, name, config)?;
    let mut cmd = Command::new(interpreter);
    cmd.args(&args)
        .env_clear()
        .envs(env)
        .current_dir(request.cwd);

    let logger = &config.logger;
    logger.log(
        Level::Info,
        format!(
            "Running command: {} {}",
            interpreter.display(),
            args.iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        ),
    );

    let start = Utc::now();
    let started = Instant::now();
    let result = match run_command_streaming(
        cmd,
        config.script_timeout,
        |line| logger.log(Level::Stdout, line),
        |line| logger.log(Level::Stderr, line),
    ) {
        Ok(exit) => {
            if exit.timed_out {
                logger.log(
                    Level::Critical,
                    format!("{} timed out", request.script.display()),
                );
            }
            if let Some(err) = &exit.io_error {
                logger.log(Level::Critical, err);
            }
            classify_exit(&exit)
        }
        Err(err) => {
            logger.log(Level::Critical, format!("{err:#}"));
            TestResult::Fail
        }
    };
    let duration = started.elapsed();
    let end = Utc::now();
    debug!(?result, duration_ms = duration.as_millis() as u64, "script finished");

    Ok(RunResult {
        test: None,
        name: name.to_string(),
        result,
        benchmark: None,
        start,
        end,
        duration,
    })
}

/// Map a finished process onto a test outcome.
///
/// `253` cancels; success needs exit code `0` with both pipes drained
/// cleanly; anything else (other codes, signals, timeouts) fails.
pub fn classify_exit(exit: &StreamedExit) -> TestResult {
    if exit.timed_out {
        return TestResult::Fail;
    }
    if exit.code() == Some(CANCEL_EXIT_CODE) {
        TestResult::Cancel
    } else if exit.success() {
        TestResult::Pass
    } else {
        TestResult::Fail
    }
}
