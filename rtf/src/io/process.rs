//! Helpers for running child processes while streaming their output.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How a streamed child process ended.
#[derive(Debug)]
pub struct StreamedExit {
    /// `None` when waiting on the child failed.
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
    /// First error hit while draining stdout/stderr or waiting.
    pub io_error: Option<String>,
}

impl StreamedExit {
    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|status| status.code())
    }

    /// Exited with code 0 and every pipe drained cleanly.
    pub fn success(&self) -> bool {
        !self.timed_out && self.io_error.is_none() && self.status.is_some_and(|s| s.success())
    }
}

/// Spawn `cmd` and feed each stdout/stderr line to `on_stdout`/`on_stderr`.
///
/// Both pipes are drained on their own threads until EOF, independently of
/// each other and of the wait, so a chatty child never blocks on a full pipe.
/// With a `timeout`, the child runs in its own process group and the whole
/// group is killed once the timeout passes, so grandchildren holding the
/// pipes open cannot outlive it.
///
/// Returns `Err` only when the process cannot be spawned.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn run_command_streaming<O, E>(
    mut cmd: Command,
    timeout: Option<Duration>,
    on_stdout: O,
    on_stderr: E,
) -> Result<StreamedExit>
where
    O: Fn(&str) + Sync,
    E: Fn(&str) + Sync,
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        if timeout.is_some() {
            cmd.process_group(0);
        }
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (waited, stdout_result, stderr_result) = thread::scope(|scope| {
        let stdout_handle = scope.spawn(|| read_lines(stdout, &on_stdout));
        let stderr_handle = scope.spawn(|| read_lines(stderr, &on_stderr));

        let waited = wait_child(&mut child, timeout);

        (
            waited,
            join_reader(stdout_handle),
            join_reader(stderr_handle),
        )
    });

    let mut io_error = None;
    let (status, timed_out) = match waited {
        Ok(outcome) => outcome,
        Err(err) => {
            io_error = Some(format!("{err:#}"));
            (None, false)
        }
    };
    for (stream, result) in [("stdout", stdout_result), ("stderr", stderr_result)] {
        if let Err(err) = result {
            warn!(stream, err = %err, "failed to drain output");
            if io_error.is_none() {
                io_error = Some(format!("read {stream}: {err:#}"));
            }
        }
    }

    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, "command finished");
    Ok(StreamedExit {
        status,
        timed_out,
        io_error,
    })
}

fn wait_child(child: &mut Child, timeout: Option<Duration>) -> Result<(Option<ExitStatus>, bool)> {
    let Some(timeout) = timeout else {
        let status = child.wait().context("wait for command")?;
        return Ok((Some(status), false));
    };
    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Ok((Some(status), false)),
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            kill_process_group(child).context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            Ok((Some(status), true))
        }
    }
}

/// Kill every process in the child's process group, falling back to the child
/// alone.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    let group = format!("-{}", child.id());
    match Command::new("kill").args(["-KILL", "--", group.as_str()]).status() {
        Ok(status) if status.success() => Ok(()),
        outcome => {
            debug!(?outcome, "process group kill failed, killing child only");
            child.kill()
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

fn join_reader(handle: thread::ScopedJoinHandle<'_, Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read `reader` line by line until EOF, passing each line without its
/// terminator. Invalid UTF-8 is replaced rather than treated as an error.
fn read_lines<R: Read>(reader: R, on_line: &(dyn Fn(&str) + Sync)) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line);
        on_line(text.trim_end_matches(['\n', '\r']));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn streams_both_pipes_line_by_line() {
        let out = Mutex::new(Vec::new());
        let err = Mutex::new(Vec::new());
        let exit = run_command_streaming(
            sh("echo one; echo two >&2; printf 'three'"),
            None,
            |line| out.lock().expect("lock").push(line.to_string()),
            |line| err.lock().expect("lock").push(line.to_string()),
        )
        .expect("run");

        assert!(exit.success());
        assert_eq!(exit.code(), Some(0));
        assert_eq!(out.into_inner().expect("out"), vec!["one", "three"]);
        assert_eq!(err.into_inner().expect("err"), vec!["two"]);
    }

    #[test]
    fn reports_non_zero_exit_codes() {
        let exit = run_command_streaming(sh("exit 253"), None, |_| {}, |_| {}).expect("run");
        assert!(!exit.success());
        assert_eq!(exit.code(), Some(253));
    }

    #[test]
    fn kills_children_past_the_timeout() {
        let exit = run_command_streaming(
            sh("exec sleep 5"),
            Some(Duration::from_millis(100)),
            |_| {},
            |_| {},
        )
        .expect("run");
        assert!(exit.timed_out);
        assert!(!exit.success());
    }

    #[test]
    fn timeout_also_kills_grandchildren_holding_the_pipes() {
        let out = Mutex::new(Vec::new());
        let started = Instant::now();
        let exit = run_command_streaming(
            sh("sleep 5; echo done"),
            Some(Duration::from_millis(200)),
            |line| out.lock().expect("lock").push(line.to_string()),
            |_| {},
        )
        .expect("run");

        assert!(exit.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "took {:?}",
            started.elapsed()
        );
        assert!(out.into_inner().expect("out").is_empty());
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let cmd = Command::new("/nonexistent/interpreter");
        let err = run_command_streaming(cmd, None, |_| {}, |_| {}).unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }

    #[test]
    fn large_output_does_not_deadlock() {
        let count = Mutex::new(0usize);
        let exit = run_command_streaming(
            sh("i=0; while [ $i -lt 20000 ]; do echo line $i; echo err $i >&2; i=$((i+1)); done"),
            None,
            |_| *count.lock().expect("lock") += 1,
            |_| {},
        )
        .expect("run");
        assert!(exit.success());
        assert_eq!(count.into_inner().expect("count"), 20000);
    }
}
