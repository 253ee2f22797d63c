//! Execution scheduler.
//!
//! A group runs as `init -> children -> deinit`. With `parallel` set, the
//! children of one group run on scoped threads and are all joined before
//! `deinit` starts; parallelism never crosses a group's init/deinit bracket.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::labels::{LabelSet, merge_into, parse_labels};
use crate::core::types::{RunResult, TestResult};
use crate::error::FatalError;
use crate::io::script::{Interpreters, ScriptRequest, execute_script};
use crate::io::sysinfo::SystemInfo;
use crate::logger::{Level, LogDispatcher, file_backend};
use crate::tree::{CommandKind, Group, GroupCommand, Node, Project, Test, TestContainer};

/// Everything a run needs, passed down the tree by reference.
#[derive(Clone)]
pub struct RunConfig {
    /// Trace shell scripts with `-x`.
    pub extra: bool,
    pub parallel: bool,
    pub case_dir: PathBuf,
    /// Directory receiving `TESTS.log` and the per-test logs.
    pub log_dir: PathBuf,
    /// Framework root (`RT_ROOT`).
    pub root_dir: PathBuf,
    pub logger: Arc<LogDispatcher>,
    pub system_info: SystemInfo,
    /// Host labels.
    pub labels: LabelSet,
    pub not_labels: LabelSet,
    pub test_pattern: String,
    pub interpreters: Interpreters,
    pub script_timeout: Option<Duration>,
    /// Shard selection; `None` runs every test that passes the filters.
    pub restrict_to_tests: Option<Arc<HashSet<String>>>,
}

impl RunConfig {
    /// Host labels are `labels` plus the labels describing `system_info`.
    pub fn new(labels: &str, test_pattern: &str, system_info: SystemInfo) -> Self {
        let (mut host_labels, not_labels) = parse_labels(labels);
        let system_labels: LabelSet = system_info.labels().into_iter().collect();
        merge_into(&mut host_labels, &system_labels);
        Self {
            extra: false,
            parallel: false,
            case_dir: PathBuf::from("."),
            log_dir: PathBuf::from("."),
            root_dir: PathBuf::from("."),
            logger: Arc::new(LogDispatcher::new()),
            system_info,
            labels: host_labels,
            not_labels,
            test_pattern: test_pattern.to_string(),
            interpreters: Interpreters::detect(),
            script_timeout: None,
            restrict_to_tests: None,
        }
    }

    fn with_logger(&self, logger: Arc<LogDispatcher>) -> Self {
        Self {
            logger,
            ..self.clone()
        }
    }
}

/// Run the project, restricted to its shard when one is set.
#[instrument(skip_all, fields(shard = project.shard, total = project.total_shards))]
pub fn run_project(
    project: &Project,
    config: &RunConfig,
    results: &mut Vec<RunResult>,
) -> Result<()> {
    if project.total_shards == 0 {
        return project.root.run(config, results);
    }
    let selected: HashSet<String> = project
        .list(config)
        .into_iter()
        .map(|info| info.name)
        .collect();
    debug!(selected = selected.len(), "running shard");
    let sharded = RunConfig {
        restrict_to_tests: Some(Arc::new(selected)),
        ..config.clone()
    };
    project.root.run(&sharded, results)
}

#[instrument(skip_all, fields(group = %group.name))]
pub fn run_group(group: &Group, config: &RunConfig, results: &mut Vec<RunResult>) -> Result<()> {
    if !group.will_run(config) {
        config.logger.log(Level::Skip, format!("{} 0.00s", group.name));
        results.push(RunResult::skipped(&group.name, None));
        return Ok(());
    }

    if let Some(init) = group.command(CommandKind::Init) {
        init.run(config, results)?;
    }

    if config.parallel {
        run_parallel(&group.children, config, results)?;
    } else {
        for child in &group.children {
            child.run(config, results)?;
        }
    }

    if let Some(deinit) = group.command(CommandKind::Deinit) {
        deinit.run(config, results)?;
    }
    Ok(())
}

/// Run siblings concurrently, one scoped thread each.
///
/// Results are appended in child order once every thread has finished. The
/// first error in child order is returned.
fn run_parallel(children: &[Node], config: &RunConfig, results: &mut Vec<RunResult>) -> Result<()> {
    let outcomes: Vec<(Vec<RunResult>, Result<()>)> = thread::scope(|scope| {
        let handles: Vec<_> = children
            .iter()
            .map(|child| {
                scope.spawn(move || {
                    let mut child_results = Vec::new();
                    let outcome = child.run(config, &mut child_results);
                    (child_results, outcome)
                })
            })
            .collect();
        handles
            .into_iter()
            .zip(children)
            .map(|(handle, child)| {
                handle.join().unwrap_or_else(|_| {
                    (
                        Vec::new(),
                        Err(anyhow!("worker for {} panicked", child.name())),
                    )
                })
            })
            .collect()
    });

    let mut first_error = None;
    for (child_results, outcome) in outcomes {
        results.extend(child_results);
        if let Err(err) = outcome
            && first_error.is_none()
        {
            first_error = Some(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Run a group script with `init` or `deinit`. A non-pass outcome is fatal.
///
/// The command's own result is not recorded.
pub fn run_group_command(
    command: &GroupCommand,
    config: &RunConfig,
    _results: &mut Vec<RunResult>,
) -> Result<()> {
    for info in command.list(config) {
        config.logger.log(Level::Debug, format!("Running {}", info.name));
    }
    let args = [command.kind.arg().to_string()];
    let outcome = execute_script(
        &ScriptRequest {
            script: &command.script,
            cwd: &command.path,
            name: "",
            args: &args,
        },
        config,
    )?;
    if outcome.result == TestResult::Pass {
        return Ok(());
    }
    let error = match command.kind {
        CommandKind::Init => FatalError::GroupInit {
            group: command.group.clone(),
            script: command.script.clone(),
        },
        CommandKind::Deinit => FatalError::GroupDeinit {
            group: command.group.clone(),
            script: command.script.clone(),
        },
    };
    config.logger.log(Level::Error, error.to_string());
    Err(error.into())
}

#[instrument(skip_all, fields(test = %test.name))]
pub fn run_test(test: &Arc<Test>, config: &RunConfig, results: &mut Vec<RunResult>) -> Result<()> {
    if !test.will_run(config) {
        config.logger.log(Level::Skip, format!("{} 0.00s", test.name));
        results.push(RunResult::skipped(&test.name, Some(Arc::clone(test))));
        return Ok(());
    }

    let repeat = test.repeat();
    for iteration in 1..=repeat {
        let name = if repeat > 1 {
            format!("{}.{iteration}", test.name)
        } else {
            test.name.clone()
        };
        let log_path = config.log_dir.join(format!("{name}.log"));
        let backend = file_backend(&log_path)?;
        let logger = Arc::new(config.logger.fork());
        let backend_name = log_path.to_string_lossy().into_owned();
        logger.register(backend_name.clone(), Arc::new(backend));

        let outcome = run_iteration(test, &name, &config.with_logger(Arc::clone(&logger)), results);
        logger.unregister(&backend_name);
        outcome?;
    }
    Ok(())
}

fn run_iteration(
    test: &Arc<Test>,
    name: &str,
    config: &RunConfig,
    results: &mut Vec<RunResult>,
) -> Result<()> {
    if let Some(pre_test) = &test.scripts.pre_test {
        let args = [name.to_string()];
        let outcome = execute_script(
            &ScriptRequest {
                script: pre_test,
                cwd: &test.path,
                name,
                args: &args,
            },
            config,
        )?;
        if outcome.result != TestResult::Pass {
            let error = FatalError::PreTest {
                test: name.to_string(),
                script: pre_test.clone(),
            };
            config.logger.log(Level::Error, error.to_string());
            return Err(error.into());
        }
    }

    config.logger.log(
        Level::Info,
        format!("Running Test {name} in {}", test.path.display()),
    );
    let mut outcome = execute_script(
        &ScriptRequest {
            script: &test.test_file,
            cwd: &test.path,
            name,
            args: &[],
        },
        config,
    )?;
    outcome.test = Some(Arc::clone(test));
    let level = match outcome.result {
        TestResult::Pass => Level::Pass,
        TestResult::Fail => Level::Fail,
        TestResult::Cancel => Level::Cancel,
        TestResult::Skip => Level::Skip,
    };
    config.logger.log(
        level,
        format!("{name} {:.2}s", outcome.duration.as_secs_f64()),
    );
    let code = outcome.result.code();
    results.push(outcome);

    if let Some(post_test) = &test.scripts.post_test {
        let args = [name.to_string(), code.to_string()];
        let post = execute_script(
            &ScriptRequest {
                script: post_test,
                cwd: &test.path,
                name,
                args: &args,
            },
            config,
        )?;
        if post.result != TestResult::Pass {
            warn!(test = name, "post-test failed");
            let error = FatalError::PostTest {
                test: name.to_string(),
                script: post_test.clone(),
            };
            config.logger.log(Level::Error, error.to_string());
            return Err(error.into());
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::io::discover::discover;
    use crate::test_support::{CaptureBackend, CaseTree, run_config};

    fn run(cases: &CaseTree, config: &RunConfig) -> (Vec<RunResult>, Result<()>) {
        let project = discover(cases.root()).expect("discover");
        let mut results = Vec::new();
        let outcome = project.run(config, &mut results);
        (results, outcome)
    }

    fn summary(results: &[RunResult]) -> Vec<(String, TestResult)> {
        results
            .iter()
            .map(|result| (result.name.clone(), result.result))
            .collect()
    }

    #[test]
    fn sequential_run_records_each_outcome() {
        let cases = CaseTree::new("root");
        cases.test("1_pass", "exit 0\n");
        cases.test("2_fail", "exit 1\n");
        cases.test("3_cancel", "exit 253\n");
        cases.test("4_elsewhere", "# LABELS: nosuchos\nexit 0\n");
        let config = run_config(cases.results(), "", "");

        let (results, outcome) = run(&cases, &config);
        outcome.expect("run");
        assert_eq!(
            summary(&results),
            vec![
                ("root.pass".to_string(), TestResult::Pass),
                ("root.fail".to_string(), TestResult::Fail),
                ("root.cancel".to_string(), TestResult::Cancel),
                ("root.elsewhere".to_string(), TestResult::Skip),
            ]
        );
        assert!(results.iter().all(|result| result.test.is_some()));
        assert!(cases.results().join("root.pass.log").is_file());
        assert!(!cases.results().join("root.elsewhere.log").exists());
    }

    #[test]
    fn excluded_group_yields_one_skip_and_runs_nothing() {
        let cases = CaseTree::new("root");
        cases.group("win", "# LABELS: win\necho ran >> \"$RT_RESULTS/marker\"\n");
        cases.test("win/t", "exit 0\n");
        let config = run_config(cases.results(), "", "");

        let (results, outcome) = run(&cases, &config);
        outcome.expect("run");
        assert_eq!(
            summary(&results),
            vec![("root.win".to_string(), TestResult::Skip)]
        );
        assert!(results[0].test.is_none());
        assert!(!cases.results().join("marker").exists());
    }

    #[test]
    fn repeat_produces_numbered_results_and_logs() {
        let cases = CaseTree::new("root");
        cases.test("rep", "# REPEAT: 3\necho iteration $RT_TEST_NAME\n");
        let config = run_config(cases.results(), "", "");

        let (results, outcome) = run(&cases, &config);
        outcome.expect("run");
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["root.rep.1", "root.rep.2", "root.rep.3"]);
        for name in names {
            let log = std::fs::read_to_string(cases.results().join(format!("{name}.log")))
                .expect("log");
            assert!(log.contains(&format!("iteration {name}")), "{log}");
            assert_eq!(log.matches("iteration").count(), 1, "{log}");
        }
    }

    #[test]
    fn init_precedes_children_and_deinit_follows_in_parallel_mode() {
        let cases = CaseTree::new("root");
        cases.group("grp", "echo \"$1\" >> \"$RT_RESULTS/order\"\n");
        for name in ["a", "b", "c", "d"] {
            cases.test(
                &format!("grp/{name}"),
                "sleep 0.2\necho test >> \"$RT_RESULTS/order\"\n",
            );
        }
        let mut config = run_config(cases.results(), "", "");
        config.parallel = true;

        let (results, outcome) = run(&cases, &config);
        outcome.expect("run");
        assert_eq!(results.len(), 4);
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["root.grp.a", "root.grp.b", "root.grp.c", "root.grp.d"]
        );

        let order = std::fs::read_to_string(cases.results().join("order")).expect("order");
        let lines: Vec<&str> = order.lines().collect();
        assert_eq!(lines.first(), Some(&"init"));
        assert_eq!(lines.last(), Some(&"deinit"));
        assert_eq!(lines.iter().filter(|line| **line == "test").count(), 4);
    }

    #[test]
    fn group_commands_log_their_listed_names() {
        let cases = CaseTree::new("root");
        cases.group("grp", "exit 0\n");
        cases.test("grp/t", "exit 0\n");
        let config = run_config(cases.results(), "", "");
        let capture = Arc::new(CaptureBackend::default());
        config.logger.register("capture", capture.clone());

        let (_, outcome) = run(&cases, &config);
        outcome.expect("run");
        let running: Vec<String> = capture
            .records()
            .into_iter()
            .filter(|(level, msg)| *level == Level::Debug && msg.starts_with("Running root"))
            .map(|(_, msg)| msg)
            .collect();
        assert_eq!(running, vec!["Running root.grp::init", "Running root.grp::deinit"]);
    }

    #[test]
    fn failing_init_is_fatal_and_skips_children() {
        let cases = CaseTree::new("root");
        cases.test("1_first", "exit 0\n");
        cases.group("2_grp", "[ \"$1\" = init ] && exit 1\nexit 0\n");
        cases.test("2_grp/t", "echo ran >> \"$RT_RESULTS/marker\"\n");
        let config = run_config(cases.results(), "", "");

        let (results, outcome) = run(&cases, &config);
        let err = outcome.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::GroupInit { group, .. }) if group == "root.grp"
        ));
        assert_eq!(
            summary(&results),
            vec![("root.first".to_string(), TestResult::Pass)]
        );
        assert!(!cases.results().join("marker").exists());
    }

    #[test]
    fn failing_pre_test_aborts_the_test() {
        let cases = CaseTree::new("root");
        cases.script("", "pre-test", "exit 1\n");
        cases.test("t", "exit 0\n");
        let config = run_config(cases.results(), "", "");

        let (results, outcome) = run(&cases, &config);
        assert!(matches!(
            outcome.unwrap_err().downcast_ref::<FatalError>(),
            Some(FatalError::PreTest { .. })
        ));
        assert!(results.is_empty());
    }

    #[test]
    fn post_test_receives_name_and_result_code() {
        let cases = CaseTree::new("root");
        cases.script("", "post-test", "echo \"$1 $2\" >> \"$RT_RESULTS/post\"\n");
        cases.test("1_ok", "exit 0\n");
        cases.test("2_bad", "exit 1\n");
        cases.test("3_gone", "exit 253\n");
        let config = run_config(cases.results(), "", "");

        let (_, outcome) = run(&cases, &config);
        outcome.expect("run");
        let post = std::fs::read_to_string(cases.results().join("post")).expect("post");
        assert_eq!(post, "root.ok 0\nroot.bad 1\nroot.gone 3\n");
    }

    #[test]
    fn pattern_selects_one_branch() {
        let cases = CaseTree::new("root");
        cases.group("apps", "");
        cases.test("apps/basic", "exit 0\n");
        cases.test("apps/advanced", "exit 0\n");
        let config = run_config(cases.results(), "", "root.apps.basic");

        let (results, outcome) = run(&cases, &config);
        outcome.expect("run");
        assert_eq!(
            summary(&results),
            vec![
                ("root.apps.advanced".to_string(), TestResult::Skip),
                ("root.apps.basic".to_string(), TestResult::Pass),
            ]
        );
    }

    #[test]
    fn shards_partition_the_runnable_tests() {
        let cases = CaseTree::new("root");
        for name in ["1_a", "2_b", "3_c", "4_d", "5_e"] {
            cases.test(name, "exit 0\n");
        }
        let config = run_config(cases.results(), "", "");
        let mut passed = Vec::new();
        for shard in 1..=2 {
            let mut project = discover(cases.root()).expect("discover");
            project.set_shard(shard, 2).expect("shard");
            let mut results = Vec::new();
            project.run(&config, &mut results).expect("run");
            assert_eq!(results.len(), 5);
            passed.extend(
                results
                    .into_iter()
                    .filter(|r| r.result == TestResult::Pass)
                    .map(|r| r.name),
            );
        }
        assert_eq!(
            passed,
            vec!["root.a", "root.b", "root.c", "root.d", "root.e"]
        );
    }

    #[test]
    fn outcomes_are_logged_at_their_levels() {
        let cases = CaseTree::new("root");
        cases.test("1_ok", "exit 0\n");
        cases.test("2_bad", "exit 1\n");
        cases.test("3_off", "# LABELS: nosuchos\nexit 0\n");
        let config = run_config(cases.results(), "", "");
        let capture = Arc::new(CaptureBackend::default());
        config.logger.register("capture", capture.clone());

        let (_, outcome) = run(&cases, &config);
        outcome.expect("run");
        let records = capture.records();
        let at = |level: Level| -> Vec<String> {
            records
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, msg)| msg.clone())
                .collect()
        };
        assert_eq!(at(Level::Pass).len(), 1);
        assert!(at(Level::Pass)[0].starts_with("root.ok "));
        assert!(at(Level::Fail)[0].starts_with("root.bad "));
        assert_eq!(at(Level::Skip), vec!["root.off 0.00s"]);
        assert_eq!(config.logger.backend_names(), vec!["capture"]);
    }
}
