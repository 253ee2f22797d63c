//! Regression test framework CLI.
//!
//! Runs a directory tree of `group`/`test` scripts and reports the outcome
//! through the exit code and a per-run results directory.

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use rtf::core::labels::{join_label_lists, single_pattern};
use rtf::core::shard::parse_shard_pattern;
use rtf::exit_codes;
use rtf::io::config::load_config;
use rtf::list::{ListOptions, list_tests, render_info, render_info_csv, render_list};
use rtf::logger::LogConfig;
use rtf::logging;
use rtf::run::{RunOptions, run_tests};

#[derive(Parser)]
#[command(name = "rtf", version, about = "Regression test framework")]
struct Cli {
    /// Directory containing cases.
    #[arg(short = 'c', long = "casedir", default_value = "cases", global = true)]
    case_dir: PathBuf,

    /// Labels to apply (comma separated, `!` negates).
    #[arg(short, long, default_value = "", global = true)]
    labels: String,

    /// Increase verbosity level.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run test cases.
    Run {
        /// Only run tests whose name starts with this pattern.
        patterns: Vec<String>,

        /// Directory to place results in [default: _results].
        #[arg(short = 'r', long = "resultdir")]
        result_dir: Option<PathBuf>,

        /// ID for this test run.
        #[arg(long)]
        id: Option<String>,

        /// Trace shell scripts (`sh -x`).
        #[arg(short = 'x', long)]
        extra: bool,

        /// Run the tests of a group in parallel.
        #[arg(short, long)]
        parallel: bool,

        /// Shard to run as `N/M`, 1-based. Applies to tests that would run.
        #[arg(short, long)]
        shard: Option<String>,
    },
    /// List test cases and whether they would run.
    List {
        /// Only list tests whose name starts with this pattern.
        patterns: Vec<String>,
    },
    /// Print test cases and their descriptions.
    Info {
        /// Print CSV instead of a table.
        #[arg(long)]
        csv: bool,
    },
    /// Print version information.
    Version,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn execute(cli: Cli) -> Result<i32> {
    let config = load_config(&cli.case_dir)?;
    let labels = join_label_lists(&cli.labels, &config.labels);

    match cli.command {
        Command::Run {
            patterns,
            result_dir,
            id,
            extra,
            parallel,
            shard,
        } => {
            let shard = parse_shard_pattern(shard.as_deref().unwrap_or_default())?;
            let pattern = single_pattern(&patterns)?;
            let mut options = RunOptions::from_config(cli.case_dir, &config);
            options.labels = labels;
            options.pattern = pattern.to_string();
            if let Some(result_dir) = result_dir {
                options.result_dir = result_dir;
            }
            options.id = id.filter(|id| !id.is_empty());
            options.extra = extra;
            options.parallel |= parallel;
            options.shard = shard;
            options.log = LogConfig {
                verbosity: cli.verbose,
                coloured: io::stderr().is_terminal(),
            };
            let outcome = run_tests(&options)?;
            Ok(outcome.exit_code())
        }
        Command::List { patterns } => {
            let pattern = single_pattern(&patterns)?;
            let infos = list_tests(&ListOptions {
                case_dir: cli.case_dir,
                labels,
                pattern: pattern.to_string(),
            })?;
            let coloured = io::stdout().is_terminal();
            render_list(&mut io::stdout().lock(), &infos, coloured)?;
            Ok(exit_codes::OK)
        }
        Command::Info { csv } => {
            let infos = list_tests(&ListOptions {
                case_dir: cli.case_dir,
                labels,
                pattern: String::new(),
            })?;
            let mut out = io::stdout().lock();
            if csv {
                render_info_csv(&mut out, &infos)?;
            } else {
                render_info(&mut out, &infos)?;
            }
            Ok(exit_codes::OK)
        }
        Command::Version => {
            println!("rtf version {}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}
