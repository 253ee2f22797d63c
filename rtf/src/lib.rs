//! Regression test framework.
//!
//! Compiles a directory tree of `group` and `test` scripts into a test tree,
//! decides what runs on this host from labels, a name pattern and an optional
//! shard, runs the scripts as child processes and reports the outcomes.
//!
//! - **[`core`]**: Pure, deterministic logic (labels, tag headers, sharding,
//!   naming, result records). No I/O.
//! - **[`io`]**: Side-effecting operations (discovery, script execution, host
//!   probing, configuration, report files).
//!
//! [`tree`], [`schedule`] and [`logger`] form the execution engine;
//! [`run`] and [`list`] implement the CLI commands on top of it.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod list;
pub mod logger;
pub mod logging;
pub mod run;
pub mod schedule;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
