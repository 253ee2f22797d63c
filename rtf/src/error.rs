//! Typed errors that callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error` with context. These types are
//! wrapped in `anyhow::Error` as well and recovered with `downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid invocation: nothing was executed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid shard pattern: {0}")]
    InvalidShard(String),
    #[error("shard must be between 1 and totalShards (got {shard}/{total})")]
    ShardOutOfRange { shard: usize, total: usize },
    #[error("expected only one test pattern")]
    TooManyPatterns,
}

/// Malformed tag header in a group or test script.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("field {field} specified multiple times")]
    Duplicate { field: &'static str },
}

/// Failure that aborts the enclosing group or test branch.
///
/// Distinct from a failed test: a test that exits non-zero is a
/// [`TestResult::Fail`](crate::core::types::TestResult::Fail) result, not an error.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("error running {}:init", script.display())]
    GroupInit { group: String, script: PathBuf },
    #[error("error running {}:deinit", script.display())]
    GroupDeinit { group: String, script: PathBuf },
    #[error("error running pre-test {} for {test}", script.display())]
    PreTest { test: String, script: PathBuf },
    #[error("error running post-test {} for {test}", script.display())]
    PostTest { test: String, script: PathBuf },
    #[error("can't find a suitable shell to execute {}", script.display())]
    NoInterpreter { script: PathBuf },
}
