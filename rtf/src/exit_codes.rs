//! Stable exit codes for rtf CLI commands.

/// Command succeeded and no test failed.
pub const OK: i32 = 0;
/// At least one test failed.
pub const FAILED: i32 = 1;
/// Invalid invocation, configuration or case tree, or a fatal group/test
/// script failure.
pub const INVALID: i32 = 2;
