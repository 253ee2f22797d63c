//! Side-effecting helpers: filesystem discovery, script processes, host
//! probing, configuration and report files.

pub mod config;
pub mod discover;
pub mod process;
pub mod report;
pub mod script;
pub mod sysinfo;
