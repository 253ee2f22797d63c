//! Host information used for labels, script environment and reports.

use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

const UNKNOWN: &str = "UNKNOWN";

/// Description of the machine the tests run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// `osx`, `win`, or the platform name (`linux`, `freebsd`, ...).
    pub os: String,
    /// Distribution or product name.
    pub name: String,
    pub version: String,
    pub arch: String,
    pub model: String,
    pub cpu: String,
    /// Total memory in bytes, `-1` when unknown.
    pub memory: i64,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: os_id(std::env::consts::OS).to_string(),
            name: UNKNOWN.to_string(),
            version: UNKNOWN.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            model: UNKNOWN.to_string(),
            cpu: UNKNOWN.to_string(),
            memory: -1,
        }
    }
}

impl SystemInfo {
    /// Probe the current host. Missing details are reported as `UNKNOWN`.
    pub fn probe() -> Self {
        let mut info = SystemInfo::default();
        platform_specifics(&mut info);
        debug!(os = %info.os, name = %info.name, version = %info.version, "probed host");
        info
    }

    /// Labels describing this host, in a stable order. `UNKNOWN` and empty
    /// values are left out.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = vec![
            self.os.clone(),
            self.name.clone(),
            self.version.clone(),
            self.arch.clone(),
        ];
        if matches!(self.os.as_str(), "osx" | "win") {
            labels.push(std::env::consts::OS.to_string());
        }
        labels.retain(|label| !label.is_empty() && label != UNKNOWN);
        labels
    }
}

fn os_id(platform: &str) -> &str {
    match platform {
        "macos" => "osx",
        "windows" => "win",
        other => other,
    }
}

#[cfg(target_os = "linux")]
fn platform_specifics(info: &mut SystemInfo) {
    if let Ok(release) = std::fs::read_to_string("/etc/alpine-release") {
        info.name = "Alpine".to_string();
        info.version = release.trim().to_string();
    } else if let Ok(release) = std::fs::read_to_string("/etc/os-release") {
        let (name, version) = parse_os_release(&release);
        info.name = name.unwrap_or_else(|| UNKNOWN.to_string());
        info.version = version.unwrap_or_else(|| UNKNOWN.to_string());
    }
    if let Ok(cpuinfo) = std::fs::read_to_string("/proc/cpuinfo")
        && let Some(cpu) = parse_cpuinfo(&cpuinfo)
    {
        info.cpu = cpu;
    }
    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo")
        && let Some(memory) = parse_meminfo(&meminfo)
    {
        info.memory = memory;
    }
}

#[cfg(target_os = "macos")]
fn platform_specifics(info: &mut SystemInfo) {
    if let Some(name) = command_output("sw_vers", &["-productName"]) {
        info.name = name;
    }
    if let Some(version) = command_output("sw_vers", &["-productVersion"]) {
        info.version = version;
    }
    if let Some(model) = command_output("sysctl", &["-n", "hw.model"]) {
        info.model = model;
    }
    if let Some(cpu) = command_output("sysctl", &["-n", "machdep.cpu.brand_string"]) {
        info.cpu = cpu;
    }
    if let Some(memory) = command_output("sysctl", &["-n", "hw.memsize"]) {
        info.memory = memory.parse().unwrap_or(-1);
    }
}

#[cfg(target_os = "windows")]
fn platform_specifics(info: &mut SystemInfo) {
    info.name = "Windows".to_string();
    if let Some(ver) = command_output("cmd", &["/C", "ver"]) {
        // "Microsoft Windows [Version 10.0.19045.3803]"
        if let Some(version) = ver
            .split_once("Version ")
            .map(|(_, rest)| rest.trim_end_matches(']').trim().to_string())
        {
            info.version = version;
        }
    }
    if let Ok(cpu) = std::env::var("PROCESSOR_IDENTIFIER") {
        info.cpu = cpu;
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn platform_specifics(_info: &mut SystemInfo) {}

#[cfg_attr(target_os = "linux", allow(dead_code))]
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `ID` and `VERSION_ID` from an os-release file.
pub fn parse_os_release(contents: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut version = None;
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "ID" => name = Some(value),
            "VERSION_ID" => version = Some(value),
            _ => {}
        }
    }
    (name, version)
}

/// First `model name` entry of `/proc/cpuinfo`.
pub fn parse_cpuinfo(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "model name").then(|| value.trim().to_string())
    })
}

/// `MemTotal` of `/proc/meminfo`, in bytes.
pub fn parse_meminfo(contents: &str) -> Option<i64> {
    contents.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let kb: i64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb * 1024)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_os_release() {
        let contents = "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\n";
        assert_eq!(
            parse_os_release(contents),
            (Some("ubuntu".to_string()), Some("22.04".to_string()))
        );
    }

    #[test]
    fn parses_cpu_and_memory() {
        let cpuinfo = "processor\t: 0\nmodel name\t: Example CPU @ 3.00GHz\n";
        assert_eq!(
            parse_cpuinfo(cpuinfo),
            Some("Example CPU @ 3.00GHz".to_string())
        );
        let meminfo = "MemTotal:       32717852 kB\nMemFree: 1 kB\n";
        assert_eq!(parse_meminfo(meminfo), Some(32717852 * 1024));
        assert_eq!(parse_meminfo("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn labels_skip_unknown_values() {
        let info = SystemInfo {
            os: "linux".to_string(),
            name: "ubuntu".to_string(),
            version: UNKNOWN.to_string(),
            arch: "x86_64".to_string(),
            model: UNKNOWN.to_string(),
            cpu: UNKNOWN.to_string(),
            memory: -1,
        };
        assert_eq!(info.labels(), vec!["linux", "ubuntu", "x86_64"]);
    }

    #[test]
    fn platform_names_map_to_short_ids() {
        assert_eq!(os_id("macos"), "osx");
        assert_eq!(os_id("windows"), "win");
        assert_eq!(os_id("linux"), "linux");
    }
}
