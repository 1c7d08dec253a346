//! Host probes: privilege, tool availability and system metadata.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, VpnTestError};
use crate::extract::PLACEHOLDER;

/// Default location of the OS identification file.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Resolve `name` through `PATH` to an executable file.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Whether `name` resolves to an executable on `PATH`.
pub fn command_available(name: &str) -> bool {
    find_in_path(name).is_some()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Trimmed stdout of a successful command, `None` on any failure.
pub fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Effective user id as printed by `id -u`.
pub fn current_uid() -> Result<String> {
    command_stdout("id", &["-u"]).ok_or_else(|| VpnTestError::MissingTool("id".to_string()))
}

/// Fail unless running as root.
pub fn require_root() -> Result<()> {
    let uid = current_uid()?;
    if uid == "0" {
        Ok(())
    } else {
        Err(VpnTestError::PrivilegeRequired { uid })
    }
}

/// `PRETTY_NAME` from os-release content, unquoted.
pub fn parse_pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .filter_map(|line| line.trim().strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .find(|value| !value.is_empty())
}

/// Best-effort description of the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostInfo {
    pub hostname: String,
    pub kernel: String,
    pub os: String,
    pub arch: String,
}

impl HostInfo {
    /// Probe the running host.
    pub fn collect() -> Self {
        Self::collect_with(Path::new(OS_RELEASE_PATH))
    }

    /// Probe the running host, reading OS identity from `os_release`.
    pub fn collect_with(os_release: &Path) -> Self {
        let hostname = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| command_stdout("uname", &["-n"]));
        let os = std::fs::read_to_string(os_release)
            .ok()
            .and_then(|text| parse_pretty_name(&text));

        Self {
            hostname: or_placeholder(hostname),
            kernel: or_placeholder(command_stdout("uname", &["-r"])),
            os: or_placeholder(os),
            arch: command_stdout("uname", &["-m"])
                .unwrap_or_else(|| std::env::consts::ARCH.to_string()),
        }
    }
}

fn or_placeholder(value: Option<String>) -> String {
    value.unwrap_or_else(|| PLACEHOLDER.to_string())
}
