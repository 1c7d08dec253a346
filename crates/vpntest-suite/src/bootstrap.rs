//! Environment bootstrap: run directory, `meta.txt`, OS packages and the
//! required-tool check.

use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::runner::{StepExecutor, StepOutcome, INTERPRETER};
use vpntest_core::{HostInfo, Result, RunConfig, RunContext, VpnTestError, VERSION};

/// Metadata file name.
pub const META_FILE: &str = "meta.txt";

/// Dependency install log file name.
pub const INSTALL_LOG: &str = "00_install.log";

/// Tools every run needs after bootstrap.
pub const REQUIRED_TOOLS: &[&str] = &["curl", INTERPRETER];

/// Supported package managers, in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Apk,
}

impl PackageManager {
    pub const ALL: [PackageManager; 4] = [
        PackageManager::Apt,
        PackageManager::Dnf,
        PackageManager::Yum,
        PackageManager::Apk,
    ];

    /// Binary used to detect and drive the manager.
    pub fn binary(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Yum => "yum",
            PackageManager::Apk => "apk",
        }
    }

    /// HTTP client, DNS tool, CPU benchmark and network tools.
    pub fn packages(&self) -> &'static [&'static str] {
        match self {
            PackageManager::Apt => &["curl", "dnsutils", "sysbench", "iproute2", "iperf3"],
            PackageManager::Dnf | PackageManager::Yum => {
                &["curl", "bind-utils", "sysbench", "iproute", "iperf3"]
            }
            PackageManager::Apk => &["curl", "bind-tools", "sysbench", "iproute2", "iperf3", "bash"],
        }
    }

    /// Commands that install [`Self::packages`].
    pub fn install_commands(&self) -> Vec<Vec<String>> {
        let own = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let with_packages = |mut base: Vec<String>| {
            base.extend(self.packages().iter().map(|p| p.to_string()));
            base
        };
        match self {
            PackageManager::Apt => vec![
                own(&["env", "DEBIAN_FRONTEND=noninteractive", "apt-get", "update"]),
                with_packages(own(&[
                    "env",
                    "DEBIAN_FRONTEND=noninteractive",
                    "apt-get",
                    "install",
                    "-y",
                ])),
            ],
            PackageManager::Dnf | PackageManager::Yum => {
                vec![with_packages(own(&[self.binary(), "install", "-y"]))]
            }
            PackageManager::Apk => vec![with_packages(own(&["apk", "add", "--no-cache"]))],
        }
    }

    /// First supported manager for which `available` answers true.
    pub fn detect_with(available: impl Fn(&str) -> bool) -> Option<Self> {
        PackageManager::ALL
            .into_iter()
            .find(|pm| available(pm.binary()))
    }
}

/// Render `meta.txt`.
pub fn render_meta(config: &RunConfig, ctx: &RunContext, host: &HostInfo) -> String {
    let mut out = String::new();
    let tag = if ctx.tag.is_empty() { "-" } else { ctx.tag.as_str() };
    let _ = writeln!(out, "script=vpn-test");
    let _ = writeln!(out, "version={VERSION}");
    let _ = writeln!(out, "timestamp={}", ctx.started_rfc3339());
    let _ = writeln!(out, "run={}", ctx.run_name);
    let _ = writeln!(out, "tag={tag}");
    let _ = writeln!(out, "hostname={}", host.hostname);
    let _ = writeln!(out, "kernel={}", host.kernel);
    let _ = writeln!(out, "os={}", host.os);
    let _ = writeln!(out, "arch={}", host.arch);
    let _ = writeln!(out, "lang={}", config.lang);
    let _ = writeln!(out, "timeout={}", config.timeout_secs);
    out
}

/// Write `meta.txt` into the run directory.
pub fn write_meta(config: &RunConfig, ctx: &RunContext, host: &HostInfo) -> Result<PathBuf> {
    let path = ctx.artifact(META_FILE);
    std::fs::write(&path, render_meta(config, ctx, host))?;
    Ok(path)
}

/// Install the package list with `pm`, logging to [`INSTALL_LOG`].
///
/// Installer failures are reported in the outcome but never abort the run.
pub async fn install_dependencies(
    executor: &dyn StepExecutor,
    ctx: &RunContext,
    pm: PackageManager,
) -> Result<StepOutcome> {
    info!(manager = pm.binary(), packages = ?pm.packages(), "Installing dependencies");
    let outcome = executor
        .run_local("install", &ctx.artifact(INSTALL_LOG), &pm.install_commands())
        .await?;
    if !outcome.success {
        warn!(
            manager = pm.binary(),
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "Dependency installation failed; continuing"
        );
    }
    Ok(outcome)
}

/// Collect [`HostInfo`] on the blocking pool; the probes spawn `uname`.
pub async fn probe_host() -> Result<HostInfo> {
    tokio::task::spawn_blocking(HostInfo::collect)
        .await
        .map_err(|e| VpnTestError::Io(std::io::Error::other(e)))
}

/// Prepare the run directory and host.
///
/// Creates the run directory, writes `meta.txt`, installs packages when
/// enabled and a supported manager exists, then checks [`REQUIRED_TOOLS`].
/// Privilege is checked by the caller before anything here runs.
pub async fn prepare(
    config: &RunConfig,
    ctx: &RunContext,
    executor: &dyn StepExecutor,
) -> Result<HostInfo> {
    ctx.create_dir()?;
    let host = probe_host().await?;
    let meta = write_meta(config, ctx, &host)?;
    info!(path = %meta.display(), "Wrote run metadata");

    if config.install_deps {
        match PackageManager::detect_with(|tool| executor.tool_available(tool)) {
            Some(pm) => {
                install_dependencies(executor, ctx, pm).await?;
            }
            None => warn!("No supported package manager found; skipping dependency install"),
        }
    } else {
        info!("Dependency install disabled");
    }

    for tool in REQUIRED_TOOLS {
        if !executor.tool_available(tool) {
            return Err(VpnTestError::MissingTool(tool.to_string()));
        }
    }
    Ok(host)
}
