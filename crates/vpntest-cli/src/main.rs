//! vpn-test - VPS/VPN quality check orchestrator
//!
//! Runs a fixed battery of local checks and third-party benchmark, censorship
//! and reputation scripts, keeps each tool's raw output under a per-run
//! directory and writes a flat `summary.txt` plus `report.json`.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, Level};

use vpntest_core::{
    init_tracing, require_root, FetchFailurePolicy, Lang, RunConfig, RunContext, TestToggles,
    DEFAULT_TIMEOUT_SECS,
};
use vpntest_suite::{
    catalogue, prepare, HostRunner, PipelineResult, ScriptSources, StepStatus, SuitePipeline,
};

#[derive(Parser, Debug)]
#[command(name = "vpn-test")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run VPS/VPN quality checks and collect a summary", long_about = None)]
struct Cli {
    /// Base directory for run directories
    #[arg(long, default_value = ".")]
    outdir: PathBuf,

    /// Free-form label appended to the run name
    #[arg(long)]
    tag: Option<String>,

    /// Language passed to scripts that support it
    #[arg(long, value_enum, default_value_t = LangArg::En)]
    lang: LangArg,

    /// Do not install packages before testing
    #[arg(long)]
    no_install: bool,

    /// Connect timeout in seconds for fetches (total timeout is twice this)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Skip the IP region lookup
    #[arg(long)]
    skip_ipregion: bool,

    /// Skip the censorship geoblock probe
    #[arg(long)]
    skip_censor_geoblock: bool,

    /// Skip the censorship DPI probe
    #[arg(long)]
    skip_censor_dpi: bool,

    /// Skip iperf3 against Russian servers
    #[arg(long)]
    skip_ru_iperf: bool,

    /// Skip yabs
    #[arg(long)]
    skip_yabs: bool,

    /// Skip the IP blocklist check
    #[arg(long)]
    skip_ipblock: bool,

    /// Skip bench.sh
    #[arg(long)]
    skip_bench: bool,

    /// Skip the IP quality check
    #[arg(long)]
    skip_ipquality: bool,

    /// Skip the sysbench CPU run
    #[arg(long)]
    skip_sysbench: bool,

    /// What to do when a remote script cannot be fetched or fails
    #[arg(long, value_enum, default_value_t = FetchFailureArg::Abort)]
    fetch_failure: FetchFailureArg,

    /// Do not echo tool output to the console
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LangArg {
    En,
    Ru,
}

impl From<LangArg> for Lang {
    fn from(arg: LangArg) -> Self {
        match arg {
            LangArg::En => Lang::En,
            LangArg::Ru => Lang::Ru,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FetchFailureArg {
    /// Stop the run at the failed step
    Abort,
    /// Record n/a for the step and continue
    Skip,
}

impl From<FetchFailureArg> for FetchFailurePolicy {
    fn from(arg: FetchFailureArg) -> Self {
        match arg {
            FetchFailureArg::Abort => FetchFailurePolicy::Abort,
            FetchFailureArg::Skip => FetchFailurePolicy::Skip,
        }
    }
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            outdir: self.outdir.clone(),
            tag: self.tag.clone(),
            lang: self.lang.into(),
            install_deps: !self.no_install,
            timeout_secs: self.timeout,
            tests: TestToggles {
                ipregion: !self.skip_ipregion,
                censor_geoblock: !self.skip_censor_geoblock,
                censor_dpi: !self.skip_censor_dpi,
                ru_iperf: !self.skip_ru_iperf,
                yabs: !self.skip_yabs,
                ipblock: !self.skip_ipblock,
                bench: !self.skip_bench,
                ipquality: !self.skip_ipquality,
                sysbench: !self.skip_sysbench,
            },
            fetch_failure: self.fetch_failure.into(),
            quiet: self.quiet,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = cli.run_config();
    config.validate().context("Invalid options")?;
    tokio::task::spawn_blocking(require_root)
        .await
        .context("Privilege check did not complete")?
        .context("vpn-test must be run as root")?;

    cmd_run(&config).await
}

async fn cmd_run(config: &RunConfig) -> Result<()> {
    let executor = HostRunner::new(config).context("Failed to build HTTP client")?;
    let ctx = RunContext::now(config);
    info!(run = %ctx.run_name, dir = %ctx.dir().display(), "Starting run");

    let host = prepare(config, &ctx, &executor)
        .await
        .context("Failed to prepare host")?;

    let steps = catalogue(config, &ctx, &ScriptSources::from_env());
    let result = SuitePipeline::run(config, &ctx, &host, &executor, steps)
        .await
        .context("Test run failed")?;

    print_result(&result, &ctx);
    result.ensure_not_aborted().context("Run aborted")?;
    Ok(())
}

fn print_result(result: &PipelineResult, ctx: &RunContext) {
    println!();
    println!("Run: {}", result.run_name);
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for step in &result.steps {
        let status = match step.status {
            StepStatus::Completed => "✓",
            StepStatus::Failed => "✗",
            StepStatus::Skipped => "-",
            StepStatus::Missing => "?",
        };
        match step.exit_code {
            Some(code) => println!(
                "  {} {} ({}ms, exit code: {})",
                status, step.name, step.duration_ms, code
            ),
            None => println!("  {} {}", status, step.name),
        }
    }

    println!();
    println!(
        "Summary: {} completed, {} failed, {} skipped",
        result.completed_count(),
        result.failed_count(),
        result.skipped_count()
    );
    if let Some(abort) = &result.aborted {
        println!("Aborted at {}: {}", abort.step, abort.reason);
    }
    println!("Results: {}", ctx.dir().display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("vpn-test").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap().run_config();
        assert_eq!(config.outdir, PathBuf::from("."));
        assert_eq!(config.tag, None);
        assert_eq!(config.lang, Lang::En);
        assert!(config.install_deps);
        assert_eq!(config.timeout_secs, 25);
        assert_eq!(config.tests, TestToggles::all_enabled());
        assert_eq!(config.fetch_failure, FetchFailurePolicy::Abort);
        assert!(!config.quiet);
    }

    #[test]
    fn test_all_flags() {
        let cli = parse(&[
            "--outdir",
            "/tmp/runs",
            "--tag",
            "de/fra 1",
            "--lang",
            "ru",
            "--no-install",
            "--timeout",
            "7",
            "--fetch-failure",
            "skip",
            "-q",
        ])
        .unwrap();
        let config = cli.run_config();
        assert_eq!(config.outdir, PathBuf::from("/tmp/runs"));
        assert_eq!(config.tag.as_deref(), Some("de/fra 1"));
        assert_eq!(config.lang, Lang::Ru);
        assert!(!config.install_deps);
        assert_eq!(config.timeout_secs, 7);
        assert_eq!(config.fetch_failure, FetchFailurePolicy::Skip);
        assert!(config.quiet);
    }

    #[test]
    fn test_skip_flags_are_independent() {
        let config = parse(&["--skip-yabs", "--skip-sysbench"])
            .unwrap()
            .run_config();
        assert!(!config.tests.yabs);
        assert!(!config.tests.sysbench);
        assert_eq!(config.tests.enabled_count(), 7);

        let every = [
            "--skip-ipregion",
            "--skip-censor-geoblock",
            "--skip-censor-dpi",
            "--skip-ru-iperf",
            "--skip-yabs",
            "--skip-ipblock",
            "--skip-bench",
            "--skip-ipquality",
            "--skip-sysbench",
        ];
        let config = parse(&every).unwrap().run_config();
        assert_eq!(config.tests, TestToggles::all_disabled());
    }

    #[test]
    fn test_invalid_lang_rejected() {
        let err = parse(&["--lang", "xx"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let err = parse(&["--frobnicate"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(parse(&["--timeout", "0"]).is_err());
        assert!(parse(&["--timeout", "soon"]).is_err());
    }

    #[test]
    fn test_help_is_not_a_failure() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
