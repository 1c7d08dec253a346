//! vpn-test core library
//!
//! Domain types shared by the step runner and the CLI:
//! - `RunConfig`: immutable options record
//! - `RunContext`: timestamp, sanitised tag, run name and directory
//! - extraction rules that scrape values out of captured tool output
//! - the append-only `summary.txt` writer

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod host;
pub mod obs;
pub mod summary;
pub mod telemetry;

pub use config::{FetchFailurePolicy, Lang, RunConfig, TestToggles, DEFAULT_TIMEOUT_SECS};
pub use context::{compose_run_name, looks_like_domain, sanitize_tag, RunContext};
pub use error::{Result, VpnTestError};
pub use extract::{capture_body, strip_ansi, Extraction, Matcher, PLACEHOLDER};
pub use host::{command_available, require_root, HostInfo};
pub use obs::RunSpan;
pub use summary::{SummaryHeader, SummaryReport, SUMMARY_FILE};
pub use telemetry::init_tracing;

/// vpn-test version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
