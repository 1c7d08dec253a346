//! vpn-test suite - step catalogue and execution
//!
//! Provides the sequence driver that:
//! - Prepares the run directory, metadata and OS packages
//! - Runs local checks and fetched remote scripts in a fixed order
//! - Scrapes summary values from each capture file

pub mod bootstrap;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod step;

// Re-export key types
pub use bootstrap::{prepare, PackageManager, INSTALL_LOG, META_FILE};
pub use pipeline::{PipelineResult, SuitePipeline};
pub use report::{Abort, RunReport, StepRecord, StepStatus, REPORT_FILE};
pub use runner::{HostRunner, StepExecutor, StepOutcome};
pub use step::{catalogue, RemoteScript, ScriptSources, StepAction, StepId, TestStep};
