//! Structured lifecycle events for a vpn-test run.

use tracing::info;

/// RAII guard that keeps a run-scoped span entered.
///
/// ```ignore
/// let _span = RunSpan::enter("vpn-test_20261019_093000_fra");
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_name: &str) -> Self {
        let span = tracing::info_span!("vpntest.run", run = %run_name);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_run_started(run_name: &str, run_dir: &std::path::Path) {
    info!(event = "run.started", run = %run_name, dir = %run_dir.display());
}

pub fn emit_run_finished(run_name: &str, duration_ms: u64, completed: usize, failed: usize) {
    info!(
        event = "run.finished",
        run = %run_name,
        duration_ms = duration_ms,
        completed = completed,
        failed = failed,
    );
}

pub fn emit_step_started(step: &str, file: &str) {
    info!(event = "step.started", step = %step, file = %file);
}

pub fn emit_step_finished(step: &str, duration_ms: u64, success: bool) {
    info!(
        event = "step.finished",
        step = %step,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_step_skipped(step: &str, reason: &str) {
    info!(event = "step.skipped", step = %step, reason = %reason);
}

/// Remote step failure (warning level).
pub fn emit_step_failed(step: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "step.failed", step = %step, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_enters_without_subscriber() {
        let _span = RunSpan::enter("vpn-test_test");
        emit_step_skipped("yabs", "disabled");
    }
}
