//! Sequence driver: runs the step catalogue in order and fills the summary.

use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

use crate::report::{Abort, RunReport, StepRecord, StepStatus, REPORT_FILE, SCHEMA_VERSION};
use crate::runner::{StepExecutor, StepOutcome};
use crate::step::{StepAction, TestStep};
use vpntest_core::obs::{
    emit_run_finished, emit_run_started, emit_step_failed, emit_step_finished, emit_step_skipped,
};
use vpntest_core::{
    capture_body, Extraction, FetchFailurePolicy, HostInfo, Result, RunConfig, RunContext,
    RunSpan, SummaryHeader, SummaryReport, VpnTestError, PLACEHOLDER, SUMMARY_FILE,
};

/// Result of a complete run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_name: String,

    /// Set when a remote step failed under the abort policy.
    pub aborted: Option<Abort>,

    /// Every step in catalogue order, including skipped ones. Steps after
    /// an abort are not listed.
    pub steps: Vec<StepRecord>,

    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn completed_count(&self) -> usize {
        self.count(StepStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Turn an abort into [`VpnTestError::FetchFailed`].
    pub fn ensure_not_aborted(&self) -> Result<()> {
        match &self.aborted {
            Some(abort) => Err(VpnTestError::FetchFailed {
                step: abort.step.clone(),
                reason: abort.reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Sequential step driver.
pub struct SuitePipeline;

impl SuitePipeline {
    /// Run `steps` in order against `executor`.
    ///
    /// Creates `summary.txt` before the first step and finalises it (file
    /// listing and pointer line) after the last one, also when a remote
    /// failure aborts the run.
    pub async fn run(
        config: &RunConfig,
        ctx: &RunContext,
        host: &HostInfo,
        executor: &dyn StepExecutor,
        steps: Vec<TestStep>,
    ) -> Result<PipelineResult> {
        let start = Instant::now();
        let _span = RunSpan::enter(&ctx.run_name);
        emit_run_started(&ctx.run_name, ctx.dir());

        let started_at = ctx.started_rfc3339();
        let summary = SummaryReport::create(
            ctx.artifact(SUMMARY_FILE),
            &SummaryHeader {
                run_name: &ctx.run_name,
                timestamp: &started_at,
                host: &host.hostname,
            },
        )?;

        let mut records = Vec::new();
        let mut aborted = None;

        for step in steps {
            if !step.enabled {
                let reason = step.skip_reason.unwrap_or("disabled");
                emit_step_skipped(step.name(), reason);
                records.push(StepRecord::skipped(step.name(), reason));
                continue;
            }

            let file = step.file_name();
            let capture = ctx.artifact(&file);

            if let Some(tool) = step.requires {
                if !executor.tool_available(tool) {
                    warn!(step = step.name(), tool, "Required tool not installed");
                    std::fs::write(
                        &capture,
                        format!("===== {} =====\n# error: {tool} not found in PATH\n\n", step.name()),
                    )?;
                    summary.record(tool, "missing")?;
                    records.push(StepRecord {
                        name: step.name().to_string(),
                        file: Some(file),
                        status: StepStatus::Missing,
                        duration_ms: 0,
                        exit_code: None,
                        values: BTreeMap::from([(tool.to_string(), "missing".to_string())]),
                        error: Some(format!("{tool} not found in PATH")),
                    });
                    continue;
                }
            }

            vpntest_core::obs::emit_step_started(step.name(), &file);
            let outcome = match &step.action {
                StepAction::Local(commands) => {
                    executor.run_local(step.name(), &capture, commands).await?
                }
                StepAction::Remote(script) => {
                    executor.run_remote(step.name(), &capture, script).await?
                }
            };
            emit_step_finished(step.name(), outcome.duration_ms, outcome.success);

            if step.is_remote() && !outcome.success {
                let reason = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "remote step failed".to_string());
                emit_step_failed(step.name(), &reason);

                match config.fetch_failure {
                    FetchFailurePolicy::Skip => {
                        let values = placeholders(&step.extractions);
                        record_values(&summary, &values)?;
                        records.push(record(&step, file, StepStatus::Failed, &outcome, values));
                    }
                    FetchFailurePolicy::Abort => {
                        summary.record("aborted", step.name())?;
                        records.push(record(
                            &step,
                            file,
                            StepStatus::Failed,
                            &outcome,
                            Vec::new(),
                        ));
                        aborted = Some(Abort {
                            step: step.name().to_string(),
                            reason,
                        });
                        break;
                    }
                }
                continue;
            }

            let values = extract_values(&outcome, &step.extractions);
            record_values(&summary, &values)?;
            let status = if outcome.success {
                StepStatus::Completed
            } else {
                StepStatus::Failed
            };
            records.push(record(&step, file, status, &outcome, values));
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let report = RunReport {
            schema_version: SCHEMA_VERSION.to_string(),
            run_name: ctx.run_name.clone(),
            started_at,
            finished_at: chrono::Local::now().to_rfc3339(),
            duration_ms,
            host: host.clone(),
            config: config.clone(),
            aborted: aborted.clone(),
            steps: records.clone(),
        };
        report.write(&ctx.artifact(REPORT_FILE))?;
        summary.finalize(ctx.dir())?;

        let result = PipelineResult {
            run_name: ctx.run_name.clone(),
            aborted,
            steps: records,
            duration_ms,
        };
        emit_run_finished(
            &ctx.run_name,
            duration_ms,
            result.completed_count(),
            result.failed_count(),
        );
        if let Some(abort) = &result.aborted {
            warn!(step = %abort.step, "Run aborted after remote step failure");
        } else {
            info!(summary = %summary.path().display(), "Run complete");
        }
        Ok(result)
    }
}

/// Values extracted from one capture, in rule order.
pub type Values = Vec<(String, String)>;

/// Apply `rules` to the text captured for `outcome`. An unreadable capture
/// counts as empty output.
pub fn extract_values(outcome: &StepOutcome, rules: &[Extraction]) -> Values {
    let raw = std::fs::read(&outcome.capture).unwrap_or_default();
    let body = capture_body(&String::from_utf8_lossy(&raw));
    rules
        .iter()
        .map(|rule| (rule.key.to_string(), rule.apply(&body)))
        .collect()
}

fn placeholders(rules: &[Extraction]) -> Values {
    rules
        .iter()
        .map(|rule| (rule.key.to_string(), PLACEHOLDER.to_string()))
        .collect()
}

fn record_values(summary: &SummaryReport, values: &Values) -> Result<()> {
    for (key, value) in values {
        summary.record(key, value)?;
    }
    Ok(())
}

fn record(
    step: &TestStep,
    file: String,
    status: StepStatus,
    outcome: &StepOutcome,
    values: Values,
) -> StepRecord {
    StepRecord {
        name: step.name().to_string(),
        file: Some(file),
        status,
        duration_ms: outcome.duration_ms,
        exit_code: Some(outcome.exit_code),
        values: values.into_iter().collect(),
        error: outcome.error.clone(),
    }
}
