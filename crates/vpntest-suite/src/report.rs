//! Machine-readable `report.json` written next to `summary.txt`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use vpntest_core::{HostInfo, Result, RunConfig};

/// File name of the JSON report.
pub const REPORT_FILE: &str = "report.json";

/// Report schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Final state of one step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
    /// Required tool not installed.
    Missing,
}

/// Outcome of one step as recorded in the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub name: String,
    pub file: Option<String>,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub values: BTreeMap<String, String>,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn skipped(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            file: None,
            status: StepStatus::Skipped,
            duration_ms: 0,
            exit_code: None,
            values: BTreeMap::new(),
            error: Some(reason.to_string()),
        }
    }
}

/// Where a run stopped early.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Abort {
    pub step: String,
    pub reason: String,
}

/// Whole-run report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub schema_version: String,
    pub run_name: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub host: HostInfo,
    pub config: RunConfig,
    pub aborted: Option<Abort>,
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    /// Write the report as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample() -> RunReport {
        RunReport {
            schema_version: SCHEMA_VERSION.to_string(),
            run_name: "vpn-test_20261019_093000".to_string(),
            started_at: "2026-10-19T09:30:00+00:00".to_string(),
            finished_at: "2026-10-19T09:31:00+00:00".to_string(),
            duration_ms: 60_000,
            host: HostInfo {
                hostname: "vps1".to_string(),
                kernel: "6.1.0".to_string(),
                os: "Debian GNU/Linux 12".to_string(),
                arch: "x86_64".to_string(),
            },
            config: RunConfig::default(),
            aborted: None,
            steps: vec![StepRecord::skipped("yabs", "--skip-yabs")],
        }
    }

    #[test]
    fn report_schema_fields_in_json() {
        let v: Value = serde_json::to_value(sample()).expect("to_value");
        let obj = v.as_object().expect("top-level object");
        for key in &[
            "schema_version",
            "run_name",
            "started_at",
            "finished_at",
            "duration_ms",
            "host",
            "config",
            "aborted",
            "steps",
        ] {
            assert!(obj.contains_key(*key), "missing key: {}", key);
        }
        assert_eq!(v["steps"][0]["status"], "skipped");
        assert_eq!(v["config"]["fetch_failure"], "abort");
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REPORT_FILE);
        let report = sample();
        report.write(&path).unwrap();
        assert_eq!(RunReport::load(&path).unwrap(), report);
    }
}
