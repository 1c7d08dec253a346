//! Append-only `summary.txt` writer.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File name of the summary inside the run directory.
pub const SUMMARY_FILE: &str = "summary.txt";

/// Header fields written before any step runs.
#[derive(Debug, Clone)]
pub struct SummaryHeader<'a> {
    pub run_name: &'a str,
    pub timestamp: &'a str,
    pub host: &'a str,
}

/// Single-writer, append-only summary report.
#[derive(Debug)]
pub struct SummaryReport {
    path: PathBuf,
}

impl SummaryReport {
    /// Create the summary file and write the header block.
    pub fn create(path: impl Into<PathBuf>, header: &SummaryHeader<'_>) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        writeln!(file, "# vpn-test summary")?;
        writeln!(file, "run={}", header.run_name)?;
        writeln!(file, "timestamp={}", header.timestamp)?;
        writeln!(file, "host={}", header.host)?;
        writeln!(file)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `key=value` line.
    pub fn record(&self, key: &str, value: &str) -> Result<()> {
        // Values come from third-party output; keep one line per key.
        let value = value.replace(['\n', '\r'], " ");
        self.append_line(&format!("{key}={value}"))
    }

    /// Append a raw line.
    pub fn append_line(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Append the listing of every file in `run_dir` and the pointer line.
    pub fn finalize(&self, run_dir: &Path) -> Result<()> {
        let mut names = std::fs::read_dir(run_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file)?;
        writeln!(file, "files:")?;
        for name in &names {
            writeln!(file, "  {name}")?;
        }
        writeln!(file)?;
        writeln!(file, "summary={}", self.path.display())?;
        Ok(())
    }
}

/// Look up the last value recorded for `key` in summary text.
pub fn lookup<'a>(summary: &'a str, key: &str) -> Option<&'a str> {
    summary
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SummaryHeader<'static> {
        SummaryHeader {
            run_name: "vpn-test_20261019_093000",
            timestamp: "2026-10-19T09:30:00+00:00",
            host: "vps1",
        }
    }

    #[test]
    fn header_then_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let summary = SummaryReport::create(dir.path().join(SUMMARY_FILE), &header()).unwrap();
        summary.record("a", "1").unwrap();
        summary.record("b", "2").unwrap();

        let text = std::fs::read_to_string(summary.path()).unwrap();
        assert!(text.starts_with("# vpn-test summary\nrun=vpn-test_20261019_093000\n"));
        assert!(text.contains("host=vps1\n"));
        let a = text.find("a=1").unwrap();
        let b = text.find("b=2").unwrap();
        assert!(a < b);
    }

    #[test]
    fn multi_line_values_are_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let summary = SummaryReport::create(dir.path().join(SUMMARY_FILE), &header()).unwrap();
        summary.record("k", "one\ntwo").unwrap();
        let text = std::fs::read_to_string(summary.path()).unwrap();
        assert!(text.contains("k=one two\n"));
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SUMMARY_FILE);
        SummaryReport::create(&path, &header()).unwrap();
        assert!(SummaryReport::create(&path, &header()).is_err());
    }

    #[test]
    fn finalize_lists_files_and_points_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meta.txt"), "x").unwrap();
        std::fs::write(dir.path().join("01_local_network.txt"), "y").unwrap();
        let summary = SummaryReport::create(dir.path().join(SUMMARY_FILE), &header()).unwrap();
        summary.finalize(dir.path()).unwrap();

        let text = std::fs::read_to_string(summary.path()).unwrap();
        let listing = text.split("files:\n").nth(1).unwrap();
        let first = listing.find("01_local_network.txt").unwrap();
        let meta = listing.find("meta.txt").unwrap();
        assert!(first < meta);
        assert!(listing.contains("summary.txt"));
        assert!(text
            .trim_end()
            .ends_with(&format!("summary={}", summary.path().display())));
    }

    #[test]
    fn lookup_returns_last_value() {
        let text = "run=x\nk=1\nother=2\nk=3\n";
        assert_eq!(lookup(text, "k"), Some("3"));
        assert_eq!(lookup(text, "missing"), None);
    }
}
