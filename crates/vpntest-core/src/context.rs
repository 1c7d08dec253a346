//! Run identity: timestamp, sanitised tag, run name and run directory.

use chrono::{DateTime, Local};
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::error::{Result, VpnTestError};

/// Prefix shared by every run directory.
pub const RUN_PREFIX: &str = "vpn-test";

/// Timestamp layout used in run names.
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Make a tag safe for use in a directory name.
///
/// Spaces and slashes become underscores, everything outside
/// `[A-Za-z0-9_.-]` is dropped, underscore runs collapse to one and
/// leading/trailing underscores are trimmed. Idempotent.
pub fn sanitize_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c == ' ' || c == '/' { '_' } else { c };
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-') {
            continue;
        }
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('_').to_string()
}

/// Compose `vpn-test_<stamp>[_<tag>]`.
pub fn compose_run_name(stamp: &str, sanitized_tag: &str) -> String {
    if sanitized_tag.is_empty() {
        format!("{RUN_PREFIX}_{stamp}")
    } else {
        format!("{RUN_PREFIX}_{stamp}_{sanitized_tag}")
    }
}

/// Whether a sanitised tag names a host (`label(.label)*.tld`).
pub fn looks_like_domain(tag: &str) -> bool {
    Regex::new(r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?\.)+[A-Za-z]{2,}$")
        .map(|re| re.is_match(tag))
        .unwrap_or(false)
}

/// Identity of one invocation, derived once at startup.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub started_at: DateTime<Local>,
    pub stamp: String,
    pub tag: String,
    pub run_name: String,
    pub dir: PathBuf,
}

impl RunContext {
    /// Derive the context from the configuration and a start time.
    pub fn new(config: &RunConfig, started_at: DateTime<Local>) -> Self {
        let stamp = started_at.format(STAMP_FORMAT).to_string();
        let tag = config.tag.as_deref().map(sanitize_tag).unwrap_or_default();
        let run_name = compose_run_name(&stamp, &tag);
        let dir = config.outdir.join(&run_name);
        Self {
            started_at,
            stamp,
            tag,
            run_name,
            dir,
        }
    }

    /// Derive the context using the current local time.
    pub fn now(config: &RunConfig) -> Self {
        Self::new(config, Local::now())
    }

    /// Create the run directory. Fails if it already exists.
    pub fn create_dir(&self) -> Result<()> {
        let wrap = |source| VpnTestError::RunDirectory {
            path: self.dir.clone(),
            source,
        };
        if let Some(parent) = self.dir.parent() {
            std::fs::create_dir_all(parent).map_err(wrap)?;
        }
        std::fs::create_dir(&self.dir).map_err(wrap)
    }

    /// Path of an artifact inside the run directory.
    pub fn artifact(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// RFC 3339 start time for headers.
    pub fn started_rfc3339(&self) -> String {
        self.started_at.to_rfc3339()
    }

    /// Host to query in the DNS check, if the tag names one.
    pub fn dns_target(&self) -> Option<&str> {
        looks_like_domain(&self.tag).then_some(self.tag.as_str())
    }
}
