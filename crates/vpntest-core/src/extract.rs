//! Best-effort extraction of summary values from captured tool output.
//!
//! Every rule is a pure function of the captured text. A rule that finds
//! nothing yields [`PLACEHOLDER`]; it never errors.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Value written when a rule finds no match.
pub const PLACEHOLDER: &str = "n/a";

/// Prefixes of the lines the runner writes around captured output.
const CAPTURE_HEADER_PREFIXES: &[&str] = &[
    "===== ",
    "# time:",
    "# cmd:",
    "# url:",
    "# script-sha256:",
    "# exit:",
    "# error:",
    "# failed:",
];

/// How a pattern is turned into a value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Matcher {
    /// First capture group of the first match.
    First,
    /// First capture group of the last match.
    Last,
    /// Number of lines matching the pattern.
    CountLines,
}

/// One `key=value` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extraction {
    pub key: &'static str,
    pub pattern: &'static str,
    pub matcher: Matcher,
}

impl Extraction {
    pub const fn first(key: &'static str, pattern: &'static str) -> Self {
        Self {
            key,
            pattern,
            matcher: Matcher::First,
        }
    }

    pub const fn last(key: &'static str, pattern: &'static str) -> Self {
        Self {
            key,
            pattern,
            matcher: Matcher::Last,
        }
    }

    pub const fn count_lines(key: &'static str, pattern: &'static str) -> Self {
        Self {
            key,
            pattern,
            matcher: Matcher::CountLines,
        }
    }

    /// Evaluate the rule, returning `None` when nothing matched.
    pub fn evaluate(&self, text: &str) -> Option<String> {
        let re = match Regex::new(self.pattern) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(key = self.key, error = %e, "invalid extraction pattern");
                return None;
            }
        };
        let text = strip_ansi(text);
        match self.matcher {
            Matcher::First => re.captures_iter(&text).find_map(|c| group_value(&c)),
            Matcher::Last => re.captures_iter(&text).filter_map(|c| group_value(&c)).last(),
            Matcher::CountLines => {
                Some(text.lines().filter(|line| re.is_match(line)).count().to_string())
            }
        }
    }

    /// Evaluate the rule, substituting [`PLACEHOLDER`] for a miss.
    pub fn apply(&self, text: &str) -> String {
        self.evaluate(text).unwrap_or_else(|| PLACEHOLDER.to_string())
    }
}

fn group_value(caps: &regex::Captures<'_>) -> Option<String> {
    let m = caps.get(1).or_else(|| caps.get(0))?;
    let value = m.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Remove ANSI escape sequences (colours, cursor movement).
pub fn strip_ansi(text: &str) -> String {
    match Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[()][A-Za-z0-9]|\r") {
        Ok(re) => re.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Drop the header and trailer lines the runner adds to a capture file,
/// leaving only what the tool printed.
pub fn capture_body(text: &str) -> String {
    text.lines()
        .filter(|line| !CAPTURE_HEADER_PREFIXES.iter().any(|p| line.starts_with(p)))
        .collect::<Vec<_>>()
        .join("\n")
}
