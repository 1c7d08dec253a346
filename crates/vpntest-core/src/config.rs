//! Run configuration.
//!
//! [`RunConfig`] is built once by the option parser and passed by reference
//! into every component. Nothing mutates it after construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::VpnTestError;

/// Default network connect timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 25;

/// Language hint forwarded to scripts that localise their output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Lang {
    #[default]
    En,
    Ru,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Ru => "ru",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lang {
    type Err = VpnTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Lang::En),
            "ru" => Ok(Lang::Ru),
            other => Err(VpnTestError::InvalidConfig(format!(
                "unsupported language '{other}' (expected en or ru)"
            ))),
        }
    }
}

/// What to do when a remote-fetch step fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    /// Finalise the summary and end the run with an error.
    #[default]
    Abort,
    /// Record placeholders for the step and continue with the next one.
    Skip,
}

impl FetchFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchFailurePolicy::Abort => "abort",
            FetchFailurePolicy::Skip => "skip",
        }
    }
}

/// Per-test enable flags. `true` means the test runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestToggles {
    pub ipregion: bool,
    pub censor_geoblock: bool,
    pub censor_dpi: bool,
    pub ru_iperf: bool,
    pub yabs: bool,
    pub ipblock: bool,
    pub bench: bool,
    pub ipquality: bool,
    pub sysbench: bool,
}

impl Default for TestToggles {
    fn default() -> Self {
        Self::all_enabled()
    }
}

impl TestToggles {
    pub fn all_enabled() -> Self {
        Self {
            ipregion: true,
            censor_geoblock: true,
            censor_dpi: true,
            ru_iperf: true,
            yabs: true,
            ipblock: true,
            bench: true,
            ipquality: true,
            sysbench: true,
        }
    }

    pub fn all_disabled() -> Self {
        Self {
            ipregion: false,
            censor_geoblock: false,
            censor_dpi: false,
            ru_iperf: false,
            yabs: false,
            ipblock: false,
            bench: false,
            ipquality: false,
            sysbench: false,
        }
    }

    /// Number of enabled tests.
    pub fn enabled_count(&self) -> usize {
        [
            self.ipregion,
            self.censor_geoblock,
            self.censor_dpi,
            self.ru_iperf,
            self.yabs,
            self.ipblock,
            self.bench,
            self.ipquality,
            self.sysbench,
        ]
        .iter()
        .filter(|enabled| **enabled)
        .count()
    }
}

/// Immutable record of parsed options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    /// Base directory that receives the run directory.
    pub outdir: PathBuf,

    /// Raw tag as given on the command line.
    pub tag: Option<String>,

    /// Language hint.
    pub lang: Lang,

    /// Install OS packages before running the tests.
    pub install_deps: bool,

    /// Connect timeout in seconds for remote fetches.
    pub timeout_secs: u64,

    /// Which tests run.
    pub tests: TestToggles,

    /// Remote-fetch failure policy.
    pub fetch_failure: FetchFailurePolicy,

    /// Suppress echoing step output to the console.
    pub quiet: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("."),
            tag: None,
            lang: Lang::En,
            install_deps: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tests: TestToggles::all_enabled(),
            fetch_failure: FetchFailurePolicy::Abort,
            quiet: false,
        }
    }
}

impl RunConfig {
    /// Validate values the parser cannot express in types.
    pub fn validate(&self) -> crate::Result<()> {
        if self.timeout_secs == 0 {
            return Err(VpnTestError::InvalidConfig(
                "timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection-establishment bound for remote fetches.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whole-request bound for remote fetches (twice the connect timeout).
    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.saturating_mul(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RunConfig::default();
        assert_eq!(config.lang, Lang::En);
        assert_eq!(config.timeout_secs, 25);
        assert!(config.install_deps);
        assert_eq!(config.tests.enabled_count(), 9);
        assert_eq!(config.fetch_failure, FetchFailurePolicy::Abort);
    }

    #[test]
    fn total_timeout_is_twice_connect_timeout() {
        let config = RunConfig {
            timeout_secs: 10,
            ..RunConfig::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.total_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = RunConfig {
            timeout_secs: 0,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn lang_parses_only_en_and_ru() {
        assert_eq!("en".parse::<Lang>().unwrap(), Lang::En);
        assert_eq!("ru".parse::<Lang>().unwrap(), Lang::Ru);
        assert!("xx".parse::<Lang>().is_err());
        assert!("EN".parse::<Lang>().is_err());
    }

    #[test]
    fn toggles_count_independently() {
        let mut toggles = TestToggles::all_disabled();
        assert_eq!(toggles.enabled_count(), 0);
        toggles.yabs = true;
        toggles.sysbench = true;
        assert_eq!(toggles.enabled_count(), 2);
    }
}
