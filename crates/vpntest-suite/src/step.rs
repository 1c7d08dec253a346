//! The fixed, ordered catalogue of test steps.

use serde::{Deserialize, Serialize};
use vpntest_core::{Extraction, RunConfig, RunContext};

/// Lines matching this are counted as probe failures in censorship output.
pub const BLOCK_PATTERN: &str =
    r"(?i)\b(?:fail(?:ed|ure)?|block(?:ed)?|denied|timed?\s?out|error|unavailable)\b";

/// Every step the suite knows, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    /// ip -4 addr / ip -4 route / resolv.conf
    LocalNetwork,
    /// Two public-IP echo endpoints
    PublicIp,
    /// sysbench cpu, single thread
    Sysbench,
    /// Region / ASN lookup
    IpRegion,
    /// censorcheck --mode geoblock
    CensorGeoblock,
    /// censorcheck --mode dpi
    CensorDpi,
    /// Russian iperf3 servers
    RuIperf,
    /// yabs.sh -4
    Yabs,
    /// IP reputation report
    IpBlock,
    /// bench.sh
    Bench,
    /// IP quality / geo consistency
    IpQuality,
    /// dig against the tag, when the tag is a hostname
    Dns,
}

impl StepId {
    pub const ALL: [StepId; 12] = [
        StepId::LocalNetwork,
        StepId::PublicIp,
        StepId::Sysbench,
        StepId::IpRegion,
        StepId::CensorGeoblock,
        StepId::CensorDpi,
        StepId::RuIperf,
        StepId::Yabs,
        StepId::IpBlock,
        StepId::Bench,
        StepId::IpQuality,
        StepId::Dns,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StepId::LocalNetwork => "local_network",
            StepId::PublicIp => "public_ip",
            StepId::Sysbench => "sysbench",
            StepId::IpRegion => "ipregion",
            StepId::CensorGeoblock => "censor_geoblock",
            StepId::CensorDpi => "censor_dpi",
            StepId::RuIperf => "ru_iperf",
            StepId::Yabs => "yabs",
            StepId::IpBlock => "ipblock",
            StepId::Bench => "bench",
            StepId::IpQuality => "ipquality",
            StepId::Dns => "dns",
        }
    }

    /// 1-based position in the catalogue.
    pub fn ordinal(&self) -> usize {
        StepId::ALL
            .iter()
            .position(|id| id == self)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    /// Capture file name, e.g. `03_sysbench_cpu.txt`.
    pub fn file_name(&self) -> String {
        let stem = match self {
            StepId::Sysbench => "sysbench_cpu",
            other => other.name(),
        };
        format!("{:02}_{}.txt", self.ordinal(), stem)
    }

    /// Name of the remote script this step fetches, if any.
    pub fn script(&self) -> Option<&'static str> {
        match self {
            StepId::IpRegion => Some("ipregion"),
            StepId::CensorGeoblock | StepId::CensorDpi => Some("censorcheck"),
            StepId::RuIperf => Some("ru_iperf"),
            StepId::Yabs => Some("yabs"),
            StepId::IpBlock => Some("ipblock"),
            StepId::Bench => Some("bench"),
            StepId::IpQuality => Some("ipquality"),
            StepId::LocalNetwork | StepId::PublicIp | StepId::Sysbench | StepId::Dns => None,
        }
    }

    /// Summary rules applied to the step's capture.
    pub fn extractions(&self) -> Vec<Extraction> {
        match self {
            StepId::Sysbench => vec![Extraction::first(
                "sysbench_events_per_second",
                r"(?i)events per second:\s*([0-9]+(?:\.[0-9]+)?)",
            )],
            StepId::IpRegion => vec![
                Extraction::first("ipregion_ipv4", r"(?im)^\s*(.*\bIPv4\b.*?)\s*$"),
                Extraction::first("ipregion_asn", r"(?im)^\s*(.*\bASN\b.*?)\s*$"),
            ],
            StepId::CensorGeoblock => {
                vec![Extraction::count_lines("censor_geoblock_blocked", BLOCK_PATTERN)]
            }
            StepId::CensorDpi => vec![Extraction::count_lines("censor_dpi_blocked", BLOCK_PATTERN)],
            StepId::RuIperf => vec![Extraction::first(
                "ru_iperf_moscow_latency",
                r"(?im)^.*(?:moscow|москва).*?([0-9]+(?:\.[0-9]+)?\s*ms)\b",
            )],
            StepId::Yabs => vec![Extraction::first("yabs_tcp_cc", r"(?i)TCP CC\s*:\s*(\S+)")],
            StepId::IpBlock => vec![Extraction::last(
                "ipblock_report",
                r"(?i)report[^\n]*?(https?://\S+)",
            )],
            StepId::Bench => vec![Extraction::last(
                "bench_avg_io",
                r"(?im)average i/o speed\s*:\s*(.+?)\s*$",
            )],
            StepId::IpQuality => vec![Extraction::first(
                "ipquality_type",
                r"(?im)(?:ip\s*type|usage\s*type)\s*[:：]\s*(.+?)\s*$",
            )],
            StepId::LocalNetwork | StepId::PublicIp | StepId::Dns => Vec::new(),
        }
    }
}

/// Default script locations, overridable with `VPN_TEST_<SCRIPT>_URL`.
pub fn default_script_url(script: &str) -> Option<&'static str> {
    match script {
        "ipregion" => Some("https://raw.githubusercontent.com/vernette/ipregion/master/ipregion.sh"),
        "censorcheck" => {
            Some("https://raw.githubusercontent.com/vernette/censorcheck/master/censorcheck.sh")
        }
        "ru_iperf" => Some(
            "https://raw.githubusercontent.com/itdoginfo/russian-iperf3-servers/main/speedtest.sh",
        ),
        "yabs" => Some("https://yabs.sh"),
        "ipblock" => Some("https://IP.Check.Place"),
        "bench" => Some("https://bench.sh"),
        "ipquality" => Some("https://raw.githubusercontent.com/xykt/IPQuality/main/ip.sh"),
        _ => None,
    }
}

/// Environment variable that overrides a script's URL.
pub fn script_url_var(script: &str) -> String {
    format!("VPN_TEST_{}_URL", script.to_ascii_uppercase())
}

/// Resolved script locations.
#[derive(Debug, Clone, Default)]
pub struct ScriptSources {
    overrides: std::collections::HashMap<String, String>,
}

impl ScriptSources {
    /// Compiled-in defaults only.
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Defaults with `VPN_TEST_<SCRIPT>_URL` overrides from the environment.
    pub fn from_env() -> Self {
        let mut sources = Self::default();
        for id in StepId::ALL {
            if let Some(script) = id.script() {
                if let Ok(url) = std::env::var(script_url_var(script)) {
                    if !url.trim().is_empty() {
                        sources = sources.with_override(script, url.trim());
                    }
                }
            }
        }
        sources
    }

    pub fn with_override(mut self, script: &str, url: &str) -> Self {
        self.overrides.insert(script.to_string(), url.to_string());
        self
    }

    pub fn url(&self, script: &str) -> Option<String> {
        self.overrides
            .get(script)
            .cloned()
            .or_else(|| default_script_url(script).map(str::to_string))
    }
}

/// A remote script and the arguments it is executed with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteScript {
    pub url: String,
    pub args: Vec<String>,
}

/// What a step does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Run local commands in order; first element of each is the executable.
    Local(Vec<Vec<String>>),
    /// Fetch a script over HTTPS and execute it.
    Remote(RemoteScript),
}

/// Declarative step descriptor.
#[derive(Debug, Clone)]
pub struct TestStep {
    pub id: StepId,

    /// Whether the step runs in this invocation.
    pub enabled: bool,

    /// Why the step is skipped, when it is.
    pub skip_reason: Option<&'static str>,

    /// Tool that must be on PATH; when absent the summary records `<tool>=missing`.
    pub requires: Option<&'static str>,

    pub action: StepAction,

    pub extractions: Vec<Extraction>,
}

impl TestStep {
    fn new(id: StepId, action: StepAction) -> Self {
        Self {
            id,
            enabled: true,
            skip_reason: None,
            requires: None,
            action,
            extractions: id.extractions(),
        }
    }

    fn gated(mut self, enabled: bool, reason: &'static str) -> Self {
        self.enabled = enabled;
        if !enabled {
            self.skip_reason = Some(reason);
        }
        self
    }

    fn requiring(mut self, tool: &'static str) -> Self {
        self.requires = Some(tool);
        self
    }

    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub fn file_name(&self) -> String {
        self.id.file_name()
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.action, StepAction::Remote(_))
    }
}

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn remote(sources: &ScriptSources, id: StepId, args: &[&str]) -> StepAction {
    let script = id.script().unwrap_or_else(|| id.name());
    StepAction::Remote(RemoteScript {
        url: sources.url(script).unwrap_or_default(),
        args: cmd(args),
    })
}

/// Build the ordered step list for one run.
pub fn catalogue(config: &RunConfig, ctx: &RunContext, sources: &ScriptSources) -> Vec<TestStep> {
    let tests = &config.tests;
    let connect = config.connect_timeout().as_secs().to_string();
    let total = config.total_timeout().as_secs().to_string();
    let public_ip = |url: &str| {
        cmd(&[
            "curl",
            "-4",
            "-sS",
            "--connect-timeout",
            connect.as_str(),
            "--max-time",
            total.as_str(),
            url,
        ])
    };
    let dns_host = ctx.dns_target().unwrap_or_default();

    vec![
        TestStep::new(
            StepId::LocalNetwork,
            StepAction::Local(vec![
                cmd(&["ip", "-4", "addr", "show"]),
                cmd(&["ip", "-4", "route", "show"]),
                cmd(&["cat", "/etc/resolv.conf"]),
            ]),
        ),
        TestStep::new(
            StepId::PublicIp,
            StepAction::Local(vec![
                public_ip("https://api.ipify.org"),
                public_ip("https://ifconfig.me"),
            ]),
        ),
        TestStep::new(
            StepId::Sysbench,
            StepAction::Local(vec![cmd(&[
                "sysbench",
                "cpu",
                "--threads=1",
                "--time=10",
                "run",
            ])]),
        )
        .gated(tests.sysbench, "--skip-sysbench")
        .requiring("sysbench"),
        TestStep::new(StepId::IpRegion, remote(sources, StepId::IpRegion, &[]))
            .gated(tests.ipregion, "--skip-ipregion"),
        TestStep::new(
            StepId::CensorGeoblock,
            remote(sources, StepId::CensorGeoblock, &["--mode", "geoblock"]),
        )
        .gated(tests.censor_geoblock, "--skip-censor-geoblock"),
        TestStep::new(
            StepId::CensorDpi,
            remote(sources, StepId::CensorDpi, &["--mode", "dpi"]),
        )
        .gated(tests.censor_dpi, "--skip-censor-dpi"),
        TestStep::new(StepId::RuIperf, remote(sources, StepId::RuIperf, &[]))
            .gated(tests.ru_iperf, "--skip-ru-iperf"),
        TestStep::new(StepId::Yabs, remote(sources, StepId::Yabs, &["-4"]))
            .gated(tests.yabs, "--skip-yabs"),
        TestStep::new(
            StepId::IpBlock,
            remote(sources, StepId::IpBlock, &["-l", config.lang.as_str()]),
        )
        .gated(tests.ipblock, "--skip-ipblock"),
        TestStep::new(StepId::Bench, remote(sources, StepId::Bench, &[]))
            .gated(tests.bench, "--skip-bench"),
        TestStep::new(StepId::IpQuality, remote(sources, StepId::IpQuality, &["-4"]))
            .gated(tests.ipquality, "--skip-ipquality"),
        TestStep::new(
            StepId::Dns,
            StepAction::Local(vec![
                cmd(&["dig", "+short", "A", dns_host]),
                cmd(&["dig", "+short", "AAAA", dns_host]),
                cmd(&["dig", dns_host, "ANY"]),
            ]),
        )
        .gated(ctx.dns_target().is_some(), "tag is not a hostname"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpntest_core::{Lang, TestToggles, PLACEHOLDER};

    fn ctx_for(config: &RunConfig) -> RunContext {
        RunContext::now(config)
    }

    fn rule(id: StepId, key: &str) -> Extraction {
        id.extractions()
            .into_iter()
            .find(|e| e.key == key)
            .expect("rule exists")
    }

    #[test]
    fn file_names_have_two_digit_ordinals() {
        assert_eq!(StepId::LocalNetwork.file_name(), "01_local_network.txt");
        assert_eq!(StepId::Sysbench.file_name(), "03_sysbench_cpu.txt");
        assert_eq!(StepId::IpQuality.file_name(), "11_ipquality.txt");
        assert_eq!(StepId::Dns.file_name(), "12_dns.txt");
    }

    #[test]
    fn catalogue_order_is_fixed() {
        let config = RunConfig::default();
        let steps = catalogue(&config, &ctx_for(&config), &ScriptSources::defaults());
        let ids: Vec<StepId> = steps.iter().map(|s| s.id).collect();
        assert_eq!(ids, StepId::ALL.to_vec());
    }

    #[test]
    fn skip_flags_disable_exactly_their_step() {
        let config = RunConfig {
            tests: TestToggles {
                yabs: false,
                censor_dpi: false,
                ..TestToggles::all_enabled()
            },
            ..RunConfig::default()
        };
        let steps = catalogue(&config, &ctx_for(&config), &ScriptSources::defaults());
        let disabled: Vec<StepId> = steps.iter().filter(|s| !s.enabled).map(|s| s.id).collect();
        assert_eq!(disabled, vec![StepId::CensorDpi, StepId::Yabs, StepId::Dns]);
    }

    #[test]
    fn dns_step_follows_the_tag() {
        let config = RunConfig {
            tag: Some("nl.vpn.example.org".to_string()),
            ..RunConfig::default()
        };
        let steps = catalogue(&config, &ctx_for(&config), &ScriptSources::defaults());
        let dns = steps.iter().find(|s| s.id == StepId::Dns).unwrap();
        assert!(dns.enabled);
        match &dns.action {
            StepAction::Local(cmds) => {
                assert_eq!(cmds[0], vec!["dig", "+short", "A", "nl.vpn.example.org"])
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn remote_arguments_follow_config() {
        let config = RunConfig {
            lang: Lang::Ru,
            ..RunConfig::default()
        };
        let steps = catalogue(&config, &ctx_for(&config), &ScriptSources::defaults());
        let ipblock = steps.iter().find(|s| s.id == StepId::IpBlock).unwrap();
        match &ipblock.action {
            StepAction::Remote(script) => assert_eq!(script.args, vec!["-l", "ru"]),
            other => panic!("unexpected action {other:?}"),
        }
        let dpi = steps.iter().find(|s| s.id == StepId::CensorDpi).unwrap();
        match &dpi.action {
            StepAction::Remote(script) => {
                assert_eq!(script.args, vec!["--mode", "dpi"]);
                assert!(script.url.contains("censorcheck"));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn public_ip_uses_configured_timeouts() {
        let config = RunConfig {
            timeout_secs: 10,
            ..RunConfig::default()
        };
        let steps = catalogue(&config, &ctx_for(&config), &ScriptSources::defaults());
        match &steps[1].action {
            StepAction::Local(cmds) => {
                assert_eq!(cmds.len(), 2);
                let first = &cmds[0];
                let pos = first.iter().position(|a| a == "--connect-timeout").unwrap();
                assert_eq!(first[pos + 1], "10");
                let pos = first.iter().position(|a| a == "--max-time").unwrap();
                assert_eq!(first[pos + 1], "20");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn overrides_replace_default_urls() {
        let sources = ScriptSources::defaults().with_override("yabs", "https://mirror.local/yabs.sh");
        assert_eq!(sources.url("yabs").as_deref(), Some("https://mirror.local/yabs.sh"));
        assert_eq!(sources.url("bench").as_deref(), Some("https://bench.sh"));
        assert_eq!(script_url_var("ru_iperf"), "VPN_TEST_RU_IPERF_URL");
    }

    #[test]
    fn sysbench_events_per_second() {
        let text = "CPU speed:\n    events per second:  1234.56\n\nGeneral statistics:\n";
        assert_eq!(
            rule(StepId::Sysbench, "sysbench_events_per_second").apply(text),
            "1234.56"
        );
    }

    #[test]
    fn ipregion_lines() {
        let text = "Checking...\nIPv4: 203.0.113.7\nIPv6: not available\nASN: AS24940 Hetzner Online GmbH\n";
        assert_eq!(rule(StepId::IpRegion, "ipregion_ipv4").apply(text), "IPv4: 203.0.113.7");
        assert_eq!(
            rule(StepId::IpRegion, "ipregion_asn").apply(text),
            "ASN: AS24940 Hetzner Online GmbH"
        );
    }

    #[test]
    fn censor_counts_failure_lines() {
        let text = "\
youtube.com ........ OK
instagram.com ...... Blocked
openai.com ......... FAILED (403)
chatgpt.com ........ timed out
spotify.com ........ OK
";
        assert_eq!(rule(StepId::CensorGeoblock, "censor_geoblock_blocked").apply(text), "3");
        assert_eq!(rule(StepId::CensorDpi, "censor_dpi_blocked").apply("all OK\n"), "0");
    }

    #[test]
    fn ru_iperf_moscow_latency() {
        let text = "\
Server          Upload     Download   Latency
Saint Petersburg 812 Mbps   790 Mbps   14.2 ms
Moscow          901 Mbps   880 Mbps   9.8 ms
";
        assert_eq!(
            rule(StepId::RuIperf, "ru_iperf_moscow_latency").apply(text),
            "9.8 ms"
        );
        assert_eq!(
            rule(StepId::RuIperf, "ru_iperf_moscow_latency").apply("Москва  12 ms\n"),
            "12 ms"
        );
    }

    #[test]
    fn yabs_congestion_control() {
        let text = "Kernel     : 6.1.0-18-amd64\nTCP CC     : bbr\nVM Type    : KVM\n";
        assert_eq!(rule(StepId::Yabs, "yabs_tcp_cc").apply(text), "bbr");
    }

    #[test]
    fn ipblock_report_link() {
        let text = "Report link: https://Report.Check.Place/ip/ABC.svg\n";
        assert_eq!(
            rule(StepId::IpBlock, "ipblock_report").apply(text),
            "https://Report.Check.Place/ip/ABC.svg"
        );
    }

    #[test]
    fn bench_average_io() {
        let text = "I/O Speed(1st run)   : 1.2 GB/s\nAverage I/O speed    : 1126.4 MB/s\n";
        assert_eq!(rule(StepId::Bench, "bench_avg_io").apply(text), "1126.4 MB/s");
    }

    #[test]
    fn ipquality_type() {
        let text = "Usage Type: Hosting\nCompany Type: Business\n";
        assert_eq!(rule(StepId::IpQuality, "ipquality_type").apply(text), "Hosting");
    }

    #[test]
    fn every_rule_degrades_on_unrelated_text() {
        let text = "completely unrelated output\nnothing to see\n";
        for id in StepId::ALL {
            for extraction in id.extractions() {
                let value = extraction.apply(text);
                match extraction.matcher {
                    vpntest_core::Matcher::CountLines => assert_eq!(value, "0"),
                    _ => assert_eq!(value, PLACEHOLDER, "{} matched", extraction.key),
                }
            }
        }
    }
}
