// ── Active OS probe ──
//
// On-demand, single-target OS detection. Distinct from the continuous
// passive fingerprinting: it runs only on explicit request, and its
// failure never patches the store.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::exec;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const VERSION_MAX_LEN: usize = 80;

/// Family detection regexes, applied in order against the match line.
static FAMILY_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("windows", r"(?i)windows"),
        ("macos", r"(?i)mac os|macos|os x|darwin"),
        ("ios", r"(?i)\bios\b|iphone|ipad"),
        ("android", r"(?i)android"),
        ("freebsd", r"(?i)freebsd"),
        ("linux", r"(?i)linux"),
    ]
    .into_iter()
    .filter_map(|(family, pattern)| Regex::new(pattern).ok().map(|re| (family, re)))
    .collect()
});

static CONFIDENCE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\((\d{1,3})%\)").ok());

/// A successful probe's findings, fed back into the passive
/// fingerprinter at full probe weight.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeHit {
    pub family: Option<String>,
    pub version: Option<String>,
    pub confidence: f64,
}

/// The wire-facing probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub success: bool,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeReport {
    #[must_use]
    pub fn failure(ip: &str, error: String) -> Self {
        Self {
            success: false,
            ip: ip.to_owned(),
            os_family: None,
            os_version: None,
            confidence: None,
            error: Some(error),
        }
    }
}

/// Whether the probe tool is on the path.
pub async fn available() -> bool {
    exec::run("which", &["nmap"], Duration::from_secs(5))
        .await
        .is_ok_and(|out| out.success())
}

/// Probe a single IP. The command is bounded at 15s with the shared
/// terminate→kill escalation.
pub async fn detect_os(ip: &str) -> Result<ProbeHit, CoreError> {
    let stdout = exec::run_ok(
        "nmap",
        &["-O", "--osscan-guess", "-T4", "--max-os-tries", "1", "-n", ip],
        PROBE_TIMEOUT,
    )
    .await
    .map_err(|e| CoreError::ProbeFailed {
        ip: ip.to_owned(),
        reason: e.to_string(),
    })?;

    parse_probe_output(&stdout).ok_or_else(|| CoreError::ProbeFailed {
        ip: ip.to_owned(),
        reason: "no OS match in probe output".to_owned(),
    })
}

/// First `OS details:` or `Running…` line decides everything.
pub(crate) fn parse_probe_output(stdout: &str) -> Option<ProbeHit> {
    let line = stdout.lines().find_map(|line| {
        line.strip_prefix("OS details: ")
            .or_else(|| line.strip_prefix("Running (JUST GUESSING): "))
            .or_else(|| line.strip_prefix("Running: "))
    })?;

    let family = FAMILY_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(line))
        .map(|(family, _)| (*family).to_owned());

    let confidence = CONFIDENCE_RE
        .as_ref()
        .and_then(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map_or(0.9, |pct| pct / 100.0);

    let version = line.split(',').next().map(|first| {
        let stripped = CONFIDENCE_RE
            .as_ref()
            .map_or_else(|| first.to_owned(), |re| re.replace(first, "").into_owned());
        let trimmed = stripped.trim();
        trimmed.chars().take(VERSION_MAX_LEN).collect::<String>()
    });

    Some(ProbeHit {
        family,
        version,
        confidence,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn os_details_line_parses() {
        let stdout = "\
Starting Nmap 7.94 ( https://nmap.org )
Nmap scan report for 192.168.1.40
OS details: Linux 5.4 - 5.15, Linux 4.15
OS detection performed.
";
        let hit = parse_probe_output(stdout).unwrap();
        assert_eq!(hit.family.as_deref(), Some("linux"));
        assert_eq!(hit.version.as_deref(), Some("Linux 5.4 - 5.15"));
        assert!((hit.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn running_guess_line_with_percentage() {
        let stdout = "Running (JUST GUESSING): Apple macOS 12.X (87%), Apple iOS 15.X (70%)\n";
        let hit = parse_probe_output(stdout).unwrap();
        assert_eq!(hit.family.as_deref(), Some("macos"));
        assert!((hit.confidence - 0.87).abs() < 1e-9);
        assert_eq!(hit.version.as_deref(), Some("Apple macOS 12.X"));
    }

    #[test]
    fn windows_matches_before_other_families() {
        let stdout = "OS details: Microsoft Windows 10 1909 - 21H2\n";
        let hit = parse_probe_output(stdout).unwrap();
        assert_eq!(hit.family.as_deref(), Some("windows"));
    }

    #[test]
    fn no_match_line_yields_none() {
        assert!(parse_probe_output("Nmap done: 1 IP address scanned\n").is_none());
    }

    #[test]
    fn version_is_truncated() {
        let long = format!("OS details: {}\n", "x".repeat(200));
        let hit = parse_probe_output(&long).unwrap();
        assert_eq!(hit.version.unwrap().len(), VERSION_MAX_LEN);
    }
}
