// ── Throughput collector ──
//
// Samples per-connection byte counters and derives rates against the
// previous sample. Rates are a side channel read by the publisher at
// snapshot time -- they are never written to the store, where the next
// socket scan (which has no throughput signal) would clobber them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::warn;

use super::{Collector, CollectorResult};
use crate::exec;
use crate::model::{TransportProtocol, ids};

const NETTOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Instantaneous rates for one connection key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub bytes_in_per_sec: f64,
    pub bytes_out_per_sec: f64,
}

impl RateSample {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.bytes_in_per_sec + self.bytes_out_per_sec
    }
}

#[derive(Debug, Default)]
struct PreviousSample {
    taken_at: Option<Instant>,
    bytes: HashMap<String, (u64, u64)>,
}

pub struct ThroughputCollector {
    previous: Mutex<PreviousSample>,
    rates: ArcSwap<HashMap<String, RateSample>>,
}

impl Default for ThroughputCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            previous: Mutex::new(PreviousSample::default()),
            rates: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Rate map keyed by socket-entity id. Snapshot read; written only by
    /// this collector's scan.
    #[must_use]
    pub fn rates(&self) -> Arc<HashMap<String, RateSample>> {
        self.rates.load_full()
    }

    /// Test seam for injecting samples without running the sampler.
    #[cfg(test)]
    pub(crate) fn test_update(&self, current: HashMap<String, (u64, u64)>, now: Instant) {
        self.update_rates(current, now);
    }

    fn update_rates(&self, current: HashMap<String, (u64, u64)>, now: Instant) {
        let mut previous = self
            .previous
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(taken_at) = previous.taken_at {
            let elapsed = now.duration_since(taken_at).as_secs_f64();
            if elapsed > 0.0 {
                let mut rates = HashMap::new();
                for (key, (curr_in, curr_out)) in &current {
                    let Some((prev_in, prev_out)) = previous.bytes.get(key) else {
                        continue;
                    };
                    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
                    let sample = RateSample {
                        bytes_in_per_sec: curr_in.saturating_sub(*prev_in) as f64 / elapsed,
                        bytes_out_per_sec: curr_out.saturating_sub(*prev_out) as f64 / elapsed,
                    };
                    if sample.total() > 0.0 {
                        rates.insert(key.clone(), sample);
                    }
                }
                self.rates.store(Arc::new(rates));
            }
        }

        previous.taken_at = Some(now);
        previous.bytes = current;
    }
}

#[async_trait]
impl Collector for ThroughputCollector {
    fn name(&self) -> &'static str {
        "throughput"
    }

    async fn scan(&self) -> CollectorResult {
        let stdout = match exec::run_ok(
            "nettop",
            &["-m", "tcp", "-L", "1", "-J", "bytes_in,bytes_out", "-n", "-x"],
            NETTOP_TIMEOUT,
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "throughput sample failed");
                return CollectorResult::empty();
            }
        };

        self.update_rates(parse_nettop(&stdout), Instant::now());
        CollectorResult::empty()
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse a single nettop CSV sample into connection-key → (in, out).
///
/// Process rows (`name.pid`) set the current process; connection rows
/// (containing `<->` or `->`) contribute a keyed byte pair. Keys match
/// the socket collector's id scheme so the publisher can join them.
pub(crate) fn parse_nettop(stdout: &str) -> HashMap<String, (u64, u64)> {
    let mut samples = HashMap::new();
    let mut current_process: Option<String> = None;

    for line in stdout.lines() {
        let fields: Vec<&str> = line.split(',').collect();
        let Some(key) = fields.first() else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || key == "time" {
            continue;
        }

        if key.contains("<->") || key.contains("->") {
            let Some(process) = &current_process else {
                continue;
            };
            let Some((host, port)) = remote_endpoint(key) else {
                continue;
            };
            if host == "127.0.0.1" || host == "::1" || host == "localhost" {
                continue;
            }
            let (bytes_in, bytes_out) = numeric_pair(&fields[1..]);
            let id = ids::socket(TransportProtocol::Tcp, &host, port, process);
            samples.insert(id, (bytes_in, bytes_out));
        } else if let Some(name) = strip_pid_suffix(key) {
            current_process = Some(name);
        }
    }

    samples
}

/// `firefox.612` → `firefox`. Rows without a trailing `.digits` are not
/// process rows.
fn strip_pid_suffix(key: &str) -> Option<String> {
    let (name, pid) = key.rsplit_once('.')?;
    if pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(name.to_owned())
}

/// Remote (host, port) from `local<->remote` or `local->remote`.
fn remote_endpoint(key: &str) -> Option<(String, u16)> {
    let remote = key
        .split_once("<->")
        .or_else(|| key.split_once("->"))
        .map(|(_, r)| r.trim())?;
    let (host, port) = remote.rsplit_once(':')?;
    Some((host.to_owned(), port.parse().ok()?))
}

/// First two numeric fields are (`bytes_in`, `bytes_out`); empty columns
/// are skipped.
fn numeric_pair(fields: &[&str]) -> (u64, u64) {
    let mut numbers = fields.iter().filter_map(|f| f.trim().parse::<u64>().ok());
    let bytes_in = numbers.next().unwrap_or(0);
    let bytes_out = numbers.next().unwrap_or(0);
    (bytes_in, bytes_out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
time,,bytes_in,bytes_out,
firefox.612,,600500,30200,
tcp4 192.168.1.2:54321<->142.250.80.46:443,,600000,30000,
tcp4 127.0.0.1:9000<->127.0.0.1:9001,,99,99,
Spotify.933,,1000,2000,
tcp4 192.168.1.2:55000->35.186.224.25:443,,1000,2000,
";

    #[test]
    fn parses_connection_rows_under_process() {
        let samples = parse_nettop(SAMPLE);
        assert_eq!(samples.len(), 2);
        assert_eq!(
            samples["conn-TCP-142.250.80.46-443-firefox"],
            (600_000, 30_000)
        );
        assert_eq!(samples["conn-TCP-35.186.224.25-443-Spotify"], (1_000, 2_000));
    }

    #[test]
    fn loopback_rows_are_skipped() {
        let samples = parse_nettop(SAMPLE);
        assert!(samples.keys().all(|k| !k.contains("127.0.0.1")));
    }

    #[test]
    fn pid_suffix_stripping() {
        assert_eq!(strip_pid_suffix("firefox.612"), Some("firefox".to_owned()));
        assert_eq!(
            strip_pid_suffix("com.apple.WebKit.Networking.854"),
            Some("com.apple.WebKit.Networking".to_owned())
        );
        assert_eq!(strip_pid_suffix("time"), None);
    }

    #[test]
    fn rates_from_consecutive_samples() {
        let collector = ThroughputCollector::new();
        let t0 = Instant::now();

        let mut first = HashMap::new();
        first.insert("conn-TCP-142.250.80.46-443-firefox".to_owned(), (0u64, 0u64));
        collector.update_rates(first, t0);
        assert!(collector.rates().is_empty());

        let mut second = HashMap::new();
        second.insert(
            "conn-TCP-142.250.80.46-443-firefox".to_owned(),
            (600_000u64, 30_000u64),
        );
        collector.update_rates(second, t0 + Duration::from_secs(3));

        let rates = collector.rates();
        let sample = &rates["conn-TCP-142.250.80.46-443-firefox"];
        assert!((sample.bytes_in_per_sec - 200_000.0).abs() < 1.0);
        assert!((sample.bytes_out_per_sec - 10_000.0).abs() < 1.0);
        assert!((sample.total() - 210_000.0).abs() < 1.0);
    }

    #[test]
    fn counter_reset_clamps_to_zero() {
        let collector = ThroughputCollector::new();
        let t0 = Instant::now();

        let mut first = HashMap::new();
        first.insert("k".to_owned(), (1_000u64, 1_000u64));
        collector.update_rates(first, t0);

        let mut second = HashMap::new();
        second.insert("k".to_owned(), (10u64, 10u64));
        collector.update_rates(second, t0 + Duration::from_secs(3));

        // Negative deltas clamp to zero, so a zero-total rate is dropped.
        assert!(collector.rates().is_empty());
    }

    #[test]
    fn key_absent_from_previous_sample_has_no_rate() {
        let collector = ThroughputCollector::new();
        let t0 = Instant::now();
        collector.update_rates(HashMap::new(), t0);

        let mut second = HashMap::new();
        second.insert("new-key".to_owned(), (500u64, 0u64));
        collector.update_rates(second, t0 + Duration::from_secs(3));
        assert!(collector.rates().is_empty());
    }
}
