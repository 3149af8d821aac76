// ── Capture line protocol ──
//
// tshark is run in line-buffered fields mode with a pipe separator and
// first-occurrence-only fields:
//   epoch | ip.src | ip.dst | ipv6.src | ipv6.dst | protocol | length | info | ttl
// The stream is unbounded and may be truncated mid-line at shutdown;
// anything that does not parse is dropped silently.

use crate::model::now_millis;

pub(crate) const TSHARK_FIELDS: [&str; 9] = [
    "frame.time_epoch",
    "ip.src",
    "ip.dst",
    "ipv6.src",
    "ipv6.dst",
    "_ws.col.Protocol",
    "frame.len",
    "_ws.col.Info",
    "ip.ttl",
];

const INFO_MAX_LEN: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PacketRecord {
    pub timestamp_ms: i64,
    pub src_ip: String,
    pub dst_ip: String,
    pub protocol: String,
    pub length: u64,
    pub info: String,
    pub ttl: Option<u8>,
}

/// Parse one pipe-separated capture line. IPv4 wins over IPv6 for each
/// side; both sides are required.
pub(crate) fn parse_line(line: &str) -> Option<PacketRecord> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 7 {
        return None;
    }

    let pick = |v4: usize, v6: usize| -> Option<String> {
        let v4 = fields.get(v4).copied().unwrap_or_default();
        if !v4.is_empty() {
            return Some(v4.to_owned());
        }
        let v6 = fields.get(v6).copied().unwrap_or_default();
        (!v6.is_empty()).then(|| v6.to_owned())
    };

    let src_ip = pick(1, 3)?;
    let dst_ip = pick(2, 4)?;

    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    let timestamp_ms = fields[0]
        .parse::<f64>()
        .ok()
        .map_or_else(now_millis, |epoch| (epoch * 1000.0) as i64);

    let protocol = {
        let p = fields.get(5).copied().unwrap_or_default();
        if p.is_empty() { "UNKNOWN" } else { p }.to_owned()
    };
    let length = fields
        .get(6)
        .and_then(|f| f.parse::<u64>().ok())
        .unwrap_or(0);
    let info = fields
        .get(7)
        .map(|f| f.chars().take(INFO_MAX_LEN).collect::<String>())
        .unwrap_or_default();
    let ttl = fields.get(8).and_then(|f| f.trim().parse::<u8>().ok());

    Some(PacketRecord {
        timestamp_ms,
        src_ip,
        dst_ip,
        protocol,
        length,
        info,
        ttl,
    })
}
