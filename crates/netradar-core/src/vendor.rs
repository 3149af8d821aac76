// ── Vendor prefix database ──
//
// Static OUI (first three octets) to vendor display-name mapping.
// Keys are uppercase colon-separated prefixes, e.g. "AA:BB:CC".

use std::collections::HashMap;
use std::sync::LazyLock;

static OUI_TABLE: &[(&str, &str)] = &[
    // Apple
    ("00:03:93", "Apple, Inc."),
    ("00:1C:B3", "Apple, Inc."),
    ("3C:06:30", "Apple, Inc."),
    ("3C:22:FB", "Apple, Inc."),
    ("68:FE:F7", "Apple, Inc."),
    ("8C:85:90", "Apple, Inc."),
    ("A4:83:E7", "Apple, Inc."),
    ("AC:BC:32", "Apple, Inc."),
    ("BC:D0:74", "Apple, Inc."),
    ("F0:18:98", "Apple, Inc."),
    ("F8:FF:C2", "Apple, Inc."),
    // Samsung
    ("00:16:32", "Samsung Electronics Co.,Ltd"),
    ("5C:49:7D", "Samsung Electronics Co.,Ltd"),
    ("84:25:DB", "Samsung Electronics Co.,Ltd"),
    ("C0:BD:D1", "Samsung Electronics Co.,Ltd"),
    // Google
    ("3C:5A:B4", "Google, Inc."),
    ("54:60:09", "Google, Inc."),
    ("94:EB:2C", "Google, Inc."),
    ("F4:F5:D8", "Google, Inc."),
    // Amazon
    ("0C:47:C9", "Amazon Technologies Inc."),
    ("44:65:0D", "Amazon Technologies Inc."),
    ("74:C2:46", "Amazon Technologies Inc."),
    ("FC:A1:83", "Amazon Technologies Inc."),
    // Sonos
    ("00:0E:58", "Sonos, Inc."),
    ("48:A6:B8", "Sonos, Inc."),
    ("94:9F:3E", "Sonos, Inc."),
    // Philips / Signify (Hue)
    ("00:17:88", "Philips Lighting BV"),
    ("EC:B5:FA", "Philips Lighting BV"),
    // Ubiquiti
    ("24:A4:3C", "Ubiquiti Inc"),
    ("74:83:C2", "Ubiquiti Inc"),
    ("F0:9F:C2", "Ubiquiti Inc"),
    ("FC:EC:DA", "Ubiquiti Inc"),
    // Netgear
    ("20:E5:2A", "NETGEAR"),
    ("9C:3D:CF", "NETGEAR"),
    ("A0:40:A0", "NETGEAR"),
    // TP-Link
    ("50:C7:BF", "TP-Link Corporation Limited"),
    ("98:DA:C4", "TP-Link Corporation Limited"),
    ("D8:07:B6", "TP-Link Corporation Limited"),
    // ASUS
    ("04:D4:C4", "ASUSTek COMPUTER INC."),
    ("2C:FD:A1", "ASUSTek COMPUTER INC."),
    // Intel
    ("00:1B:21", "Intel Corporate"),
    ("3C:E9:F7", "Intel Corporate"),
    ("A4:BF:01", "Intel Corporate"),
    // Raspberry Pi
    ("B8:27:EB", "Raspberry Pi Foundation"),
    ("DC:A6:32", "Raspberry Pi Trading Ltd"),
    ("E4:5F:01", "Raspberry Pi Trading Ltd"),
    // Espressif (ESP8266/ESP32 IoT)
    ("24:0A:C4", "Espressif Inc."),
    ("84:CC:A8", "Espressif Inc."),
    ("A4:CF:12", "Espressif Inc."),
    // Microsoft
    ("00:15:5D", "Microsoft Corporation"),
    ("28:18:78", "Microsoft Corporation"),
    // Sony
    ("00:13:A9", "Sony Corporation"),
    ("78:C8:81", "Sony Interactive Entertainment Inc."),
    // Nintendo
    ("00:1F:32", "Nintendo Co.,Ltd"),
    ("98:B6:E9", "Nintendo Co.,Ltd"),
    // LG
    ("00:1C:62", "LG Electronics (Mobile Communications)"),
    ("A8:23:FE", "LG Electronics"),
    // Roku
    ("B0:A7:37", "Roku, Inc."),
    ("D8:31:34", "Roku, Inc."),
    // Synology
    ("00:11:32", "Synology Incorporated"),
    // QNAP
    ("24:5E:BE", "QNAP Systems, Inc."),
    // Brother / HP / Canon / Epson printers
    ("00:1B:A9", "Brother industries, LTD."),
    ("30:05:5C", "Brother industries, LTD."),
    ("00:17:A4", "Hewlett Packard"),
    ("94:57:A5", "Hewlett Packard"),
    ("00:1E:8F", "CANON INC."),
    ("00:26:AB", "Seiko Epson Corporation"),
    // Ecobee / Nest / Ring
    ("44:61:32", "ecobee inc"),
    ("18:B4:30", "Nest Labs Inc."),
    ("34:3E:A4", "Ring LLC"),
    // Wyze / Tuya
    ("2C:AA:8E", "Wyze Labs Inc"),
    ("D4:A6:51", "Tuya Smart Inc."),
    // Cisco / Linksys
    ("00:22:6B", "Cisco-Linksys, LLC"),
    ("C0:56:27", "Belkin International Inc."),
    // AVM (FRITZ!Box)
    ("3C:A6:2F", "AVM GmbH"),
];

static OUI_INDEX: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| OUI_TABLE.iter().copied().collect());

/// Look up the vendor for a normalized MAC address.
///
/// `mac` must be colon-separated; the first three octets are uppercased
/// and matched against the prefix table.
#[must_use]
pub fn lookup(mac: &str) -> Option<&'static str> {
    let prefix: Vec<&str> = mac.splitn(4, ':').take(3).collect();
    if prefix.len() < 3 {
        return None;
    }
    let key = format!(
        "{}:{}:{}",
        prefix[0].to_uppercase(),
        prefix[1].to_uppercase(),
        prefix[2].to_uppercase()
    );
    OUI_INDEX.get(key.as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_prefix() {
        assert_eq!(lookup("b8:27:eb:aa:bb:cc"), Some("Raspberry Pi Foundation"));
        assert_eq!(lookup("00:17:88:01:02:03"), Some("Philips Lighting BV"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("B8:27:EB:AA:BB:CC"), lookup("b8:27:eb:aa:bb:cc"));
    }

    #[test]
    fn unknown_prefix_is_none() {
        assert_eq!(lookup("02:00:00:00:00:01"), None);
    }

    #[test]
    fn short_input_is_none() {
        assert_eq!(lookup("b8:27"), None);
    }
}
