// ── `netradar interfaces` ──

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::error::CliError;

#[derive(Tabled)]
struct InterfaceRow {
    #[tabled(rename = "INTERFACE")]
    name: String,
    #[tabled(rename = "IPV4")]
    ip: String,
    #[tabled(rename = "MAC")]
    mac: String,
}

pub fn handle() -> Result<(), CliError> {
    let rows: Vec<InterfaceRow> = netradar_core::ifaces::host_interfaces()
        .into_iter()
        .map(|iface| InterfaceRow {
            name: iface.name,
            ip: iface.ip,
            mac: iface.mac,
        })
        .collect();

    if rows.is_empty() {
        println!("no non-loopback IPv4 interfaces found");
        return Ok(());
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
