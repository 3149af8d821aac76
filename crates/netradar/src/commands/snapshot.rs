// ── `netradar snapshot` ──
//
// One-shot mode: run the initial scan, print what was found, exit.

use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use netradar_config::Settings;
use netradar_core::model::SignalDetail;
use netradar_core::{LifecycleStatus, Orchestrator};

use crate::cli::{GlobalOpts, OutputFormat, SnapshotArgs};
use crate::error::CliError;

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "KIND")]
    kind: &'static str,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

pub async fn handle(args: SnapshotArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let settings = Settings::load(global.config.as_deref())?;
    let orchestrator = Orchestrator::start(settings.engine_config()).await?;

    // No transport in one-shot mode; open the gate ourselves.
    orchestrator.transport_ready().await;
    let snapshot = orchestrator.full_state().await?;
    orchestrator.shutdown().await;

    match args.output {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot)
                    .map_err(|e| CliError::Other(e.to_string()))?
            );
        }
        OutputFormat::Table => {
            let rows: Vec<EntityRow> = snapshot
                .entities
                .iter()
                .map(|entity| EntityRow {
                    id: entity.id.clone(),
                    kind: kind_label(&entity.detail),
                    name: entity.name.clone(),
                    ip: entity.ip.clone().unwrap_or_default(),
                    mac: entity.mac.clone().unwrap_or_default(),
                    status: status_label(entity.status),
                })
                .collect();

            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
            println!(
                "{} entities, {} relations",
                snapshot.entities.len(),
                snapshot.relations.len()
            );
        }
    }

    Ok(())
}

fn kind_label(detail: &SignalDetail) -> &'static str {
    match detail {
        SignalDetail::Host(_) => "host",
        SignalDetail::WifiAp(_) => "wifi",
        SignalDetail::LanNeighbor(_) => "lan",
        SignalDetail::BluetoothPeer(_) => "bluetooth",
        SignalDetail::MdnsService(_) => "bonjour",
        SignalDetail::SocketEndpoint(_) => "connection",
    }
}

fn status_label(status: LifecycleStatus) -> String {
    match status {
        LifecycleStatus::Active => status.to_string().green().to_string(),
        LifecycleStatus::Stale => status.to_string().yellow().to_string(),
        LifecycleStatus::Expired => status.to_string().red().to_string(),
    }
}
