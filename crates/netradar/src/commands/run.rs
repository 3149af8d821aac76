// ── `netradar run` ──
//
// The daemon: start the engine, serve the WebSocket transport, shut
// everything down cleanly on ctrl-c.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use netradar_config::Settings;
use netradar_core::Orchestrator;

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut settings = Settings::load(global.config.as_deref())?;
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }
    let addr = settings.listen_addr()?;

    let orchestrator = Orchestrator::start(settings.engine_config()).await?;
    let cancel = CancellationToken::new();

    let server = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { netradar_wire::serve(addr, orchestrator, cancel).await })
    };

    info!(%addr, "netradar running; ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "signal handler failed; shutting down");
    }

    cancel.cancel();
    orchestrator.shutdown().await;
    match server.await {
        Ok(result) => result?,
        Err(e) => warn!(error = %e, "transport task panicked"),
    }

    Ok(())
}
