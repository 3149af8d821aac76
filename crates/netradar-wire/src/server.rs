// ── WebSocket server ──
//
// Bridges the engine to consumers: fans publications and packet events
// out to every connected socket, and services control requests inline on
// the requesting socket. A slow consumer only ever loses its own
// broadcast backlog -- it can never block the writer.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use netradar_core::Orchestrator;

use crate::error::WireError;
use crate::msg::{
    ControlEnvelope, ControlRequest, ControlResponse, OutboundMessage, ResponseEnvelope,
};

/// Accept loop. Resolves when cancelled.
pub async fn serve(
    addr: SocketAddr,
    orchestrator: Orchestrator,
    cancel: CancellationToken,
) -> Result<(), WireError> {
    let listener = TcpListener::bind(addr).await.map_err(WireError::Bind)?;
    info!(%addr, "transport listening");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "consumer connected");
                        let orchestrator = orchestrator.clone();
                        let conn_cancel = cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, orchestrator, conn_cancel).await {
                                debug!(%peer, error = %e, "connection closed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }

    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    orchestrator: Orchestrator,
    cancel: CancellationToken,
) -> Result<(), WireError> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| WireError::Handshake(e.to_string()))?;
    let (mut sink, mut inbound) = ws.split();

    // A consumer exists: one half of the initial-readiness gate.
    orchestrator.transport_ready().await;

    let mut publications = orchestrator.publications();
    let mut packets = orchestrator.packet_events();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,

            publication = publications.recv() => {
                match publication {
                    Ok(publication) => {
                        send_json(&mut sink, &OutboundMessage::from(publication)).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "consumer lagged behind publications");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            packet = packets.recv() => {
                match packet {
                    Ok(event) => {
                        send_json(&mut sink, &OutboundMessage::from(event)).await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "consumer lagged behind packet events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            frame = inbound.next() => {
                let Some(frame) = frame else { break };
                let frame = frame.map_err(|e| WireError::Socket(e.to_string()))?;
                match frame {
                    Message::Text(text) => {
                        let reply = dispatch(&orchestrator, text.as_str()).await;
                        send_json(&mut sink, &reply).await?;
                    }
                    Message::Close(_) => break,
                    Message::Ping(payload) => {
                        sink.send(Message::Pong(payload))
                            .await
                            .map_err(|e| WireError::Socket(e.to_string()))?;
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

async fn send_json<S>(sink: &mut S, payload: &impl serde::Serialize) -> Result<(), WireError>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(payload).map_err(|e| WireError::Encode(e.to_string()))?;
    sink.send(Message::text(text))
        .await
        .map_err(|e| WireError::Socket(e.to_string()))
}

/// Parse and execute one control frame.
async fn dispatch(orchestrator: &Orchestrator, text: &str) -> ResponseEnvelope {
    let envelope: ControlEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            return ResponseEnvelope {
                id: None,
                response: ControlResponse::Error {
                    message: format!("malformed control frame: {e}"),
                },
            };
        }
    };

    let response = execute(orchestrator, envelope.request).await;
    ResponseEnvelope {
        id: envelope.id,
        response,
    }
}

async fn execute(orchestrator: &Orchestrator, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Pause => {
            orchestrator.pause();
            ControlResponse::Ack { ok: true }
        }
        ControlRequest::Resume => {
            orchestrator.resume();
            ControlResponse::Ack { ok: true }
        }
        ControlRequest::ScanNow { collector } => {
            orchestrator.scan_now(collector.as_deref());
            ControlResponse::Ack { ok: true }
        }
        ControlRequest::GetFullState => match orchestrator.full_state().await {
            Ok(snapshot) => ControlResponse::FullState {
                entities: snapshot.entities,
                relations: snapshot.relations,
                timestamp: snapshot.timestamp,
            },
            Err(e) => ControlResponse::Error {
                message: e.to_string(),
            },
        },
        ControlRequest::PacketStart { interface } => {
            match orchestrator.packet_start(interface.as_deref()).await {
                Ok(()) => ControlResponse::PacketStartResult {
                    success: true,
                    error: None,
                },
                Err(e) => ControlResponse::PacketStartResult {
                    success: false,
                    error: Some(e.to_string()),
                },
            }
        }
        ControlRequest::PacketStop => {
            orchestrator.packet_stop().await;
            ControlResponse::Ack { ok: true }
        }
        ControlRequest::PacketStatus => {
            ControlResponse::PacketStatus(orchestrator.packet_status().await)
        }
        ControlRequest::PacketGetEvents => ControlResponse::PacketEvents {
            events: orchestrator.packet_events_snapshot(),
        },
        ControlRequest::NmapScan { ip } => {
            ControlResponse::NmapResult(orchestrator.probe_os(&ip).await)
        }
        ControlRequest::NmapStatus => ControlResponse::NmapStatus {
            available: orchestrator.probe_available().await,
        },
    }
}
