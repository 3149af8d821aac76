//! netradar-wire: the transport contract.
//!
//! Typed outbound messages (`full_state`, `node_update`, `topology`,
//! `packet_event`), the control request/response surface, and a
//! WebSocket server bridging both to consumers.

mod error;
pub mod msg;
pub mod server;

pub use error::WireError;
pub use msg::{
    ControlEnvelope, ControlRequest, ControlResponse, OutboundMessage, ResponseEnvelope,
};
pub use server::serve;
