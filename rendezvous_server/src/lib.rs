//! WebSocket rendezvous server for peer-to-peer connection negotiation
//!
//! Clients join a named room and exchange opaque negotiation messages
//! (offers, answers, candidates) until they can talk directly. The server
//! relays and never interprets payloads.
//!
//! # Protocol
//!
//! - **ws://host:port/{room}?initiator=true** - Join `room`. `initiator` is
//!   optional and only the exact value `true` sets it.
//!
//! An empty room id is refused with close code `1008` and the reason
//! `"Room ID required"`.
//!
//! ## Server messages
//!
//! - `{"type": "connected", "roomId": "<room>"}` - Sent to you after joining
//! - `{"type": "peer-ready"}` - Sent to the member already waiting when an
//!   initiator becomes the room's second member (at most once per room)
//!
//! ## Client messages
//!
//! Any text or binary frame is forwarded byte-for-byte to every other member
//! of the room. A JSON `type` field is read for logging only.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! rendezvous-server --port 8080
//!
//! # Join from two terminals
//! websocat ws://127.0.0.1:8080/my_room
//! websocat "ws://127.0.0.1:8080/my_room?initiator=true"
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ClientRequestError, SignalingError};
pub use handler::{JoinRequest, run_session};
pub use protocol::{ClientEnvelope, ServerEvent};
pub use server::{bind, serve};
pub use state::{ConnectionId, RoomId, ServerState};
