//! Error types for the rendezvous server

use crate::state::ConnectionId;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that can occur while driving a connection
#[derive(Error, Debug)]
pub enum SignalingError {
    /// The join path did not name a room
    #[error("Room ID required")]
    InvalidRoomId,

    /// A relayed frame is not a JSON envelope
    #[error("Malformed payload: {0}")]
    MalformedPayload(serde_json::Error),

    /// Failed to queue a message for a peer that has already gone away
    #[error("Failed to deliver message to {0}")]
    DeliveryFailure(ConnectionId),

    /// The WebSocket receive or send primitive failed
    #[error("Transport fault: {0}")]
    TransportFault(#[from] tungstenite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons the next client frame is not a relayable payload
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// Connection was closed
    #[error("Connection closed")]
    Close,

    /// Control frame that carries no relayable payload
    #[error("Unsupported message type")]
    UnsupportedType,

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(tungstenite::Error),
}
