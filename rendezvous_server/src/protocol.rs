//! JSON envelopes exchanged with clients
//!
//! The server only ever writes two envelopes of its own ([`ServerEvent`]).
//! Client envelopes are relayed verbatim; [`ClientEnvelope`] exists to read
//! their `type` for logging.

use crate::error::SignalingError;
use crate::state::RoomId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_tungstenite::tungstenite::Message;

/// Messages synthesized by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Sent to a connection right after it joined a room
    Connected {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    /// Sent to the waiting member once the initiator has arrived
    PeerReady,
}

impl ServerEvent {
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        serde_json::to_string(self).map(Message::text)
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// The part of a client envelope the server looks at
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl ClientEnvelope {
    /// Parse the payload of a data frame
    pub fn parse(payload: &[u8]) -> Result<Self, SignalingError> {
        serde_json::from_slice(payload).map_err(SignalingError::MalformedPayload)
    }

    /// Envelope type for log lines
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("unknown")
    }
}
