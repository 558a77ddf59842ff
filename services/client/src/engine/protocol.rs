//! services/client/src/engine/protocol.rs
//!
//! Defines the realtime channel wire protocol between this client and the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Control frames the client sends over the realtime channel.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribes to updates for an itinerary. Sent once, right after the transport opens.
    Subscribe { token: String },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Every server frame is a type-discriminated envelope. Which types exist is up to
/// the consumers subscribed to the channel.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ServerEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl ServerEnvelope {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
