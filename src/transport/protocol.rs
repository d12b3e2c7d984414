//! Wire types for the cross-context transports.
//!
//! Messages serialize as tagged JSON, `{ "type": ..., "payload": ... }`, so a
//! frame captured on either transport reads the same as the catalog itself.

use crate::types::Song;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation id for bridge request/response exchanges. Caller-generated,
/// echoed back by the responder.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages exchanged over the bridge.
///
/// `RequestSongs` is answered with `ResponseSongs` carrying the responder's
/// full collection; `UpdateSongs` pushes a full collection and is answered
/// with `AckUpdate`; `BridgeReady` announces a peer and triggers an immediate
/// snapshot request on the receiving side.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BridgeMessage {
    #[serde(rename = "REQUEST_SONGS")]
    RequestSongs,
    #[serde(rename = "RESPONSE_SONGS")]
    ResponseSongs(Vec<Song>),
    #[serde(rename = "UPDATE_SONGS")]
    UpdateSongs(Vec<Song>),
    #[serde(rename = "ACK_UPDATE")]
    AckUpdate,
    #[serde(rename = "BRIDGE_READY")]
    BridgeReady,
}

impl BridgeMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeMessage::RequestSongs => "REQUEST_SONGS",
            BridgeMessage::ResponseSongs(_) => "RESPONSE_SONGS",
            BridgeMessage::UpdateSongs(_) => "UPDATE_SONGS",
            BridgeMessage::AckUpdate => "ACK_UPDATE",
            BridgeMessage::BridgeReady => "BRIDGE_READY",
        }
    }
}

/// Envelope for a bridge message.
///
/// `origin` names the sending context; receivers reject frames whose origin
/// does not match the expected peer. `request_id` correlates a response with
/// the call that caused it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeFrame {
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(flatten)]
    pub message: BridgeMessage,
}

/// Messages exchanged on a named broadcast channel.
///
/// No correlation ids: any member answering `RequestSongs` broadcasts its
/// collection to all channel members, not just the requester.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BroadcastMessage {
    #[serde(rename = "REQUEST_SONGS")]
    RequestSongs,
    #[serde(rename = "SYNC_SONGS")]
    SyncSongs(Vec<Song>),
    #[serde(rename = "DATA_READY")]
    DataReady(Vec<Song>),
}
