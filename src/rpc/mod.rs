//! The three remotely callable operations and the wire message shapes,
//! carried over `serde`/`serde_json`.

pub mod server;
pub mod transport;

use serde::{Deserialize, Serialize};

/// One RPC call's payload. `Request` is request/response; `Reply` and
/// `Heartbeat` are fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Request { requester_name: String, requester_timestamp: u64 },
    Reply { sender_name: String, permission: bool },
    Heartbeat { sender_name: String },
}

/// Response to a `Request` call. The `bool` is an RPC-level acknowledgement of
/// receipt (always `true` in this implementation) - actual permission is
/// conveyed by a subsequent `Reply` message, since `handle_request` only
/// decides whether to defer and relies on a separate `receive_reply` call to
/// convey the grant itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack(pub bool);

/// The peer-to-peer surface every `Peer` exposes to inbound RPCs.
pub trait PeerService: Send + Sync {
    fn handle_request(&self, requester_name: &str, requester_timestamp: u64) -> bool;
    fn receive_reply(&self, sender_name: &str, permission: bool);
    fn heartbeat(&self, sender_name: &str);
}
