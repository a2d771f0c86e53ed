//! Outbound messaging: three primitives, each dispatched on an ephemeral
//! thread so the caller never blocks on network I/O.

use std::sync::Arc;
use std::thread;

use log::debug;

use crate::engine::Engine;
use crate::naming::NamingService;
use crate::rpc::transport::RpcTransport;
use crate::rpc::Message;

pub struct Messenger {
    naming: Arc<dyn NamingService>,
    transport: Arc<dyn RpcTransport>,
}

impl Messenger {
    pub fn new(naming: Arc<dyn NamingService>, transport: Arc<dyn RpcTransport>) -> Self {
        Messenger { naming, transport }
    }

    /// Request/response REQUEST send. On any transport failure (timeout,
    /// naming miss, connection failure) the target is dropped from `engine`'s
    /// active set - this is the only messaging-layer call that feeds back into
    /// the engine.
    pub fn send_request(&self, engine: Arc<Engine>, target: String, requester_timestamp: u64) {
        let naming = self.naming.clone();
        let transport = self.transport.clone();
        let requester_name = engine.name().to_string();
        thread::spawn(move || {
            let result = naming
                .lookup(&target)
                .map_err(Into::into)
                .and_then(|addr| transport.call(addr, Message::Request { requester_name, requester_timestamp }));
            if let Err(e) = result {
                debug!("REQUEST to {target} failed: {e}");
                engine.remove_peer(&target);
            }
        });
    }

    /// Fire-and-forget REPLY send. Failures are logged and swallowed - a dead
    /// recipient no longer influences anyone's quorum.
    pub fn send_reply(&self, target: String, self_name: String, permission: bool) {
        let naming = self.naming.clone();
        let transport = self.transport.clone();
        thread::spawn(move || {
            let result = naming
                .lookup(&target)
                .map_err(Into::into)
                .and_then(|addr| transport.send_oneway(addr, Message::Reply { sender_name: self_name, permission }));
            if let Err(e) = result {
                debug!("REPLY to {target} failed (ignored): {e}");
            }
        });
    }

    /// Fire-and-forget HEARTBEAT send.
    pub fn send_heartbeat(&self, target: String, self_name: String) {
        let naming = self.naming.clone();
        let transport = self.transport.clone();
        thread::spawn(move || {
            let result = naming
                .lookup(&target)
                .map_err(Into::into)
                .and_then(|addr| transport.send_oneway(addr, Message::Heartbeat { sender_name: self_name }));
            if let Err(e) = result {
                debug!("HEARTBEAT to {target} failed (ignored): {e}");
            }
        });
    }
}
