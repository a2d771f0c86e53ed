//! RPC transport: request/response with a global timeout, and fire-and-forget
//! sends. `TcpTransport` is the real, network-facing implementation;
//! `InProcessTransport` routes directly between in-memory `PeerService`s for
//! deterministic tests.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Ack, Message, PeerService};
use crate::error::TransportError;

pub trait RpcTransport: Send + Sync {
    /// Request/response call, respecting the transport's global timeout.
    fn call(&self, addr: SocketAddr, msg: Message) -> Result<Ack, TransportError>;
    /// Fire-and-forget; no delivery or success acknowledgement.
    fn send_oneway(&self, addr: SocketAddr, msg: Message) -> Result<(), TransportError>;
}

pub(crate) fn write_framed<W: Write, T: Serialize>(w: &mut W, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    w.write_all(&(bytes.len() as u32).to_be_bytes())?;
    w.write_all(&bytes)?;
    Ok(())
}

pub(crate) fn read_framed<R: Read, T: DeserializeOwned>(r: &mut R) -> io::Result<T> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    serde_json::from_slice(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Length-prefixed JSON over a fresh `TcpStream` per call - no connection
/// pooling or long-lived proxy cache.
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        TcpTransport { timeout }
    }

    fn connect(&self, addr: SocketAddr) -> Result<TcpStream, TransportError> {
        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| TransportError::Connect(addr.to_string(), e))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| TransportError::Io(addr.to_string(), e))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| TransportError::Io(addr.to_string(), e))?;
        Ok(stream)
    }
}

impl RpcTransport for TcpTransport {
    fn call(&self, addr: SocketAddr, msg: Message) -> Result<Ack, TransportError> {
        let mut stream = self.connect(addr)?;
        write_framed(&mut stream, &msg).map_err(|e| {
            if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
                TransportError::Timeout(addr.to_string())
            } else {
                TransportError::Io(addr.to_string(), e)
            }
        })?;
        read_framed(&mut stream).map_err(|e| {
            if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
                TransportError::Timeout(addr.to_string())
            } else {
                TransportError::Io(addr.to_string(), e)
            }
        })
    }

    fn send_oneway(&self, addr: SocketAddr, msg: Message) -> Result<(), TransportError> {
        let mut stream = self.connect(addr)?;
        write_framed(&mut stream, &msg).map_err(|e| TransportError::Io(addr.to_string(), e))
    }
}

/// Routes calls directly to registered in-process `PeerService`s, skipping
/// sockets entirely. Used by the integration tests in `tests/scenarios.rs` to
/// exercise the protocol deterministically.
#[derive(Default)]
pub struct InProcessTransport {
    registry: Mutex<HashMap<SocketAddr, Arc<dyn PeerService>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        InProcessTransport { registry: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, addr: SocketAddr, service: Arc<dyn PeerService>) {
        self.registry.lock().unwrap().insert(addr, service);
    }

    pub fn unregister(&self, addr: SocketAddr) {
        self.registry.lock().unwrap().remove(&addr);
    }

    fn resolve(&self, addr: SocketAddr) -> Result<Arc<dyn PeerService>, TransportError> {
        self.registry
            .lock()
            .unwrap()
            .get(&addr)
            .cloned()
            .ok_or_else(|| TransportError::Timeout(addr.to_string()))
    }
}

impl RpcTransport for InProcessTransport {
    fn call(&self, addr: SocketAddr, msg: Message) -> Result<Ack, TransportError> {
        let service = self.resolve(addr)?;
        match msg {
            Message::Request { requester_name, requester_timestamp } => {
                Ok(Ack(service.handle_request(&requester_name, requester_timestamp)))
            }
            other => panic!("{:?} is fire-and-forget, use send_oneway", other),
        }
    }

    fn send_oneway(&self, addr: SocketAddr, msg: Message) -> Result<(), TransportError> {
        let service = self.resolve(addr)?;
        match msg {
            Message::Reply { sender_name, permission } => service.receive_reply(&sender_name, permission),
            Message::Heartbeat { sender_name } => service.heartbeat(&sender_name),
            other => panic!("{:?} is request/response, use call", other),
        }
        Ok(())
    }
}
