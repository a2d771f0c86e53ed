//! RPC server loop: a bounded worker pool dispatching inbound connections.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use threadpool::ThreadPool;

use super::transport::{read_framed, write_framed};
use super::{Ack, Message, PeerService};

pub struct RpcServer {
    pool: ThreadPool,
}

impl RpcServer {
    pub fn new(workers: usize) -> Self {
        RpcServer { pool: ThreadPool::new(workers) }
    }

    /// Accepts connections until `stop` is set. Each connection is handled on
    /// the pool: one request, one decode, one dispatch into `service`, then the
    /// connection closes. No RPC handler blocks waiting on another RPC.
    pub fn serve(&self, listener: TcpListener, service: Arc<dyn PeerService>, stop: Arc<AtomicBool>) {
        listener
            .set_nonblocking(true)
            .expect("listener must support non-blocking polling for cooperative shutdown");
        while !stop.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _)) => {
                    let service = service.clone();
                    self.pool.execute(move || {
                        if let Err(e) = handle_connection(stream, &*service) {
                            debug!("rpc connection error: {e}");
                        }
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                Err(e) => warn!("accept failed: {e}"),
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, service: &dyn PeerService) -> std::io::Result<()> {
    let msg = read_framed(&mut stream)?;
    match msg {
        Message::Request { requester_name, requester_timestamp } => {
            let ack = service.handle_request(&requester_name, requester_timestamp);
            write_framed(&mut stream, &Ack(ack))?;
        }
        Message::Reply { sender_name, permission } => {
            service.receive_reply(&sender_name, permission);
        }
        Message::Heartbeat { sender_name } => {
            service.heartbeat(&sender_name);
        }
    }
    Ok(())
}
