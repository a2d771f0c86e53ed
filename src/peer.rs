//! Top-level `Peer`: wires the Mutex Engine, Messaging Layer, Failure Detector
//! and RPC Endpoint together into one runnable cluster member.

use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::info;

use crate::config::Config;
use crate::engine::{Engine, PeerState};
use crate::failure_detector::FailureDetector;
use crate::messaging::Messenger;
use crate::naming::NamingService;
use crate::rpc::server::RpcServer;
use crate::rpc::transport::RpcTransport;
use crate::rpc::PeerService;

pub struct Peer {
    engine: Arc<Engine>,
    messenger: Arc<Messenger>,
    failure_detector: Arc<FailureDetector>,
    config: Config,
    stop: Arc<AtomicBool>,
}

impl Peer {
    pub fn new(config: Config, naming: Arc<dyn NamingService>, transport: Arc<dyn RpcTransport>) -> Arc<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let engine = Arc::new(Engine::new(
            config.name.clone(),
            config.all_peer_names(),
            stop.clone(),
            config.quorum_poll_interval(),
        ));
        let messenger = Arc::new(Messenger::new(naming, transport));
        let failure_detector = FailureDetector::new(
            engine.clone(),
            messenger.clone(),
            config.all_peer_names(),
            stop.clone(),
            config.heartbeat_interval(),
            config.timeout_heartbeat(),
        );
        Arc::new(Peer { engine, messenger, failure_detector, config, stop })
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn state(&self) -> PeerState {
        self.engine.state()
    }

    /// Starts the heartbeat sender and liveness scanner.
    pub fn start_background_workers(self: &Arc<Self>) {
        self.failure_detector.spawn();
    }

    /// Binds this peer's RPC endpoint and serves it on a worker-pool-backed
    /// background thread. Returns `Ok(None)` if this peer has no bind address
    /// configured (e.g. it's only ever addressed in-process); returns `Err` if
    /// binding the configured address fails.
    pub fn serve(self: &Arc<Self>) -> io::Result<Option<JoinHandle<()>>> {
        let addr = match self.config.bind_addr() {
            Some(addr) => addr,
            None => return Ok(None),
        };
        let listener = TcpListener::bind(addr)?;
        let server = RpcServer::new(self.config.worker_pool_size);
        let service: Arc<dyn PeerService> = self.clone();
        let stop = self.stop.clone();
        info!("{}: serving RPCs on {addr}", self.name());
        Ok(Some(std::thread::spawn(move || server.serve(listener, service, stop))))
    }

    /// Blocks the calling thread for the whole protocol (fan-out, quorum
    /// wait, CS hold, deferred drain) and returns whether the critical
    /// section was actually entered.
    pub fn request_access(&self, duration: Duration) -> bool {
        let (timestamp, peers_to_wait) = match self.engine.begin_request() {
            Some(v) => v,
            None => return false,
        };
        for peer in peers_to_wait {
            self.messenger.send_request(self.engine.clone(), peer, timestamp);
        }

        let (held, deferred) = self.engine.wait_and_hold(duration);
        if held {
            for name in deferred {
                self.messenger.send_reply(name, self.name().to_string(), true);
            }
        }
        held
    }

    pub fn release_access(&self) {
        self.engine.release_access();
    }

    pub fn active_peers(&self) -> Vec<String> {
        self.engine.active_peers()
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl PeerService for Peer {
    fn handle_request(&self, requester_name: &str, requester_timestamp: u64) -> bool {
        let reply_immediately = self.engine.handle_request(requester_name, requester_timestamp);
        if reply_immediately {
            self.messenger.send_reply(requester_name.to_string(), self.name().to_string(), true);
        }
        true
    }

    fn receive_reply(&self, sender_name: &str, permission: bool) {
        self.engine.receive_reply(sender_name, permission);
    }

    fn heartbeat(&self, sender_name: &str) {
        self.failure_detector.heartbeat(sender_name);
    }
}
