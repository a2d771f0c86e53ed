//! Heartbeat sender + liveness scanner: two periodic background threads
//! sharing the engine and messenger, detecting and re-admitting peers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::info;

use crate::engine::Engine;
use crate::messaging::Messenger;

pub struct FailureDetector {
    engine: Arc<Engine>,
    messenger: Arc<Messenger>,
    all_peer_names: Vec<String>,
    last_contact: Mutex<HashMap<String, Instant>>,
    stop: Arc<AtomicBool>,
    heartbeat_interval: Duration,
    timeout: Duration,
}

impl FailureDetector {
    pub fn new(
        engine: Arc<Engine>,
        messenger: Arc<Messenger>,
        all_peer_names: Vec<String>,
        stop: Arc<AtomicBool>,
        heartbeat_interval: Duration,
        timeout: Duration,
    ) -> Arc<Self> {
        let now = Instant::now();
        let last_contact = all_peer_names.iter().map(|name| (name.clone(), now)).collect();
        Arc::new(FailureDetector {
            engine,
            messenger,
            all_peer_names,
            last_contact: Mutex::new(last_contact),
            stop,
            heartbeat_interval,
            timeout,
        })
    }

    /// Spawns both background workers.
    pub fn spawn(self: &Arc<Self>) {
        self.spawn_heartbeat_sender();
        self.spawn_liveness_scanner();
    }

    fn spawn_heartbeat_sender(self: &Arc<Self>) {
        let this = self.clone();
        std::thread::spawn(move || {
            while !this.stop.load(Ordering::SeqCst) {
                this.send_heartbeat_round();
                std::thread::sleep(this.heartbeat_interval);
            }
        });
    }

    fn spawn_liveness_scanner(self: &Arc<Self>) {
        let this = self.clone();
        std::thread::spawn(move || {
            while !this.stop.load(Ordering::SeqCst) {
                std::thread::sleep(this.heartbeat_interval * 2);
                this.scan_once();
            }
        });
    }

    /// One heartbeat round: a fire-and-forget send per name in the *full*
    /// universe, never restricted to `active_peers` - this is how a removed
    /// peer gets re-detected.
    fn send_heartbeat_round(&self) {
        let self_name = self.engine.name().to_string();
        for peer in &self.all_peer_names {
            self.messenger.send_heartbeat(peer.clone(), self_name.clone());
        }
    }

    /// One liveness scan: any currently-active peer silent longer than
    /// `timeout` is removed, crediting the outstanding request if one exists.
    fn scan_once(&self) {
        let now = Instant::now();
        let to_remove: Vec<String> = {
            let contacts = self.last_contact.lock().unwrap();
            self.engine
                .active_peers()
                .into_iter()
                .filter(|peer| {
                    contacts
                        .get(peer)
                        .map(|&last| now.duration_since(last) > self.timeout)
                        .unwrap_or(false)
                })
                .collect()
        };
        for peer in to_remove {
            self.engine.remove_peer(&peer);
        }
    }

    /// Inbound `heartbeat(sender)` RPC.
    pub fn heartbeat(&self, sender: &str) {
        self.last_contact.lock().unwrap().insert(sender.to_string(), Instant::now());
        self.engine.readmit_peer(sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::StaticTable;
    use crate::rpc::transport::InProcessTransport;
    use std::collections::BTreeMap;

    fn detector(peers: &[&str]) -> Arc<FailureDetector> {
        let engine = Arc::new(Engine::new(
            "PeerA".to_string(),
            peers.iter().map(|s| s.to_string()).collect(),
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(5),
        ));
        let naming = Arc::new(StaticTable::from_map(BTreeMap::new()));
        let transport = Arc::new(InProcessTransport::new());
        let messenger = Arc::new(Messenger::new(naming, transport));
        FailureDetector::new(
            engine,
            messenger,
            peers.iter().map(|s| s.to_string()).collect(),
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(20),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn silent_peer_is_removed_after_timeout() {
        let fd = detector(&["PeerB"]);
        // Backdate PeerB's last contact past the timeout.
        fd.last_contact
            .lock()
            .unwrap()
            .insert("PeerB".to_string(), Instant::now() - Duration::from_millis(100));
        fd.scan_once();
        assert!(fd.engine.active_peers().is_empty());
    }

    #[test]
    fn recent_heartbeat_keeps_peer_active() {
        let fd = detector(&["PeerB"]);
        fd.heartbeat("PeerB");
        fd.scan_once();
        assert_eq!(fd.engine.active_peers(), vec!["PeerB".to_string()]);
    }

    #[test]
    fn removal_while_wanted_credits_reply_count() {
        let fd = detector(&["PeerB", "PeerC"]);
        fd.engine.begin_request().unwrap();
        fd.last_contact
            .lock()
            .unwrap()
            .insert("PeerC".to_string(), Instant::now() - Duration::from_millis(100));
        fd.scan_once();
        assert_eq!(fd.engine.active_peers(), vec!["PeerB".to_string()]);
        // Self-vote (1) + credit for removed PeerC (1) = 2, needed = 1(active)+1 = 2.
        let (held, _) = fd.engine.wait_and_hold(Duration::from_millis(5));
        assert!(held);
    }

    #[test]
    fn heartbeat_readmits_previously_removed_peer() {
        let fd = detector(&["PeerB"]);
        fd.last_contact
            .lock()
            .unwrap()
            .insert("PeerB".to_string(), Instant::now() - Duration::from_millis(100));
        fd.scan_once();
        assert!(fd.engine.active_peers().is_empty());
        fd.heartbeat("PeerB");
        assert_eq!(fd.engine.active_peers(), vec!["PeerB".to_string()]);
    }
}
