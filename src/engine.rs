//! Per-peer Ricart-Agrawala mutual exclusion state machine.
//!
//! A single lock around the small mutable core; public methods take the lock
//! exactly once and do no network I/O while holding it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::clock;

/// How long `remove_peer`/`readmit_peer` will retry a contended lock before
/// giving up on this round and waiting for the next heartbeat scan.
const PEER_UPDATE_RETRY_BUDGET: Duration = Duration::from_millis(100);
const PEER_UPDATE_RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Released,
    Wanted,
    Held,
}

struct EngineState {
    state: PeerState,
    clock: u64,
    /// `None` means "not currently WANTED".
    request_timestamp: Option<u64>,
    reply_count: usize,
    /// Ascending `(timestamp, name)`, no duplicates by construction.
    deferred_requests: BTreeSet<(u64, String)>,
    active_peers: BTreeSet<String>,
}

impl EngineState {
    fn needed(&self) -> usize {
        self.active_peers.len() + 1
    }
}

/// Owns the mutual-exclusion state for one peer. Thread-safe; every public method
/// takes the single internal lock exactly once and does no I/O while holding it.
pub struct Engine {
    name: String,
    inner: Mutex<EngineState>,
    releasing_access: AtomicBool,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Engine {
    pub fn new(
        name: String,
        all_peer_names: Vec<String>,
        stop: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Engine {
            name,
            inner: Mutex::new(EngineState {
                state: PeerState::Released,
                clock: 0,
                request_timestamp: None,
                reply_count: 0,
                deferred_requests: BTreeSet::new(),
                active_peers: all_peer_names.into_iter().collect(),
            }),
            releasing_access: AtomicBool::new(false),
            stop,
            poll_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PeerState {
        self.inner.lock().unwrap().state
    }

    pub fn active_peers(&self) -> Vec<String> {
        self.inner.lock().unwrap().active_peers.iter().cloned().collect()
    }

    fn bump_clock(state: &mut EngineState, received: u64) -> u64 {
        state.clock = clock::tick(state.clock, received);
        state.clock
    }

    /// Tries to acquire the lock for a peer-set update (removal/readmission),
    /// retrying on contention for up to `PEER_UPDATE_RETRY_BUDGET` before
    /// giving up for this round.
    fn try_lock_with_retry(&self) -> Option<MutexGuard<'_, EngineState>> {
        let start = Instant::now();
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Some(guard),
                Err(_) => {
                    if start.elapsed() >= PEER_UPDATE_RETRY_BUDGET {
                        return None;
                    }
                    std::thread::sleep(PEER_UPDATE_RETRY_INTERVAL);
                }
            }
        }
    }

    /// Stamps a new request and snapshots the peers to fan REQUESTs out to.
    /// Returns `None` (no side effects) if this peer isn't currently RELEASED.
    pub fn begin_request(&self) -> Option<(u64, Vec<String>)> {
        let mut state = self.inner.lock().unwrap();
        if state.state != PeerState::Released {
            return None;
        }
        Self::bump_clock(&mut state, 0);
        let timestamp = state.clock;
        state.request_timestamp = Some(timestamp);
        state.state = PeerState::Wanted;
        state.reply_count = 1; // self-vote
        let peers_to_wait: Vec<String> = state.active_peers.iter().cloned().collect();
        info!(
            "{}: requesting CS (T={}, C={}, waiting on {} peers)",
            self.name, timestamp, state.clock, peers_to_wait.len()
        );
        Some((timestamp, peers_to_wait))
    }

    /// True once `reply_count` has met the *current* quorum size for the
    /// outstanding request. Used by the waiter's polling loop.
    fn quorum_met(&self) -> bool {
        let state = self.inner.lock().unwrap();
        state.state == PeerState::Wanted && state.reply_count >= state.needed()
    }

    /// Signals that the held critical section should be released as soon as
    /// the hold loop next checks.
    pub fn release_access(&self) {
        let state = self.inner.lock().unwrap();
        if state.state == PeerState::Held {
            self.releasing_access.store(true, Ordering::SeqCst);
        } else {
            debug!("{}: release_access ignored, not HELD", self.name);
        }
    }

    /// Decides whether an inbound REQUEST should be replied to immediately or
    /// deferred. Advances the local clock past the requester's timestamp
    /// either way.
    pub fn handle_request(&self, requester_name: &str, requester_timestamp: u64) -> bool {
        let mut state = self.inner.lock().unwrap();
        Self::bump_clock(&mut state, requester_timestamp);

        let reply_immediately = match state.state {
            PeerState::Held => false,
            PeerState::Wanted => {
                let my_priority = clock::Priority(
                    state.request_timestamp.expect("WANTED implies a request_timestamp"),
                    self.name.clone(),
                );
                let requester_priority =
                    clock::Priority(requester_timestamp, requester_name.to_string());
                requester_priority < my_priority
            }
            PeerState::Released => true,
        };

        if !reply_immediately {
            state
                .deferred_requests
                .insert((requester_timestamp, requester_name.to_string()));
            debug!(
                "{}: deferring REQUEST from {} (queue now {})",
                self.name,
                requester_name,
                state.deferred_requests.len()
            );
        }
        reply_immediately
    }

    /// Records an inbound REPLY. `permission == false` is an ignored
    /// acknowledgement, not a negative vote.
    pub fn receive_reply(&self, sender_name: &str, permission: bool) {
        if !permission {
            trace!("{}: ignoring no-permission REPLY from {}", self.name, sender_name);
            return;
        }
        let mut state = self.inner.lock().unwrap();
        if state.state == PeerState::Wanted {
            state.reply_count += 1;
            debug!(
                "{}: REPLY from {}, count now {}/{}",
                self.name,
                sender_name,
                state.reply_count,
                state.needed()
            );
        } else {
            trace!(
                "{}: late REPLY from {} ignored, state is {:?}",
                self.name, sender_name, state.state
            );
        }
    }

    /// Drops a peer from the active set (failure detected). Best-effort:
    /// retries a contended lock for a short budget before skipping this round
    /// and leaving the removal to the next scan.
    pub fn remove_peer(&self, peer: &str) {
        let mut state = match self.try_lock_with_retry() {
            Some(guard) => guard,
            None => {
                trace!("{}: still busy after retrying, deferring removal of {} to next scan", self.name, peer);
                return;
            }
        };
        if state.active_peers.remove(peer) {
            warn!("{}: peer {} removed (failure detected)", self.name, peer);
            if state.state == PeerState::Wanted {
                state.reply_count += 1;
            }
        }
    }

    /// Re-admits a peer that had previously been removed, on renewed contact.
    pub fn readmit_peer(&self, peer: &str) {
        let mut state = match self.try_lock_with_retry() {
            Some(guard) => guard,
            None => {
                trace!("{}: still busy after retrying, deferring re-admission of {} to next heartbeat", self.name, peer);
                return;
            }
        };
        if state.active_peers.insert(peer.to_string()) {
            info!("{}: peer {} re-detected, added back to active set", self.name, peer);
        }
    }

    /// Marks the critical section entered and blocks the calling thread until
    /// it's released - voluntarily, by timeout, or by shutdown - then exits it.
    fn enter_critical_section(&self, duration: Duration) -> Vec<String> {
        {
            let mut state = self.inner.lock().unwrap();
            state.state = PeerState::Held;
            state.reply_count = 0;
        }
        self.releasing_access.store(false, Ordering::SeqCst);
        info!("{}: entered critical section for up to {:?}", self.name, duration);

        let start = Instant::now();
        loop {
            if self.releasing_access.load(Ordering::SeqCst) {
                break;
            }
            if start.elapsed() >= duration {
                break;
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(self.poll_interval);
        }
        if !self.releasing_access.load(Ordering::SeqCst) {
            if self.stop.load(Ordering::SeqCst) {
                info!("{}: critical section hold interrupted by shutdown", self.name);
            } else {
                warn!("{}: critical section hold expired after {:?}", self.name, duration);
            }
            self.releasing_access.store(true, Ordering::SeqCst);
        }
        self.exit_critical_section()
    }

    /// Returns to RELEASED and drains the deferred-request queue in ascending
    /// `(timestamp, name)` order, for the caller to reply to.
    fn exit_critical_section(&self) -> Vec<String> {
        self.releasing_access.store(false, Ordering::SeqCst);
        let mut state = self.inner.lock().unwrap();
        state.state = PeerState::Released;
        state.request_timestamp = None;
        let deferred: Vec<String> = state.deferred_requests.iter().map(|(_, n)| n.clone()).collect();
        state.deferred_requests.clear();
        info!(
            "{}: exited critical section, {} deferred REPLY(s) to send",
            self.name,
            deferred.len()
        );
        deferred
    }

    /// Blocks the calling thread until quorum is reached, then holds the
    /// critical section for `duration` and exits it. Returns whether the CS
    /// was actually entered, and the deferred REPLY targets if so.
    pub fn wait_and_hold(&self, duration: Duration) -> (bool, Vec<String>) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return (false, Vec::new());
            }
            if self.quorum_met() {
                break;
            }
            std::thread::sleep(self.poll_interval);
        }

        let mut state = self.inner.lock().unwrap();
        let needed = state.needed();
        if state.state == PeerState::Wanted && state.reply_count >= needed {
            drop(state);
            let deferred = self.enter_critical_section(duration);
            (true, deferred)
        } else {
            // Safety net only: reachable if a concurrent abort/shrink raced the
            // break above.
            if state.state == PeerState::Wanted {
                warn!(
                    "{}: quorum lost between poll and check ({}/{}), abandoning request",
                    self.name, state.reply_count, needed
                );
                state.state = PeerState::Released;
                state.request_timestamp = None;
                state.reply_count = 0;
            }
            (false, Vec::new())
        }
    }
}
