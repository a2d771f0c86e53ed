//! Distributed mutual exclusion over a static set of peers: Ricart-Agrawala
//! request/reply on Lamport clocks, with a heartbeat failure detector that
//! prunes dead peers from the quorum.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod failure_detector;
pub mod messaging;
pub mod naming;
pub mod peer;
pub mod rpc;

pub use config::Config;
pub use engine::PeerState;
pub use peer::Peer;
