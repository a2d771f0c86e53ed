use std::io;

/// Failure of the (stubbable) naming service to resolve a peer's endpoint.
#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    #[error("no registered endpoint for peer `{0}`")]
    NotFound(String),
}

/// Everything that can go wrong sending or receiving an RPC. REQUEST sends that
/// fail this way are treated as a peer failure by the messaging layer; REPLY and
/// HEARTBEAT sends that fail this way are logged and swallowed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("naming lookup failed: {0}")]
    Naming(#[from] NamingError),
    #[error("connecting to {0} failed: {1}")]
    Connect(String, #[source] io::Error),
    #[error("rpc to {0} timed out")]
    Timeout(String),
    #[error("i/o error talking to {0}: {1}")]
    Io(String, #[source] io::Error),
}

/// Failure to load a `Config` from a file or string.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, #[source] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
