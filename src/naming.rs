//! Naming/discovery: resolves a peer name to its endpoint on every send, with
//! no long-lived proxy cache.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::error::NamingError;

pub trait NamingService: Send + Sync {
    fn register(&self, name: &str, addr: SocketAddr);
    fn lookup(&self, name: &str) -> Result<SocketAddr, NamingError>;
}

/// A fixed peer-name -> address table for a static, known peer universe.
pub struct StaticTable {
    table: Mutex<BTreeMap<String, SocketAddr>>,
}

impl StaticTable {
    pub fn new() -> Self {
        StaticTable { table: Mutex::new(BTreeMap::new()) }
    }

    pub fn from_map(table: BTreeMap<String, SocketAddr>) -> Self {
        StaticTable { table: Mutex::new(table) }
    }
}

impl Default for StaticTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NamingService for StaticTable {
    fn register(&self, name: &str, addr: SocketAddr) {
        self.table.lock().unwrap().insert(name.to_string(), addr);
    }

    fn lookup(&self, name: &str) -> Result<SocketAddr, NamingError> {
        self.table
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| NamingError::NotFound(name.to_string()))
    }
}
