//! Peer identity: the remote endpoint a negotiation is keyed by.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Remote endpoint (address and port). Reused identities are expected: a joiner that
/// reconnects from the same port gets the same `PeerId`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PeerId(SocketAddr);

impl PeerId {
    pub fn new(addr: impl Into<SocketAddr>) -> Self {
        PeerId(addr.into())
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        PeerId(addr)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
