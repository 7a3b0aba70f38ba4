//! Handshake message types, disconnect statuses and protocol version.

use serde::{Deserialize, Serialize};

/// Version of the handshake framing. Carried in `Hello`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Handshake messages exchanged before a session is established.
/// Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Negotiation message: an encoded `CompatibilitySnapshot`. At most once per direction.
    ModSync { payload: Vec<u8> },
    /// Host greeting; the joiner answers with `PeerInfo`.
    Hello { protocol_version: u8 },
    /// Joiner identification. Triggers the host's admission check.
    PeerInfo { name: String },
    /// Host accepted the joiner.
    Welcome,
    /// Connection refused or torn down.
    Disconnect { status: DisconnectStatus },
}

/// Why a connection attempt ended. `IncompatibleVersion` is the only status that carries a
/// module report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectStatus {
    IncompatibleVersion,
    ConnectFailed,
    WrongPassword,
    Banned,
    ServerFull,
    Other,
}

impl DisconnectStatus {
    pub fn is_incompatible_version(self) -> bool {
        self == DisconnectStatus::IncompatibleVersion
    }
}

impl std::fmt::Display for DisconnectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisconnectStatus::IncompatibleVersion => "incompatible version",
            DisconnectStatus::ConnectFailed => "connection failed",
            DisconnectStatus::WrongPassword => "wrong password",
            DisconnectStatus::Banned => "banned",
            DisconnectStatus::ServerFull => "server full",
            DisconnectStatus::Other => "disconnected",
        };
        f.write_str(s)
    }
}
