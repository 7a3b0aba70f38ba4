//! Per-connection negotiation state machine.
//!
//! ```text
//! AwaitingConnection --arm--> HandshakeArmed --snapshot--> RemoteReceived --peer info--> Resolved
//!          |                        |                            |
//!          +-- early snapshot held  +---------- incompatible ----+--------------------> Rejected
//! ```
//!
//! The session does no I/O and no locking. The transport feeds it events in order for one
//! connection and acts on the returned [`Verdict`].

use crate::compare::{compare, DiscrepancyReport};
use crate::identity::PeerId;
use crate::protocol::DisconnectStatus;
use crate::snapshot::{CompatibilitySnapshot, DEFAULT_MAX_SNAPSHOT_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Enforces compatibility by refusing joiners.
    Host,
    /// Reports compatibility; enforcement comes from the host.
    Joiner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    AwaitingConnection,
    HandshakeArmed,
    RemoteReceived,
    Resolved,
    Rejected,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Resolved | NegotiationState::Rejected)
    }
}

/// Outcome of feeding an event to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing decided yet; keep handshaking.
    Pending,
    Resolved(DiscrepancyReport),
    Rejected {
        status: DisconnectStatus,
        report: Option<DiscrepancyReport>,
    },
}

pub struct NegotiationSession {
    peer: PeerId,
    role: Role,
    state: NegotiationState,
    local: CompatibilitySnapshot,
    remote: Option<CompatibilitySnapshot>,
    /// Snapshot payload that arrived before `arm`. First one wins.
    early: Option<Vec<u8>>,
    snapshot_sent: bool,
    report: Option<DiscrepancyReport>,
    status: Option<DisconnectStatus>,
    max_snapshot_bytes: u64,
}

impl NegotiationSession {
    pub fn new(peer: PeerId, role: Role, local: CompatibilitySnapshot) -> Self {
        Self {
            peer,
            role,
            state: NegotiationState::AwaitingConnection,
            local,
            remote: None,
            early: None,
            snapshot_sent: false,
            report: None,
            status: None,
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
        }
    }

    pub fn with_decode_limit(mut self, max_snapshot_bytes: u64) -> Self {
        self.max_snapshot_bytes = max_snapshot_bytes;
        self
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn local(&self) -> &CompatibilitySnapshot {
        &self.local
    }

    pub fn remote(&self) -> Option<&CompatibilitySnapshot> {
        self.remote.as_ref()
    }

    pub fn report(&self) -> Option<&DiscrepancyReport> {
        self.report.as_ref()
    }

    /// Snapshot payload held from before arming, if any.
    pub fn take_early(&mut self) -> Option<Vec<u8>> {
        self.early.take()
    }

    /// Register the negotiation handler. Must run before any other handshake step.
    /// A snapshot that raced ahead of arming is processed now.
    pub fn arm(&mut self) -> Verdict {
        if self.state != NegotiationState::AwaitingConnection {
            return self.verdict();
        }
        self.state = NegotiationState::HandshakeArmed;
        tracing::debug!(target: "modsync::negotiation", peer = %self.peer, role = ?self.role, "handshake armed");
        match self.early.take() {
            Some(payload) => self.on_remote_snapshot(&payload),
            None => Verdict::Pending,
        }
    }

    /// Encoded local snapshot, handed out once per connection and only after arming.
    pub fn take_outbound_snapshot(&mut self) -> Option<Vec<u8>> {
        let unarmed = matches!(
            self.state,
            NegotiationState::AwaitingConnection | NegotiationState::Rejected
        );
        if unarmed || self.snapshot_sent {
            return None;
        }
        self.snapshot_sent = true;
        Some(self.local.encode())
    }

    /// The remote's negotiation message arrived.
    pub fn on_remote_snapshot(&mut self, payload: &[u8]) -> Verdict {
        match self.state {
            NegotiationState::AwaitingConnection => {
                if self.early.is_none() {
                    self.early = Some(payload.to_vec());
                }
                return Verdict::Pending;
            }
            NegotiationState::Resolved | NegotiationState::Rejected => {
                tracing::debug!(
                    target: "modsync::negotiation",
                    peer = %self.peer,
                    "snapshot after negotiation ended, ignored"
                );
                return self.verdict();
            }
            NegotiationState::HandshakeArmed | NegotiationState::RemoteReceived => {}
        }
        if self.remote.is_some() {
            tracing::warn!(
                target: "modsync::negotiation",
                peer = %self.peer,
                "duplicate snapshot from peer, keeping the first"
            );
            return Verdict::Pending;
        }

        let remote = CompatibilitySnapshot::decode_with_limit(payload, self.max_snapshot_bytes);
        tracing::debug!(
            target: "modsync::negotiation",
            peer = %self.peer,
            base = %remote.base_version(),
            modules = remote.modules().len(),
            "remote snapshot received"
        );
        self.state = NegotiationState::RemoteReceived;
        let report = match self.role {
            Role::Host => compare(&self.local, &remote),
            Role::Joiner => compare(&remote, &self.local),
        };
        self.remote = Some(remote);

        if self.role == Role::Host && !report.is_compatible() {
            return self.reject(report);
        }
        self.report = Some(report);
        Verdict::Pending
    }

    /// Joiner is about to send its peer info. A host that has not sent a snapshot by now
    /// never will; if any local module needs the host to have it, abort locally.
    pub fn on_local_peer_info(&mut self) -> Verdict {
        if self.role != Role::Joiner {
            tracing::warn!(target: "modsync::negotiation", peer = %self.peer, "local peer info on host session ignored");
            return self.verdict();
        }
        self.ensure_armed();
        if self.state.is_terminal() || self.remote.is_some() {
            return self.verdict();
        }
        if self.local.modules().iter().any(|m| m.required_on_server) {
            tracing::info!(
                target: "modsync::negotiation",
                peer = %self.peer,
                "host sent no snapshot but local modules require it, aborting"
            );
            let report = compare(&self.local.assumed_unextended(), &self.local);
            return self.reject(report);
        }
        Verdict::Pending
    }

    /// Host received the joiner's peer info: final admission decision.
    pub fn on_remote_peer_info(&mut self) -> Verdict {
        if self.role != Role::Host {
            tracing::warn!(target: "modsync::negotiation", peer = %self.peer, "remote peer info on joiner session ignored");
            return self.verdict();
        }
        self.ensure_armed();
        if self.state.is_terminal() {
            return self.verdict();
        }
        let report = match &self.remote {
            Some(remote) => compare(&self.local, remote),
            None => {
                let assumed = self.local.assumed_unextended();
                if self.local.modules().iter().any(|m| m.required_on_client) {
                    tracing::info!(
                        target: "modsync::negotiation",
                        peer = %self.peer,
                        "joiner sent no snapshot but host modules require it"
                    );
                }
                compare(&self.local, &assumed)
            }
        };
        if report.is_compatible() {
            self.resolve(report)
        } else {
            self.reject(report)
        }
    }

    /// Joiner was accepted by the host.
    pub fn on_accepted(&mut self) -> Verdict {
        if self.state.is_terminal() {
            return self.verdict();
        }
        let report = match &self.remote {
            Some(remote) => compare(remote, &self.local),
            None => compare(&self.local.assumed_unextended(), &self.local),
        };
        self.resolve(report)
    }

    /// The connection attempt failed with `status`. For `IncompatibleVersion` the report
    /// against the stored host snapshot (or the unextended assumption) is returned.
    pub fn on_connection_failed(&mut self, status: DisconnectStatus) -> Option<DiscrepancyReport> {
        self.state = NegotiationState::Rejected;
        self.status = Some(status);
        if !status.is_incompatible_version() {
            self.report = None;
            return None;
        }
        let report = match (self.role, &self.remote) {
            (Role::Joiner, Some(remote)) => compare(remote, &self.local),
            (Role::Joiner, None) => compare(&self.local.assumed_unextended(), &self.local),
            (Role::Host, Some(remote)) => compare(&self.local, remote),
            (Role::Host, None) => compare(&self.local, &self.local.assumed_unextended()),
        };
        self.report = Some(report.clone());
        Some(report)
    }

    /// Current verdict without feeding an event.
    pub fn verdict(&self) -> Verdict {
        match self.state {
            NegotiationState::Resolved => Verdict::Resolved(self.report.clone().unwrap_or_default()),
            NegotiationState::Rejected => Verdict::Rejected {
                status: self.status.unwrap_or(DisconnectStatus::IncompatibleVersion),
                report: self.report.clone(),
            },
            _ => Verdict::Pending,
        }
    }

    fn ensure_armed(&mut self) {
        if self.state == NegotiationState::AwaitingConnection {
            tracing::warn!(
                target: "modsync::negotiation",
                peer = %self.peer,
                "peer info before handler registration, arming now"
            );
            let _ = self.arm();
        }
    }

    fn resolve(&mut self, report: DiscrepancyReport) -> Verdict {
        tracing::info!(target: "modsync::negotiation", peer = %self.peer, role = ?self.role, "negotiation resolved");
        self.state = NegotiationState::Resolved;
        self.report = Some(report.clone());
        Verdict::Resolved(report)
    }

    fn reject(&mut self, report: DiscrepancyReport) -> Verdict {
        tracing::info!(
            target: "modsync::negotiation",
            peer = %self.peer,
            role = ?self.role,
            missing = report.missing_on_joiner.len(),
            extra = report.extra_on_joiner.len(),
            too_low = report.too_low_on_joiner.len(),
            too_high = report.too_high_on_joiner.len(),
            base = ?report.base_version_mismatch,
            "negotiation rejected"
        );
        let status = DisconnectStatus::IncompatibleVersion;
        self.state = NegotiationState::Rejected;
        self.status = Some(status);
        self.report = Some(report.clone());
        Verdict::Rejected {
            status,
            report: Some(report),
        }
    }
}
