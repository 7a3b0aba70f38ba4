//! Host-driven API: the transport passes connection events in, `Negotiator` returns actions.
//!
//! One `Negotiator` per process. It owns the table of in-flight negotiations keyed by
//! [`PeerId`] and is shared across connection tasks behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::compare::DiscrepancyReport;
use crate::identity::PeerId;
use crate::module::ModuleSource;
use crate::protocol::{DisconnectStatus, Message, PROTOCOL_VERSION};
use crate::report::{format_report, ReportLine};
use crate::session::{NegotiationSession, NegotiationState, Role, Verdict};
use crate::snapshot::{CompatibilitySnapshot, LocalSnapshotBuilder, DEFAULT_MAX_SNAPSHOT_BYTES};
use crate::wire;

#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    pub role: Role,
    /// Name sent in `PeerInfo` when joining.
    pub display_name: String,
    /// Decode limit for remote snapshots.
    pub max_snapshot_bytes: u64,
}

impl NegotiatorConfig {
    pub fn host() -> Self {
        Self {
            role: Role::Host,
            ..Self::default()
        }
    }

    pub fn joiner(display_name: impl Into<String>) -> Self {
        Self {
            role: Role::Joiner,
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            role: Role::Host,
            display_name: String::new(),
            max_snapshot_bytes: DEFAULT_MAX_SNAPSHOT_BYTES,
        }
    }
}

/// Action for the transport to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationAction {
    /// Send an encoded frame to the peer.
    Send(PeerId, Vec<u8>),
    /// Tear the connection down with this status (any `Send` before it goes out first).
    Disconnect { peer: PeerId, status: DisconnectStatus },
    /// Negotiation passed; the rest of the handshake may proceed.
    Resolved { peer: PeerId, report: DiscrepancyReport },
    /// Joiner side: the host ended the attempt. See [`Negotiator::take_last_failure`].
    Failed { peer: PeerId, status: DisconnectStatus },
}

/// A rejected or failed negotiation, kept after the connection is gone so the display
/// layer can render it once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedNegotiation {
    pub peer: PeerId,
    pub role: Role,
    pub status: DisconnectStatus,
    pub report: Option<DiscrepancyReport>,
    pub local: CompatibilitySnapshot,
    pub remote: Option<CompatibilitySnapshot>,
}

impl FailedNegotiation {
    pub fn host_snapshot(&self) -> CompatibilitySnapshot {
        match self.role {
            Role::Host => self.local.clone(),
            Role::Joiner => self
                .remote
                .clone()
                .unwrap_or_else(|| self.local.assumed_unextended()),
        }
    }

    pub fn joiner_snapshot(&self) -> CompatibilitySnapshot {
        match self.role {
            Role::Joiner => self.local.clone(),
            Role::Host => self
                .remote
                .clone()
                .unwrap_or_else(|| self.local.assumed_unextended()),
        }
    }

    /// Formatted report lines, empty when the failure was not a compatibility problem.
    pub fn lines(&self) -> Vec<ReportLine> {
        match &self.report {
            Some(report) => format_report(report, &self.host_snapshot(), &self.joiner_snapshot()),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("failed to decode message: {0}")]
    DecodeFailed(#[from] wire::FrameDecodeError),
}

pub struct Negotiator {
    config: NegotiatorConfig,
    source: Arc<dyn ModuleSource>,
    sessions: Mutex<HashMap<PeerId, NegotiationSession>>,
    last_remote: Mutex<Option<CompatibilitySnapshot>>,
    last_failure: Mutex<Option<FailedNegotiation>>,
}

impl Negotiator {
    pub fn new(config: NegotiatorConfig, source: Arc<dyn ModuleSource>) -> Self {
        Self {
            config,
            source,
            sessions: Mutex::new(HashMap::new()),
            last_remote: Mutex::new(None),
            last_failure: Mutex::new(None),
        }
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Fresh local snapshot from the module source.
    pub fn local_snapshot(&self) -> CompatibilitySnapshot {
        LocalSnapshotBuilder::new(self.source.as_ref()).build()
    }

    /// Host started (or restarted) accepting connections: forget every in-flight negotiation.
    pub fn begin_accepting(&self) {
        let mut sessions = self.sessions.lock();
        let dropped = sessions.len();
        sessions.clear();
        tracing::info!(target: "modsync::negotiation", dropped, "negotiation table cleared");
    }

    /// Connection established. Arms a fresh session for `peer` and returns the negotiation
    /// message to send. Any session left over from a previous connection with the same
    /// identity is discarded; a snapshot that arrived ahead of this call is kept.
    pub fn on_connection_started(&self, peer: PeerId) -> Vec<NegotiationAction> {
        let local = self.local_snapshot();
        let mut session = NegotiationSession::new(peer, self.config.role, local)
            .with_decode_limit(self.config.max_snapshot_bytes);

        let mut sessions = self.sessions.lock();
        let mut early = None;
        match sessions.remove(&peer) {
            Some(mut prev) if prev.state() == NegotiationState::AwaitingConnection => {
                tracing::debug!(target: "modsync::negotiation", %peer, "adopting snapshot that arrived before arming");
                early = prev.take_early();
            }
            Some(_) => {
                tracing::debug!(target: "modsync::negotiation", %peer, "discarding stale negotiation for reused peer");
            }
            None => {}
        }

        let mut verdict = session.arm();
        let mut actions = Vec::new();
        if let Some(payload) = session.take_outbound_snapshot() {
            push_frame(&mut actions, peer, &Message::ModSync { payload });
        }
        if let Some(payload) = early {
            verdict = session.on_remote_snapshot(&payload);
            self.record_remote(&session);
        }
        self.apply_verdict(&mut sessions, session, verdict, &mut actions);
        actions
    }

    /// Process a received handshake frame and return what the transport should do.
    pub fn on_message_received(
        &self,
        peer: PeerId,
        bytes: &[u8],
    ) -> Result<Vec<NegotiationAction>, MessageError> {
        let (msg, _consumed) = wire::decode_frame(bytes)?;
        Ok(self.on_message(peer, msg))
    }

    /// Route an already decoded handshake message.
    pub fn on_message(&self, peer: PeerId, msg: Message) -> Vec<NegotiationAction> {
        match msg {
            Message::ModSync { payload } => self.on_remote_snapshot(peer, &payload),
            Message::Hello { protocol_version } => {
                if protocol_version != PROTOCOL_VERSION {
                    tracing::warn!(
                        target: "modsync::negotiation",
                        %peer,
                        protocol_version,
                        "host speaks a different handshake version"
                    );
                }
                self.on_local_peer_info(peer)
            }
            Message::PeerInfo { name } => {
                tracing::debug!(target: "modsync::negotiation", %peer, %name, "peer info received");
                self.on_remote_peer_info(peer)
            }
            Message::Welcome => self.on_accepted(peer),
            Message::Disconnect { status } => self.on_connection_failed(peer, status),
        }
    }

    /// The remote's negotiation message arrived.
    pub fn on_remote_snapshot(&self, peer: PeerId, payload: &[u8]) -> Vec<NegotiationAction> {
        let mut sessions = self.sessions.lock();
        let Some(mut session) = sessions.remove(&peer) else {
            // Arrived before the connection-start event: hold it for arming.
            let mut early = NegotiationSession::new(peer, self.config.role, CompatibilitySnapshot::empty())
                .with_decode_limit(self.config.max_snapshot_bytes);
            early.on_remote_snapshot(payload);
            sessions.insert(peer, early);
            return Vec::new();
        };
        let had_remote = session.remote().is_some();
        let verdict = session.on_remote_snapshot(payload);
        if !had_remote {
            self.record_remote(&session);
        }
        let mut actions = Vec::new();
        self.apply_verdict(&mut sessions, session, verdict, &mut actions);
        actions
    }

    /// Joiner: about to send peer info. Aborts locally when the host stayed silent and
    /// local modules need it; otherwise returns the `PeerInfo` frame to send.
    pub fn on_local_peer_info(&self, peer: PeerId) -> Vec<NegotiationAction> {
        self.with_session(peer, |session, actions| {
            let verdict = session.on_local_peer_info();
            if verdict == Verdict::Pending {
                let name = self.config.display_name.clone();
                push_frame(actions, peer, &Message::PeerInfo { name });
            }
            verdict
        })
    }

    /// Host: the joiner's peer info arrived. Final admission decision.
    pub fn on_remote_peer_info(&self, peer: PeerId) -> Vec<NegotiationAction> {
        self.with_session(peer, |session, actions| {
            let verdict = session.on_remote_peer_info();
            if matches!(verdict, Verdict::Resolved(_)) {
                push_frame(actions, peer, &Message::Welcome);
            }
            verdict
        })
    }

    /// Joiner: the host let us in.
    pub fn on_accepted(&self, peer: PeerId) -> Vec<NegotiationAction> {
        self.with_session(peer, |session, _| session.on_accepted())
    }

    /// The connection attempt ended with `status` (received from the host, or decided by
    /// the transport). Caches the failure for the display layer.
    pub fn on_connection_failed(&self, peer: PeerId, status: DisconnectStatus) -> Vec<NegotiationAction> {
        let Some(mut session) = self.sessions.lock().remove(&peer) else {
            tracing::debug!(target: "modsync::negotiation", %peer, %status, "failure for unknown peer");
            return vec![NegotiationAction::Failed { peer, status }];
        };
        let report = session.on_connection_failed(status);
        tracing::info!(target: "modsync::negotiation", %peer, %status, "connection attempt failed");
        self.remember_failure(&session, status, report);
        vec![NegotiationAction::Failed { peer, status }]
    }

    /// Connection closed. Drops the peer's entry so a reused identity starts clean.
    pub fn on_disconnected(&self, peer: PeerId) {
        if self.sessions.lock().remove(&peer).is_some() {
            tracing::debug!(target: "modsync::negotiation", %peer, "negotiation dropped on disconnect");
        }
    }

    /// Most recent remote snapshot accepted by any session. Outlives the connection.
    pub fn last_received_remote_snapshot(&self) -> Option<CompatibilitySnapshot> {
        self.last_remote.lock().clone()
    }

    /// Most recent rejection or failure. Returned once.
    pub fn take_last_failure(&self) -> Option<FailedNegotiation> {
        self.last_failure.lock().take()
    }

    pub fn session_state(&self, peer: PeerId) -> Option<NegotiationState> {
        self.sessions.lock().get(&peer).map(|s| s.state())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn with_session(
        &self,
        peer: PeerId,
        f: impl FnOnce(&mut NegotiationSession, &mut Vec<NegotiationAction>) -> Verdict,
    ) -> Vec<NegotiationAction> {
        let mut sessions = self.sessions.lock();
        let Some(mut session) = sessions.remove(&peer) else {
            tracing::warn!(target: "modsync::negotiation", %peer, "handshake event for unknown peer ignored");
            return Vec::new();
        };
        let mut actions = Vec::new();
        let verdict = f(&mut session, &mut actions);
        self.apply_verdict(&mut sessions, session, verdict, &mut actions);
        actions
    }

    /// Put the session back (or drop it on rejection) and translate the verdict into actions.
    fn apply_verdict(
        &self,
        sessions: &mut HashMap<PeerId, NegotiationSession>,
        session: NegotiationSession,
        verdict: Verdict,
        actions: &mut Vec<NegotiationAction>,
    ) {
        let peer = session.peer();
        match verdict {
            Verdict::Pending => {
                sessions.insert(peer, session);
            }
            Verdict::Resolved(report) => {
                actions.push(NegotiationAction::Resolved { peer, report });
                sessions.insert(peer, session);
            }
            Verdict::Rejected { status, report } => {
                if session.role() == Role::Host {
                    push_frame(actions, peer, &Message::Disconnect { status });
                }
                actions.push(NegotiationAction::Disconnect { peer, status });
                self.remember_failure(&session, status, report);
            }
        }
    }

    /// A session just stored its remote snapshot: it becomes the display layer's latest.
    fn record_remote(&self, session: &NegotiationSession) {
        if let Some(remote) = session.remote() {
            *self.last_remote.lock() = Some(remote.clone());
        }
    }

    fn remember_failure(
        &self,
        session: &NegotiationSession,
        status: DisconnectStatus,
        report: Option<DiscrepancyReport>,
    ) {
        *self.last_failure.lock() = Some(FailedNegotiation {
            peer: session.peer(),
            role: session.role(),
            status,
            report,
            local: session.local().clone(),
            remote: session.remote().cloned(),
        });
    }
}

fn push_frame(actions: &mut Vec<NegotiationAction>, peer: PeerId, msg: &Message) {
    match wire::encode_frame(msg) {
        Ok(frame) => actions.push(NegotiationAction::Send(peer, frame)),
        Err(e) => tracing::error!(target: "modsync::negotiation", %peer, "frame encode failed: {e}"),
    }
}
