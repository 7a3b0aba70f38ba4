//! Module compatibility negotiation between a session host and a joining peer.
//! Host-driven: no I/O; the transport passes connection events in and receives actions.

pub mod compare;
pub mod identity;
pub mod module;
pub mod negotiator;
pub mod protocol;
pub mod report;
pub mod session;
pub mod snapshot;
pub mod version;
pub mod wire;

pub use compare::{compare, DiscrepancyReport};
pub use identity::PeerId;
pub use module::{CompatibilityLevel, ModuleDescriptor, ModuleError, ModuleRegistry, ModuleSource};
pub use negotiator::{FailedNegotiation, MessageError, NegotiationAction, Negotiator, NegotiatorConfig};
pub use protocol::{DisconnectStatus, Message, PROTOCOL_VERSION};
pub use report::{format_report, ReportLine, Severity};
pub use session::{NegotiationSession, NegotiationState, Role, Verdict};
pub use snapshot::{CompatibilitySnapshot, LocalSnapshotBuilder};
pub use version::{compare_versions, Strictness, Version, VersionOrdering};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
