// MIT License - Copyright (c) 2026 telenot-bridge authors
// Bridge events

use chrono::NaiveDateTime;

use crate::devices::SecurityAreaStatus;
use crate::message::MessageType;

/// Bit-array channel groups tracked by the diff engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupTag {
    /// Reporting group inputs (Meldegruppen)
    Mp,
    /// Reporting area outputs (Meldebereiche)
    Mb,
    /// Reporting area disable flags
    Mbd,
}

impl GroupTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupTag::Mp => "MP",
            GroupTag::Mb => "MB",
            GroupTag::Mbd => "MBD",
        }
    }
}

/// One changed (or refreshed) bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressEvent {
    pub group: GroupTag,
    pub address: u16,
    pub value: bool,
}

/// One security area status byte, emitted as a unit.
///
/// `bits` are in wire order after reversal; a `false` bit means the
/// condition is active. Use [`SecurityAreaEvent::status`] for the decoded view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityAreaEvent {
    pub area: u8,
    pub bits: [bool; 8],
}

impl SecurityAreaEvent {
    pub fn status(&self) -> SecurityAreaStatus {
        SecurityAreaStatus::from_bits_inverted(&self.bits)
    }
}

/// Timestamped arm/disarm/alarm or malfunction record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub msg_type: MessageType,
    /// Security area for area records, panel address for system records.
    pub address: u16,
    /// Panel time of the event; `None` if the panel sent an impossible date.
    pub timestamp: Option<NaiveDateTime>,
    /// Contact text attached by the panel (may be empty).
    pub contact: String,
    /// `true` when the condition was raised, `false` when it was cleared.
    pub set_clear: bool,
}

/// Category of a discovered address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactKind {
    Input,
    Output,
    SecurityArea,
    ReportingArea,
}

impl ContactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactKind::Input => "input",
            ContactKind::Output => "output",
            ContactKind::SecurityArea => "security_area",
            ContactKind::ReportingArea => "reporting_area",
        }
    }
}

/// A named address found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredContact {
    pub kind: ContactKind,
    pub address: u16,
    pub name: String,
}

/// Everything enumerated by the last used-state request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredAddresses {
    pub inputs: Vec<u16>,
    pub outputs: Vec<u16>,
    pub security_areas: Vec<u8>,
    pub reporting_areas: Vec<u16>,
    pub contacts: Vec<DiscoveredContact>,
}

/// All events that can be emitted by the bridge.
///
/// Users subscribe via `bridge.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<BridgeEvent>`.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Transport to the panel opened
    Connected,
    /// Transport closed (I/O error, staleness or disconnect)
    Disconnected,
    /// Connecting failed; `retrying` is false for failures that need an operator
    ConnectionFailed { reason: String, retrying: bool },
    /// A contact, output or reporting flag changed
    Address(AddressEvent),
    /// A security area status byte changed
    SecurityArea(SecurityAreaEvent),
    /// Arm/disarm/alarm record for one security area
    AreaState(StateRecord),
    /// Intrusion or malfunction record
    SystemState(StateRecord),
    /// A used address and its display name
    ContactDiscovered(DiscoveredContact),
    /// Security areas found in the used-outputs bitmap
    SecurityAreasDiscovered(Vec<u8>),
    /// Every queued address has been named
    DiscoveryComplete(DiscoveredAddresses),
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<BridgeEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<BridgeEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
