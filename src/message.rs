// MIT License - Copyright (c) 2026 telenot-bridge authors
// Telegram classification

use std::fmt;

use crate::constants::{
    INPUT_CONTACTS, OUTPUT_CONTACTS, REPORTING_AREA_CONTACTS, SECURITY_AREA_CONTACTS,
};
use crate::frame::is_valid_frame;

/// Message types a panel telegram can be classified as.
///
/// The set is closed: every hex string maps to exactly one variant, with
/// [`MessageType::Unknown`] for well-framed telegrams nobody recognises and
/// [`MessageType::Invalid`] for anything that fails framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Idle poll: the panel asks whether we have anything to send.
    SendNorm,
    /// Bare acknowledge.
    ConfirmAck,
    /// Reporting group (Meldebereich) input bitmap.
    MpContacts,
    /// Security area status bytes, followed by the MB and MBD bitmaps.
    SbStatus,
    SysIntArmed,
    SysExtArmed,
    SysDisarmed,
    Alarm,
    Intrusion,
    BatteryMalfunction,
    PowerOutage,
    OpticalFlasherMalfunction,
    Horn1Malfunction,
    Horn2Malfunction,
    /// Communication fault record. No header is known for it, so
    /// [`classify`] never yields it.
    ComFault,
    /// Used-inputs bitmap (answer to the used-state request).
    UsedInputs,
    /// Used-outputs bitmap (answer to the used-state request).
    UsedOutputs,
    UsedContactsInfo,
    UsedOutputContactsInfo,
    UsedSbContactsInfo,
    UsedMbContactsInfo,
    Restart,
    /// Contact-info answer for an address outside every known range.
    NotUsedContact,
    Unknown,
    Invalid,
}

impl MessageType {
    /// Upper snake case name used in logs and MQTT payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendNorm => "SEND_NORM",
            Self::ConfirmAck => "CONF_ACK",
            Self::MpContacts => "MP",
            Self::SbStatus => "SB",
            Self::SysIntArmed => "SYS_INT_ARMED",
            Self::SysExtArmed => "SYS_EXT_ARMED",
            Self::SysDisarmed => "SYS_DISARMED",
            Self::Alarm => "ALARM",
            Self::Intrusion => "INTRUSION",
            Self::BatteryMalfunction => "BATTERY_MALFUNCTION",
            Self::PowerOutage => "POWER_OUTAGE",
            Self::OpticalFlasherMalfunction => "OPTICAL_FLASHER_MALFUNCTION",
            Self::Horn1Malfunction => "HORN_1_MALFUNCTION",
            Self::Horn2Malfunction => "HORN_2_MALFUNCTION",
            Self::ComFault => "COM_FAULT",
            Self::UsedInputs => "USED_INPUTS",
            Self::UsedOutputs => "USED_OUTPUTS",
            Self::UsedContactsInfo => "USED_CONTACTS_INFO",
            Self::UsedOutputContactsInfo => "USED_OUTPUT_CONTACTS_INFO",
            Self::UsedSbContactsInfo => "USED_SB_CONTACTS_INFO",
            Self::UsedMbContactsInfo => "USED_MB_CONTACTS_INFO",
            Self::Restart => "RESTART",
            Self::NotUsedContact => "NOT_USED_CONTACT",
            Self::Unknown => "UNKNOWN",
            Self::Invalid => "INVALID",
        }
    }

    /// Panel-wide malfunction and intrusion records (EMA state).
    pub fn is_system_state(&self) -> bool {
        matches!(
            self,
            Self::Intrusion
                | Self::BatteryMalfunction
                | Self::PowerOutage
                | Self::OpticalFlasherMalfunction
                | Self::Horn1Malfunction
                | Self::Horn2Malfunction
                | Self::ComFault
        )
    }

    /// Per security area arm/disarm/alarm records.
    pub fn is_area_state(&self) -> bool {
        matches!(
            self,
            Self::SysIntArmed | Self::SysExtArmed | Self::SysDisarmed | Self::Alarm
        )
    }

    /// Answers to a contact-info request.
    pub fn is_contact_info(&self) -> bool {
        matches!(
            self,
            Self::UsedContactsInfo
                | Self::UsedOutputContactsInfo
                | Self::UsedSbContactsInfo
                | Self::UsedMbContactsInfo
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact 12-byte headings.
const HEADINGS: [(&str, MessageType); 6] = [
    ("682c2c687302050201001001", MessageType::Intrusion),
    ("681a1a687302050200001401", MessageType::BatteryMalfunction),
    ("681a1a687302050200001501", MessageType::PowerOutage),
    ("681a1a687302050200001301", MessageType::OpticalFlasherMalfunction),
    ("681a1a687302050200001101", MessageType::Horn1Malfunction),
    ("681a1a687302050200001201", MessageType::Horn2Malfunction),
];

/// Prefix patterns, `?` matching any hex digit. Checked top-down, first match wins.
/// The bool marks patterns that also require the trailing end marker.
const PATTERNS: [(&str, bool, Pattern); 13] = [
    ("68????687302??????ffff0153", true, Pattern::Type(MessageType::Restart)),
    ("68????687302??0c", true, Pattern::ContactInfo),
    ("68????687302??2400050072", true, Pattern::Type(MessageType::UsedOutputs)),
    ("68????687302??2400000071", true, Pattern::Type(MessageType::UsedInputs)),
    ("682c2c6873020502??????01e1", false, Pattern::Type(MessageType::SysDisarmed)),
    ("682c2c6873020502??????0162", false, Pattern::Type(MessageType::SysIntArmed)),
    ("682c2c6873020502??????0161", false, Pattern::Type(MessageType::SysExtArmed)),
    ("682c2c6873020502??????0122", false, Pattern::Type(MessageType::Alarm)),
    ("682c2c6873020502??????01a2", false, Pattern::Type(MessageType::Alarm)),
    ("68????687302??2400050002", true, Pattern::Type(MessageType::SbStatus)),
    ("68????687302??2400000001", true, Pattern::Type(MessageType::MpContacts)),
    ("6802026800020216", false, Pattern::Type(MessageType::ConfirmAck)),
    ("6802026840024216", false, Pattern::Type(MessageType::SendNorm)),
];

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Type(MessageType),
    ContactInfo,
}

/// Classify a telegram given as lowercase hex text.
///
/// Pure and total. Framing is checked first, so a corrupt telegram is
/// `Invalid` no matter what its heading looks like.
pub fn classify(hex: &str) -> MessageType {
    if hex.len() < 4 || !is_well_formed(hex) {
        return MessageType::Invalid;
    }

    if let Some(heading) = hex.get(..24) {
        if let Some((_, mt)) = HEADINGS.iter().find(|(h, _)| *h == heading) {
            return *mt;
        }
    }

    for (pattern, needs_end, kind) in PATTERNS.iter() {
        if !matches_pattern(hex, pattern) || (*needs_end && !hex.ends_with("16")) {
            continue;
        }
        return match kind {
            Pattern::Type(mt) => *mt,
            Pattern::ContactInfo => contact_info_type(hex),
        };
    }

    MessageType::Unknown
}

fn contact_info_type(hex: &str) -> MessageType {
    let address = match hex.get(18..22).and_then(|a| u16::from_str_radix(a, 16).ok()) {
        Some(a) => a,
        None => return MessageType::NotUsedContact,
    };
    if INPUT_CONTACTS.contains(&address) {
        MessageType::UsedContactsInfo
    } else if OUTPUT_CONTACTS.contains(&address) {
        MessageType::UsedOutputContactsInfo
    } else if SECURITY_AREA_CONTACTS.contains(&address) {
        MessageType::UsedSbContactsInfo
    } else if REPORTING_AREA_CONTACTS.contains(&address) {
        MessageType::UsedMbContactsInfo
    } else {
        MessageType::NotUsedContact
    }
}

fn matches_pattern(hex: &str, pattern: &str) -> bool {
    hex.len() >= pattern.len()
        && hex
            .bytes()
            .zip(pattern.bytes())
            .all(|(h, p)| p == b'?' || h == p)
}

fn is_well_formed(hex: &str) -> bool {
    match hex::decode(hex) {
        Ok(bytes) => is_valid_frame(&bytes),
        Err(_) => false,
    }
}
