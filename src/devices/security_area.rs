// MIT License - Copyright (c) 2026 telenot-bridge authors
// Security area (Sicherungsbereich) status

use bitflags::bitflags;

bitflags! {
    /// Security area conditions decoded from one SB status byte.
    ///
    /// Flag order matches the bit order on the wire after reversal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SecurityAreaStatus: u8 {
        const DISARMED          = 0x01;
        const INTERNALLY_ARMED  = 0x02;
        const EXTERNALLY_ARMED  = 0x04;
        const ALARM             = 0x08;
        const MALFUNCTION       = 0x10;
        /// Ready to arm internally
        const READY_INT         = 0x20;
        /// Ready to arm externally
        const READY_EXT         = 0x40;
        const INTERNAL_HORN     = 0x80;
    }
}

const FLAG_NAMES: [(SecurityAreaStatus, &str); 8] = [
    (SecurityAreaStatus::DISARMED, "Disarmed"),
    (SecurityAreaStatus::INTERNALLY_ARMED, "InternallyArmed"),
    (SecurityAreaStatus::EXTERNALLY_ARMED, "ExternallyArmed"),
    (SecurityAreaStatus::ALARM, "Alarm"),
    (SecurityAreaStatus::MALFUNCTION, "Malfunction"),
    (SecurityAreaStatus::READY_INT, "ReadyToArmInternally"),
    (SecurityAreaStatus::READY_EXT, "ReadyToArmExternally"),
    (SecurityAreaStatus::INTERNAL_HORN, "InternalHorn"),
];

impl SecurityAreaStatus {
    /// Build from the 8 bits of an SB byte. The panel reports an active
    /// condition as 0, so a `false` bit sets the flag.
    pub fn from_bits_inverted(bits: &[bool; 8]) -> Self {
        bits.iter()
            .enumerate()
            .filter(|(_, b)| !**b)
            .fold(Self::empty(), |acc, (i, _)| acc | Self::from_bits_retain(1 << i))
    }

    /// Names of the active conditions, in bit order.
    pub fn names(&self) -> Vec<&'static str> {
        FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    // Convenience accessors
    pub fn is_disarmed(&self) -> bool { self.contains(Self::DISARMED) }
    pub fn is_armed(&self) -> bool { self.intersects(Self::INTERNALLY_ARMED | Self::EXTERNALLY_ARMED) }
    pub fn is_alarm(&self) -> bool { self.contains(Self::ALARM) }
    pub fn is_malfunction(&self) -> bool { self.contains(Self::MALFUNCTION) }
}
