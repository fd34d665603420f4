// MIT License - Copyright (c) 2026 telenot-bridge authors
// Bit-array snapshots and edge detection

use tracing::trace;

use crate::constants::{MBD_RANGE, MB_RANGE, MP_RANGE, SB_RANGE};
use crate::error::{Result, TelenotError};
use crate::event::{AddressEvent, GroupTag, SecurityAreaEvent};
use crate::frame::Telegram;

/// Bits of one wire byte in address order.
///
/// The panel sends the lowest address in the least significant bit.
pub fn reverse_bits(byte: u8) -> [bool; 8] {
    std::array::from_fn(|i| (byte >> i) & 1 == 1)
}

/// Hex text to per-byte bit groups, each in address order.
pub fn bytes_from_hex(hex_str: &str) -> Result<Vec<[bool; 8]>> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| TelenotError::malformed(format!("bitmap is not hex: {e}")))?;
    Ok(bytes.into_iter().map(reverse_bits).collect())
}

/// Hex text to a flat bit array in address order.
pub fn bits_from_hex(hex_str: &str) -> Result<Vec<bool>> {
    Ok(bytes_from_hex(hex_str)?.into_iter().flatten().collect())
}

/// Compare two bit arrays.
///
/// Emits one event per bit of `new` whose value differs from `prev`, or for
/// every bit when `refresh` is set or the lengths differ.
pub fn diff_bits(
    group: GroupTag,
    prev: &[bool],
    new: &[bool],
    base: u16,
    refresh: bool,
) -> Vec<AddressEvent> {
    let full = refresh || prev.len() != new.len();
    new.iter()
        .enumerate()
        .filter(|(i, value)| full || prev[*i] != **value)
        .map(|(i, value)| AddressEvent {
            group,
            address: base + i as u16,
            value: *value,
        })
        .collect()
}

/// Compare security area status bytes as units.
///
/// Areas are numbered from `first_area`. A byte with no predecessor always
/// counts as changed.
pub fn diff_bytes(
    prev: &[[bool; 8]],
    new: &[[bool; 8]],
    first_area: u8,
    refresh: bool,
) -> Vec<SecurityAreaEvent> {
    new.iter()
        .enumerate()
        .filter(|(i, bits)| refresh || prev.get(*i) != Some(*bits))
        .map(|(i, bits)| SecurityAreaEvent {
            area: first_area + i as u8,
            bits: *bits,
        })
        .collect()
}

/// Events produced by one `SB` telegram.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SbDiff {
    pub areas: Vec<SecurityAreaEvent>,
    pub outputs: Vec<AddressEvent>,
}

/// Previous snapshots of the four channel groups of one connection.
///
/// Snapshots start empty, so the first telegram of each group reports
/// every address.
#[derive(Debug, Default)]
pub struct BitDiffEngine {
    mp: Vec<bool>,
    sb: Vec<[bool; 8]>,
    mb: Vec<bool>,
    mbd: Vec<bool>,
}

impl BitDiffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff an `MP` telegram. Input addresses start at 0.
    pub fn diff_mp(&mut self, telegram: &Telegram, refresh: bool) -> Result<Vec<AddressEvent>> {
        let hex_str = telegram.hex();
        let end = MP_RANGE.1.min(hex_str.len());
        let window = telegram.hex_field(MP_RANGE.0, end, "MP bitmap")?;
        let bits = bits_from_hex(window)?;
        let events = diff_bits(GroupTag::Mp, &self.mp, &bits, 0, refresh);
        trace!("MP diff: {} of {} bits reported", events.len(), bits.len());
        self.mp = bits;
        Ok(events)
    }

    /// Diff an `SB` telegram: security area bytes, reporting areas and
    /// their disable flags. Nothing is replaced unless all three windows decode.
    pub fn diff_sb_status(&mut self, telegram: &Telegram, refresh: bool) -> Result<SbDiff> {
        let hex_str = telegram.hex();
        let sb_end = SB_RANGE.1.min(hex_str.len());
        let sb = bytes_from_hex(telegram.hex_field(SB_RANGE.0, sb_end, "SB status")?)?;
        let mb = bits_from_hex(telegram.hex_field(MB_RANGE.0, MB_RANGE.1, "MB bitmap")?)?;
        let mbd = bits_from_hex(telegram.hex_field(MBD_RANGE.0, MBD_RANGE.1, "MBD bitmap")?)?;

        let areas = diff_bytes(&self.sb, &sb, 1, refresh);
        let mut outputs = diff_bits(GroupTag::Mb, &self.mb, &mb, 1, refresh);
        outputs.extend(diff_bits(GroupTag::Mbd, &self.mbd, &mbd, 1, refresh));
        trace!(
            "SB diff: {} areas, {} reporting flags reported",
            areas.len(),
            outputs.len()
        );

        self.sb = sb;
        self.mb = mb;
        self.mbd = mbd;
        Ok(SbDiff { areas, outputs })
    }

    /// Forget all snapshots; the next telegrams report every address.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
