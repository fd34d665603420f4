// MIT License - Copyright (c) 2026 telenot-bridge authors
// Wire-format constants

/// Frame start marker (appears twice in the header).
pub const START: u8 = 0x68;
/// Frame end marker.
pub const END: u8 = 0x16;

/// Header length in hex characters: `68 LL LL 68`.
pub const HEADER_HEX_LEN: usize = 8;
/// Framing overhead in hex characters: header, checksum and end marker.
pub const FRAME_OVERHEAD_HEX_LEN: usize = 12;

/// Reads without a complete frame before the accumulator buffer is discarded.
pub const MAX_READ_ITERATIONS: u32 = 100;

// Fixed telegrams
pub const SEND_NORM: &str = "6802026840024216";
pub const CONFIRM_ACK: &str = "6802026800020216";
pub const USED_STATE: &str = "680909687302051000000071241f16";
pub const SB_STATE_ON: &str = "680909687301050200";
pub const SB_STATE_OFF: &str = "680909687300050200";
pub const CONTACT_INFO_PREFIX: &str = "680909687302051000";
pub const CONTACT_INFO_SUFFIX: &str = "730c";
pub const SET_DATE_TIME_PREFIX: &str = "680b0b6873010750";

// Per-area command address bases (address = base + area * 8)
pub const DISARM_BASE: u16 = 1320;
pub const INT_ARM_BASE: u16 = 1321;
pub const EXT_ARM_BASE: u16 = 1322;
pub const RESET_ALARM_BASE: u16 = 1323;
/// Reporting point command address = base + point.
pub const REPORTING_POINT_BASE: u16 = 1519;

pub const MAX_SECURITY_AREA: u8 = 8;
pub const MAX_REPORTING_POINT: u16 = 128;

/// Discovery address ranges (inclusive).
pub const INPUT_CONTACTS: std::ops::RangeInclusive<u16> = 0..=1279;
pub const OUTPUT_CONTACTS: std::ops::RangeInclusive<u16> = 1280..=1327;
pub const SECURITY_AREA_CONTACTS: std::ops::RangeInclusive<u16> = 1328..=1391;
pub const REPORTING_AREA_CONTACTS: std::ops::RangeInclusive<u16> = 1392..=1519;

/// First address reported by the used-outputs bitmap.
pub const USED_OUTPUTS_BASE: u16 = 1280;

// Payload windows (hex character offsets)
pub const MP_RANGE: (usize, usize) = (24, 84);
pub const SB_RANGE: (usize, usize) = (36, 52);
pub const MB_RANGE: (usize, usize) = (52, 84);
pub const MBD_RANGE: (usize, usize) = (84, 116);
pub const USED_BITMAP_START: usize = 24;

// Timing defaults
pub const DEFAULT_TCP_PORT: u16 = 4116;
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 2 * 60 * 1000;
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_STALE_TIMEOUT_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
