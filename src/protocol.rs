// MIT License - Copyright (c) 2026 telenot-bridge authors
// Outbound commands and payload decoders

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::config::ArmMode;
use crate::constants::{
    CONFIRM_ACK, CONTACT_INFO_PREFIX, CONTACT_INFO_SUFFIX, DISARM_BASE, EXT_ARM_BASE,
    INT_ARM_BASE, MAX_REPORTING_POINT, MAX_SECURITY_AREA, OUTPUT_CONTACTS,
    REPORTING_AREA_CONTACTS, REPORTING_POINT_BASE, RESET_ALARM_BASE, SB_STATE_OFF, SB_STATE_ON,
    SECURITY_AREA_CONTACTS, SEND_NORM, SET_DATE_TIME_PREFIX, USED_BITMAP_START, USED_STATE,
};
use crate::diff::bits_from_hex;
use crate::error::{Result, TelenotError};
use crate::event::StateRecord;
use crate::frame::{seal, Telegram};
use crate::message::MessageType;

/// Commands that can be sent to the panel.
///
/// # Flow control
///
/// The panel polls with `SEND_NORM` whenever it is idle. Exactly one
/// telegram may be written per poll: either a queued command or a
/// `Confirm_ACK`. Anything else written while the panel is busy is
/// dropped by the panel without notice, which is why every command goes
/// through the readiness gate in [`crate::engine::CommandEngine`].
///
/// # Encoding
///
/// Area and reporting point commands address a panel object
/// (`base + 8 * area` or `base + point`) inside an SB state telegram:
///
/// ```text
/// 68 09 09 68 73 01 05 02 00 | 0 aaa | 02 xx | CS 16
///              ^^ 01 = on, 00 = off    ^^ action code
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `SEND_NORM` poll. Only the panel sends this; kept for tests and fake panels.
    SendNorm,
    /// `Confirm_ACK`, the answer to every telegram that wants no data back.
    ConfirmAck,
    /// Ask for the used-inputs and used-outputs bitmaps.
    UsedState,
    /// Ask for the display name of one address.
    ContactInfo { address: u16 },
    /// Disarm security area 1-8. Action code `02e1`.
    DisarmArea { area: u8 },
    /// Arm security area 1-8. Action code `0262` internal, `0261` external.
    ArmArea { area: u8, mode: ArmMode },
    /// Reset an alarm in security area 1-8. Action code `0252`.
    ResetAlarm { area: u8 },
    /// Re-enable reporting point 1-128. Action code `02d1`.
    EnableReportingPoint { point: u16 },
    /// Disable reporting point 1-128. Action code `0251`.
    DisableReportingPoint { point: u16 },
    /// Set the panel clock.
    SetDateTime(NaiveDateTime),
}

impl Command {
    pub fn arm(area: u8, mode: ArmMode) -> Self {
        Command::ArmArea { area, mode }
    }

    /// Encode to a complete hex telegram including checksum and end marker.
    ///
    /// Fails with [`TelenotError::InvalidParameter`] for areas outside 1-8,
    /// reporting points outside 1-128 and dates the panel cannot store.
    pub fn to_hex(&self) -> Result<String> {
        match self {
            Command::SendNorm => Ok(SEND_NORM.to_string()),
            Command::ConfirmAck => Ok(CONFIRM_ACK.to_string()),
            Command::UsedState => Ok(USED_STATE.to_string()),
            Command::ContactInfo { address } => seal(&format!(
                "{CONTACT_INFO_PREFIX}{address:04x}{CONTACT_INFO_SUFFIX}"
            )),
            Command::DisarmArea { area } => area_command(DISARM_BASE, *area, "02e1"),
            Command::ArmArea {
                area,
                mode: ArmMode::Internal,
            } => area_command(INT_ARM_BASE, *area, "0262"),
            Command::ArmArea {
                area,
                mode: ArmMode::External,
            } => area_command(EXT_ARM_BASE, *area, "0261"),
            Command::ResetAlarm { area } => area_command(RESET_ALARM_BASE, *area, "0252"),
            Command::EnableReportingPoint { point } => {
                reporting_point_command(SB_STATE_ON, *point, "02d1")
            }
            Command::DisableReportingPoint { point } => {
                reporting_point_command(SB_STATE_OFF, *point, "0251")
            }
            Command::SetDateTime(dt) => {
                let year = dt.year() - 2000;
                if !(0..=255).contains(&year) {
                    return Err(TelenotError::invalid(format!(
                        "year {} outside 2000-2255",
                        dt.year()
                    )));
                }
                seal(&format!(
                    "{SET_DATE_TIME_PREFIX}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                    year,
                    dt.weekday().num_days_from_monday(),
                    dt.month(),
                    dt.day(),
                    dt.hour(),
                    dt.minute(),
                    dt.second()
                ))
            }
        }
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let hex_str = self.to_hex()?;
        hex::decode(&hex_str)
            .map_err(|e| TelenotError::invalid(format!("encoded command is not hex: {e}")))
    }

    /// Short name for logs and timeout errors.
    pub fn log_label(&self) -> String {
        match self {
            Command::SendNorm => "SEND_NORM".to_string(),
            Command::ConfirmAck => "Confirm_ACK".to_string(),
            Command::UsedState => "USED_STATE".to_string(),
            Command::ContactInfo { address } => format!("CONTACT_INFO 0x{address:04x}"),
            Command::DisarmArea { area } => format!("DISARM area {area}"),
            Command::ArmArea {
                area,
                mode: ArmMode::Internal,
            } => format!("INT_ARM area {area}"),
            Command::ArmArea {
                area,
                mode: ArmMode::External,
            } => format!("EXT_ARM area {area}"),
            Command::ResetAlarm { area } => format!("RESET_ALARM area {area}"),
            Command::EnableReportingPoint { point } => format!("ENABLE_MP {point}"),
            Command::DisableReportingPoint { point } => format!("DISABLE_MP {point}"),
            Command::SetDateTime(dt) => format!("SET_DATETIME {dt}"),
        }
    }
}

fn area_command(base: u16, area: u8, action: &str) -> Result<String> {
    if !(1..=MAX_SECURITY_AREA).contains(&area) {
        return Err(TelenotError::invalid(format!(
            "security area {area} outside 1-{MAX_SECURITY_AREA}"
        )));
    }
    let address = base + 8 * area as u16;
    seal(&format!("{SB_STATE_ON}0{address:03x}{action}"))
}

fn reporting_point_command(prefix: &str, point: u16, action: &str) -> Result<String> {
    if !(1..=MAX_REPORTING_POINT).contains(&point) {
        return Err(TelenotError::invalid(format!(
            "reporting point {point} outside 1-{MAX_REPORTING_POINT}"
        )));
    }
    let address = REPORTING_POINT_BASE + point;
    seal(&format!("{prefix}0{address:03x}{action}"))
}

/// Decode panel text. The panel uses Latin-1 with its own codes for the
/// German umlauts; trailing padding is dropped.
pub fn decode_panel_text(hex_str: &str) -> String {
    let bytes = hex::decode(hex_str).unwrap_or_default();
    let text: String = bytes
        .iter()
        .map(|b| match b {
            0xe1 => 'ä',
            0xef => 'ö',
            0xf5 => 'ü',
            _ => *b as char,
        })
        .collect();
    text.trim_end_matches(|c: char| c == ' ' || c == '\0').to_string()
}

/// Panel timestamp of an area or system state telegram.
///
/// Returns `Ok(None)` when the fields are present but do not form a date.
fn decode_timestamp(telegram: &Telegram) -> Result<Option<NaiveDateTime>> {
    let year = telegram.hex_u8(30, "year")? as i32 + 2000;
    let month = telegram.hex_u8(34, "month")? as u32;
    let day = telegram.hex_u8(36, "day")? as u32;
    let hour = telegram.hex_u8(38, "hour")? as u32;
    let minute = telegram.hex_u8(40, "minute")? as u32;
    let second = telegram.hex_u8(42, "second")? as u32;
    Ok(NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second)))
}

/// Contact text at hex 48..82, cut short for short telegrams.
fn contact_text(telegram: &Telegram) -> String {
    let hex_str = telegram.hex();
    // stop before checksum and end marker
    let end = 82.min(hex_str.len().saturating_sub(4));
    match hex_str.get(48..end) {
        Some(text) if text.len() % 2 == 0 => decode_panel_text(text),
        Some(text) => decode_panel_text(&text[..text.len() - 1]),
        None => String::new(),
    }
}

/// Decode an arm/disarm/alarm record for one security area.
pub fn decode_area_state(telegram: &Telegram) -> Result<StateRecord> {
    let msg_type = telegram.msg_type();
    let address = match msg_type {
        MessageType::SysIntArmed | MessageType::SysExtArmed | MessageType::SysDisarmed => {
            let field = telegram.hex_field(18, 22, "area address")?;
            let object = u16::from_str_radix(field, 16)
                .map_err(|_| TelenotError::malformed(format!("area address not hex: {field}")))?;
            let offset = object
                .checked_sub(*SECURITY_AREA_CONTACTS.start() - 1)
                .filter(|o| *o > 0)
                .ok_or_else(|| {
                    TelenotError::malformed(format!("area address {object} below security areas"))
                })?;
            offset.div_ceil(8)
        }
        MessageType::Alarm => telegram.hex_u8(16, "alarm area")? as u16,
        other => {
            return Err(TelenotError::malformed(format!(
                "{other} is not an area state telegram"
            )))
        }
    };

    Ok(StateRecord {
        msg_type,
        address,
        timestamp: decode_timestamp(telegram)?,
        contact: contact_text(telegram),
        set_clear: telegram.hex_u8(24, "set/clear")? == 0x22,
    })
}

/// Event codes that mark an intrusion or malfunction as raised.
const SYSTEM_SET_CODES: [u8; 6] = [0x22, 0x23, 0x30, 0x32, 0x33, 0x34];

/// Decode an intrusion or malfunction record.
pub fn decode_system_state(telegram: &Telegram) -> Result<StateRecord> {
    let msg_type = telegram.msg_type();
    if !msg_type.is_system_state() {
        return Err(TelenotError::malformed(format!(
            "{msg_type} is not a system state telegram"
        )));
    }
    let contact = if telegram.hex().get(46..48) == Some("54") {
        contact_text(telegram)
    } else {
        String::new()
    };

    Ok(StateRecord {
        msg_type,
        address: telegram.hex_u8(16, "address")? as u16,
        timestamp: decode_timestamp(telegram)?,
        contact,
        set_clear: SYSTEM_SET_CODES.contains(&telegram.hex_u8(24, "set/clear")?),
    })
}

/// Decode the display name from a contact-info answer.
pub fn decode_contact_name(telegram: &Telegram) -> Result<String> {
    let state_len = telegram.hex_u8(12, "state block length")? as usize * 2;
    let name_len = telegram.hex_u8(16 + state_len, "name length")? as usize * 2;
    let start = 20 + state_len;
    let name = telegram.hex_field(start, start + name_len, "contact name")?;
    Ok(decode_panel_text(name))
}

/// Addresses marked as used in a used-inputs or used-outputs bitmap.
///
/// A cleared bit marks a used address. `base` is the address of the first bit.
pub fn used_addresses(telegram: &Telegram, base: u16) -> Result<Vec<u16>> {
    let end = 16 + telegram.hex_u8(12, "bitmap length")? as usize * 2;
    if end <= USED_BITMAP_START {
        return Ok(Vec::new());
    }
    let bitmap = telegram.hex_field(USED_BITMAP_START, end, "used bitmap")?;
    Ok(bits_from_hex(bitmap)?
        .into_iter()
        .enumerate()
        .filter(|(_, bit)| !*bit)
        .map(|(i, _)| base + i as u16)
        .collect())
}

/// Used output addresses split by range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPartition {
    pub outputs: Vec<u16>,
    pub security_area_contacts: Vec<u16>,
    /// Security areas owning at least one used contact, ascending, no duplicates.
    pub security_areas: Vec<u8>,
    pub reporting_areas: Vec<u16>,
}

pub fn partition_outputs(addresses: &[u16]) -> OutputPartition {
    let mut partition = OutputPartition::default();
    for &address in addresses {
        if OUTPUT_CONTACTS.contains(&address) {
            partition.outputs.push(address);
        } else if SECURITY_AREA_CONTACTS.contains(&address) {
            let area = ((address - SECURITY_AREA_CONTACTS.start()) / 8 + 1) as u8;
            if !partition.security_areas.contains(&area) {
                partition.security_areas.push(area);
            }
            partition.security_area_contacts.push(address);
        } else if REPORTING_AREA_CONTACTS.contains(&address) {
            partition.reporting_areas.push(address);
        }
    }
    partition
}
