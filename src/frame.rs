// MIT License - Copyright (c) 2026 telenot-bridge authors
// Frame accumulation and checksum

use tracing::{debug, trace};

use crate::constants::{
    END, FRAME_OVERHEAD_HEX_LEN, HEADER_HEX_LEN, MAX_READ_ITERATIONS, START,
};
use crate::error::{Result, TelenotError};
use crate::message::{classify, MessageType};

/// Arithmetic sum of the data bytes, truncated to 8 bits.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Check a complete frame `68 LL LL 68 <data> CS 16`.
pub fn is_valid_frame(frame: &[u8]) -> bool {
    if frame.len() < 6 || frame[0] != START || frame[3] != START || frame[1] != frame[2] {
        return false;
    }
    let len = frame[1] as usize;
    if frame.len() != len + 6 {
        return false;
    }
    frame[4 + len] == checksum(&frame[4..4 + len]) && frame[5 + len] == END
}

/// Append checksum and end marker to a hex frame body (`68 LL LL 68 <data>`).
///
/// Returns the sealed frame as lowercase hex. Fails if the body is not hex or
/// its data length disagrees with the length octet.
pub fn seal(body_hex: &str) -> Result<String> {
    let mut bytes = hex::decode(body_hex)
        .map_err(|e| TelenotError::invalid(format!("bad hex in frame body: {e}")))?;
    if bytes.len() < 4 || bytes[0] != START || bytes[3] != START || bytes[1] != bytes[2] {
        return Err(TelenotError::invalid(format!("bad frame header: {body_hex}")));
    }
    if bytes.len() - 4 != bytes[1] as usize {
        return Err(TelenotError::invalid(format!(
            "length octet {} does not match {} data bytes",
            bytes[1],
            bytes.len() - 4
        )));
    }
    let cs = checksum(&bytes[4..]);
    bytes.push(cs);
    bytes.push(END);
    Ok(hex::encode(bytes))
}

/// One complete telegram as received from the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    raw_hex: String,
    msg_type: MessageType,
    payload: Vec<u8>,
}

impl Telegram {
    /// Build a telegram from hex text, classifying it on the way.
    ///
    /// The payload is the data section between the header and the checksum;
    /// it is empty for invalid telegrams.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        let raw_hex = hex.into().to_ascii_lowercase();
        let msg_type = classify(&raw_hex);
        let payload = if msg_type == MessageType::Invalid {
            Vec::new()
        } else {
            hex::decode(&raw_hex)
                .ok()
                .and_then(|b| b.get(4..b.len().saturating_sub(2)).map(|d| d.to_vec()))
                .unwrap_or_default()
        };
        Self {
            raw_hex,
            msg_type,
            payload,
        }
    }

    pub fn hex(&self) -> &str {
        &self.raw_hex
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Slice of the hex text, or a parse error naming what was missing.
    pub(crate) fn hex_field(&self, start: usize, end: usize, what: &str) -> Result<&str> {
        self.raw_hex.get(start..end).ok_or_else(|| {
            TelenotError::malformed(format!(
                "{} telegram too short for {what} ({} < {end})",
                self.msg_type,
                self.raw_hex.len()
            ))
        })
    }

    /// Hex byte at `start..start + 2`, parsed.
    pub(crate) fn hex_u8(&self, start: usize, what: &str) -> Result<u8> {
        let field = self.hex_field(start, start + 2, what)?;
        u8::from_str_radix(field, 16)
            .map_err(|_| TelenotError::malformed(format!("{what}: not hex: {field}")))
    }
}

enum Step {
    Frame(Telegram),
    NeedMore,
    Discard(&'static str),
}

/// Turns a fragmented byte stream into complete telegrams.
///
/// Bytes are appended as hex text. A frame is cut once `LL * 2 + 12` hex
/// characters are buffered and its checksum holds; anything after it stays
/// buffered for the next read. Any framing error discards the whole buffer.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: String,
    iterations: u32,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the bytes of one read. Returns the telegrams completed by it, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Telegram> {
        self.buffer.push_str(&hex::encode(bytes));
        trace!("Frame buffer: {}", self.buffer);

        let mut telegrams = Vec::new();
        loop {
            match self.next_frame() {
                Step::Frame(telegram) => telegrams.push(telegram),
                Step::NeedMore => break,
                Step::Discard(reason) => {
                    debug!("Discarding frame buffer ({reason}): {}", self.buffer);
                    self.buffer.clear();
                    break;
                }
            }
        }

        if !telegrams.is_empty() || self.buffer.is_empty() {
            self.iterations = 0;
        } else {
            self.iterations += 1;
            if self.iterations >= MAX_READ_ITERATIONS {
                debug!(
                    "No complete frame after {} reads, discarding {} buffered chars",
                    self.iterations,
                    self.buffer.len()
                );
                self.buffer.clear();
                self.iterations = 0;
            }
        }

        telegrams
    }

    /// Hex text currently waiting for the rest of a frame.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    fn next_frame(&mut self) -> Step {
        let buf = self.buffer.as_str();
        if buf.len() < 2 {
            return Step::NeedMore;
        }
        if &buf[0..2] != "68" {
            return Step::Discard("missing start marker");
        }
        if buf.len() < HEADER_HEX_LEN {
            return Step::NeedMore;
        }
        if buf[2..4] != buf[4..6] {
            return Step::Discard("length octets disagree");
        }
        if &buf[6..8] != "68" {
            return Step::Discard("missing second start marker");
        }
        let len = match usize::from_str_radix(&buf[2..4], 16) {
            Ok(len) => len,
            Err(_) => return Step::Discard("length octet is not hex"),
        };
        let frame_len = len * 2 + FRAME_OVERHEAD_HEX_LEN;
        if buf.len() < frame_len {
            return Step::NeedMore;
        }

        let valid = hex::decode(&buf[..frame_len])
            .map(|bytes| is_valid_frame(&bytes))
            .unwrap_or(false);
        if !valid {
            return Step::Discard("checksum mismatch");
        }

        let raw: String = self.buffer.drain(..frame_len).collect();
        Step::Frame(Telegram::from_hex(raw))
    }
}
