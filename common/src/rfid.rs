//! UHF reader frames and tag identifiers.
//!
//! Reader responses look like `"CT" | len (u16 BE) | body[len]`, where the last
//! body byte is the two's-complement checksum of every preceding byte.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TrackerError;

/// Bytes in a tag's TID area.
pub const TAG_LEN: usize = 12;

pub const FRAME_HEADER: [u8; 2] = *b"CT";

/// Longest body accepted after the length field.
pub const MAX_FRAME_BODY: usize = 64;

/// Single inventory poll in answer mode.
pub const POLL_COMMAND: [u8; 10] = [0x53, 0x57, 0x00, 0x06, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x50];

/// Reader response when no tag is in the field.
pub const NO_CARD_FRAME: [u8; 8] = [0x43, 0x54, 0x00, 0x04, 0x00, 0x01, 0x00, 0x64];

const TID_OFFSET: usize = 12;

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

pub fn verify_checksum(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((last, data)) if !data.is_empty() => checksum(data) == *last,
        _ => false,
    }
}

/// A decoded reader response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderFrame {
    NoCard,
    Tag(RfidTag),
}

/// Body length announced by a frame header, or an error if the header is not
/// a reader response.
pub fn body_len(header: &[u8; 4]) -> Result<usize, TrackerError> {
    if header[..2] != FRAME_HEADER {
        return Err(TrackerError::InvalidRfidTag(format!(
            "bad frame header {}",
            hex::encode(&header[..2])
        )));
    }
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    if len == 0 || len > MAX_FRAME_BODY {
        return Err(TrackerError::InvalidRfidTag(format!(
            "frame length {len} out of range"
        )));
    }
    Ok(len)
}

pub fn decode_frame(frame: &[u8]) -> Result<ReaderFrame, TrackerError> {
    if frame.len() < 4 {
        return Err(TrackerError::InvalidRfidTag("frame too short".into()));
    }
    let header: [u8; 4] = [frame[0], frame[1], frame[2], frame[3]];
    let len = body_len(&header)?;
    if frame.len() != 4 + len {
        return Err(TrackerError::InvalidRfidTag(format!(
            "frame announces {len} body bytes but carries {}",
            frame.len() - 4
        )));
    }
    if !verify_checksum(frame) {
        return Err(TrackerError::InvalidRfidTag("checksum mismatch".into()));
    }
    if frame == NO_CARD_FRAME {
        return Ok(ReaderFrame::NoCard);
    }
    // TID plus the trailing checksum byte
    if frame.len() < TID_OFFSET + TAG_LEN + 1 {
        return Err(TrackerError::InvalidRfidTag(
            "frame too short to carry a TID".into(),
        ));
    }
    let mut tid = [0u8; TAG_LEN];
    tid.copy_from_slice(&frame[TID_OFFSET..TID_OFFSET + TAG_LEN]);
    Ok(ReaderFrame::Tag(RfidTag(tid)))
}

/// Identifier read from a tag's TID area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RfidTag(pub [u8; TAG_LEN]);

impl RfidTag {
    pub fn from_hex(s: &str) -> Result<Self, TrackerError> {
        let bytes = hex::decode(s).map_err(|e| TrackerError::InvalidRfidTag(format!("{s}: {e}")))?;
        let tid: [u8; TAG_LEN] = bytes.try_into().map_err(|_| {
            TrackerError::InvalidRfidTag(format!("{s}: expected {} hex chars", TAG_LEN * 2))
        })?;
        Ok(RfidTag(tid))
    }

    /// Accepts either a bare tag id or the hex dump of a whole reader frame,
    /// as some readers report the raw response.
    pub fn normalize(raw: &str) -> Result<Self, TrackerError> {
        let cleaned: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        if cleaned.len() == TAG_LEN * 2 {
            return Self::from_hex(&cleaned);
        }
        let bytes = hex::decode(&cleaned)
            .map_err(|_| TrackerError::InvalidRfidTag(format!("{raw:?} is not hex")))?;
        match decode_frame(&bytes)? {
            ReaderFrame::Tag(tag) => Ok(tag),
            ReaderFrame::NoCard => Err(TrackerError::InvalidRfidTag(
                "reader reported no card".into(),
            )),
        }
    }

    /// Build the frame a reader would emit for this tag.
    pub fn to_frame(&self) -> Vec<u8> {
        let body_len = (TID_OFFSET + TAG_LEN + 2 - 4) as u16;
        let mut frame = Vec::with_capacity(4 + body_len as usize);
        frame.extend_from_slice(&FRAME_HEADER);
        frame.extend_from_slice(&body_len.to_be_bytes());
        // reader address, command, status, antenna, tag count, pc word, area
        frame.extend_from_slice(&[0x00, 0x01, 0x00, 0x01, 0x01, 0x30, 0x00, 0x02]);
        frame.extend_from_slice(&self.0);
        frame.push(0x00);
        frame.push(checksum(&frame));
        frame
    }
}

impl fmt::Display for RfidTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for RfidTag {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl Serialize for RfidTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RfidTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RfidTag::normalize(&s).map_err(serde::de::Error::custom)
    }
}
