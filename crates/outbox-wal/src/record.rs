// SPDX-License-Identifier: Apache-2.0

//! Framed record codec (C1).
//!
//! Wire format (big-endian):
//!
//! ```text
//! offset  size  field
//! 0       4     total_len (includes everything from this field to the CRC, inclusive)
//! 4       8     seq
//! 12      1     type
//! 13      1     codec (low 4 bits)
//! 14      2     reserved (zero)
//! 16      L     payload
//! 16+L    4     crc32 IEEE of bytes [0, 16+L)
//! ```

use std::io::{self, Read};

/// Smallest legal frame: empty payload (16 header bytes + 4 CRC bytes).
pub const MIN_FRAME_LEN: u32 = 20;
/// Largest legal frame.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

const HEADER_LEN: usize = 16;
const LEN_PREFIX_LEN: usize = 4;

/// Record type discriminant (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// An application event.
    Event,
    /// A diagnostic log line, persisted alongside events.
    Log,
    /// Unrecognized type byte, preserved for forward compatibility.
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(b: u8) -> Self {
        match b {
            0 => RecordType::Event,
            1 => RecordType::Log,
            other => RecordType::Other(other),
        }
    }
}

impl From<RecordType> for u8 {
    fn from(t: RecordType) -> u8 {
        match t {
            RecordType::Event => 0,
            RecordType::Log => 1,
            RecordType::Other(b) => b,
        }
    }
}

/// Payload codec discriminant, stored in the low 4 bits of the codec byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// JSON-encoded payload.
    Json,
    /// Protobuf-encoded payload.
    Proto,
    /// Unrecognized codec nibble, preserved for forward compatibility.
    Other(u8),
}

impl From<u8> for Codec {
    fn from(b: u8) -> Self {
        match b & 0x0F {
            0 => Codec::Json,
            1 => Codec::Proto,
            other => Codec::Other(other),
        }
    }
}

impl From<Codec> for u8 {
    fn from(c: Codec) -> u8 {
        match c {
            Codec::Json => 0,
            Codec::Proto => 1,
            Codec::Other(b) => b & 0x0F,
        }
    }
}

/// A single persisted unit (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Assigned sequence number; `0` until the WAL has assigned one.
    pub seq: u64,
    /// Event/log discriminant.
    pub record_type: RecordType,
    /// Payload codec.
    pub codec: Codec,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl Record {
    /// Builds an unassigned event record (`seq` is filled in by the WAL on append).
    #[must_use]
    pub fn event(codec: Codec, payload: Vec<u8>) -> Self {
        Self {
            seq: 0,
            record_type: RecordType::Event,
            codec,
            payload,
        }
    }

    /// Encodes this record into its on-disk frame, `seq` bytes included.
    ///
    /// The returned buffer's length equals the frame's `total_len` field.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len();
        let total_len = HEADER_LEN as u32 + payload_len as u32 + 4;
        let mut buf = Vec::with_capacity(total_len as usize);
        buf.extend_from_slice(&total_len.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.push(self.record_type.into());
        buf.push(self.codec.into());
        buf.extend_from_slice(&[0u8, 0u8]);
        buf.extend_from_slice(&self.payload);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        debug_assert_eq!(buf.len(), total_len as usize);
        buf
    }

    /// Decodes a complete frame (length prefix included). Returns `None` on any
    /// structural or CRC mismatch rather than an error — corruption is a normal,
    /// locally-recovered condition (§7).
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < LEN_PREFIX_LEN {
            return None;
        }
        let total_len = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) {
            return None;
        }
        if bytes.len() != total_len as usize {
            return None;
        }
        let crc_at = bytes.len() - 4;
        let seq = u64::from_be_bytes(bytes[4..12].try_into().ok()?);
        let record_type = RecordType::from(bytes[12]);
        let codec = Codec::from(bytes[13]);
        let payload = bytes[HEADER_LEN..crc_at].to_vec();
        let stored_crc = u32::from_be_bytes(bytes[crc_at..crc_at + 4].try_into().ok()?);
        let computed_crc = crc32fast::hash(&bytes[0..crc_at]);
        if computed_crc != stored_crc {
            return None;
        }
        Some(Self {
            seq,
            record_type,
            codec,
            payload,
        })
    }

    /// Reads the next frame from `reader`.
    ///
    /// Returns `Ok(None)` both on clean EOF and on any condition that signals
    /// there is no more usable data (an out-of-bounds length prefix, a partial
    /// trailing frame left by a crash mid-write, or a CRC mismatch) — these are
    /// not distinguished because a caller scanning a segment must stop at the
    /// first one regardless of which it is (§4.1).
    pub fn read_next<R: Read>(reader: &mut R) -> io::Result<Option<Self>> {
        let mut len_buf = [0u8; LEN_PREFIX_LEN];
        if let Err(e) = reader.read_exact(&mut len_buf) {
            return if e.kind() == io::ErrorKind::UnexpectedEof {
                Ok(None)
            } else {
                Err(e)
            };
        }
        let total_len = u32::from_be_bytes(len_buf);
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) {
            return Ok(None);
        }
        let mut rest = vec![0u8; total_len as usize - LEN_PREFIX_LEN];
        if let Err(e) = reader.read_exact(&mut rest) {
            return if e.kind() == io::ErrorKind::UnexpectedEof {
                Ok(None)
            } else {
                Err(e)
            };
        }
        let mut frame = Vec::with_capacity(total_len as usize);
        frame.extend_from_slice(&len_buf);
        frame.extend_from_slice(&rest);
        Ok(Self::decode(&frame))
    }
}
