//! Agromesh wire format: the three fixed-width mesh packets.
//!
//! These types ARE the protocol. Every field, every size and every offset is
//! part of the wire format shared with deployed nodes. Offsets exist only in
//! the frame structs below; everything else works with the typed packets.
//!
//! All frames are #[repr(C, packed)] with zerocopy derives, so layout is
//! deterministic and (de)serialization is a plain copy. There is no unsafe
//! code in this module.
//!
//! Layout, in wire order:
//!
//! | field        | Request | SuccessResponse | ErrorResponse |
//! |--------------|---------|-----------------|---------------|
//! | kind         | 0x01 @0 | 0x02 @0         | 0x03 @0       |
//! | dest         | @1      | @1              | @1            |
//! | src          | @7      | @7              | @7            |
//! | type field   | num_nodes @13 | data[7] @13 | err_code @13 |
//! | ttl          | @14     | @20             | @14           |
//! | fingerprint  | @15     | @21             | @15           |
//! | crc (BE)     | @47     | @53             | @47           |
//! | total        | 49      | 55              | 49            |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::fingerprint::Fingerprint;
use crate::integrity;

// ── Constants ─────────────────────────────────────────────────────────────────

pub const ADDRESS_LEN: usize = 6;
pub const FINGERPRINT_LEN: usize = 32;
pub const DATA_LEN: usize = 7;
pub const CRC_LEN: usize = 2;

pub const REQUEST_LEN: usize = 49;
pub const SUCCESS_RESPONSE_LEN: usize = 55;
pub const ERROR_RESPONSE_LEN: usize = 49;

/// Anything shorter than this cannot be a packet and is radio noise.
pub const MIN_PACKET_LEN: usize = REQUEST_LEN;

/// Largest frame the receive path ever needs to buffer.
pub const MAX_PACKET_LEN: usize = SUCCESS_RESPONSE_LEN;

/// Sensor error codes carried in `ErrorResponse::err_code`.
pub mod err_code {
    /// The sensor is not reachable on its RS485 bus.
    pub const NO_RS485_CONNECTION: u8 = 0x0A;
    /// The sensor answered with a value outside its physical range.
    pub const READING_OUT_OF_BOUNDS: u8 = 0x0B;
}

// ── Node address ──────────────────────────────────────────────────────────────

/// Fixed 6-character ASCII node identifier, e.g. "cn0001" or "sn0042".
///
/// Compared byte-for-byte. Never contains NUL.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress([u8; ADDRESS_LEN]);

impl NodeAddress {
    /// Validate raw address bytes (ASCII, no NUL).
    pub fn new(bytes: [u8; ADDRESS_LEN]) -> Result<Self, WireError> {
        if bytes.iter().all(|&b| b.is_ascii() && b != 0) {
            Ok(Self(bytes))
        } else {
            Err(WireError::InvalidAddress(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        }
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Validated as ASCII on construction.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl FromStr for NodeAddress {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; ADDRESS_LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| WireError::InvalidAddress(s.to_string()))?;
        Self::new(bytes)
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(addr: NodeAddress) -> String {
        addr.as_str().to_string()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress({})", self.as_str())
    }
}

// ── Packet kind ───────────────────────────────────────────────────────────────

/// Leading discriminant byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Request = 0x01,
    SuccessResponse = 0x02,
    ErrorResponse = 0x03,
}

impl PacketKind {
    /// Exact encoded length including the CRC trailer.
    pub fn fixed_len(self) -> usize {
        match self {
            PacketKind::Request => REQUEST_LEN,
            PacketKind::SuccessResponse => SUCCESS_RESPONSE_LEN,
            PacketKind::ErrorResponse => ERROR_RESPONSE_LEN,
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketKind::Request),
            0x02 => Ok(PacketKind::SuccessResponse),
            0x03 => Ok(PacketKind::ErrorResponse),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(k: PacketKind) -> u8 {
        k as u8
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// Controller → sensor poll. Wire size: 49 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct RequestFrame {
    pub kind: u8,
    pub dest: [u8; ADDRESS_LEN],
    pub src: [u8; ADDRESS_LEN],
    /// Size of the controller's known-node list when the poll was sent.
    pub num_nodes: u8,
    /// Remaining hop budget.
    pub ttl: u8,
    pub fingerprint: [u8; FINGERPRINT_LEN],
    /// CRC-16 over every preceding byte, big-endian.
    pub crc: [u8; CRC_LEN],
}

assert_eq_size!(RequestFrame, [u8; REQUEST_LEN]);

/// Sensor → controller reading. Wire size: 55 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct SuccessResponseFrame {
    pub kind: u8,
    pub dest: [u8; ADDRESS_LEN],
    pub src: [u8; ADDRESS_LEN],
    /// Raw sensor reading. Interpretation belongs to the backend.
    pub data: [u8; DATA_LEN],
    pub ttl: u8,
    pub fingerprint: [u8; FINGERPRINT_LEN],
    pub crc: [u8; CRC_LEN],
}

assert_eq_size!(SuccessResponseFrame, [u8; SUCCESS_RESPONSE_LEN]);

/// Sensor → controller failure report. Wire size: 49 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ErrorResponseFrame {
    pub kind: u8,
    pub dest: [u8; ADDRESS_LEN],
    pub src: [u8; ADDRESS_LEN],
    /// One of the `err_code` constants.
    pub err_code: u8,
    pub ttl: u8,
    pub fingerprint: [u8; FINGERPRINT_LEN],
    pub crc: [u8; CRC_LEN],
}

assert_eq_size!(ErrorResponseFrame, [u8; ERROR_RESPONSE_LEN]);

// ── Typed packets ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub dest: NodeAddress,
    pub src: NodeAddress,
    pub num_nodes: u8,
    pub ttl: u8,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessResponse {
    pub dest: NodeAddress,
    pub src: NodeAddress,
    pub data: [u8; DATA_LEN],
    pub ttl: u8,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub dest: NodeAddress,
    pub src: NodeAddress,
    pub err_code: u8,
    pub ttl: u8,
    pub fingerprint: Fingerprint,
}

/// Any mesh packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Request(Request),
    SuccessResponse(SuccessResponse),
    ErrorResponse(ErrorResponse),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Request(_) => PacketKind::Request,
            Packet::SuccessResponse(_) => PacketKind::SuccessResponse,
            Packet::ErrorResponse(_) => PacketKind::ErrorResponse,
        }
    }

    pub fn dest(&self) -> &NodeAddress {
        match self {
            Packet::Request(p) => &p.dest,
            Packet::SuccessResponse(p) => &p.dest,
            Packet::ErrorResponse(p) => &p.dest,
        }
    }

    pub fn src(&self) -> &NodeAddress {
        match self {
            Packet::Request(p) => &p.src,
            Packet::SuccessResponse(p) => &p.src,
            Packet::ErrorResponse(p) => &p.src,
        }
    }

    pub fn ttl(&self) -> u8 {
        match self {
            Packet::Request(p) => p.ttl,
            Packet::SuccessResponse(p) => p.ttl,
            Packet::ErrorResponse(p) => p.ttl,
        }
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        match self {
            Packet::Request(p) => p.ttl = ttl,
            Packet::SuccessResponse(p) => p.ttl = ttl,
            Packet::ErrorResponse(p) => p.ttl = ttl,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Packet::Request(p) => &p.fingerprint,
            Packet::SuccessResponse(p) => &p.fingerprint,
            Packet::ErrorResponse(p) => &p.fingerprint,
        }
    }

    /// Exact encoded length of this packet.
    pub fn encoded_len(&self) -> usize {
        self.kind().fixed_len()
    }

    /// Serialize into `buf` and append the CRC trailer.
    ///
    /// Returns the number of bytes written. If `buf` is shorter than the
    /// fixed length nothing is written.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(WireError::BufferTooSmall {
                needed: len,
                got: buf.len(),
            });
        }

        match self {
            Packet::Request(p) => {
                let frame = RequestFrame {
                    kind: PacketKind::Request.into(),
                    dest: *p.dest.as_bytes(),
                    src: *p.src.as_bytes(),
                    num_nodes: p.num_nodes,
                    ttl: p.ttl,
                    fingerprint: p.fingerprint.0,
                    crc: [0; CRC_LEN],
                };
                buf[..len].copy_from_slice(frame.as_bytes());
            }
            Packet::SuccessResponse(p) => {
                let frame = SuccessResponseFrame {
                    kind: PacketKind::SuccessResponse.into(),
                    dest: *p.dest.as_bytes(),
                    src: *p.src.as_bytes(),
                    data: p.data,
                    ttl: p.ttl,
                    fingerprint: p.fingerprint.0,
                    crc: [0; CRC_LEN],
                };
                buf[..len].copy_from_slice(frame.as_bytes());
            }
            Packet::ErrorResponse(p) => {
                let frame = ErrorResponseFrame {
                    kind: PacketKind::ErrorResponse.into(),
                    dest: *p.dest.as_bytes(),
                    src: *p.src.as_bytes(),
                    err_code: p.err_code,
                    ttl: p.ttl,
                    fingerprint: p.fingerprint.0,
                    crc: [0; CRC_LEN],
                };
                buf[..len].copy_from_slice(frame.as_bytes());
            }
        }

        integrity::append(buf, len - CRC_LEN)?;
        Ok(len)
    }

    /// Serialize into a freshly allocated frame.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        // Sized exactly, cannot fail.
        let _ = self.encode_into(&mut buf);
        buf
    }

    /// Parse a frame. Dispatches on the first byte; the buffer must be
    /// exactly the fixed length of that kind.
    ///
    /// Does not check the CRC trailer; callers run `integrity::validate` first.
    pub fn decode(buf: &[u8]) -> Result<Packet, WireError> {
        let first = *buf.first().ok_or(WireError::Empty)?;
        let kind = PacketKind::try_from(first)?;
        let expected = kind.fixed_len();
        if buf.len() != expected {
            return Err(WireError::LengthMismatch {
                kind,
                expected,
                got: buf.len(),
            });
        }
        let mismatch = || WireError::LengthMismatch {
            kind,
            expected,
            got: buf.len(),
        };

        let packet = match kind {
            PacketKind::Request => {
                let f = RequestFrame::read_from(buf).ok_or_else(mismatch)?;
                Packet::Request(Request {
                    dest: NodeAddress::new(f.dest)?,
                    src: NodeAddress::new(f.src)?,
                    num_nodes: f.num_nodes,
                    ttl: f.ttl,
                    fingerprint: Fingerprint(f.fingerprint),
                })
            }
            PacketKind::SuccessResponse => {
                let f = SuccessResponseFrame::read_from(buf).ok_or_else(mismatch)?;
                Packet::SuccessResponse(SuccessResponse {
                    dest: NodeAddress::new(f.dest)?,
                    src: NodeAddress::new(f.src)?,
                    data: f.data,
                    ttl: f.ttl,
                    fingerprint: Fingerprint(f.fingerprint),
                })
            }
            PacketKind::ErrorResponse => {
                let f = ErrorResponseFrame::read_from(buf).ok_or_else(mismatch)?;
                Packet::ErrorResponse(ErrorResponse {
                    dest: NodeAddress::new(f.dest)?,
                    src: NodeAddress::new(f.src)?,
                    err_code: f.err_code,
                    ttl: f.ttl,
                    fingerprint: Fingerprint(f.fingerprint),
                })
            }
        };
        Ok(packet)
    }
}

impl From<Request> for Packet {
    fn from(p: Request) -> Self {
        Packet::Request(p)
    }
}

impl From<SuccessResponse> for Packet {
    fn from(p: SuccessResponse) -> Self {
        Packet::SuccessResponse(p)
    }
}

impl From<ErrorResponse> for Packet {
    fn from(p: ErrorResponse) -> Self {
        Packet::ErrorResponse(p)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting or producing wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("empty frame")]
    Empty,

    #[error("unknown packet kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("{kind:?} frame must be {expected} bytes, got {got}")]
    LengthMismatch {
        kind: PacketKind,
        expected: usize,
        got: usize,
    },

    #[error("buffer too small: need {needed} bytes, have {got}")]
    BufferTooSmall { needed: usize, got: usize },

    #[error("invalid node address: {0:?}")]
    InvalidAddress(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
