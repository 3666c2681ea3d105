// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// IPMI Block Transfer frame. Fixed header (len, netfn/lun, seq, cmd)
// followed by up to 252 payload bytes; the whole struct is POD-shaped so
// putting a frame on the wire is a byte copy.

use crate::{Error, Result};

/// Largest payload a Block Transfer frame can carry.
pub const PAYLOAD_LEN_MAX: usize = 252;

/// Largest sequence number (the field is 8 bits).
pub const SEQ_MAX: usize = 255;

/// Bit set in `netfn_lun` to mark a frame as a response.
pub const NETFN_LUN_RESPONSE_MASK: u8 = 1 << 2;

/// Header bytes counted by the `len` field (netfn_lun, seq, cmd).
const HDR_AFTER_LEN: usize = 3;

/// An IPMI Block Transfer message.
///
/// Wire layout, in order:
///
/// ```text
/// offset 0: len        — count of bytes after this one
/// offset 1: netfn_lun  — netfn << 2 | lun; bit 2 = response flag
/// offset 2: seq
/// offset 3: cmd
/// offset 4: payload    — len - 3 bytes
/// ```
///
/// Total on-wire length is `len + 1`, at most 256 bytes. Use
/// [`BtMsg::wire_len`] rather than reading `len` directly. Bytes of
/// `payload` beyond the declared length are insignificant slack; equality
/// compares the on-wire bytes only.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BtMsg {
    pub len: u8,
    pub netfn_lun: u8,
    pub seq: u8,
    pub cmd: u8,
    payload: [u8; PAYLOAD_LEN_MAX],
}

/// `len` field for a frame carrying `payload_len` payload bytes.
///
/// Fails with [`Error::Invalid`] above [`PAYLOAD_LEN_MAX`]; a larger frame
/// cannot exist on the wire, so it must not exist in memory either.
pub fn payload_to_len(payload_len: usize) -> Result<u8> {
    if payload_len > PAYLOAD_LEN_MAX {
        return Err(Error::Invalid);
    }
    Ok((payload_len + HDR_AFTER_LEN) as u8)
}

impl BtMsg {
    /// Build a frame from header fields and a payload.
    pub fn new(netfn_lun: u8, seq: u8, cmd: u8, payload: &[u8]) -> Result<Self> {
        let len = payload_to_len(payload.len())?;
        let mut msg = Self {
            len,
            netfn_lun,
            seq,
            cmd,
            payload: [0; PAYLOAD_LEN_MAX],
        };
        msg.payload[..payload.len()].copy_from_slice(payload);
        Ok(msg)
    }

    /// Parse a frame from its on-wire bytes.
    ///
    /// `bytes` must be one whole frame: `bytes.len() == bytes[0] + 1`, with
    /// the full 4-byte header present.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HDR_AFTER_LEN + 1 {
            return Err(Error::Invalid);
        }
        if bytes.len() != bytes[0] as usize + 1 {
            return Err(Error::Invalid);
        }
        let mut msg = Self {
            len: bytes[0],
            netfn_lun: bytes[1],
            seq: bytes[2],
            cmd: bytes[3],
            payload: [0; PAYLOAD_LEN_MAX],
        };
        let payload = &bytes[4..];
        msg.payload[..payload.len()].copy_from_slice(payload);
        Ok(msg)
    }

    /// Total on-wire length of this frame, including the `len` byte.
    pub fn wire_len(&self) -> usize {
        self.len as usize + 1
    }

    /// The declared payload bytes. Empty for a malformed `len < 3`.
    pub fn payload(&self) -> &[u8] {
        let n = (self.len as usize).saturating_sub(HDR_AFTER_LEN);
        &self.payload[..n]
    }

    /// Whether the response bit is set in `netfn_lun`.
    pub fn is_response(&self) -> bool {
        self.netfn_lun & NETFN_LUN_RESPONSE_MASK != 0
    }

    /// The on-wire bytes of this frame.
    ///
    /// The struct is `#[repr(C)]` and all-`u8`, so the first `wire_len`
    /// bytes of the struct are exactly the wire encoding.
    pub fn as_bytes(&self) -> &[u8] {
        let n = self.wire_len().min(core::mem::size_of::<Self>());
        unsafe { core::slice::from_raw_parts(self as *const Self as *const u8, n) }
    }

    /// Raw view of the full 256-byte frame storage.
    ///
    /// Transports assembling a frame byte-by-byte off the wire write the
    /// `len` byte first and the rest behind it.
    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        unsafe {
            core::slice::from_raw_parts_mut(
                self as *mut Self as *mut u8,
                core::mem::size_of::<Self>(),
            )
        }
    }
}

impl Default for BtMsg {
    /// An all-zero frame (`len == 0`), the state of an unused staging slot.
    fn default() -> Self {
        Self {
            len: 0,
            netfn_lun: 0,
            seq: 0,
            cmd: 0,
            payload: [0; PAYLOAD_LEN_MAX],
        }
    }
}

impl PartialEq for BtMsg {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for BtMsg {}

impl std::fmt::Debug for BtMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtMsg")
            .field("len", &self.len)
            .field("netfn_lun", &format_args!("{:#04x}", self.netfn_lun))
            .field("seq", &self.seq)
            .field("cmd", &format_args!("{:#04x}", self.cmd))
            .field("payload_len", &self.payload().len())
            .finish()
    }
}
