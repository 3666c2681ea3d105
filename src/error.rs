// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Failure taxonomy shared by the core, the front end, and the transports,
// plus the mapping from failure kinds to IPMI completion codes.

use thiserror::Error;

/// Failure kinds surfaced by the BMC core and its collaborators.
///
/// Dispatch outcomes are translated to IPMI completion codes via
/// [`Error::completion_code`]; every other operation surfaces its kind
/// directly to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The resource is occupied: a response is in flight, the request FIFO
    /// is full, or a singleton slot (transport, default device) is taken.
    #[error("busy")]
    Busy,
    /// Malformed frame or argument.
    #[error("invalid")]
    Invalid,
    /// The operation timed out.
    #[error("timed out")]
    Timeout,
    /// Out of buffer space.
    #[error("out of memory")]
    NoMem,
    /// The named handler or transport is not registered.
    #[error("not found")]
    NotFound,
    /// No transport is bound.
    #[error("no device")]
    NoDevice,
    /// The handler is already registered.
    #[error("already registered")]
    AlreadyRegistered,
    /// No handler claimed the request, or the operation is permanently
    /// unavailable (e.g. after shutdown).
    #[error("unsupported")]
    Unsupported,
    /// A suspended operation was cancelled.
    #[error("interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// IPMI completion code reported to the host for this failure kind.
    pub fn completion_code(self) -> u8 {
        match self {
            Error::Busy => 0xC0,    // Node busy
            Error::Invalid => 0xC1, // Invalid command
            Error::Timeout => 0xC3, // Timeout while processing command
            Error::NoMem => 0xC4,   // Out of space
            _ => 0xFF,              // Unspecified error
        }
    }
}
