// SPDX-License-Identifier: CC0-1.0

//! Errors produced while parsing or validating core data-model types.

use std::fmt;

/// All the possible errors in this crate.
pub enum Error {
    /// A script hash string was not 64 hex characters.
    InvalidScriptHash,
    /// An HD path string did not match `m/P'/C'/A'/ch/i`.
    InvalidPath(String),
    /// `change` in an HD path was neither 0 (external) nor 1 (internal).
    InvalidChain(u32),
    /// `purpose` in an HD path does not map to a known address type.
    UnknownPurpose(u32),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match self {
            InvalidScriptHash => write!(f, "script hash must be 32 bytes of hex"),
            InvalidPath(s) => write!(f, "invalid HD path: {}", s),
            InvalidChain(c) => write!(f, "invalid chain value {}, expected 0 or 1", c),
            UnknownPurpose(p) => write!(f, "purpose {} does not map to a known address type", p),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", self) }
}

impl std::error::Error for Error {}
