// SPDX-License-Identifier: CC0-1.0

//! Errors produced by the transport, cache and provider.

use std::fmt;
use std::io;

use serde_json::Value;

/// All the possible errors in this crate.
pub enum Error {
    /// A request was attempted while the transport was not `CONNECTED`.
    NotConnected,
    /// The underlying socket errored.
    Transport(io::Error),
    /// A frame could not be parsed as JSON.
    Decode(serde_json::Error),
    /// The server replied with a JSON-RPC `error` object.
    RpcRemote {
        /// The method that was called.
        method: String,
        /// The server's `error` payload.
        payload: Value,
    },
    /// The pending-request table lost track of this request (should be unreachable).
    Timeout,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match self {
            NotConnected => write!(f, "request attempted while not connected"),
            Transport(e) => write!(f, "transport error: {}", e),
            Decode(e) => write!(f, "failed to decode frame: {}", e),
            RpcRemote { method, payload } => write!(f, "{} failed: {}", method, payload),
            Timeout => write!(f, "request was dropped before a response arrived"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", self) }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Error::Transport(e) }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self { Error::Decode(e) }
}
