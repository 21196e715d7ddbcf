// SPDX-License-Identifier: CC0-1.0

//! Persistent newline-delimited JSON-RPC transport, request cache and typed
//! provider for talking to an Electrum-style server.
//!
//! This crate is C1 (transport), C2 (request cache) and C3 (provider) of the
//! wallet core: a single TCP connection multiplexing in-flight requests by
//! id, a bounded cache of fetched transaction views, and a typed facade that
//! assembles those views from the server's raw replies.

pub extern crate bitcoin;

pub mod cache;
pub mod error;
pub mod provider;
pub mod transport;
mod wire;

pub use cache::RequestCache;
pub use error::Error;
pub use provider::{GetOpts, Provider};
pub use transport::{Event, Status, Transport};

/// Crate-specific `Result` type.
pub type Result<T> = std::result::Result<T, Error>;
