// SPDX-License-Identifier: CC0-1.0

//! Errors produced by the walker, sync manager, ledger and builder.

use std::fmt;

/// All the possible errors in this crate.
pub enum Error {
    /// The underlying Electrum transport/provider failed.
    Electrum(electrum::Error),
    /// A data-model value could not be parsed or validated.
    Types(types::Error),
    /// A stored record could not be decoded.
    Serde(serde_json::Error),
    /// Coin selection exhausted the candidate set without meeting the target.
    Insufficient,
    /// `fee_rate` was zero or above the configured maximum.
    InvalidFee,
    /// An output (recipient or change) fell below the dust limit.
    DustOutput,
    /// The server rejected the broadcast; carries its error text.
    BroadcastFailed(String),
    /// The server reported a lower block height than previously observed.
    ReorgDetected,
    /// A ledger invariant was violated; the operation was aborted.
    StoreCorrupt,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        match self {
            Electrum(e) => write!(f, "electrum error: {:?}", e),
            Types(e) => write!(f, "data model error: {:?}", e),
            Serde(e) => write!(f, "failed to decode stored record: {}", e),
            Insufficient => write!(f, "insufficient funds to meet the requested amount"),
            InvalidFee => write!(f, "fee rate is zero or exceeds the configured maximum"),
            DustOutput => write!(f, "an output is below the dust limit"),
            BroadcastFailed(msg) => write!(f, "broadcast failed: {}", msg),
            ReorgDetected => write!(f, "refusing to advance to a lower block height"),
            StoreCorrupt => write!(f, "ledger invariant violated"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:?}", self) }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Electrum(e) => Some(e),
            Error::Types(e) => Some(e),
            Error::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<electrum::Error> for Error {
    fn from(e: electrum::Error) -> Self { Error::Electrum(e) }
}

impl From<types::Error> for Error {
    fn from(e: types::Error) -> Self { Error::Types(e) }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self { Error::Serde(e) }
}
