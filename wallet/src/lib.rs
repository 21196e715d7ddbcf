// SPDX-License-Identifier: CC0-1.0

//! HD address derivation (C4), the sync manager (C5), the address ledger
//! (C6) and the coin-selecting transaction builder (C7) of the wallet core.
//!
//! This crate sits on top of `electrum` (C1-C3) and `types`, and talks to a
//! key manager and a key/value store through the traits those crates define.

pub extern crate bitcoin;

pub mod builder;
pub mod error;
pub mod ledger;
pub mod sync;
pub mod walker;

pub use builder::TransactionBuilder;
pub use error::Error;
pub use ledger::{AddressLedger, WatchedAddress};
pub use sync::SyncManager;
pub use walker::{HdPathWalker, ScanOutcome};

/// Crate-specific `Result` type.
pub type Result<T> = std::result::Result<T, Error>;
