// SPDX-License-Identifier: CC0-1.0

//! Data model shared by the `electrum` and `wallet` crates.
//!
//! This crate has no network or storage code in it; it exists so both the
//! transport/provider layer and the wallet logic layer agree on the shapes
//! of scripts hashes, HD paths, balances, transaction views and UTXOs
//! without depending on each other.

/// Re-export the `rust-bitcoin` crate so downstream users see a single version.
pub extern crate bitcoin;

pub mod address_entry;
pub mod balance;
pub mod error;
pub mod keys;
pub mod path;
pub mod script_hash;
pub mod store;
pub mod sync_state;
pub mod tx_view;
pub mod utxo;

pub use address_entry::AddressEntry;
pub use balance::{Balance, Bucket};
pub use error::Error;
pub use keys::{KeyManager, Network};
pub use path::{AddressType, Chain, HdPath};
pub use script_hash::ScriptHash;
pub use store::Store;
pub use sync_state::SyncState;
pub use tx_view::{TransactionView, TxInputView, TxOutputView};
pub use utxo::Utxo;

/// Crate-specific `Result` type.
pub type Result<T> = std::result::Result<T, Error>;
