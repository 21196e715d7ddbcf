// SPDX-License-Identifier: CC0-1.0

//! The ledger's per-address record.

use serde::{Deserialize, Serialize};

use crate::balance::Balance;

/// Everything the ledger knows about one address, keyed by its encoded form.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddressEntry {
    /// The encoded address this entry is for.
    pub address: String,
    /// Credits: outputs of transactions that pay this address.
    pub r#in: Balance,
    /// Debits: prior outputs of this address spent by a transaction's inputs.
    pub out: Balance,
    /// Share of fees attributed to this address when it was the change output
    /// of a transaction wholly owned by the wallet.
    pub fee: Balance,
}

impl AddressEntry {
    /// Creates an empty entry for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        AddressEntry { address: address.into(), ..Default::default() }
    }
}
