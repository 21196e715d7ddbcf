// SPDX-License-Identifier: CC0-1.0

//! Unspent outputs owned by the wallet.

use bitcoin::{Amount, PublicKey, Txid};
use serde::{Deserialize, Serialize};

use crate::path::HdPath;

/// An unspent, confirmed-or-mempool output the wallet can spend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction that created this output.
    pub txid: Txid,
    /// Output index within `txid`.
    pub index: u32,
    /// Output value.
    pub value: Amount,
    /// Witness/script, hex-encoded.
    pub witness_hex: String,
    /// Encoded address owning this output.
    pub address: String,
    /// HD path the address was derived from.
    pub address_path: HdPath,
    /// Public key the address was derived to, needed for PSBT `bip32_derivation`.
    pub address_public_key: PublicKey,
}

impl Utxo {
    /// `(txid, index)`, the identity of the output this UTXO represents.
    pub fn outpoint(&self) -> (Txid, u32) { (self.txid, self.index) }
}
