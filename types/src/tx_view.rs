// SPDX-License-Identifier: CC0-1.0

//! The normalised view of a transaction the provider hands to the rest of the wallet.

use bitcoin::{Amount, Txid};
use serde::{Deserialize, Serialize};

/// One expanded output of a [`TransactionView`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputView {
    /// Encoded destination address, if the script is standard.
    pub address: Option<String>,
    /// Output value.
    pub value: Amount,
    /// Witness/script, hex-encoded, as returned by the server.
    pub witness_hex: String,
    /// Position of this output within the transaction.
    pub index: u32,
    /// The transaction this output belongs to.
    pub txid: Txid,
    /// Confirmation height, `0` if the transaction is in the mempool.
    pub height: u32,
}

/// One expanded input of a [`TransactionView`], resolved to the output it spends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInputView {
    /// Value of the previous output being spent. For coinbase inputs this is
    /// the block subsidy.
    pub value: Amount,
    /// Destination address of the previous output, if standard.
    pub address: Option<String>,
    /// Txid of the previous output, `None` for a coinbase input.
    pub prev_txid: Option<Txid>,
    /// Index of the previous output within its transaction.
    pub prev_index: u32,
    /// Confirmation height of the transaction that created this output, `0` if
    /// it is still in the mempool.
    pub prev_tx_height: u32,
    /// True if this input spends a coinbase output.
    pub is_coinbase: bool,
}

/// A normalised transaction, assembled by [`crate`]'s consumer (the provider)
/// from a raw server response plus recursive lookups of its inputs' parents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    /// Transaction id.
    pub txid: Txid,
    /// Confirmation height, `0` if the transaction is in the mempool.
    pub height: u32,
    /// Outputs with an extractable address. Non-standard outputs (bare
    /// multisig, `OP_RETURN`, ...) are omitted here but still flagged in
    /// `std_out`.
    pub outputs: Vec<TxOutputView>,
    /// One entry per output of the raw transaction, `false` where the script
    /// had no extractable address.
    pub std_out: Vec<bool>,
    /// Expanded inputs.
    pub inputs: Vec<TxInputView>,
    /// `sum(inputs) - sum(outputs)`, or `0` for a coinbase transaction.
    pub fee: Amount,
    /// Txids of parent transactions (of this transaction's inputs) that are
    /// still unconfirmed.
    pub unconfirmed_inputs: Vec<Txid>,
}

impl TransactionView {
    /// Sum of all expanded output values.
    pub fn sum_outputs(&self) -> Amount {
        self.outputs.iter().fold(Amount::ZERO, |acc, o| acc + o.value)
    }

    /// Sum of all expanded input values.
    pub fn sum_inputs(&self) -> Amount {
        self.inputs.iter().fold(Amount::ZERO, |acc, i| acc + i.value)
    }

    /// Computes `fee = sumIn - sumOut`, or `0` if there is no real input
    /// value (a coinbase transaction has no fee).
    pub fn compute_fee(sum_in: Amount, sum_out: Amount) -> Amount {
        if sum_in == Amount::ZERO {
            Amount::ZERO
        } else {
            sum_in.checked_sub(sum_out).unwrap_or(Amount::ZERO)
        }
    }
}
