// SPDX-License-Identifier: CC0-1.0

//! C7: coin selection plus the two-pass fee refinement that produces a
//! weight-correct, signed transaction ready to broadcast.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitcoin::absolute::LockTime;
use bitcoin::psbt::{Input as PsbtInput, Psbt};
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use electrum::Provider;
use types::{HdPath, KeyManager, Utxo};

use crate::ledger::AddressLedger;
use crate::sync::SyncManager;
use crate::{Error, Result};

/// Output below which relay policy considers a transaction uneconomical.
pub const DUST_LIMIT: Amount = Amount::from_sat(546);

/// Coin selection plus two-pass PSBT fee refinement.
pub struct TransactionBuilder {
    sync: Arc<SyncManager>,
    provider: Arc<Provider>,
    ledger: Arc<AddressLedger>,
    key_manager: Arc<dyn KeyManager>,
    max_fee_rate: u64,
}

struct Assembled {
    tx: Transaction,
    change: Amount,
}

/// A change address allocated once for a send, reused across both fee passes
/// so the probe and the finalized transaction pay the same address.
struct ChangeSlot {
    path: HdPath,
    pubkey: bitcoin::PublicKey,
    address: Address,
}

impl TransactionBuilder {
    /// `max_fee_rate` bounds the sat/vB a caller may request (default 100,000).
    pub fn new(
        sync: Arc<SyncManager>,
        provider: Arc<Provider>,
        ledger: Arc<AddressLedger>,
        key_manager: Arc<dyn KeyManager>,
        max_fee_rate: u64,
    ) -> Self {
        TransactionBuilder { sync, provider, ledger, key_manager, max_fee_rate }
    }

    fn compute_change(total: Amount, amount: Amount, fee_rate: u64, weight: u64) -> Result<Amount> {
        let fee = Amount::from_sat(fee_rate.saturating_mul(weight));
        total.checked_sub(amount).and_then(|a| a.checked_sub(fee)).ok_or(Error::Insufficient)
    }

    /// Selects UTXOs, builds and signs a transaction paying `amount` to
    /// `recipient` at `fee_rate` sat/vB, broadcasts it, records the outgoing
    /// transaction in the ledger's `broadcasted` store, and releases the
    /// locked UTXOs on either outcome.
    pub fn send_transaction(&self, recipient: &Address, amount: Amount, fee_rate: u64) -> Result<Txid> {
        if fee_rate == 0 || fee_rate > self.max_fee_rate {
            return Err(Error::InvalidFee);
        }
        if amount <= DUST_LIMIT {
            return Err(Error::DustOutput);
        }

        let probe_target = amount + Amount::from_sat(fee_rate);
        let (mut utxos, mut total) = self.sync.utxo_for_amount(probe_target)?;
        let mut outpoints: Vec<(Txid, u32)> = utxos.iter().map(Utxo::outpoint).collect();

        let mut probe_change = Self::compute_change(total, amount, fee_rate, 1);
        if let Ok(change) = probe_change {
            if change != Amount::ZERO && change < DUST_LIMIT {
                self.sync.unlock_utxo(&outpoints, false);
                let retry_target = amount + Amount::from_sat(fee_rate).max(DUST_LIMIT);
                match self.sync.utxo_for_amount(retry_target) {
                    Ok((u, t)) => {
                        utxos = u;
                        total = t;
                        outpoints = utxos.iter().map(Utxo::outpoint).collect();
                        probe_change = Self::compute_change(total, amount, fee_rate, 1);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let result = self.build_and_broadcast(&utxos, total, recipient, amount, fee_rate, probe_change);
        match &result {
            Ok(_) => self.sync.unlock_utxo(&outpoints, true),
            Err(_) => self.sync.unlock_utxo(&outpoints, false),
        }
        result
    }

    fn build_and_broadcast(
        &self,
        utxos: &[Utxo],
        total: Amount,
        recipient: &Address,
        amount: Amount,
        fee_rate: u64,
        probe_change: Result<Amount>,
    ) -> Result<Txid> {
        let has_change = matches!(probe_change, Ok(c) if c != Amount::ZERO);
        let change_slot = if has_change { Some(self.allocate_change_slot()?) } else { None };

        let probe = self.assemble(utxos, total, recipient, amount, fee_rate, 1, change_slot.as_ref())?;
        let vsize = probe.tx.vsize() as u64;
        let finalized = self.assemble(utxos, total, recipient, amount, fee_rate, vsize, change_slot.as_ref())?;

        if finalized.change != Amount::ZERO && finalized.change < DUST_LIMIT {
            return Err(Error::DustOutput);
        }

        let hex = bitcoin::consensus::encode::serialize_hex(&finalized.tx);
        let txid = self.provider.broadcast_transaction(&hex).map_err(|e| Error::BroadcastFailed(e.to_string()))?;
        self.ledger.record_broadcast(&txid, &hex)?;
        Ok(txid)
    }

    fn allocate_change_slot(&self) -> Result<ChangeSlot> {
        let (path, _script_hash, address) = self.sync.next_change_address()?;
        let pubkey = self.key_manager.public_key(&path)?;
        let address: Address = address.parse::<Address<_>>().map_err(|_| Error::StoreCorrupt)?.assume_checked();
        Ok(ChangeSlot { path, pubkey, address })
    }

    /// Builds a PSBT spending `utxos`, paying `amount` to `recipient` and the
    /// remainder (less `fee_rate * weight`) to `change_slot` if given, signs
    /// it through the key manager, and extracts the transaction.
    fn assemble(
        &self,
        utxos: &[Utxo],
        total: Amount,
        recipient: &Address,
        amount: Amount,
        fee_rate: u64,
        weight: u64,
        change_slot: Option<&ChangeSlot>,
    ) -> Result<Assembled> {
        let change = Self::compute_change(total, amount, fee_rate, weight)?;

        let mut outputs = vec![TxOut { value: amount, script_pubkey: recipient.script_pubkey() }];
        if change != Amount::ZERO {
            let slot = change_slot.ok_or(Error::Insufficient)?;
            outputs.push(TxOut { value: change, script_pubkey: slot.address.script_pubkey() });
        }

        let tx_ins: Vec<TxIn> = utxos
            .iter()
            .map(|u| TxIn {
                previous_output: OutPoint { txid: u.txid, vout: u.index },
                script_sig: bitcoin::ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect();

        let unsigned = Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input: tx_ins, output: outputs };

        let mut psbt = Psbt::from_unsigned_tx(unsigned).map_err(|_| Error::StoreCorrupt)?;
        let fingerprint = self.key_manager.fingerprint();
        for (i, utxo) in utxos.iter().enumerate() {
            let input: &mut PsbtInput = &mut psbt.inputs[i];
            input.witness_utxo = Some(TxOut { value: utxo.value, script_pubkey: hex_script(&utxo.witness_hex)? });
            let mut derivation = BTreeMap::new();
            derivation.insert(utxo.address_public_key.inner, (fingerprint, utxo.address_path.derivation_path()));
            input.bip32_derivation = derivation;
        }
        if change != Amount::ZERO {
            let slot = change_slot.ok_or(Error::Insufficient)?;
            let output = &mut psbt.outputs[1];
            let mut derivation = BTreeMap::new();
            derivation.insert(slot.pubkey.inner, (fingerprint, slot.path.derivation_path()));
            output.bip32_derivation = derivation;
        }

        self.key_manager.sign_psbt(&mut psbt)?;
        let tx = psbt.extract_tx().map_err(|_| Error::StoreCorrupt)?;
        Ok(Assembled { tx, change })
    }
}

fn hex_script(hex: &str) -> Result<bitcoin::ScriptBuf> {
    let bytes: Vec<u8> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::StoreCorrupt)?;
    Ok(bitcoin::ScriptBuf::from_bytes(bytes))
}

trait DerivationPathExt {
    fn derivation_path(&self) -> bitcoin::bip32::DerivationPath;
}

impl DerivationPathExt for HdPath {
    fn derivation_path(&self) -> bitcoin::bip32::DerivationPath {
        use bitcoin::bip32::ChildNumber;
        bitcoin::bip32::DerivationPath::from(vec![
            ChildNumber::from_hardened_idx(self.purpose).expect("purpose fits in 31 bits"),
            ChildNumber::from_hardened_idx(self.coin).expect("coin fits in 31 bits"),
            ChildNumber::from_hardened_idx(self.account).expect("account fits in 31 bits"),
            ChildNumber::from_normal_idx(self.change).expect("change fits in 31 bits"),
            ChildNumber::from_normal_idx(self.index).expect("index fits in 31 bits"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dust_limit_matches_relay_policy() {
        assert_eq!(DUST_LIMIT, Amount::from_sat(546));
    }

    #[test]
    fn hd_path_derivation_path_has_five_components() {
        let path = HdPath::new(84, 0, 0, 0, 3);
        assert_eq!(path.derivation_path().to_u32_vec().len(), 5);
    }

    #[test]
    fn compute_change_rejects_shortfall() {
        let total = Amount::from_sat(1_000);
        let result = TransactionBuilder::compute_change(total, Amount::from_sat(2_000), 1, 200);
        assert!(result.is_err());
    }

    #[test]
    fn compute_change_is_total_minus_amount_minus_fee() {
        let total = Amount::from_sat(10_000);
        let change = TransactionBuilder::compute_change(total, Amount::from_sat(5_000), 2, 200).unwrap();
        assert_eq!(change, Amount::from_sat(4_600));
    }
}
