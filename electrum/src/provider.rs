// SPDX-License-Identifier: CC0-1.0

//! C3: a typed facade over the transport that assembles rich transaction
//! views with inputs resolved to the outputs they spend.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bitcoin::{Address, Amount, ScriptBuf, Txid};
use serde_json::{json, Value};
use types::{ScriptHash, TransactionView, TxInputView, TxOutputView};

use crate::cache::RequestCache;
use crate::error::Error;
use crate::transport::Transport;
use crate::Result;

/// Options accepted by the read calls.
#[derive(Copy, Clone, Debug)]
pub struct GetOpts {
    /// If `false`, always fetch from the server, bypassing the request cache.
    pub cache: bool,
}

impl Default for GetOpts {
    fn default() -> Self { GetOpts { cache: true } }
}

/// First subsidy paid at height 0: 50 BTC.
const INITIAL_SUBSIDY_SAT: u64 = 50 * 100_000_000;
/// Subsidy halves every 210,000 blocks.
const SUBSIDY_HALVING_INTERVAL: u32 = 210_000;

/// Computes the block subsidy at `height`.
pub fn block_subsidy(height: u32) -> Amount {
    let halvings = height / SUBSIDY_HALVING_INTERVAL;
    if halvings >= 64 {
        Amount::ZERO
    } else {
        Amount::from_sat(INITIAL_SUBSIDY_SAT >> halvings)
    }
}

/// Typed Electrum client built on top of a [`Transport`] and [`RequestCache`].
pub struct Provider {
    transport: Arc<Transport>,
    cache: Arc<RequestCache>,
    network: bitcoin::Network,
    current_block: AtomicU32,
}

impl Provider {
    /// Wraps `transport` and `cache`; `network` is used to encode output
    /// scripts into addresses.
    pub fn new(transport: Arc<Transport>, cache: Arc<RequestCache>, network: bitcoin::Network) -> Self {
        Provider { transport, cache, network, current_block: AtomicU32::new(0) }
    }

    /// The most recently observed chain tip, `0` before the first
    /// `subscribe_to_blocks` / `new-block` push.
    pub fn current_block(&self) -> u32 { self.current_block.load(Ordering::SeqCst) }

    fn set_current_block(&self, height: u32) { self.current_block.store(height, Ordering::SeqCst); }

    /// Records a `new-block` push received out of band, so later
    /// `getTransaction` calls compute confirmations against the new tip
    /// instead of the height observed at subscribe time.
    pub fn note_new_block(&self, height: u32) { self.set_current_block(height); }

    /// Subscribes to `blockchain.headers.subscribe` and records the returned tip height.
    pub fn subscribe_to_blocks(&self) -> Result<u32> {
        let result = self.transport.subscribe("blockchain.headers.subscribe", &[])?;
        let height = result
            .get("height")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Decode(serde_json::Error::io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "headers.subscribe result missing height",
            ))))? as u32;
        self.set_current_block(height);
        Ok(height)
    }

    /// Subscribes to `blockchain.scripthash.subscribe` for `script_hash`.
    ///
    /// Returns the initial status the server reports (`None` if the address has no history yet).
    pub fn subscribe_to_address(&self, script_hash: &ScriptHash) -> Result<Option<String>> {
        let result = self
            .transport
            .subscribe("blockchain.scripthash.subscribe", &[json!(script_hash.to_string())])?;
        Ok(result.as_str().map(String::from))
    }

    /// Fetches the confirmed history of `script_hash` and resolves each entry to a [`TransactionView`].
    pub fn get_address_history(&self, script_hash: &ScriptHash, opts: GetOpts) -> Result<Vec<TransactionView>> {
        self.get_history_like("blockchain.scripthash.get_history", script_hash, opts)
    }

    /// Fetches the mempool history of `script_hash` and resolves each entry to a [`TransactionView`].
    pub fn get_mempool_tx(&self, script_hash: &ScriptHash, opts: GetOpts) -> Result<Vec<TransactionView>> {
        self.get_history_like("blockchain.scripthash.get_mempool", script_hash, opts)
    }

    fn get_history_like(&self, method: &str, script_hash: &ScriptHash, opts: GetOpts) -> Result<Vec<TransactionView>> {
        let result = self.transport.call(method, &[json!(script_hash.to_string())])?;
        let entries = result.as_array().cloned().unwrap_or_default();
        let txids: Vec<Txid> = entries
            .iter()
            .filter_map(|e| e.get("tx_hash").and_then(Value::as_str))
            .filter_map(|s| s.parse().ok())
            .collect();

        let mut views = Vec::with_capacity(txids.len());
        let mut error = None;
        std::thread::scope(|scope| {
            let handles: Vec<_> =
                txids.iter().map(|txid| scope.spawn(move || self.get_transaction(*txid, opts))).collect();
            for handle in handles {
                match handle.join().expect("provider worker thread panicked") {
                    Ok(view) => views.push(view),
                    Err(e) => error = Some(e),
                }
            }
        });
        if let Some(e) = error {
            return Err(e);
        }
        Ok(views)
    }

    /// Forwards `hex` to `blockchain.transaction.broadcast`.
    pub fn broadcast_transaction(&self, hex: &str) -> Result<Txid> {
        let result = self.transport.call("blockchain.transaction.broadcast", &[json!(hex)])?;
        result
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::RpcRemote {
                method: "blockchain.transaction.broadcast".to_string(),
                payload: result,
            })
    }

    /// Fetches and assembles the [`TransactionView`] for `txid`, recursing
    /// into its inputs' parent transactions to resolve spent-output details.
    pub fn get_transaction(&self, txid: Txid, opts: GetOpts) -> Result<TransactionView> {
        if opts.cache {
            if let Some(view) = self.cache.get(&txid) {
                if view.height != 0 {
                    return Ok(view);
                }
            }
        }

        let raw = self.transport.call("blockchain.transaction.get", &[json!(txid.to_string()), json!(true)])?;

        let confirmations = raw.get("confirmations").and_then(Value::as_u64).unwrap_or(0);
        let height = if confirmations == 0 {
            0
        } else {
            self.current_block().saturating_sub(confirmations as u32 - 1)
        };

        let mut outputs = Vec::new();
        let mut std_out = Vec::new();
        for vout in raw.get("vout").and_then(Value::as_array).into_iter().flatten() {
            let index = vout.get("n").and_then(Value::as_u64).unwrap_or(0) as u32;
            let value = vout
                .get("value")
                .and_then(Value::as_f64)
                .map(Amount::from_btc)
                .transpose()
                .unwrap_or(None)
                .unwrap_or(Amount::ZERO);
            let script_hex =
                vout.get("scriptPubKey").and_then(|s| s.get("hex")).and_then(Value::as_str).unwrap_or("");
            let address = hex_to_script(script_hex)
                .and_then(|script| Address::from_script(&script, self.network).ok())
                .map(|a| a.to_string());

            std_out.push(address.is_some());
            if let Some(address) = address {
                outputs.push(TxOutputView { address: Some(address), value, witness_hex: script_hex.to_string(), index, txid, height });
            }
        }

        let mut inputs = Vec::new();
        let mut unconfirmed_inputs = Vec::new();
        for vin in raw.get("vin").and_then(Value::as_array).into_iter().flatten() {
            if vin.get("coinbase").is_some() {
                let prior_height = height.saturating_sub(1);
                inputs.push(TxInputView {
                    value: block_subsidy(prior_height),
                    address: None,
                    prev_txid: None,
                    prev_index: 0,
                    prev_tx_height: height,
                    is_coinbase: true,
                });
                continue;
            }

            let prev_txid: Txid = match vin.get("txid").and_then(Value::as_str).and_then(|s| s.parse().ok()) {
                Some(t) => t,
                None => continue,
            };
            let prev_index = vin.get("vout").and_then(Value::as_u64).unwrap_or(0) as u32;
            let parent = self.get_transaction(prev_txid, GetOpts { cache: true })?;
            let spent = parent.outputs.iter().find(|o| o.index == prev_index);

            let value = spent.map(|o| o.value).unwrap_or(Amount::ZERO);
            let address = spent.and_then(|o| o.address.clone());

            if parent.height == 0 {
                unconfirmed_inputs.push(prev_txid);
            }
            inputs.push(TxInputView {
                value,
                address,
                prev_txid: Some(prev_txid),
                prev_index,
                prev_tx_height: parent.height,
                is_coinbase: false,
            });
        }

        let sum_in: Amount = inputs.iter().fold(Amount::ZERO, |acc, i| acc + i.value);
        let sum_out: Amount = outputs.iter().fold(Amount::ZERO, |acc, o| acc + o.value);
        let fee = TransactionView::compute_fee(sum_in, sum_out);

        let view = TransactionView { txid, height, outputs, std_out, inputs, fee, unconfirmed_inputs };
        self.cache.set(txid, view.clone());
        Ok(view)
    }
}

fn hex_to_script(hex: &str) -> Option<ScriptBuf> {
    let bytes: Vec<u8> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    Some(ScriptBuf::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsidy_schedule_matches_known_checkpoints() {
        assert_eq!(block_subsidy(0), Amount::from_sat(5_000_000_000));
        assert_eq!(block_subsidy(210_000), Amount::from_sat(2_500_000_000));
        assert_eq!(block_subsidy(630_000), Amount::from_sat(625_000_000));
    }

    #[test]
    fn hex_to_script_round_trips() {
        let script = hex_to_script("76a914000000000000000000000000000000000000000088ac").unwrap();
        assert_eq!(script.len(), 25);
    }
}
