// SPDX-License-Identifier: CC0-1.0

//! C5: drives gap-limit scans, maintains subscriptions, applies transaction
//! deltas to the ledger and tracks the spendable UTXO set.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bitcoin::{Amount, PublicKey, Txid};
use electrum::{Event, GetOpts, Provider, Status};
use serde_json::Value;
use types::{AddressEntry, Bucket, Chain, HdPath, KeyManager, ScriptHash, SyncState, TransactionView, Utxo};

use crate::ledger::{AddressLedger, WatchedAddress};
use crate::walker::HdPathWalker;
use crate::{Error, Result};

/// Classifies a transaction confirmed at `height` into a [`Bucket`], given the
/// current chain tip and the number of confirmations the wallet requires
/// before treating a transaction as settled.
pub fn classify(height: u32, tip: u32, min_block_confirm: u32) -> Bucket {
    if height == 0 {
        return Bucket::Mempool;
    }
    let confirmations = tip.saturating_sub(height) + 1;
    if confirmations < min_block_confirm {
        Bucket::Pending
    } else {
        Bucket::Confirmed
    }
}

/// Orchestrates scanning, subscriptions and ledger updates for a single
/// BIP32 account (one external chain, one internal chain).
pub struct SyncManager {
    provider: Arc<Provider>,
    key_manager: Arc<dyn KeyManager>,
    ledger: Arc<AddressLedger>,
    external_walker: HdPathWalker,
    internal_walker: HdPathWalker,
    min_block_confirm: u32,
    allow_mempool_self_spend: bool,

    current_block: AtomicU32,
    stop_requested: AtomicBool,
    is_syncing: AtomicBool,

    watched: Mutex<HashSet<ScriptHash>>,
    address_paths: Mutex<HashMap<String, (HdPath, PublicKey)>>,
    address_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,

    utxos: Mutex<Vec<Utxo>>,
    locked_utxos: Mutex<HashSet<(Txid, u32)>>,

    external_state: Mutex<SyncState>,
    internal_state: Mutex<SyncState>,
}

impl SyncManager {
    /// `purpose`/`coin`/`account` identify the single BIP32 account this
    /// manager tracks; `gap_limit` and `min_block_confirm` default to 20 and
    /// 1 respectively if the caller has no stronger preference. If
    /// `allow_mempool_self_spend` is false (the conservative default), coin
    /// selection only draws from confirmed UTXOs.
    pub fn new(
        provider: Arc<Provider>,
        key_manager: Arc<dyn KeyManager>,
        ledger: Arc<AddressLedger>,
        purpose: u32,
        coin: u32,
        account: u32,
        gap_limit: u32,
        min_block_confirm: u32,
        allow_mempool_self_spend: bool,
    ) -> Self {
        let external_walker = HdPathWalker::new(Arc::clone(&key_manager), Arc::clone(&provider), gap_limit);
        let internal_walker = HdPathWalker::new(Arc::clone(&key_manager), Arc::clone(&provider), gap_limit);
        SyncManager {
            provider,
            key_manager,
            ledger,
            external_walker,
            internal_walker,
            min_block_confirm,
            allow_mempool_self_spend,
            current_block: AtomicU32::new(0),
            stop_requested: AtomicBool::new(false),
            is_syncing: AtomicBool::new(false),
            watched: Mutex::new(HashSet::new()),
            address_paths: Mutex::new(HashMap::new()),
            address_locks: Mutex::new(HashMap::new()),
            utxos: Mutex::new(Vec::new()),
            locked_utxos: Mutex::new(HashSet::new()),
            external_state: Mutex::new(SyncState::fresh(purpose, coin, account, Chain::External.as_u32())),
            internal_state: Mutex::new(SyncState::fresh(purpose, coin, account, Chain::Internal.as_u32())),
        }
    }

    /// Opens the ledger's backing stores, loads sync state from them (or
    /// starts fresh if this is the first run), and subscribes to the chain
    /// tip and every previously watched address.
    pub fn init(&self) -> Result<()> {
        self.ledger.init()?;
        self.load_persisted_state()?;
        let height = self.provider.subscribe_to_blocks()?;
        self.current_block.store(height, Ordering::SeqCst);
        self.ledger.put_latest_block(height)?;
        Ok(())
    }

    fn load_persisted_state(&self) -> Result<()> {
        if let Some(state) = self.ledger.get_sync_state(Chain::External)? {
            *self.external_state.lock().unwrap() = state;
        }
        if let Some(state) = self.ledger.get_sync_state(Chain::Internal)? {
            *self.internal_state.lock().unwrap() = state;
        }
        for chain in [Chain::External, Chain::Internal] {
            for watched in self.ledger.get_watched(chain)? {
                let pubkey = self.key_manager.public_key(&watched.path)?;
                self.restore_watch_address(watched.script_hash, watched.address, watched.path, pubkey)?;
            }
        }
        let latest_block = self.ledger.get_latest_block()?;
        self.current_block.store(latest_block, Ordering::SeqCst);
        Ok(())
    }

    /// The most recently observed chain tip.
    pub fn current_block(&self) -> u32 { self.current_block.load(Ordering::SeqCst) }

    /// True while a [`SyncManager::sync_account`] call is running.
    pub fn is_syncing(&self) -> bool { self.is_syncing.load(Ordering::SeqCst) }

    /// Requests that the in-progress (or next) scan stop at the next address boundary.
    pub fn stop_sync(&self) { self.stop_requested.store(true, Ordering::SeqCst); }

    /// Clears a prior [`SyncManager::stop_sync`] request.
    pub fn resume_sync(&self) { self.stop_requested.store(false, Ordering::SeqCst); }

    fn state_for(&self, chain: Chain) -> &Mutex<SyncState> {
        match chain {
            Chain::External => &self.external_state,
            Chain::Internal => &self.internal_state,
        }
    }

    fn walker_for(&self, chain: Chain) -> &HdPathWalker {
        match chain {
            Chain::External => &self.external_walker,
            Chain::Internal => &self.internal_walker,
        }
    }

    /// Runs a gap-limit scan on `chain`: derives addresses, subscribes to the
    /// ones found to have history, fetches and applies their transactions,
    /// then persists the chain's updated [`SyncState`].
    ///
    /// If `reset`, both chains' scan states are discarded first.
    pub fn sync_account(&self, chain: Chain, reset: bool) -> Result<()> {
        if reset {
            let purpose_state = *self.state_for(chain).lock().unwrap();
            let fresh_external =
                SyncState::fresh(purpose_state.path.purpose, purpose_state.path.coin, purpose_state.path.account, Chain::External.as_u32());
            let fresh_internal =
                SyncState::fresh(purpose_state.path.purpose, purpose_state.path.coin, purpose_state.path.account, Chain::Internal.as_u32());
            *self.external_state.lock().unwrap() = fresh_external;
            *self.internal_state.lock().unwrap() = fresh_internal;
            self.ledger.put_sync_state(Chain::External, &fresh_external)?;
            self.ledger.put_sync_state(Chain::Internal, &fresh_internal)?;
        }

        self.is_syncing.store(true, Ordering::SeqCst);
        let result = self.run_scan(chain);
        self.is_syncing.store(false, Ordering::SeqCst);
        result
    }

    fn run_scan(&self, chain: Chain) -> Result<()> {
        let state = *self.state_for(chain).lock().unwrap();
        let outcome = self.walker_for(chain).scan(&state)?;

        for (script_hash, address, path) in &outcome.used {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let pubkey = self.key_manager.public_key(path)?;
            self.watch_address(script_hash.clone(), address.clone(), *path, pubkey)?;

            let mut seen = HashSet::new();
            let mut txs = self.provider.get_address_history(script_hash, GetOpts::default())?;
            txs.extend(self.provider.get_mempool_tx(script_hash, GetOpts::default())?);
            for tx in txs {
                if seen.insert(tx.txid) {
                    self.apply_transaction(&tx)?;
                }
            }
        }

        let state = outcome.sync_state;
        *self.state_for(chain).lock().unwrap() = state;
        self.ledger.put_sync_state(chain, &state)?;
        Ok(())
    }

    /// Registers `script_hash`/`address` as belonging to `path`, remembers its
    /// public key for future PSBT derivation, subscribes to it through the
    /// provider (at most once per script hash), and persists it in `path`'s
    /// chain's watch list.
    pub fn watch_address(&self, script_hash: ScriptHash, address: String, path: HdPath, pubkey: PublicKey) -> Result<()> {
        self.watch_address_inner(script_hash, address, path, pubkey, true)
    }

    /// Like [`SyncManager::watch_address`], but for entries already present in
    /// the persisted watch list: re-subscribes without appending a duplicate.
    fn restore_watch_address(&self, script_hash: ScriptHash, address: String, path: HdPath, pubkey: PublicKey) -> Result<()> {
        self.watch_address_inner(script_hash, address, path, pubkey, false)
    }

    fn watch_address_inner(
        &self,
        script_hash: ScriptHash,
        address: String,
        path: HdPath,
        pubkey: PublicKey,
        persist: bool,
    ) -> Result<()> {
        self.address_paths.lock().unwrap().insert(address.clone(), (path, pubkey));
        let first_time = self.watched.lock().unwrap().insert(script_hash);
        if first_time {
            self.provider.subscribe_to_address(&script_hash)?;
            if persist {
                let chain = path.chain()?;
                let mut entries = self.ledger.get_watched(chain)?;
                entries.push(WatchedAddress { script_hash, address, path });
                self.ledger.put_watched(chain, &entries)?;
            }
        }
        Ok(())
    }

    fn address_lock(&self, address: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.address_locks.lock().unwrap().entry(address.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    fn mutate_address<F>(&self, address: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut AddressEntry),
    {
        let lock = self.address_lock(address);
        let _guard = lock.lock().unwrap();
        let mut entry = self.ledger.get_address(address)?.unwrap_or_else(|| AddressEntry::new(address));
        f(&mut entry);
        self.ledger.put_address(&entry)
    }

    fn is_owned(&self, address: &str) -> bool { self.address_paths.lock().unwrap().contains_key(address) }

    fn add_utxo_if_owned(&self, tx: &TransactionView, address: &str, index: u32, value: Amount, witness_hex: &str) {
        let paths = self.address_paths.lock().unwrap();
        let Some((path, pubkey)) = paths.get(address) else { return };
        let mut utxos = self.utxos.lock().unwrap();
        if utxos.iter().any(|u| u.txid == tx.txid && u.index == index) {
            return;
        }
        utxos.push(Utxo {
            txid: tx.txid,
            index,
            value,
            witness_hex: witness_hex.to_string(),
            address: address.to_string(),
            address_path: *path,
            address_public_key: *pubkey,
        });
    }

    fn remove_spent_utxos(&self, tx: &TransactionView) {
        let mut utxos = self.utxos.lock().unwrap();
        utxos.retain(|u| !tx.inputs.iter().any(|i| i.prev_txid == Some(u.txid) && i.prev_index == u.index));
    }

    /// Applies `tx`'s effect on every address it touches that the wallet
    /// owns: credits owned outputs, debits owned inputs, and attributes the
    /// fee to the change address when the whole transaction is ours.
    ///
    /// Calling this twice with the same `tx` is a no-op the second time,
    /// because [`types::Balance::add_txid`] is idempotent per bucket.
    pub fn apply_transaction(&self, tx: &TransactionView) -> Result<()> {
        let bucket = classify(tx.height, self.current_block(), self.min_block_confirm);

        let mut owned_outputs = Vec::new();
        for out in &tx.outputs {
            if let Some(addr) = &out.address {
                if self.is_owned(addr) {
                    owned_outputs.push((addr.clone(), out.value, out.index, out.witness_hex.clone()));
                }
            }
        }

        let mut owned_inputs = Vec::new();
        let mut wholly_ours = !tx.inputs.is_empty();
        for input in &tx.inputs {
            match &input.address {
                Some(addr) if self.is_owned(addr) => owned_inputs.push((addr.clone(), input.value)),
                _ => wholly_ours = false,
            }
        }

        if owned_outputs.is_empty() && owned_inputs.is_empty() {
            return Ok(());
        }

        for (addr, value, index, witness_hex) in &owned_outputs {
            self.mutate_address(addr, |entry| entry.r#in.add_txid(bucket, tx.txid, *value))?;
            self.add_utxo_if_owned(tx, addr, *index, *value, witness_hex);
        }
        for (addr, value) in &owned_inputs {
            self.mutate_address(addr, |entry| entry.out.add_txid(bucket, tx.txid, *value))?;
        }
        if !owned_inputs.is_empty() {
            self.remove_spent_utxos(tx);
        }
        if wholly_ours {
            if let Some((change_addr, _, _, _)) = owned_outputs.last() {
                self.mutate_address(change_addr, |entry| entry.fee.add_txid(bucket, tx.txid, tx.fee))?;
            }
        }

        self.ledger.store_tx(tx)?;
        Ok(())
    }

    /// Sets the current tip to `height` and reclassifies every transaction in
    /// the confirmation window that may have just crossed `min_block_confirm`.
    ///
    /// Refuses to move backwards: a lower height than previously observed is
    /// a reorg, which this core detects but does not reconcile.
    pub fn update_block(&self, height: u32) -> Result<()> {
        let prev = self.current_block();
        if height < prev {
            log::warn!(target: "wallet::sync", "refusing reorg: new tip {} < current {}", height, prev);
            return Err(Error::ReorgDetected);
        }
        if height == prev {
            return Ok(());
        }
        self.current_block.store(height, Ordering::SeqCst);
        self.ledger.put_latest_block(height)?;

        let window_start = height.saturating_sub(self.min_block_confirm);
        for h in window_start..=height {
            for view in self.ledger.get_tx_height(h)? {
                self.apply_transaction(&view)?;
            }
        }
        Ok(())
    }

    /// True if `utxo` is spendable under the current self-spend policy: its
    /// owning transaction must be confirmed, unless `allow_mempool_self_spend`
    /// also permits drawing from the mempool bucket.
    fn is_spendable(&self, utxo: &Utxo) -> Result<bool> {
        let height = self.ledger.get_tx_height_of(&utxo.txid)?.unwrap_or(0);
        let bucket = classify(height, self.current_block(), self.min_block_confirm);
        Ok(match bucket {
            Bucket::Confirmed => true,
            Bucket::Mempool | Bucket::Pending => self.allow_mempool_self_spend,
        })
    }

    /// Selects unlocked, spendable UTXOs (highest value first) until their
    /// sum reaches `target`, locking the selection. The candidate set is
    /// confirmed UTXOs, plus mempool/pending ones if the self-spend policy
    /// allows it. Fails with [`Error::Insufficient`] if the full candidate
    /// set doesn't cover it.
    pub fn utxo_for_amount(&self, target: Amount) -> Result<(Vec<Utxo>, Amount)> {
        let mut candidates = self.utxos.lock().unwrap().clone();
        candidates.sort_by(|a, b| b.value.cmp(&a.value));

        let mut selected = Vec::new();
        let mut total = Amount::ZERO;
        {
            let locked = self.locked_utxos.lock().unwrap();
            for utxo in candidates {
                if locked.contains(&utxo.outpoint()) || !self.is_spendable(&utxo)? {
                    continue;
                }
                total += utxo.value;
                selected.push(utxo);
                if total >= target {
                    break;
                }
            }
        }

        if total < target {
            return Err(Error::Insufficient);
        }

        let mut locked = self.locked_utxos.lock().unwrap();
        for utxo in &selected {
            locked.insert(utxo.outpoint());
        }
        Ok((selected, total))
    }

    /// Hands out the next unused internal-chain (change) address, advancing
    /// and persisting the internal [`SyncState`] so it is never handed out
    /// again.
    pub fn next_change_address(&self) -> Result<(HdPath, ScriptHash, String)> {
        let next_path = {
            let state = self.internal_state.lock().unwrap();
            state.path.bump_index()
        };
        let addr_type = next_path.address_type()?;
        let (script_hash, address) = self.key_manager.path_to_script_hash(&next_path, addr_type)?;
        let new_state = {
            let mut state = self.internal_state.lock().unwrap();
            state.path = next_path;
            *state
        };
        self.ledger.put_sync_state(Chain::Internal, &new_state)?;

        let pubkey = self.key_manager.public_key(&next_path)?;
        self.watch_address(script_hash, address.clone(), next_path, pubkey)?;
        Ok((next_path, script_hash, address))
    }

    /// Builds a transport event sink that routes `new-block`/`new-tx` pushes
    /// arriving on the provider's connection into this sync manager. Pass
    /// the result to [`electrum::transport::Transport::new`] when wiring up
    /// the provider this manager wraps.
    pub fn event_sink(self: &Arc<Self>) -> electrum::transport::EventSink {
        let this = Arc::clone(self);
        Arc::new(move |event| this.handle_transport_event(event))
    }

    fn handle_transport_event(&self, event: Event) {
        match event {
            Event::Notification { method, params } if method == "blockchain.headers.subscribe" => {
                if let Some(height) = header_push_height(&params) {
                    match self.update_block(height) {
                        Ok(()) => self.provider.note_new_block(height),
                        Err(e) => log::warn!(target: "wallet::sync", "update_block({}) failed: {:?}", height, e),
                    }
                }
            }
            Event::Notification { method, params } if method == "blockchain.scripthash.subscribe" => {
                if let Some(script_hash) = params.as_array().and_then(|a| a.first()).and_then(Value::as_str).and_then(|s| s.parse::<ScriptHash>().ok()) {
                    if let Err(e) = self.refresh_script_hash(&script_hash) {
                        log::warn!(target: "wallet::sync", "refresh_script_hash failed: {:?}", e);
                    }
                }
            }
            Event::Status(_, Status::Error) => {
                log::warn!(target: "wallet::sync", "provider transport entered the error state");
            }
            _ => {}
        }
    }

    /// Re-fetches and re-applies every history and mempool transaction for
    /// `script_hash`, the reaction to an unsolicited `scripthash.subscribe` push.
    fn refresh_script_hash(&self, script_hash: &ScriptHash) -> Result<()> {
        let mut seen = HashSet::new();
        let mut txs = self.provider.get_address_history(script_hash, GetOpts::default())?;
        txs.extend(self.provider.get_mempool_tx(script_hash, GetOpts::default())?);
        for tx in txs {
            if seen.insert(tx.txid) {
                self.apply_transaction(&tx)?;
            }
        }
        Ok(())
    }

    /// Releases the lock on `outpoints`. If `success`, the UTXOs are also
    /// removed from the available set (they have been spent); otherwise they
    /// become selectable again.
    pub fn unlock_utxo(&self, outpoints: &[(Txid, u32)], success: bool) {
        {
            let mut locked = self.locked_utxos.lock().unwrap();
            for op in outpoints {
                locked.remove(op);
            }
        }
        if success {
            let mut utxos = self.utxos.lock().unwrap();
            utxos.retain(|u| !outpoints.contains(&u.outpoint()));
        }
    }
}

/// Extracts `height` from a `blockchain.headers.subscribe` push, whose
/// `params` is an array wrapping the header object per Electrum's JSON-RPC
/// notification framing (bare object tolerated too, for leniency).
fn header_push_height(params: &Value) -> Option<u32> {
    let header = params.as_array().and_then(|a| a.first()).unwrap_or(params);
    header.get("height").and_then(Value::as_u64).map(|h| h as u32)
}
