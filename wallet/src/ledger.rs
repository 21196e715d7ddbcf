// SPDX-License-Identifier: CC0-1.0

//! C6: per-address balances and a height-indexed transaction history, backed
//! by three named [`Store`] instances.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use types::{AddressEntry, Chain, HdPath, ScriptHash, Store, SyncState, TransactionView};
use types::store::Range;

use crate::Result;

const ADDR_PREFIX: &str = "addr:";
const HISTORY_PREFIX: &str = "i:";
const REVERSE_PREFIX: &str = "tx:";
const SYNC_STATE_EXT_KEY: &str = "sync_state:ext";
const SYNC_STATE_INT_KEY: &str = "sync_state:int";
const WATCHED_EXT_KEY: &str = "watched_script_hashes_ext";
const WATCHED_INT_KEY: &str = "watched_script_hashes_in";
const LATEST_BLOCK_KEY: &str = "latest_block";

fn height_key(height: u32, txid: &bitcoin::Txid) -> String { format!("{}{}", height_prefix(height), txid) }

fn height_prefix(height: u32) -> String { format!("{}{:010}:", HISTORY_PREFIX, height) }

fn reverse_key(txid: &bitcoin::Txid) -> String { format!("{}{}", REVERSE_PREFIX, txid) }

fn addr_key(address: &str) -> String { format!("{}{}", ADDR_PREFIX, address) }

fn sync_state_key(chain: Chain) -> &'static str {
    match chain {
        Chain::External => SYNC_STATE_EXT_KEY,
        Chain::Internal => SYNC_STATE_INT_KEY,
    }
}

fn watched_key(chain: Chain) -> &'static str {
    match chain {
        Chain::External => WATCHED_EXT_KEY,
        Chain::Internal => WATCHED_INT_KEY,
    }
}

/// One entry of a chain's persisted watch list: enough to re-derive the
/// public key and re-issue the subscription after a restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchedAddress {
    pub script_hash: ScriptHash,
    pub address: String,
    pub path: HdPath,
}

/// Options accepted by [`AddressLedger::get_transactions`].
#[derive(Copy, Clone, Debug, Default)]
pub struct HistoryOpts {
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Number of matching entries to skip before collecting.
    pub offset: usize,
    /// Walk newest-first instead of oldest-first.
    pub reverse: bool,
}

/// Balances and transaction history for every address the wallet owns.
pub struct AddressLedger {
    addr_store: Arc<dyn Store>,
    tx_history_store: Arc<dyn Store>,
    broadcasted_store: Arc<dyn Store>,
}

impl AddressLedger {
    /// Wraps the three named store instances the ledger keeps its state in:
    /// `addr`, `tx-history` and `broadcasted`.
    pub fn new(addr_store: Arc<dyn Store>, tx_history_store: Arc<dyn Store>, broadcasted_store: Arc<dyn Store>) -> Self {
        AddressLedger { addr_store, tx_history_store, broadcasted_store }
    }

    /// Opens the three backing store instances.
    pub fn init(&self) -> Result<()> {
        self.addr_store.init()?;
        self.tx_history_store.init()?;
        self.broadcasted_store.init()?;
        Ok(())
    }

    /// Fetches the entry for `address`, if the ledger has ever recorded activity for it.
    pub fn get_address(&self, address: &str) -> Result<Option<AddressEntry>> {
        match self.addr_store.get(&addr_key(address))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persists `entry`, replacing whatever was stored for its address.
    pub fn put_address(&self, entry: &AddressEntry) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.addr_store.put(&addr_key(&entry.address), &bytes)?;
        Ok(())
    }

    /// Indexes `view` by height, deleting whatever stale height-keyed entry
    /// this txid previously held so a transaction "moves" in the index as it
    /// confirms instead of appearing twice.
    pub fn store_tx(&self, view: &TransactionView) -> Result<()> {
        let reverse = reverse_key(&view.txid);
        if let Some(bytes) = self.tx_history_store.get(&reverse)? {
            if let Ok(old_height) = std::str::from_utf8(&bytes).unwrap_or_default().parse::<u32>() {
                if old_height != view.height {
                    self.tx_history_store.delete(&height_key(old_height, &view.txid))?;
                }
            }
        }
        if view.height != 0 {
            self.tx_history_store.delete(&height_key(0, &view.txid))?;
        }

        let payload = serde_json::to_vec(view)?;
        self.tx_history_store.put(&height_key(view.height, &view.txid), &payload)?;
        self.tx_history_store.put(&reverse, view.height.to_string().as_bytes())?;
        Ok(())
    }

    /// The confirmation height last recorded for `txid`, if known.
    pub fn get_tx_height_of(&self, txid: &bitcoin::Txid) -> Result<Option<u32>> {
        match self.tx_history_store.get(&reverse_key(txid))? {
            Some(bytes) => Ok(std::str::from_utf8(&bytes).ok().and_then(|s| s.parse().ok())),
            None => Ok(None),
        }
    }

    /// Range-scans the height index, skipping `opts.offset` and yielding at
    /// most `opts.limit` [`TransactionView`]s, oldest or newest block first.
    pub fn get_transactions(&self, opts: HistoryOpts) -> Result<Vec<TransactionView>> {
        let mut range = Range::prefix(HISTORY_PREFIX);
        if opts.reverse {
            range = range.reversed();
        }
        let entries = self.tx_history_store.entries(&range)?;
        let mut out = Vec::new();
        for (_, value) in entries.into_iter().skip(opts.offset) {
            if let Some(limit) = opts.limit {
                if out.len() >= limit {
                    break;
                }
            }
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Every [`TransactionView`] indexed at exactly height `h`.
    pub fn get_tx_height(&self, h: u32) -> Result<Vec<TransactionView>> {
        let range = Range { gt: Some(height_prefix(h)), lt: Some(height_prefix(h + 1)), reverse: false };
        let entries = self.tx_history_store.entries(&range)?;
        entries.into_iter().map(|(_, value)| serde_json::from_slice(&value).map_err(Into::into)).collect()
    }

    /// Records a transaction this wallet broadcast, keyed by txid.
    pub fn record_broadcast(&self, txid: &bitcoin::Txid, hex: &str) -> Result<()> {
        self.broadcasted_store.put(&txid.to_string(), hex.as_bytes())?;
        Ok(())
    }

    /// The last persisted scan progress for `chain`, if a scan has ever run.
    pub fn get_sync_state(&self, chain: Chain) -> Result<Option<SyncState>> {
        match self.addr_store.get(sync_state_key(chain))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persists `state` as `chain`'s scan progress.
    pub fn put_sync_state(&self, chain: Chain, state: &SyncState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        self.addr_store.put(sync_state_key(chain), &bytes)?;
        Ok(())
    }

    /// Every address on `chain` the wallet has ever subscribed to.
    pub fn get_watched(&self, chain: Chain) -> Result<Vec<WatchedAddress>> {
        match self.addr_store.get(watched_key(chain))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces `chain`'s persisted watch list with `entries`.
    pub fn put_watched(&self, chain: Chain, entries: &[WatchedAddress]) -> Result<()> {
        let bytes = serde_json::to_vec(entries)?;
        self.addr_store.put(watched_key(chain), &bytes)?;
        Ok(())
    }

    /// The chain tip last observed before the process stopped, `0` if none was ever recorded.
    pub fn get_latest_block(&self) -> Result<u32> {
        match self.addr_store.get(LATEST_BLOCK_KEY)? {
            Some(bytes) => Ok(std::str::from_utf8(&bytes).ok().and_then(|s| s.parse().ok()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Persists `height` as the last observed chain tip.
    pub fn put_latest_block(&self, height: u32) -> Result<()> {
        self.addr_store.put(LATEST_BLOCK_KEY, height.to_string().as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use types::Error as TypesError;

    struct MemStore {
        map: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemStore {
        fn new() -> Arc<Self> { Arc::new(MemStore { map: Mutex::new(HashMap::new()) }) }
    }

    impl Store for MemStore {
        fn init(&self) -> std::result::Result<(), TypesError> { Ok(()) }
        fn close(&self) -> std::result::Result<(), TypesError> { Ok(()) }
        fn clear(&self) -> std::result::Result<(), TypesError> {
            self.map.lock().unwrap().clear();
            Ok(())
        }
        fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, TypesError> {
            Ok(self.map.lock().unwrap().get(key).cloned())
        }
        fn put(&self, key: &str, value: &[u8]) -> std::result::Result<(), TypesError> {
            self.map.lock().unwrap().insert(key.to_string(), value.to_vec());
            Ok(())
        }
        fn delete(&self, key: &str) -> std::result::Result<(), TypesError> {
            self.map.lock().unwrap().remove(key);
            Ok(())
        }
        fn entries(&self, range: &Range) -> std::result::Result<Vec<(String, Vec<u8>)>, TypesError> {
            let map = self.map.lock().unwrap();
            let mut out: Vec<(String, Vec<u8>)> = map
                .iter()
                .filter(|(k, _)| {
                    range.gt.as_ref().map_or(true, |gt| k.as_str() >= gt.as_str())
                        && range.lt.as_ref().map_or(true, |lt| k.as_str() < lt.as_str())
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            out.sort_by(|a, b| a.0.cmp(&b.0));
            if range.reverse {
                out.reverse();
            }
            Ok(out)
        }
    }

    fn sample(height: u32, byte: u8) -> TransactionView {
        use bitcoin::hashes::Hash;
        TransactionView {
            txid: bitcoin::Txid::from_byte_array([byte; 32]),
            height,
            outputs: vec![],
            std_out: vec![],
            inputs: vec![],
            fee: bitcoin::Amount::ZERO,
            unconfirmed_inputs: vec![],
        }
    }

    #[test]
    fn store_tx_moves_between_heights_leaving_no_stale_key() {
        let ledger = AddressLedger::new(MemStore::new(), MemStore::new(), MemStore::new());
        ledger.init().unwrap();

        let mempool = sample(0, 7);
        ledger.store_tx(&mempool).unwrap();
        assert_eq!(ledger.get_tx_height(0).unwrap().len(), 1);

        let confirmed = sample(100, 7);
        ledger.store_tx(&confirmed).unwrap();
        assert!(ledger.get_tx_height(0).unwrap().is_empty(), "stale mempool key must be gone");
        assert_eq!(ledger.get_tx_height(100).unwrap().len(), 1);
        assert_eq!(ledger.get_tx_height_of(&confirmed.txid).unwrap(), Some(100));
    }

    #[test]
    fn get_transactions_respects_limit_offset_and_reverse() {
        let ledger = AddressLedger::new(MemStore::new(), MemStore::new(), MemStore::new());
        ledger.init().unwrap();
        for (height, byte) in [(1, 1), (2, 2), (3, 3)] {
            ledger.store_tx(&sample(height, byte)).unwrap();
        }

        let forward = ledger.get_transactions(HistoryOpts::default()).unwrap();
        assert_eq!(forward.iter().map(|v| v.height).collect::<Vec<_>>(), vec![1, 2, 3]);

        let reverse = ledger.get_transactions(HistoryOpts { reverse: true, ..Default::default() }).unwrap();
        assert_eq!(reverse.iter().map(|v| v.height).collect::<Vec<_>>(), vec![3, 2, 1]);

        let paged = ledger.get_transactions(HistoryOpts { limit: Some(1), offset: 1, ..Default::default() }).unwrap();
        assert_eq!(paged.iter().map(|v| v.height).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn address_round_trips() {
        let ledger = AddressLedger::new(MemStore::new(), MemStore::new(), MemStore::new());
        ledger.init().unwrap();
        let entry = AddressEntry::new("bc1qexample");
        ledger.put_address(&entry).unwrap();
        let fetched = ledger.get_address("bc1qexample").unwrap().unwrap();
        assert_eq!(fetched.address, "bc1qexample");
    }

    #[test]
    fn sync_state_round_trips_per_chain() {
        let ledger = AddressLedger::new(MemStore::new(), MemStore::new(), MemStore::new());
        ledger.init().unwrap();
        assert!(ledger.get_sync_state(Chain::External).unwrap().is_none());

        let state = SyncState::fresh(84, 0, 0, Chain::External.as_u32());
        ledger.put_sync_state(Chain::External, &state).unwrap();
        assert_eq!(ledger.get_sync_state(Chain::External).unwrap(), Some(state));
        assert!(ledger.get_sync_state(Chain::Internal).unwrap().is_none());
    }

    #[test]
    fn watched_list_and_latest_block_round_trip() {
        let ledger = AddressLedger::new(MemStore::new(), MemStore::new(), MemStore::new());
        ledger.init().unwrap();
        assert!(ledger.get_watched(Chain::External).unwrap().is_empty());
        assert_eq!(ledger.get_latest_block().unwrap(), 0);

        let script_hash = ScriptHash::from_script(&bitcoin::ScriptBuf::from_bytes(vec![0u8; 25]));
        let entry =
            WatchedAddress { script_hash, address: "bc1qexample".to_string(), path: HdPath::new(84, 0, 0, 0, 0) };
        ledger.put_watched(Chain::External, &[entry]).unwrap();
        let fetched = ledger.get_watched(Chain::External).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].address, "bc1qexample");

        ledger.put_latest_block(123).unwrap();
        assert_eq!(ledger.get_latest_block().unwrap(), 123);
    }
}
