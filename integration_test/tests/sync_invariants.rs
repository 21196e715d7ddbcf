// SPDX-License-Identifier: CC0-1.0

//! Reactions to live transport pushes (scripthash pushes moving a
//! transaction between confirmation buckets, header pushes advancing or
//! being rejected as a reorg) and the self-spend coin-selection policy.

mod support;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitcoin::hashes::Hash;
use bitcoin::{Amount, Network, Txid};
use electrum::{Event, Provider, RequestCache, Transport};
use electrum_test_util::MockElectrumServer;
use serde_json::json;
use types::{AddressType, Bucket, Chain, HdPath, KeyManager, TransactionView, TxOutputView};
use wallet::{AddressLedger, SyncManager};

use support::{MemStore, TestKeyManager};

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn build_sync(
    server: &MockElectrumServer,
    key_manager: Arc<dyn KeyManager>,
    allow_mempool_self_spend: bool,
) -> (Arc<SyncManager>, Arc<AddressLedger>) {
    let sink: electrum::transport::EventSink = Arc::new(|_| {});
    let transport = Arc::new(Transport::new("127.0.0.1", server.port(), sink));
    transport.connect().expect("connect to mock server");
    let cache = RequestCache::new(64, Duration::from_secs(60), Duration::from_secs(300));
    let provider = Arc::new(Provider::new(transport, cache, Network::Regtest));
    let ledger = Arc::new(AddressLedger::new(MemStore::new(), MemStore::new(), MemStore::new()));
    let sync = Arc::new(SyncManager::new(provider, key_manager, Arc::clone(&ledger), 84, 1, 0, 20, 6, allow_mempool_self_spend));
    (sync, ledger)
}

fn derive_watched_address(key_manager: &TestKeyManager, index: u32) -> (HdPath, types::ScriptHash, String, bitcoin::PublicKey, String) {
    let path = HdPath::new(84, 1, 0, Chain::External.as_u32(), index);
    let (script_hash, address) = key_manager.path_to_script_hash(&path, AddressType::P2wpkh).unwrap();
    let pubkey = key_manager.public_key(&path).unwrap();
    let addr: bitcoin::Address = address.parse::<bitcoin::Address<_>>().unwrap().assume_checked();
    let script_hex = hex_encode(addr.script_pubkey().as_bytes());
    (path, script_hash, address, pubkey, script_hex)
}

#[test]
fn scripthash_push_moves_a_transaction_from_mempool_to_confirmed() {
    let server = MockElectrumServer::start();
    let key_manager = Arc::new(TestKeyManager::new());
    let (path, script_hash, address, pubkey, script_hex) = derive_watched_address(&key_manager, 0);

    let confs = Arc::new(AtomicU64::new(0));
    let txid = Txid::from_byte_array([7u8; 32]);

    server.on_const("blockchain.headers.subscribe", json!({"height": 20}));
    server.on_const("blockchain.scripthash.subscribe", json!(null));
    {
        let txid_str = txid.to_string();
        server.on("blockchain.scripthash.get_history", move |_| json!([{"tx_hash": txid_str}]));
    }
    server.on_const("blockchain.scripthash.get_mempool", json!([]));
    {
        let confs = Arc::clone(&confs);
        server.on("blockchain.transaction.get", move |_| {
            json!({
                "confirmations": confs.load(Ordering::SeqCst),
                "vout": [{"n": 0, "value": 0.5, "scriptPubKey": {"hex": script_hex}}],
                "vin": [{"coinbase": "00"}],
            })
        });
    }

    let (sync, ledger) = build_sync(&server, key_manager, false);
    sync.init().expect("init");
    sync.watch_address(script_hash, address.clone(), path, pubkey).expect("watch_address");

    let sink = sync.event_sink();
    sink(Event::Notification {
        method: "blockchain.scripthash.subscribe".to_string(),
        params: json!([script_hash.to_string(), "status-1"]),
    });

    let entry = ledger.get_address(&address).expect("read address").expect("entry recorded");
    assert_eq!(entry.r#in.amount(Bucket::Mempool), Amount::from_sat(50_000_000));
    assert_eq!(entry.r#in.amount(Bucket::Confirmed), Amount::ZERO);

    confs.store(10, Ordering::SeqCst);
    sink(Event::Notification {
        method: "blockchain.scripthash.subscribe".to_string(),
        params: json!([script_hash.to_string(), "status-2"]),
    });

    let entry = ledger.get_address(&address).expect("read address").expect("entry recorded");
    assert_eq!(entry.r#in.amount(Bucket::Mempool), Amount::ZERO, "the mempool credit must move, not duplicate");
    assert_eq!(entry.r#in.amount(Bucket::Confirmed), Amount::from_sat(50_000_000));
}

#[test]
fn a_lower_height_push_is_rejected_without_corrupting_the_tip() {
    let server = MockElectrumServer::start();
    server.on_const("blockchain.headers.subscribe", json!({"height": 100}));
    let key_manager = Arc::new(TestKeyManager::new());
    let (sync, _ledger) = build_sync(&server, key_manager, false);
    sync.init().expect("init");
    assert_eq!(sync.current_block(), 100);

    let sink = sync.event_sink();
    sink(Event::Notification {
        method: "blockchain.headers.subscribe".to_string(),
        params: json!([{"height": 150, "hex": "00"}]),
    });
    assert_eq!(sync.current_block(), 150);

    sink(Event::Notification {
        method: "blockchain.headers.subscribe".to_string(),
        params: json!([{"height": 90, "hex": "00"}]),
    });
    assert_eq!(sync.current_block(), 150, "a lower height must be rejected as a reorg, not silently applied");
}

#[test]
fn self_spend_policy_gates_mempool_utxos_by_configuration() {
    let server = MockElectrumServer::start();
    server.on_const("blockchain.scripthash.subscribe", json!(null));
    let key_manager = Arc::new(TestKeyManager::new());
    let (path, script_hash, address, pubkey, script_hex) = derive_watched_address(&key_manager, 1);

    let (sync, _ledger) = build_sync(&server, Arc::clone(&key_manager) as Arc<dyn KeyManager>, false);
    sync.watch_address(script_hash, address.clone(), path, pubkey).expect("watch_address");

    let txid = Txid::from_byte_array([9u8; 32]);
    let view = TransactionView {
        txid,
        height: 0,
        outputs: vec![TxOutputView {
            address: Some(address.clone()),
            value: Amount::from_sat(100_000),
            witness_hex: script_hex,
            index: 0,
            txid,
            height: 0,
        }],
        std_out: vec![true],
        inputs: vec![],
        fee: Amount::ZERO,
        unconfirmed_inputs: vec![],
    };
    sync.apply_transaction(&view).expect("apply_transaction");

    let err = sync.utxo_for_amount(Amount::from_sat(50_000)).unwrap_err();
    assert!(matches!(err, wallet::Error::Insufficient), "mempool UTXOs must not be selectable by default");
}

#[test]
fn self_spend_policy_allows_mempool_utxos_when_enabled() {
    let server = MockElectrumServer::start();
    server.on_const("blockchain.scripthash.subscribe", json!(null));
    let key_manager = Arc::new(TestKeyManager::new());
    let (path, script_hash, address, pubkey, script_hex) = derive_watched_address(&key_manager, 2);

    let (sync, _ledger) = build_sync(&server, Arc::clone(&key_manager) as Arc<dyn KeyManager>, true);
    sync.watch_address(script_hash, address.clone(), path, pubkey).expect("watch_address");

    let txid = Txid::from_byte_array([11u8; 32]);
    let view = TransactionView {
        txid,
        height: 0,
        outputs: vec![TxOutputView {
            address: Some(address.clone()),
            value: Amount::from_sat(100_000),
            witness_hex: script_hex,
            index: 0,
            txid,
            height: 0,
        }],
        std_out: vec![true],
        inputs: vec![],
        fee: Amount::ZERO,
        unconfirmed_inputs: vec![],
    };
    sync.apply_transaction(&view).expect("apply_transaction");

    let (selected, total) = sync.utxo_for_amount(Amount::from_sat(50_000)).expect("mempool UTXO should be selectable");
    assert_eq!(total, Amount::from_sat(100_000));
    assert_eq!(selected.len(), 1);
}
