// SPDX-License-Identifier: CC0-1.0

//! Shared test doubles for the end-to-end scenarios: a deterministic
//! always-P2WPKH key manager and an in-memory [`Store`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bitcoin::bip32::Fingerprint;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{All, Secp256k1, SecretKey};
use bitcoin::{Address, CompressedPublicKey, Network as BtcNetwork, PublicKey, ScriptBuf, Witness};
use types::store::Range;
use types::{AddressType, Error as TypesError, HdPath, KeyManager, Network, ScriptHash, Store};

/// A deterministic key manager that always renders P2WPKH addresses and
/// "signs" by filling in a dummy witness stack; good enough to drive PSBT
/// assembly and extraction through their full shape, not to produce a
/// network-valid signature.
pub struct TestKeyManager {
    secp: Secp256k1<All>,
    network: Mutex<BtcNetwork>,
    keys: Mutex<HashMap<HdPath, SecretKey>>,
}

impl TestKeyManager {
    pub fn new() -> Self {
        TestKeyManager { secp: Secp256k1::new(), network: Mutex::new(BtcNetwork::Regtest), keys: Mutex::new(HashMap::new()) }
    }

    fn secret_for(&self, path: &HdPath) -> SecretKey {
        let mut keys = self.keys.lock().unwrap();
        if let Some(k) = keys.get(path) {
            return *k;
        }
        let mut nonce = 0u32;
        let key = loop {
            let seed = format!("{}-{}", path, nonce);
            let digest = sha256::Hash::hash(seed.as_bytes());
            match SecretKey::from_slice(digest.as_ref()) {
                Ok(k) => break k,
                Err(_) => nonce += 1,
            }
        };
        keys.insert(*path, key);
        key
    }
}

impl KeyManager for TestKeyManager {
    fn set_network(&self, network: Network) -> Result<(), TypesError> {
        *self.network.lock().unwrap() = match network {
            Network::Regtest => BtcNetwork::Regtest,
            Network::Mainnet => BtcNetwork::Bitcoin,
            Network::Testnet => BtcNetwork::Testnet,
            Network::Signet => BtcNetwork::Signet,
        };
        Ok(())
    }

    fn path_to_script_hash(&self, path: &HdPath, _addr_type: AddressType) -> Result<(ScriptHash, String), TypesError> {
        let secret = self.secret_for(path);
        let compressed = CompressedPublicKey(secret.public_key(&self.secp));
        let network = *self.network.lock().unwrap();
        let address = Address::p2wpkh(&compressed, network);
        let script_hash = ScriptHash::from_script(&address.script_pubkey());
        Ok((script_hash, address.to_string()))
    }

    fn public_key(&self, path: &HdPath) -> Result<PublicKey, TypesError> {
        Ok(PublicKey::new(self.secret_for(path).public_key(&self.secp)))
    }

    fn fingerprint(&self) -> Fingerprint { Fingerprint::from([0xAA, 0xBB, 0xCC, 0xDD]) }

    fn sign_psbt(&self, psbt: &mut Psbt) -> Result<(), TypesError> {
        let keys = self.keys.lock().unwrap();
        for input in psbt.inputs.iter_mut() {
            let matched = input
                .bip32_derivation
                .keys()
                .find_map(|pk| keys.values().find(|sk| sk.public_key(&self.secp) == *pk).copied());
            if let Some(secret) = matched {
                let pubkey_bytes = secret.public_key(&self.secp).serialize();
                input.final_script_witness = Some(Witness::from_slice(&[vec![0x30u8; 71], pubkey_bytes.to_vec()]));
                input.final_script_sig = Some(ScriptBuf::new());
            }
        }
        Ok(())
    }
}

/// An in-memory [`Store`].
pub struct MemStore {
    map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Arc<Self> { Arc::new(MemStore { map: Mutex::new(HashMap::new()) }) }
}

impl Store for MemStore {
    fn init(&self) -> Result<(), TypesError> { Ok(()) }
    fn close(&self) -> Result<(), TypesError> { Ok(()) }
    fn clear(&self) -> Result<(), TypesError> {
        self.map.lock().unwrap().clear();
        Ok(())
    }
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TypesError> { Ok(self.map.lock().unwrap().get(key).cloned()) }
    fn put(&self, key: &str, value: &[u8]) -> Result<(), TypesError> {
        self.map.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }
    fn delete(&self, key: &str) -> Result<(), TypesError> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }
    fn entries(&self, range: &Range) -> Result<Vec<(String, Vec<u8>)>, TypesError> {
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
