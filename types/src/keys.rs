// SPDX-License-Identifier: CC0-1.0

//! The key-derivation/signing collaborator.
//!
//! This trait is the whole of the seed/mnemonic and BIP32/BIP39/PSBT-signing
//! subsystem as seen from the core: it is out of scope (§1) and implemented
//! elsewhere, the core only calls through this interface.

use bitcoin::bip32::Fingerprint;
use bitcoin::psbt::Psbt;
use bitcoin::PublicKey;

use crate::error::Error;
use crate::path::{AddressType, HdPath};
use crate::script_hash::ScriptHash;

/// Bitcoin networks the key manager can be configured for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Network {
    /// Local regression-test network.
    Regtest,
    /// Production mainnet.
    Mainnet,
    /// Public testnet.
    Testnet,
    /// Signet.
    Signet,
}

/// Key derivation and signing, implemented outside the core.
pub trait KeyManager: Send + Sync {
    /// Configures which network's address encoding/derivation to use.
    fn set_network(&self, network: Network) -> Result<(), Error>;

    /// Derives the script hash and encoded address for `path`, rendered with `addr_type`.
    fn path_to_script_hash(&self, path: &HdPath, addr_type: AddressType) -> Result<(ScriptHash, String), Error>;

    /// The public key derived at `path`, needed to fill PSBT `bip32_derivation`.
    fn public_key(&self, path: &HdPath) -> Result<PublicKey, Error>;

    /// The master key fingerprint, recorded in PSBT `bip32_derivation` entries.
    fn fingerprint(&self) -> Fingerprint;

    /// Signs every input of `psbt` this key manager holds keys for, in place.
    fn sign_psbt(&self, psbt: &mut Psbt) -> Result<(), Error>;
}
