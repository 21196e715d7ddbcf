// SPDX-License-Identifier: CC0-1.0

//! BIP32 derivation paths restricted to the single-account shape this wallet uses:
//! `m/purpose'/coin'/account'/change/index`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Which of the two BIP44 chains a path belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    /// `change = 0`, addresses handed out to third parties.
    External,
    /// `change = 1`, change/return addresses.
    Internal,
}

impl Chain {
    /// The `change` field value for this chain.
    pub fn as_u32(self) -> u32 {
        match self {
            Chain::External => 0,
            Chain::Internal => 1,
        }
    }

    /// Parses the `change` field of a path into a `Chain`.
    pub fn from_u32(change: u32) -> Result<Self, Error> {
        match change {
            0 => Ok(Chain::External),
            1 => Ok(Chain::Internal),
            other => Err(Error::InvalidChain(other)),
        }
    }
}

/// The address kind a `purpose` field derives, used to pick a script template.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    /// BIP44, legacy P2PKH.
    P2pkh,
    /// BIP49, P2SH-wrapped P2WPKH.
    P2shP2wpkh,
    /// BIP84, native P2WPKH.
    P2wpkh,
    /// BIP86, P2TR key-path spend.
    P2tr,
}

impl AddressType {
    /// Maps a BIP43 `purpose` field to the address kind it derives.
    pub fn from_purpose(purpose: u32) -> Result<Self, Error> {
        match purpose {
            44 => Ok(AddressType::P2pkh),
            49 => Ok(AddressType::P2shP2wpkh),
            84 => Ok(AddressType::P2wpkh),
            86 => Ok(AddressType::P2tr),
            other => Err(Error::UnknownPurpose(other)),
        }
    }

    /// The `purpose` field that derives this address kind.
    pub fn purpose(self) -> u32 {
        match self {
            AddressType::P2pkh => 44,
            AddressType::P2shP2wpkh => 49,
            AddressType::P2wpkh => 84,
            AddressType::P2tr => 86,
        }
    }
}

/// A single-account HD path: `(purpose, coin, account, change, index)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HdPath {
    /// BIP43 purpose, e.g. `84` for BIP84.
    pub purpose: u32,
    /// SLIP44 coin type, e.g. `0` for mainnet, `1` for testnet.
    pub coin: u32,
    /// Account index.
    pub account: u32,
    /// `0` external, `1` internal.
    pub change: u32,
    /// Monotonically assigned address index within the chain.
    pub index: u32,
}

impl HdPath {
    /// Creates a new path.
    pub fn new(purpose: u32, coin: u32, account: u32, change: u32, index: u32) -> Self {
        HdPath { purpose, coin, account, change, index }
    }

    /// Returns the chain (`external`/`internal`) this path belongs to.
    pub fn chain(&self) -> Result<Chain, Error> { Chain::from_u32(self.change) }

    /// Returns the address type this path's `purpose` derives.
    pub fn address_type(&self) -> Result<AddressType, Error> { AddressType::from_purpose(self.purpose) }

    /// Returns a copy of this path with `index` incremented by one.
    ///
    /// The walker never hands out the same index twice, so this is the only
    /// way a new path is produced from an existing one.
    pub fn bump_index(&self) -> HdPath { HdPath { index: self.index + 1, ..*self } }
}

impl fmt::Display for HdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m/{}'/{}'/{}'/{}/{}", self.purpose, self.coin, self.account, self.change, self.index)
    }
}

impl FromStr for HdPath {
    type Err = Error;

    /// Parses `m/P'/C'/A'/ch/i` into its five components.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("m/").ok_or_else(|| Error::InvalidPath(s.to_string()))?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != 5 {
            return Err(Error::InvalidPath(s.to_string()));
        }

        let parse_hardened = |p: &str| -> Result<u32, Error> {
            p.strip_suffix('\'')
                .ok_or_else(|| Error::InvalidPath(s.to_string()))?
                .parse()
                .map_err(|_| Error::InvalidPath(s.to_string()))
        };
        let parse_plain =
            |p: &str| -> Result<u32, Error> { p.parse().map_err(|_| Error::InvalidPath(s.to_string())) };

        Ok(HdPath {
            purpose: parse_hardened(parts[0])?,
            coin: parse_hardened(parts[1])?,
            account: parse_hardened(parts[2])?,
            change: parse_plain(parts[3])?,
            index: parse_plain(parts[4])?,
        })
    }
}
