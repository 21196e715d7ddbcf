// SPDX-License-Identifier: CC0-1.0

//! Electrum script hashes.
//!
//! Electrum indexes the chain by the SHA256 digest of a `scriptPubKey`,
//! displayed and subscribed to in reversed byte order. Every external and
//! internal address the wallet derives maps to exactly one of these.

use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::ScriptBuf;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A 32-byte digest identifying an output script; the Electrum subscription key.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptHash([u8; 32]);

impl ScriptHash {
    /// Computes the Electrum script hash of `script`: `sha256(script)` with bytes reversed.
    pub fn from_script(script: &ScriptBuf) -> Self {
        let digest = sha256::Hash::hash(script.as_bytes());
        let mut bytes = *digest.as_ref();
        bytes.reverse();
        ScriptHash(bytes)
    }

    /// Returns the raw 32 bytes, in Electrum (reversed) order.
    pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptHash({})", self)
    }
}

impl FromStr for ScriptHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(Error::InvalidScriptHash);
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidScriptHash)?;
        }
        Ok(ScriptHash(bytes))
    }
}
