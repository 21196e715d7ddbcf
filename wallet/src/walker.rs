// SPDX-License-Identifier: CC0-1.0

//! C4: deterministic HD path derivation and gap-limit discovery.

use std::sync::Arc;

use electrum::{GetOpts, Provider};
use types::{HdPath, KeyManager, ScriptHash, SyncState};

use crate::Result;

/// One newly-derived `(script hash, encoded address, path)` triple with history.
pub type UsedAddress = (ScriptHash, String, HdPath);

/// Result of a gap-limit scan: the updated [`SyncState`] plus every address the
/// scan found to have history.
pub struct ScanOutcome {
    /// The chain's scan state after this run, ready to persist.
    pub sync_state: SyncState,
    /// Addresses discovered to have history during this run, in ascending index order.
    pub used: Vec<UsedAddress>,
}

/// Derives addresses on a single BIP32 chain and discovers how far they have been used.
pub struct HdPathWalker {
    key_manager: Arc<dyn KeyManager>,
    provider: Arc<Provider>,
    gap_limit: u32,
}

impl HdPathWalker {
    /// `gap_limit` is the number of consecutive empty addresses tolerated before a scan stops.
    pub fn new(key_manager: Arc<dyn KeyManager>, provider: Arc<Provider>, gap_limit: u32) -> Self {
        HdPathWalker { key_manager, provider, gap_limit }
    }

    /// Returns `path` with its index incremented, the only way a new path is
    /// produced from a previously handed-out one.
    pub fn bump_index(path: &HdPath) -> HdPath { path.bump_index() }

    /// Scans chain `state.path.chain()` starting at `state.gap_end`, deriving
    /// addresses and querying their history until `gap_limit` consecutive
    /// addresses are found empty.
    pub fn scan(&self, state: &SyncState) -> Result<ScanOutcome> {
        let addr_type = state.path.address_type()?;
        let mut index = state.gap_end;
        let mut empty_run = 0u32;
        let mut used = Vec::new();

        loop {
            let path = HdPath::new(state.path.purpose, state.path.coin, state.path.account, state.path.change, index);
            let (script_hash, address) = self.key_manager.path_to_script_hash(&path, addr_type)?;
            let history = self.provider.get_address_history(&script_hash, GetOpts::default())?;

            if history.is_empty() {
                empty_run += 1;
            } else {
                empty_run = 0;
                used.push((script_hash, address, path));
            }

            if empty_run >= self.gap_limit {
                break;
            }
            index += 1;
        }

        let gap_end = index.saturating_sub(self.gap_limit - 1);
        let last_index = used.last().map(|(_, _, p)| p.index).unwrap_or(state.path.index);
        let sync_state = SyncState {
            gap: empty_run,
            gap_end,
            path: HdPath::new(state.path.purpose, state.path.coin, state.path.account, state.path.change, last_index),
        };
        Ok(ScanOutcome { sync_state, used })
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn gap_end_points_to_first_address_of_trailing_empty_run() {
        // Exercises the arithmetic the scan loop uses to compute `gap_end`;
        // the networked path is covered by `electrum-test-util`-backed
        // integration tests.
        let gap_limit = 3u32;
        let last_used_index = 5u32;
        let terminal_index = last_used_index + gap_limit;
        let gap_end = terminal_index.saturating_sub(gap_limit - 1);
        assert_eq!(gap_end, last_used_index + 2);
    }
}
