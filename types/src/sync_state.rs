// SPDX-License-Identifier: CC0-1.0

//! Per-chain scan progress, persisted so a gap-limit scan can resume.

use serde::{Deserialize, Serialize};

use crate::path::HdPath;

/// Progress of a gap-limit scan on one chain (external or internal).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Length of the current trailing run of consecutive empty addresses.
    pub gap: u32,
    /// Index of the first address in the trailing empty run, i.e. where the
    /// next scan should resume.
    pub gap_end: u32,
    /// The last path handed out on this chain.
    pub path: HdPath,
}

impl SyncState {
    /// A fresh state for a chain that has never been scanned.
    pub fn fresh(purpose: u32, coin: u32, account: u32, change: u32) -> Self {
        SyncState { gap: 0, gap_end: 0, path: HdPath::new(purpose, coin, account, change, 0) }
    }
}
