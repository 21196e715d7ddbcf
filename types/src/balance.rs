// SPDX-License-Identifier: CC0-1.0

//! Per-address balance accounting.
//!
//! A [`Balance`] tracks one side of an address's activity (credits, debits,
//! or attributed fee share) split into the three confirmation buckets. Each
//! bucket remembers which txids contributed to it so that moving a
//! transaction between buckets (mempool -> pending -> confirmed) can be done
//! without double counting.

use bitcoin::{Amount, Txid};
use serde::{Deserialize, Serialize};

/// Which confirmation bucket a transaction's contribution currently lives in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    /// `height == 0`.
    Mempool,
    /// Confirmed, but fewer than `min_block_confirm` confirmations.
    Pending,
    /// At least `min_block_confirm` confirmations.
    Confirmed,
}

/// The combined result of subtracting one [`Balance`] from another.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct CombinedBalance {
    /// Confirmed bucket after subtraction.
    pub confirmed: Amount,
    /// Pending bucket after subtraction.
    pub pending: Amount,
    /// Mempool bucket after subtraction.
    pub mempool: Amount,
    /// Sum of all three buckets.
    pub consolidated: Amount,
}

/// One side (`in`, `out`, or `fee`) of an address's balance, split by bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    confirmed: Amount,
    pending: Amount,
    mempool: Amount,
    /// `(txid, amount)` pairs, one per bucket, that make up the totals above.
    ///
    /// Kept as three parallel lists indexed by [`Bucket`] rather than a map
    /// keyed by txid: a single txid only ever lives in one bucket at a time,
    /// and scanning a handful of entries per address is cheaper than hashing.
    mempool_entries: Vec<(Txid, Amount)>,
    pending_entries: Vec<(Txid, Amount)>,
    confirmed_entries: Vec<(Txid, Amount)>,
}

impl Balance {
    /// Returns a zeroed balance.
    pub fn new() -> Self { Self::default() }

    /// The amount currently attributed to `bucket`.
    pub fn amount(&self, bucket: Bucket) -> Amount {
        match bucket {
            Bucket::Confirmed => self.confirmed,
            Bucket::Pending => self.pending,
            Bucket::Mempool => self.mempool,
        }
    }

    fn entries_mut(&mut self, bucket: Bucket) -> &mut Vec<(Txid, Amount)> {
        match bucket {
            Bucket::Confirmed => &mut self.confirmed_entries,
            Bucket::Pending => &mut self.pending_entries,
            Bucket::Mempool => &mut self.mempool_entries,
        }
    }

    fn amount_mut(&mut self, bucket: Bucket) -> &mut Amount {
        match bucket {
            Bucket::Confirmed => &mut self.confirmed,
            Bucket::Pending => &mut self.pending,
            Bucket::Mempool => &mut self.mempool,
        }
    }

    /// Records `amount` against `txid` in `bucket`, removing any prior
    /// record of the same txid from every bucket first.
    ///
    /// This is what lets a transaction move from mempool to pending to
    /// confirmed (or be re-applied) without double-counting: calling this
    /// twice with the same arguments is a no-op the second time.
    pub fn add_txid(&mut self, bucket: Bucket, txid: Txid, amount: Amount) {
        for b in [Bucket::Confirmed, Bucket::Pending, Bucket::Mempool] {
            if let Some(pos) = self.entries_mut(b).iter().position(|(t, _)| *t == txid) {
                let (_, prior) = self.entries_mut(b).remove(pos);
                *self.amount_mut(b) -= prior;
            }
        }
        self.entries_mut(bucket).push((txid, amount));
        *self.amount_mut(bucket) += amount;
    }

    /// Subtracts `other` from `self` bucket-by-bucket and returns the totals.
    pub fn combine(&self, other: &Balance) -> CombinedBalance {
        let confirmed = self.confirmed - other.confirmed;
        let pending = self.pending - other.pending;
        let mempool = self.mempool - other.mempool;
        CombinedBalance { confirmed, pending, mempool, consolidated: confirmed + pending + mempool }
    }

    /// Sum of all three buckets.
    pub fn total(&self) -> Amount { self.confirmed + self.pending + self.mempool }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(byte: u8) -> Txid {
        use bitcoin::hashes::Hash;
        Txid::from_byte_array([byte; 32])
    }

    #[test]
    fn add_txid_is_idempotent() {
        let mut balance = Balance::new();
        balance.add_txid(Bucket::Mempool, txid(1), Amount::from_sat(1_000));
        balance.add_txid(Bucket::Mempool, txid(1), Amount::from_sat(1_000));
        assert_eq!(balance.amount(Bucket::Mempool), Amount::from_sat(1_000));
    }

    #[test]
    fn add_txid_moves_amount_between_buckets() {
        let mut balance = Balance::new();
        balance.add_txid(Bucket::Mempool, txid(1), Amount::from_sat(1_000));
        assert_eq!(balance.amount(Bucket::Mempool), Amount::from_sat(1_000));

        balance.add_txid(Bucket::Confirmed, txid(1), Amount::from_sat(1_000));
        assert_eq!(balance.amount(Bucket::Mempool), Amount::ZERO);
        assert_eq!(balance.amount(Bucket::Confirmed), Amount::from_sat(1_000));
        assert_eq!(balance.total(), Amount::from_sat(1_000));
    }

    #[test]
    fn combine_subtracts_elementwise() {
        let mut a = Balance::new();
        a.add_txid(Bucket::Confirmed, txid(1), Amount::from_sat(5_000));
        let mut b = Balance::new();
        b.add_txid(Bucket::Confirmed, txid(2), Amount::from_sat(2_000));

        let combined = a.combine(&b);
        assert_eq!(combined.confirmed, Amount::from_sat(3_000));
        assert_eq!(combined.consolidated, Amount::from_sat(3_000));
    }
}
