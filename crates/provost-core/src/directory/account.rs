//! POSIX uid number allocation.

use std::collections::BTreeSet;
use std::ops::Range;

/// The lowest uid number in `pool` not present in `taken`, or `None` when
/// the pool is exhausted.
///
/// `taken` is the union of numbers already granted in the ledger and those
/// discovered in the directory, so an allocation is safe against both
/// sources of truth. The ledger's uniqueness constraint on
/// `posix_uid_number` resources backstops a race between two allocators.
#[must_use]
pub fn next_uid_number(pool: Range<u32>, taken: &BTreeSet<u32>) -> Option<u32> {
    pool.into_iter().find(|n| !taken.contains(n))
}
