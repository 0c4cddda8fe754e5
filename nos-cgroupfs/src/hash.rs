//! Name index: lock-striped hash of (parent, name) -> directory entry
//!
//! All mounts share one process-wide index by default. The table has a fixed
//! number of buckets; a smaller, fixed number of spin mutexes each guard a
//! disjoint set of buckets, so lock memory stays bounded while a lock covers
//! at most `buckets / stripes` chains.
//!
//! Stripe locks are leaf locks: they are taken after any node locks and are
//! released before the caller touches another node lock.

extern crate alloc;
use alloc::{boxed::Box, sync::{Arc, Weak}, vec::Vec};

use lazy_static::lazy_static;
use static_assertions::const_assert;

use crate::dirent::SlotId;
use crate::node::CgrpNode;
use crate::sync::Mutex;
use crate::types::NodeKey;

/// Number of hash buckets (power of two)
pub const CG_HASH_SIZE: usize = 8192;
/// Number of stripe mutexes (power of two, not larger than the bucket count)
pub const CG_MUTEX_SIZE: usize = 64;

const_assert!(CG_HASH_SIZE.is_power_of_two());
const_assert!(CG_MUTEX_SIZE.is_power_of_two());
const_assert!(CG_MUTEX_SIZE <= CG_HASH_SIZE);

lazy_static! {
    /// Process-wide name index shared by every mount
    static ref GLOBAL_INDEX: Arc<NameIndex> = Arc::new(NameIndex::new());
}

/// Whether a lookup should take a reference on the node it finds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeHold {
    NoHold,
    Hold,
}

/// Hash a (parent, name) pair.
///
/// The seed comes from the parent's identity; each name byte is folded in
/// with `h = h * 17 + byte`.
pub fn name_hash(parent: NodeKey, name: &str) -> u32 {
    let mut hash = (parent.0 as u32).wrapping_mul(0x9e37_79b9) >> 8;
    for b in name.bytes() {
        hash = (hash << 4).wrapping_add(hash).wrapping_add(u32::from(b));
    }
    hash
}

struct IndexEntry {
    hash: u32,
    parent: NodeKey,
    name: Arc<str>,
    slot: SlotId,
    target: Weak<CgrpNode>,
}

/// Result of a successful index lookup
#[derive(Debug)]
pub struct IndexHit {
    /// Slot of the entry in the parent's directory list
    pub slot: SlotId,
    /// Non-owning reference to the bound node
    pub target: Weak<CgrpNode>,
    /// Reference taken under the stripe lock when `NodeHold::Hold` was asked
    pub held: Option<Arc<CgrpNode>>,
}

impl IndexHit {
    /// Does this entry bind exactly `node`?
    pub fn binds(&self, node: &Arc<CgrpNode>) -> bool {
        core::ptr::eq(self.target.as_ptr(), Arc::as_ptr(node))
    }
}

/// Chains of one stripe: bucket `b` lives in stripe `b & stripe_mask` at
/// position `b >> stripe_shift`.
type Stripe = Box<[Vec<IndexEntry>]>;

/// Lock-striped hash index of directory entries
pub struct NameIndex {
    stripes: Box<[Mutex<Stripe>]>,
    bucket_mask: u32,
    stripe_mask: u32,
    stripe_shift: u32,
}

impl NameIndex {
    /// Create an index with the default geometry
    pub fn new() -> Self {
        Self::with_geometry(CG_HASH_SIZE, CG_MUTEX_SIZE)
    }

    /// Create an index with `buckets` chains guarded by `stripes` mutexes.
    ///
    /// # Panics
    ///
    /// Both values must be powers of two and `stripes <= buckets`.
    pub fn with_geometry(buckets: usize, stripes: usize) -> Self {
        assert!(
            buckets.is_power_of_two() && stripes.is_power_of_two() && stripes <= buckets,
            "name index geometry must be powers of two with stripes <= buckets"
        );
        let per_stripe = buckets / stripes;
        let stripes_vec: Vec<Mutex<Stripe>> = (0..stripes)
            .map(|_| {
                let chains: Vec<Vec<IndexEntry>> = (0..per_stripe).map(|_| Vec::new()).collect();
                Mutex::new(chains.into_boxed_slice())
            })
            .collect();

        Self {
            stripes: stripes_vec.into_boxed_slice(),
            bucket_mask: (buckets - 1) as u32,
            stripe_mask: (stripes - 1) as u32,
            stripe_shift: stripes.trailing_zeros(),
        }
    }

    /// The index shared by all mounts
    pub fn global() -> Arc<NameIndex> {
        GLOBAL_INDEX.clone()
    }

    pub fn buckets(&self) -> usize {
        self.bucket_mask as usize + 1
    }

    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    fn locate(&self, hash: u32) -> (usize, usize) {
        let bucket = hash & self.bucket_mask;
        let stripe = bucket & self.stripe_mask;
        (stripe as usize, (bucket >> self.stripe_shift) as usize)
    }

    /// Add an entry for `name` under `parent`; returns the stored hash
    pub fn insert(
        &self,
        parent: NodeKey,
        name: Arc<str>,
        slot: SlotId,
        target: Weak<CgrpNode>,
    ) -> u32 {
        let hash = name_hash(parent, &name);
        let (stripe, chain) = self.locate(hash);
        log::trace!("cgrp index: insert {:?}/{} hash {:#x}", parent, name, hash);

        let mut chains = self.stripes[stripe].lock();
        chains[chain].push(IndexEntry {
            hash,
            parent,
            name,
            slot,
            target,
        });
        hash
    }

    /// Remove the entry stored with `hash` for `(parent, slot)`.
    ///
    /// The caller guarantees the entry is present.
    pub fn remove(&self, hash: u32, parent: NodeKey, slot: SlotId) {
        let (stripe, chain) = self.locate(hash);
        let mut chains = self.stripes[stripe].lock();
        let bucket = &mut chains[chain];
        match bucket
            .iter()
            .position(|e| e.hash == hash && e.parent == parent && e.slot == slot)
        {
            Some(pos) => {
                bucket.swap_remove(pos);
            }
            None => debug_assert!(false, "cgrp index: removing absent entry"),
        }
    }

    /// Find the entry named `name` in directory `parent`.
    ///
    /// With `NodeHold::Hold` the bound node is referenced before the stripe
    /// lock is dropped, so a concurrent delete cannot free it in between.
    pub fn lookup(&self, name: &str, parent: NodeKey, hold: NodeHold) -> Option<IndexHit> {
        let hash = name_hash(parent, name);
        let (stripe, chain) = self.locate(hash);

        let chains = self.stripes[stripe].lock();
        chains[chain]
            .iter()
            .find(|e| e.hash == hash && e.parent == parent && &*e.name == name)
            .map(|e| IndexHit {
                slot: e.slot,
                target: e.target.clone(),
                held: match hold {
                    NodeHold::Hold => e.target.upgrade(),
                    NodeHold::NoHold => None,
                },
            })
    }

    /// Total number of indexed entries
    pub fn len(&self) -> usize {
        self.stripes
            .iter()
            .map(|s| s.lock().iter().map(Vec::len).sum::<usize>())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NameIndex {
    fn default() -> Self {
        Self::new()
    }
}
