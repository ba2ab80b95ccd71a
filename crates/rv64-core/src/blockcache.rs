//! JIT block cache and the forward-fixup bookkeeping for branches that
//! target a not-yet-translated block.
//!
//! Owned by the `Vm`, not by the JIT backend itself, so the interpreter
//! and the JIT observe the same cache even if JIT support is compiled
//! out (`rv64-jit` absent, `jit` feature disabled): the cache is simply
//! never populated in that configuration.

use std::collections::HashMap;

/// Guest PC to translated-block byte offset within the JIT code arena.
///
/// Pre-reserves capacity for a few thousand blocks, matching the hot-path
/// working sets seen translating a small kernel; growth beyond that is
/// unbounded (no eviction — see `DESIGN.md`).
#[derive(Debug, Clone, Default)]
pub struct BlockCache {
    offsets: HashMap<u64, u32>,
}

impl BlockCache {
    const INITIAL_CAPACITY: usize = 10_000;

    #[must_use]
    pub fn new() -> Self {
        Self { offsets: HashMap::with_capacity(Self::INITIAL_CAPACITY) }
    }

    #[must_use]
    pub fn lookup(&self, pc: u64) -> Option<u32> {
        self.offsets.get(&pc).copied()
    }

    pub fn insert(&mut self, pc: u64, offset: u32) {
        self.offsets.insert(pc, offset);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Drop every cached translation. The only invalidation this cache
    /// supports: no selective eviction, no self-modifying-code detection.
    /// A host that writes guest code after it has been translated (or
    /// that wants to discard stale translations for any other reason)
    /// must call this itself; nothing in the JIT watches guest writes.
    pub fn clear(&mut self) {
        self.offsets.clear();
    }
}

/// One branch instruction in the code arena that still needs to be
/// patched once its target block is translated.
#[derive(Debug, Clone, Copy)]
pub struct FixupRecord {
    /// Byte offset of the branch instruction within the arena.
    pub branch_site: u32,
    /// True if the site is a conditional `B.cond` (19-bit immediate, top
    /// bits `01010100`) rather than an unconditional `B` (26-bit
    /// immediate, top bits `000101`) — the two encode their displacement
    /// at different bit positions, so the patcher must know which.
    pub conditional: bool,
}

/// Guest PC of an untranslated target to the branch sites waiting on it.
#[derive(Debug, Clone, Default)]
pub struct PendingFixups {
    by_target: HashMap<u64, Vec<FixupRecord>>,
}

impl PendingFixups {
    #[must_use]
    pub fn new() -> Self {
        Self { by_target: HashMap::new() }
    }

    pub fn register(&mut self, target_pc: u64, record: FixupRecord) {
        self.by_target.entry(target_pc).or_default().push(record);
    }

    /// Remove and return every fixup waiting on `target_pc`, now that it
    /// has a translated block. Returns an empty vec if none were pending.
    pub fn take(&mut self, target_pc: u64) -> Vec<FixupRecord> {
        self.by_target.remove(&target_pc).unwrap_or_default()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.by_target.values().map(Vec::len).sum()
    }

    /// Drop every pending fixup, for use alongside [`BlockCache::clear`] —
    /// a cleared cache with stale fixups still pointing at arena sites
    /// that may be reused would patch garbage into unrelated code.
    pub fn clear(&mut self) {
        self.by_target.clear();
    }
}
