//! The public map: arena storage, tree order and tombstone bookkeeping.

use std::cmp::Ordering;
use std::fmt;
use std::ops::BitOr;

use tracing::{debug, debug_span, warn};

use crate::arena::{Arena, Slot};
use crate::config::{CopyFn, FreeFn, MapConfig};
use crate::entry::{Entry, EntryId, KeyValue};
use crate::error::Result;
use crate::order::CompareFn;
use crate::tree::{elem, Tree};

/// Behavior switches for [`ArenaMap::add`] and [`ArenaMap::del`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Compact the map once tombstones outnumber live entries. Compaction
    /// renumbers every entry, invalidating all outstanding ids.
    pub const ALLOW_REBUILD: Flags = Flags(1);
    /// On `add`, replace an entry that compares equal instead of keeping it.
    pub const REPLACE: Flags = Flags(2);

    #[inline]
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// What [`ArenaMap::add`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// An entry comparing equal exists and `REPLACE` was not given
    AlreadyPresent,
    Replaced,
}

/// Ordered map of binary keys and values.
///
/// Entries live back to back in one arena; an AVL tree threaded through the
/// entry headers orders them by the comparator given at construction. The
/// comparator sees key and value together, so a key-only comparator gives
/// unique keys while a key-and-value comparator allows one key to carry
/// several values.
///
/// Deleted entries become tombstones that keep their arena space until the
/// map is compacted.
pub struct ArenaMap {
    pub(crate) cmp: CompareFn,
    copy: Option<CopyFn>,
    free: Option<FreeFn>,
    pub(crate) count: usize,
    pub(crate) deleted: usize,
    pub(crate) tree: Tree,
    pub(crate) arena: Arena,
}

impl ArenaMap {
    pub fn new(cmp: CompareFn) -> Self {
        let config = MapConfig::default();
        Self {
            cmp,
            copy: None,
            free: None,
            count: 0,
            deleted: 0,
            tree: Tree::default(),
            arena: Arena::new(config.effective_max_bytes()),
        }
    }

    /// Create a map with the given configuration.
    ///
    /// Fails only if the initial reservation cannot be allocated.
    pub fn with_config(cmp: CompareFn, config: MapConfig) -> Result<Self> {
        Ok(Self {
            cmp,
            copy: config.copy,
            free: config.free,
            count: 0,
            deleted: 0,
            tree: Tree::default(),
            arena: Arena::with_capacity(config.initial_bytes, config.effective_max_bytes())?,
        })
    }

    /// The comparator that orders this map.
    #[inline]
    pub fn comparator(&self) -> CompareFn {
        self.cmp
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of tombstones waiting for compaction.
    #[inline]
    pub fn deleted(&self) -> usize {
        self.deleted
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.arena.capacity_bytes()
    }

    pub fn shrink_to_fit(&mut self) {
        self.arena.shrink_to_fit();
    }

    /// Reserve room for `extra_entries` entries holding `extra_bytes` of key
    /// and value data in total, so a batch of adds does not reallocate.
    ///
    /// Returns the number of arena slot units now available to the batch.
    pub fn reserve(&mut self, extra_entries: usize, extra_bytes: usize) -> Result<usize> {
        self.arena.reserve(extra_entries, extra_bytes)
    }

    #[inline]
    fn entry(&self, slot: Slot) -> Entry<'_> {
        Entry {
            id: EntryId(slot.0),
            key: self.arena.key(slot),
            value: self.arena.value(slot),
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Add `key` and `value`.
    ///
    /// If an entry comparing equal is present it is kept and
    /// `AlreadyPresent` is returned, unless `flags` has `REPLACE`, in which
    /// case the old entry is deleted and the new one takes its place. An
    /// error leaves the map unchanged.
    pub fn add(&mut self, key: &[u8], value: &[u8], flags: Flags) -> Result<AddOutcome> {
        self.add_slot(key, value, flags).map(|(outcome, _)| outcome)
    }

    fn add_slot(&mut self, key: &[u8], value: &[u8], flags: Flags) -> Result<(AddOutcome, Slot)> {
        self.arena.reserve(1, key.len() + value.len())?;
        let slot = self.arena.push(key, value);

        let existing = match self.tree.insert(&mut self.arena, slot, &self.cmp) {
            Ok(()) => {
                self.count += 1;
                return Ok((AddOutcome::Added, slot));
            }
            Err(existing) => existing,
        };

        if !flags.contains(Flags::REPLACE) {
            self.arena.truncate(slot);
            return Ok((AddOutcome::AlreadyPresent, existing));
        }

        let removed = self.tree.remove(&mut self.arena, existing, &self.cmp);
        debug_assert!(removed);
        self.release(existing);
        let inserted = self.tree.insert(&mut self.arena, slot, &self.cmp);
        debug_assert!(inserted.is_ok());
        self.count += 1;
        self.maybe_rebuild(flags);
        Ok((AddOutcome::Replaced, slot))
    }

    /// Delete one entry matching `probe` under `cmp`.
    ///
    /// `cmp` must be compatible with the map's comparator (see
    /// [`order`](crate::order)). The entry is located with `cmp` and then
    /// unlinked under the map's own order, so any compatible comparator can
    /// be used. Returns whether an entry was deleted.
    pub fn del<C>(&mut self, probe: KeyValue<'_>, cmp: C, flags: Flags) -> bool
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering,
    {
        let Some(slot) = self.tree.find(&self.arena, &probe, &cmp) else {
            return false;
        };
        let removed = self.tree.remove(&mut self.arena, slot, &self.cmp);
        debug_assert!(removed);
        self.release(slot);
        self.maybe_rebuild(flags);
        true
    }

    /// Tombstone an entry already unlinked from the tree.
    fn release(&mut self, slot: Slot) {
        if let Some(free) = self.free {
            free(&self.entry(slot));
        }
        self.arena.mark_removed(slot);
        self.count -= 1;
        self.deleted += 1;
    }

    fn maybe_rebuild(&mut self, flags: Flags) {
        if flags.contains(Flags::ALLOW_REBUILD) && self.deleted > self.count {
            if let Err(err) = self.compact() {
                warn!(%err, deleted = self.deleted, "compaction failed; keeping tombstones");
            }
        }
    }

    /// Rewrite live entries into a fresh arena in sorted order and drop all
    /// tombstones.
    ///
    /// Every [`EntryId`] handed out before this call is invalidated. On
    /// failure the map is unchanged. Returns the number of tombstones
    /// reclaimed.
    pub fn compact(&mut self) -> Result<usize> {
        let span = debug_span!("arena_map_compact", live = self.count, deleted = self.deleted);
        let _guard = span.enter();

        let live_bytes: usize = self
            .tree
            .iter(&self.arena)
            .map(|s| self.arena.key(s).len() + self.arena.value(s).len())
            .sum();
        let mut fresh = Arena::new(self.arena.max_bytes());
        fresh.reserve(self.count, live_bytes)?;

        let mut slots = Vec::new();
        slots.try_reserve_exact(self.count)?;
        for s in self.tree.iter(&self.arena) {
            slots.push(fresh.push(self.arena.key(s), self.arena.value(s)));
        }
        let tree = Tree::from_sorted(&mut fresh, &slots);

        let reclaimed = self.deleted;
        let old_bytes = self.arena.len_bytes();
        self.arena = fresh;
        self.tree = tree;
        self.deleted = 0;
        debug!(reclaimed, old_bytes, new_bytes = self.arena.len_bytes(), "compacted");
        Ok(reclaimed)
    }

    /// Add every live entry of `src` to this map.
    ///
    /// All or nothing: if any add fails, this map is restored to its exact
    /// state before the call, arena capacity included. Entries that compare
    /// equal to one already here are skipped. The source's copy hook runs for each entry added. When
    /// the destination starts empty, [`ArenaMap::try_clone`] is cheaper.
    pub fn copy_from(&mut self, src: &ArenaMap) -> Result<()> {
        let span = debug_span!("arena_map_copy", src_len = src.len(), dst_len = self.len());
        let _guard = span.enter();

        let snapshot = Snapshot {
            arena: self.arena.try_snapshot()?,
            tree: self.tree,
            count: self.count,
            deleted: self.deleted,
        };

        for e in src.iter() {
            match self.add_slot(e.key, e.value, Flags::NONE) {
                Ok((AddOutcome::Added, slot)) => {
                    if let Some(copy) = src.copy {
                        copy(self.arena.value_mut(slot), &e);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(%err, "copy failed; rolling back");
                    self.restore(snapshot);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn restore(&mut self, snapshot: Snapshot) {
        // Entries added since the snapshot are owned by nobody after this.
        if let Some(free) = self.free {
            let mut s = snapshot.arena.end();
            let end = self.arena.end();
            while s.0 < end.0 {
                if !self.arena.is_removed(s) {
                    free(&self.entry(s));
                }
                s = self.arena.next_slot(s);
            }
        }
        self.arena = snapshot.arena;
        self.tree = snapshot.tree;
        self.count = snapshot.count;
        self.deleted = snapshot.deleted;
    }

    /// Duplicate the whole map in one pass, tombstones included.
    ///
    /// The copy hook runs for every live entry of the new map.
    pub fn try_clone(&self) -> Result<Self> {
        let span = debug_span!("arena_map_clone", live = self.count);
        let _guard = span.enter();
        Ok(self.with_arena(self.arena.try_clone()?))
    }

    fn with_arena(&self, mut arena: Arena) -> Self {
        if let Some(copy) = self.copy {
            for e in self.iter() {
                copy(arena.value_mut(Slot(e.id.0)), &e);
            }
        }
        Self {
            cmp: self.cmp,
            copy: self.copy,
            free: self.free,
            count: self.count,
            deleted: self.deleted,
            tree: self.tree,
            arena,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Some entry matching `probe` under `cmp`, which must be compatible with
    /// the map's comparator. Which one is unspecified when several match.
    pub fn get<C>(&self, probe: KeyValue<'_>, cmp: C) -> Option<Entry<'_>>
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering,
    {
        self.tree
            .find(&self.arena, &probe, &cmp)
            .map(|s| self.entry(s))
    }

    /// Step through every entry matching `probe` under `cmp`, in map order.
    ///
    /// Pass `None` to get the first match, then the id of the previous
    /// result to get the next one. Returns `None` once the matches are
    /// exhausted. `cmp` must be compatible with the map's comparator.
    ///
    /// The cursor survives `add` and `del` (including deletion of the
    /// previous entry itself) but not compaction. The next result is the
    /// first live entry strictly after the cursor's bytes in map order, so
    /// if the cursor's entry is deleted and an equal entry added again, the
    /// re-added entry is not visited.
    pub fn get_multiple<C>(&self, prev: Option<EntryId>, probe: KeyValue<'_>, cmp: C) -> Option<Entry<'_>>
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering,
    {
        match prev {
            None => {
                let (found, nb) = self.tree.find_with_neighbors(&self.arena, &probe, &cmp);
                found?;
                nb.first.map(|s| self.entry(s))
            }
            Some(id) => {
                let prev = Slot(id.0);
                if !self.arena.contains(prev) {
                    return None;
                }
                // Tombstones keep their bytes, so a deleted cursor still
                // locates its successor.
                let (_, nb) = self
                    .tree
                    .find_with_neighbors(&self.arena, &elem(&self.arena, prev), &self.cmp);
                let next = nb.next?;
                if cmp(&probe, &elem(&self.arena, next)) == Ordering::Equal {
                    Some(self.entry(next))
                } else {
                    None
                }
            }
        }
    }

    /// Next live entry in arena (insertion) order after `prev`, or the first
    /// one for `None`.
    ///
    /// The order is not sorted. The cursor survives `add` and `del` but not
    /// compaction.
    pub fn iterate(&self, prev: Option<EntryId>) -> Option<Entry<'_>> {
        let start = match prev {
            None => Slot(0),
            Some(id) => {
                let prev = Slot(id.0);
                if !self.arena.contains(prev) {
                    return None;
                }
                self.arena.next_slot(prev)
            }
        };
        self.next_live(start).map(|s| self.entry(s))
    }

    fn next_live(&self, mut s: Slot) -> Option<Slot> {
        let end = self.arena.end();
        while s.0 < end.0 {
            if !self.arena.is_removed(s) {
                return Some(s);
            }
            s = self.arena.next_slot(s);
        }
        None
    }

    /// Live entries in arena order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            map: self,
            next: self.next_live(Slot(0)),
        }
    }

    /// Live entries in the map's sorted order.
    pub fn iter_sorted(&self) -> impl Iterator<Item = Entry<'_>> + '_ {
        self.tree.iter(&self.arena).map(move |s| self.entry(s))
    }

    /// Entries matching `probe` under `cmp`, in sorted order. `cmp` must be
    /// compatible with the map's comparator.
    pub fn range<'a, C>(&'a self, probe: KeyValue<'a>, cmp: C) -> impl Iterator<Item = Entry<'a>> + 'a
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + 'a,
    {
        self.tree
            .range(&self.arena, probe, cmp)
            .map(move |s| self.entry(s))
    }
}

struct Snapshot {
    arena: Arena,
    tree: Tree,
    count: usize,
    deleted: usize,
}

impl Clone for ArenaMap {
    fn clone(&self) -> Self {
        self.with_arena(self.arena.clone())
    }
}

impl Drop for ArenaMap {
    fn drop(&mut self) {
        if let Some(free) = self.free {
            for e in self.iter() {
                free(&e);
            }
        }
    }
}

impl fmt::Debug for ArenaMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter_sorted().map(|e| {
                (
                    String::from_utf8_lossy(e.key()),
                    String::from_utf8_lossy(e.value()),
                )
            }))
            .finish()
    }
}

/// Arena-order iterator returned by [`ArenaMap::iter`].
pub struct Iter<'a> {
    map: &'a ArenaMap,
    next: Option<Slot>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Entry<'a>> {
        let s = self.next?;
        self.next = self.map.next_live(self.map.arena.next_slot(s));
        Some(self.map.entry(s))
    }
}

impl<'a> IntoIterator for &'a ArenaMap {
    type Item = Entry<'a>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
