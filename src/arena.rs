//! Entry arena: one growable byte buffer holding every entry of a map.
//!
//! Each entry occupies a run of 8-byte slot units. The run starts with the
//! entry's embedded tree node and is followed by the raw key and value bytes:
//!
//! ```text
//! [left:4][right:4][key_len:4][value_len:4][balance:1][state:1][reserved:6][key..][value..][pad]
//! ```
//!
//! Entries and tree links are addressed by slot index, never by address, so
//! growing the buffer is a plain vector extension and nothing needs patching.

use tracing::trace;

use crate::error::{MapError, Result};

pub(crate) const SLOT_SIZE: usize = 8;
pub(crate) const HEADER_SIZE: usize = 24;

/// Largest arena whose slot indices and entry lengths fit the `u32` header
/// fields.
pub(crate) const MAX_ARENA_BYTES: usize = u32::MAX as usize;

const OFF_LEFT: usize = 0;
const OFF_RIGHT: usize = 4;
const OFF_KEY_LEN: usize = 8;
const OFF_VALUE_LEN: usize = 12;
const OFF_BALANCE: usize = 16;
const OFF_STATE: usize = 17;

const STATE_LIVE: u8 = 1;
const STATE_REMOVED: u8 = 2;

// =============================================================================
// Slot reference
// =============================================================================

/// Index of the first slot unit of an entry. `NIL` marks an absent child.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Slot(pub(crate) u32);

impl Slot {
    pub(crate) const NIL: Slot = Slot(u32::MAX);

    #[inline]
    pub(crate) fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        debug_assert!(!self.is_nil());
        self.0 as usize
    }

    #[inline]
    fn byte_off(self) -> usize {
        self.index() * SLOT_SIZE
    }
}

/// Slot units needed by one entry.
#[inline]
pub(crate) fn entry_units(key_len: usize, value_len: usize) -> usize {
    (HEADER_SIZE + key_len + value_len).div_ceil(SLOT_SIZE)
}

// =============================================================================
// Arena
// =============================================================================

#[derive(Clone)]
pub(crate) struct Arena {
    data: Vec<u8>,
    max_bytes: usize,
}

impl Arena {
    pub(crate) fn new(max_bytes: usize) -> Self {
        Self {
            data: Vec::new(),
            max_bytes: max_bytes.min(MAX_ARENA_BYTES),
        }
    }

    pub(crate) fn with_capacity(initial_bytes: usize, max_bytes: usize) -> Result<Self> {
        let mut arena = Self::new(max_bytes);
        let initial = initial_bytes.min(arena.max_bytes);
        arena.data.try_reserve_exact(initial)?;
        Ok(arena)
    }

    pub(crate) fn try_clone(&self) -> Result<Self> {
        self.try_clone_reserving(self.data.len())
    }

    /// Copy of the arena that also keeps its spare capacity, so swapping it
    /// back in restores `capacity_bytes` as well as the contents.
    pub(crate) fn try_snapshot(&self) -> Result<Self> {
        self.try_clone_reserving(self.data.capacity())
    }

    fn try_clone_reserving(&self, bytes: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)?;
        data.extend_from_slice(&self.data);
        Ok(Self {
            data,
            max_bytes: self.max_bytes,
        })
    }

    #[inline]
    pub(crate) fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// First unused slot unit (the `next` cursor).
    #[inline]
    pub(crate) fn end(&self) -> Slot {
        Slot((self.data.len() / SLOT_SIZE) as u32)
    }

    #[inline]
    pub(crate) fn len_bytes(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub(crate) fn capacity_bytes(&self) -> usize {
        self.data.capacity()
    }

    pub(crate) fn shrink_to_fit(&mut self) {
        self.data.shrink_to_fit();
    }

    /// Make room for `extra_entries` more entries carrying `extra_bytes` of
    /// key and value data in total.
    ///
    /// Returns the number of slot units the caller may now consume. Fails
    /// without touching the arena when the result would pass the ceiling or
    /// the allocator refuses. Capacity grows by doubling, capped at the
    /// ceiling.
    pub(crate) fn reserve(&mut self, extra_entries: usize, extra_bytes: usize) -> Result<usize> {
        let per_entry = (HEADER_SIZE + SLOT_SIZE - 1) as u64;
        let advance = (extra_entries as u64)
            .checked_mul(per_entry)
            .and_then(|n| n.checked_add(extra_bytes as u64))
            .map(|n| n / SLOT_SIZE as u64)
            .ok_or_else(|| MapError::capacity(u64::MAX, self.max_bytes))?;

        let required = advance
            .checked_mul(SLOT_SIZE as u64)
            .and_then(|n| n.checked_add(self.data.len() as u64))
            .ok_or_else(|| MapError::capacity(u64::MAX, self.max_bytes))?;
        if required > self.max_bytes as u64 {
            return Err(MapError::capacity(required, self.max_bytes));
        }

        let required = required as usize;
        let old_cap = self.data.capacity();
        if required > old_cap {
            let new_cap = old_cap.saturating_mul(2).max(required).min(self.max_bytes);
            self.data.try_reserve_exact(new_cap - self.data.len())?;
            trace!(old_cap, new_cap = self.data.capacity(), "arena grew");
        }

        Ok(advance as usize)
    }

    /// Append a live entry with detached node links.
    ///
    /// The caller is expected to have reserved room for it.
    pub(crate) fn push(&mut self, key: &[u8], value: &[u8]) -> Slot {
        let slot = self.end();
        let start = self.data.len();
        let units = entry_units(key.len(), value.len());
        debug_assert!(start + units * SLOT_SIZE <= self.data.capacity());

        self.data.resize(start + units * SLOT_SIZE, 0);
        self.write_u32(start + OFF_LEFT, Slot::NIL.0);
        self.write_u32(start + OFF_RIGHT, Slot::NIL.0);
        self.write_u32(start + OFF_KEY_LEN, key.len() as u32);
        self.write_u32(start + OFF_VALUE_LEN, value.len() as u32);
        self.data[start + OFF_BALANCE] = 0;
        self.data[start + OFF_STATE] = STATE_LIVE;

        let key_at = start + HEADER_SIZE;
        self.data[key_at..key_at + key.len()].copy_from_slice(key);
        let value_at = key_at + key.len();
        self.data[value_at..value_at + value.len()].copy_from_slice(value);

        slot
    }

    /// Drop `slot` and everything after it.
    pub(crate) fn truncate(&mut self, slot: Slot) {
        self.data.truncate(slot.byte_off());
    }

    /// Whether `slot` is the start of an entry inside the used region.
    #[inline]
    pub(crate) fn contains(&self, slot: Slot) -> bool {
        !slot.is_nil() && slot.0 < self.end().0
    }

    // =========================================================================
    // Header access
    // =========================================================================

    #[inline]
    fn read_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes([
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ])
    }

    #[inline]
    fn write_u32(&mut self, at: usize, v: u32) {
        self.data[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub(crate) fn left(&self, slot: Slot) -> Slot {
        Slot(self.read_u32(slot.byte_off() + OFF_LEFT))
    }

    #[inline]
    pub(crate) fn right(&self, slot: Slot) -> Slot {
        Slot(self.read_u32(slot.byte_off() + OFF_RIGHT))
    }

    #[inline]
    pub(crate) fn set_left(&mut self, slot: Slot, child: Slot) {
        self.write_u32(slot.byte_off() + OFF_LEFT, child.0);
    }

    #[inline]
    pub(crate) fn set_right(&mut self, slot: Slot, child: Slot) {
        self.write_u32(slot.byte_off() + OFF_RIGHT, child.0);
    }

    #[inline]
    pub(crate) fn balance(&self, slot: Slot) -> i8 {
        self.data[slot.byte_off() + OFF_BALANCE] as i8
    }

    #[inline]
    pub(crate) fn set_balance(&mut self, slot: Slot, balance: i8) {
        debug_assert!((-1..=1).contains(&balance));
        self.data[slot.byte_off() + OFF_BALANCE] = balance as u8;
    }

    #[inline]
    pub(crate) fn is_removed(&self, slot: Slot) -> bool {
        self.data[slot.byte_off() + OFF_STATE] == STATE_REMOVED
    }

    #[inline]
    pub(crate) fn mark_removed(&mut self, slot: Slot) {
        debug_assert!(!self.is_removed(slot));
        let o = slot.byte_off();
        self.data[o + OFF_STATE] = STATE_REMOVED;
        self.write_u32(o + OFF_LEFT, Slot::NIL.0);
        self.write_u32(o + OFF_RIGHT, Slot::NIL.0);
        self.data[o + OFF_BALANCE] = 0;
    }

    #[inline]
    fn lens(&self, slot: Slot) -> (usize, usize) {
        let o = slot.byte_off();
        (
            self.read_u32(o + OFF_KEY_LEN) as usize,
            self.read_u32(o + OFF_VALUE_LEN) as usize,
        )
    }

    /// Slot units occupied by the entry at `slot`.
    #[inline]
    pub(crate) fn units(&self, slot: Slot) -> usize {
        let (k, v) = self.lens(slot);
        entry_units(k, v)
    }

    /// Slot right after the entry at `slot`.
    #[inline]
    pub(crate) fn next_slot(&self, slot: Slot) -> Slot {
        Slot(slot.0 + self.units(slot) as u32)
    }

    #[inline]
    pub(crate) fn key(&self, slot: Slot) -> &[u8] {
        let (k, _) = self.lens(slot);
        let at = slot.byte_off() + HEADER_SIZE;
        &self.data[at..at + k]
    }

    #[inline]
    pub(crate) fn value(&self, slot: Slot) -> &[u8] {
        let (k, v) = self.lens(slot);
        let at = slot.byte_off() + HEADER_SIZE + k;
        &self.data[at..at + v]
    }

    #[inline]
    pub(crate) fn value_mut(&mut self, slot: Slot) -> &mut [u8] {
        let (k, v) = self.lens(slot);
        let at = slot.byte_off() + HEADER_SIZE + k;
        &mut self.data[at..at + v]
    }
}
