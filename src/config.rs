//! Construction-time settings for [`ArenaMap`](crate::ArenaMap).

use crate::arena::MAX_ARENA_BYTES;
use crate::entry::Entry;

/// Called after an entry's bytes were duplicated into another map.
///
/// Receives the destination value bytes (already a byte copy of the source)
/// and the source entry. Used by `copy_from` and `clone`.
pub type CopyFn = fn(dst_value: &mut [u8], src: &Entry<'_>);

/// Called once for every entry the map stops owning: on deletion and when
/// the map is dropped.
pub type FreeFn = fn(entry: &Entry<'_>);

/// Configuration for an [`ArenaMap`](crate::ArenaMap).
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Arena bytes to reserve up front
    pub initial_bytes: usize,
    /// Hard ceiling on arena size; growth beyond it fails without mutating
    pub max_bytes: usize,
    /// Entry copy hook
    pub copy: Option<CopyFn>,
    /// Entry release hook
    pub free: Option<FreeFn>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            initial_bytes: 0,
            max_bytes: i32::MAX as usize,
            copy: None,
            free: None,
        }
    }
}

impl MapConfig {
    /// The ceiling actually enforced: `max_bytes` clamped to what slot
    /// indices can address.
    pub fn effective_max_bytes(&self) -> usize {
        self.max_bytes.min(MAX_ARENA_BYTES)
    }
}
