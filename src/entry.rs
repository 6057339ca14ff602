//! Borrowed views of map entries.

use std::fmt;

/// A key and value pair as seen by comparators.
///
/// Probes and stored entries share this shape, so a comparator never needs to
/// know which side of the comparison came from the map. A probe for a
/// key-only comparator is built with [`KeyValue::key`] and carries an empty
/// value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyValue<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> KeyValue<'a> {
    #[inline]
    pub fn new(key: &'a [u8], value: &'a [u8]) -> Self {
        Self { key, value }
    }

    /// Probe carrying only a key.
    #[inline]
    pub fn key(key: &'a [u8]) -> Self {
        Self { key, value: &[] }
    }
}

impl fmt::Debug for KeyValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValue")
            .field("key", &String::from_utf8_lossy(self.key))
            .field("value", &String::from_utf8_lossy(self.value))
            .finish()
    }
}

/// Stable handle to an entry's slot in the arena.
///
/// Ids survive `add` and `del` calls, which makes them usable as cursors for
/// [`ArenaMap::iterate`](crate::ArenaMap::iterate) and
/// [`ArenaMap::get_multiple`](crate::ArenaMap::get_multiple). Compaction
/// renumbers every slot; ids obtained before it must not be reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) u32);

impl EntryId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A live entry borrowed from a map.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    pub(crate) id: EntryId,
    pub(crate) key: &'a [u8],
    pub(crate) value: &'a [u8],
}

impl<'a> Entry<'a> {
    #[inline]
    pub fn id(&self) -> EntryId {
        self.id
    }

    #[inline]
    pub fn key(&self) -> &'a [u8] {
        self.key
    }

    #[inline]
    pub fn value(&self) -> &'a [u8] {
        self.value
    }

    #[inline]
    pub fn as_key_value(&self) -> KeyValue<'a> {
        KeyValue::new(self.key, self.value)
    }
}

impl fmt::Debug for Entry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id.0)
            .field("key", &String::from_utf8_lossy(self.key))
            .field("value", &String::from_utf8_lossy(self.value))
            .finish()
    }
}
