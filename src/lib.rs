//! # arenamap
//!
//! An ordered map of binary keys and values: an AVL tree whose nodes are
//! embedded in the entries of a single growable byte arena.
//!
//! - Keys and values are arbitrary byte strings with explicit lengths
//! - One arena allocation for all entries, growing by doubling
//! - Tree links are slot indices, so growth never rewrites them
//! - Deletion leaves tombstones, reclaimed by compaction
//! - Lookups may use any comparator compatible with the map's own order,
//!   e.g. case-insensitive queries over a case-sensitive map
//!
//! ## Example
//!
//! ```rust
//! use arenamap::{order, AddOutcome, ArenaMap, Flags, KeyValue};
//!
//! let mut map = ArenaMap::new(order::key_folded);
//! assert_eq!(map.add(b"Foo", b"1", Flags::NONE).unwrap(), AddOutcome::Added);
//! assert_eq!(map.add(b"foo", b"2", Flags::NONE).unwrap(), AddOutcome::Added);
//! assert_eq!(map.add(b"foo", b"3", Flags::NONE).unwrap(), AddOutcome::AlreadyPresent);
//!
//! // Exact lookup.
//! let e = map.get(KeyValue::key(b"foo"), order::key_folded).unwrap();
//! assert_eq!(e.value(), b"2");
//!
//! // Every case variant of "FOO".
//! let mut values = Vec::new();
//! let mut cur = None;
//! while let Some(e) = map.get_multiple(cur, KeyValue::key(b"FOO"), order::key_caseless) {
//!     values.push(e.value().to_vec());
//!     cur = Some(e.id());
//! }
//! assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
//! ```

#![deny(unsafe_code)]

mod arena;
mod config;
mod entry;
mod error;
mod map;
pub mod order;
mod tree;

pub use config::{CopyFn, FreeFn, MapConfig};
pub use entry::{Entry, EntryId, KeyValue};
pub use error::{MapError, Result};
pub use map::{AddOutcome, ArenaMap, Flags, Iter};
pub use order::CompareFn;

#[cfg(test)]
mod proptests;
