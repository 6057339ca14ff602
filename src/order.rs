//! Comparators and the rules for mixing them.
//!
//! A map is built with one *native* comparator, which fixes the order of its
//! tree. Lookups and deletions may use a different comparator as long as it
//! is a coarsening of the native one: wherever both report inequality they
//! must agree on the direction, so the only disagreement allowed is the
//! query comparator calling two entries equal. Under that rule every
//! equivalence class of the query comparator is a contiguous run of the
//! native order, which is what makes `get_multiple` and `range` work.
//!
//! | native             | compatible query comparators                      |
//! |--------------------|---------------------------------------------------|
//! | [`keyvalue_folded`] | [`key_folded`], [`key_caseless`]                 |
//! | [`key_folded`]      | [`key_caseless`]                                 |
//! | [`keyvalue_exact`]  | [`key_exact`]                                    |
//! | [`key_exact`]       | itself                                           |
//! | [`key_caseless`]    | itself                                           |
//!
//! Nothing checks the contract at runtime. [`find_incompatibility`] can
//! audit a comparator pair against sample data.

use std::cmp::Ordering;

use crate::entry::KeyValue;

/// Native comparator stored by a map.
pub type CompareFn = fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering;

/// Byte-wise key order. A map built on it rejects duplicate keys.
pub fn key_exact(a: &KeyValue<'_>, b: &KeyValue<'_>) -> Ordering {
    a.key.cmp(b.key)
}

/// Byte-wise order of key, then value. Allows one key with several values.
pub fn keyvalue_exact(a: &KeyValue<'_>, b: &KeyValue<'_>) -> Ordering {
    a.key.cmp(b.key).then_with(|| a.value.cmp(b.value))
}

/// ASCII case-insensitive key order.
pub fn key_caseless(a: &KeyValue<'_>, b: &KeyValue<'_>) -> Ordering {
    fold(a.key).cmp(fold(b.key))
}

/// Case-insensitive key order with a byte-wise tie-break, so case variants
/// of one key are distinct but adjacent.
pub fn key_folded(a: &KeyValue<'_>, b: &KeyValue<'_>) -> Ordering {
    key_caseless(a, b).then_with(|| a.key.cmp(b.key))
}

/// [`key_folded`], then byte-wise value order.
pub fn keyvalue_folded(a: &KeyValue<'_>, b: &KeyValue<'_>) -> Ordering {
    key_folded(a, b).then_with(|| a.value.cmp(b.value))
}

#[inline]
fn fold(bytes: &[u8]) -> impl Iterator<Item = u8> + '_ {
    bytes.iter().map(u8::to_ascii_lowercase)
}

/// Look for a pair of samples on which `coarse` is not a coarsening of
/// `native`, returning their indices.
///
/// Quadratic in the number of samples; meant for tests and debugging.
pub fn find_incompatibility<N, C>(
    native: N,
    coarse: C,
    samples: &[KeyValue<'_>],
) -> Option<(usize, usize)>
where
    N: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering,
    C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering,
{
    for (i, a) in samples.iter().enumerate() {
        for (j, b) in samples.iter().enumerate() {
            let c = coarse(a, b);
            if c != Ordering::Equal && native(a, b) != c {
                return Some((i, j));
            }
        }
    }
    None
}
