use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use crate::arena::Slot;
use crate::order::{key_caseless, key_exact, key_folded, keyvalue_exact};
use crate::tree::check_subtree;
use crate::{AddOutcome, ArenaMap, Flags, KeyValue};

/// Check the tree shape and the live/tombstone bookkeeping of `m`.
pub(crate) fn validate_map(m: &ArenaMap) {
    let (reachable, height) = check_subtree(&m.arena, m.tree.root, &m.cmp);
    assert_eq!(reachable, m.count, "reachable entries must match ArenaMap::len");

    // AVL height bound.
    let bound = 1.4405 * ((reachable + 2) as f64).log2() - 0.3277;
    assert!((height as f64) < bound, "height {height} too large for {reachable} entries");

    let mut live = 0usize;
    let mut removed = 0usize;
    let end = m.arena.end();
    let mut s = Slot(0);
    while s.0 < end.0 {
        if m.arena.is_removed(s) {
            removed += 1;
        } else {
            live += 1;
        }
        s = m.arena.next_slot(s);
    }
    assert_eq!(s, end, "entries must tile the arena exactly");
    assert_eq!(live, m.count, "live entries in the arena must match ArenaMap::len");
    assert_eq!(removed, m.deleted, "tombstones must match ArenaMap::deleted");
    assert_eq!(m.iter().count(), m.count);
}

#[derive(Clone, Debug)]
enum Op {
    Add(Vec<u8>, Vec<u8>),
    AddReplace(Vec<u8>, Vec<u8>, bool),
    Del(Vec<u8>, bool),
    Get(Vec<u8>),
    Compact,
}

fn short_bytes() -> impl Strategy<Value = Vec<u8>> + Clone {
    // Small alphabet and lengths so keys collide often.
    prop::collection::vec(prop::sample::select(vec![0u8, b'a', b'b', b'A', 0xff]), 0..=4)
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = short_bytes();
    let value = prop::collection::vec(any::<u8>(), 0..=12);
    let op = prop_oneof![
        40 => (key.clone(), value.clone()).prop_map(|(k, v)| Op::Add(k, v)),
        10 => (key.clone(), value, any::<bool>()).prop_map(|(k, v, r)| Op::AddReplace(k, v, r)),
        25 => (key.clone(), any::<bool>()).prop_map(|(k, r)| Op::Del(k, r)),
        24 => key.prop_map(Op::Get),
        1 => Just(Op::Compact),
    ];
    prop::collection::vec(op, 0..=600)
}

fn values_for(m: &ArenaMap, key: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut cur = None;
    while let Some(e) = m.get_multiple(cur, KeyValue::key(key), key_exact) {
        out.push(e.value().to_vec());
        cur = Some(e.id());
    }
    out
}

fn ci_key() -> impl Strategy<Value = Vec<u8>> + Clone {
    prop::collection::vec(prop::sample::select(b"aAbB[_".to_vec()), 0..=3)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_unique_keys(ops in ops_strategy()) {
        let mut t = ArenaMap::new(key_exact);
        let mut m: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Add(key, value) => {
                    let got = t.add(&key, &value, Flags::NONE).unwrap();
                    let want = if m.contains_key(&key) {
                        AddOutcome::AlreadyPresent
                    } else {
                        m.insert(key, value);
                        AddOutcome::Added
                    };
                    prop_assert_eq!(got, want);
                }
                Op::AddReplace(key, value, rebuild) => {
                    let flags = if rebuild { Flags::REPLACE | Flags::ALLOW_REBUILD } else { Flags::REPLACE };
                    let got = t.add(&key, &value, flags).unwrap();
                    let want = match m.insert(key, value) {
                        Some(_) => AddOutcome::Replaced,
                        None => AddOutcome::Added,
                    };
                    prop_assert_eq!(got, want);
                    if rebuild && got == AddOutcome::Replaced {
                        prop_assert!(t.deleted() <= t.len());
                    }
                }
                Op::Del(key, rebuild) => {
                    let flags = if rebuild { Flags::ALLOW_REBUILD } else { Flags::NONE };
                    let got = t.del(KeyValue::key(&key), key_exact, flags);
                    prop_assert_eq!(got, m.remove(&key).is_some());
                    if rebuild && got {
                        prop_assert!(t.deleted() <= t.len());
                    }
                }
                Op::Get(key) => {
                    let got = t.get(KeyValue::key(&key), key_exact).map(|e| e.value().to_vec());
                    prop_assert_eq!(got.as_ref(), m.get(&key));
                }
                Op::Compact => {
                    let deleted = t.deleted();
                    prop_assert_eq!(t.compact().unwrap(), deleted);
                    prop_assert_eq!(t.deleted(), 0);
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_map(&t);
        let got: Vec<(Vec<u8>, Vec<u8>)> =
            t.iter_sorted().map(|e| (e.key().to_vec(), e.value().to_vec())).collect();
        let expected: Vec<(Vec<u8>, Vec<u8>)> =
            m.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_equivalence_multi_values(ops in ops_strategy()) {
        let mut t = ArenaMap::new(keyvalue_exact);
        let mut m: BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Add(key, value) | Op::AddReplace(key, value, _) => {
                    let got = t.add(&key, &value, Flags::NONE).unwrap();
                    let fresh = m.entry(key).or_default().insert(value);
                    let want = if fresh { AddOutcome::Added } else { AddOutcome::AlreadyPresent };
                    prop_assert_eq!(got, want);
                }
                Op::Del(key, rebuild) => {
                    let flags = if rebuild { Flags::ALLOW_REBUILD } else { Flags::NONE };
                    let before = m.get(&key).cloned().unwrap_or_default();
                    let got = t.del(KeyValue::key(&key), key_exact, flags);
                    prop_assert_eq!(got, !before.is_empty());

                    // Which value goes is unspecified; exactly one must.
                    let after: BTreeSet<Vec<u8>> = values_for(&t, &key).into_iter().collect();
                    prop_assert!(after.is_subset(&before));
                    prop_assert_eq!(after.len() + usize::from(got), before.len());
                    if after.is_empty() {
                        m.remove(&key);
                    } else {
                        m.insert(key, after);
                    }
                }
                Op::Get(key) => {
                    let want: Vec<Vec<u8>> =
                        m.get(&key).map(|s| s.iter().cloned().collect()).unwrap_or_default();
                    prop_assert_eq!(values_for(&t, &key), want);
                }
                Op::Compact => {
                    t.compact().unwrap();
                }
            }

            prop_assert_eq!(t.len(), m.values().map(BTreeSet::len).sum::<usize>());
        }

        validate_map(&t);
    }

    #[test]
    fn prop_caseless_queries_visit_whole_class(
        keys in prop::collection::vec(ci_key(), 0..=64),
        probes in prop::collection::vec(ci_key(), 1..=16),
    ) {
        let mut t = ArenaMap::new(key_folded);
        let mut model: Vec<Vec<u8>> = Vec::new();
        for k in &keys {
            if t.add(k, b"", Flags::NONE).unwrap() == AddOutcome::Added {
                model.push(k.clone());
            }
        }
        model.sort_by(|a, b| key_folded(&KeyValue::key(a), &KeyValue::key(b)));
        validate_map(&t);

        for probe in probes {
            let want: Vec<Vec<u8>> = model
                .iter()
                .filter(|k| k.eq_ignore_ascii_case(&probe))
                .cloned()
                .collect();

            let mut got = Vec::new();
            let mut cur = None;
            while let Some(e) = t.get_multiple(cur, KeyValue::key(&probe), key_caseless) {
                got.push(e.key().to_vec());
                cur = Some(e.id());
            }
            prop_assert_eq!(&got, &want);

            let ranged: Vec<Vec<u8>> =
                t.range(KeyValue::key(&probe), key_caseless).map(|e| e.key().to_vec()).collect();
            prop_assert_eq!(&ranged, &want);

            let hit = t.get(KeyValue::key(&probe), key_caseless).map(|e| e.key().to_vec());
            prop_assert_eq!(hit.is_some(), !want.is_empty());
            if let Some(k) = hit {
                prop_assert!(k.eq_ignore_ascii_case(&probe));
            }
        }
    }

    /// Byte order and caseless order disagree around `[` and `_`, so caseless
    /// queries over a byte-ordered map are not supported. They must still be
    /// memory safe, terminate, and only ever return real matches.
    #[test]
    fn prop_incompatible_query_is_safe(
        keys in prop::collection::vec(ci_key(), 0..=64),
        probes in prop::collection::vec(ci_key(), 1..=16),
    ) {
        let mut t = ArenaMap::new(key_exact);
        for k in &keys {
            t.add(k, b"", Flags::NONE).unwrap();
        }

        for probe in probes {
            if let Some(e) = t.get(KeyValue::key(&probe), key_caseless) {
                prop_assert!(e.key().eq_ignore_ascii_case(&probe));
            }

            let mut steps = 0usize;
            let mut cur = None;
            while let Some(e) = t.get_multiple(cur, KeyValue::key(&probe), key_caseless) {
                prop_assert!(e.key().eq_ignore_ascii_case(&probe));
                steps += 1;
                prop_assert!(steps <= t.len());
                cur = Some(e.id());
            }

            if t.del(KeyValue::key(&probe), key_caseless, Flags::NONE) {
                validate_map(&t);
            }
        }
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_set() -> Vec<Vec<u8>> {
    vec![
        b"a".to_vec(),
        b"b".to_vec(),
        b"c".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"ba".to_vec(),
    ]
}

#[test]
fn exhaustive_insert_order_small_set() {
    for_each_permutation(&small_set(), |perm| {
        let mut t = ArenaMap::new(key_exact);
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = (i as u64).to_be_bytes();
            assert_eq!(t.add(&k, &v, Flags::NONE).unwrap(), AddOutcome::Added);
            m.insert(k, i as u64);
        }

        validate_map(&t);
        let got: Vec<(Vec<u8>, u64)> = t
            .iter_sorted()
            .map(|e| {
                let mut v = [0u8; 8];
                v.copy_from_slice(e.value());
                (e.key().to_vec(), u64::from_be_bytes(v))
            })
            .collect();
        let expected: Vec<(Vec<u8>, u64)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys = small_set();

    // Insert in a fixed order, then remove in all permutations.
    let mut base = ArenaMap::new(key_exact);
    for k in &keys {
        base.add(k, k, Flags::NONE).unwrap();
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base.clone();
        let mut left: BTreeSet<Vec<u8>> = keys.iter().cloned().collect();

        for k in perm {
            assert!(t.del(KeyValue::key(&k), key_exact, Flags::NONE));
            assert!(!t.del(KeyValue::key(&k), key_exact, Flags::NONE));
            left.remove(&k);
            assert_eq!(t.len(), left.len());
            validate_map(&t);
            for rest in &left {
                assert_eq!(t.get(KeyValue::key(rest), key_exact).unwrap().value(), &rest[..]);
            }
        }
        assert!(t.is_empty());
        assert!(t.tree.is_empty());
        assert_eq!(t.compact().unwrap(), keys.len());
    });
}

#[test]
fn exhaustive_remove_order_with_rebuild() {
    let keys = small_set();
    for_each_permutation(&keys, |perm| {
        let mut t = ArenaMap::new(keyvalue_exact);
        for k in &keys {
            t.add(k, b"1", Flags::NONE).unwrap();
            t.add(k, b"2", Flags::NONE).unwrap();
        }
        for k in perm {
            assert!(t.del(KeyValue::new(&k, b"2"), keyvalue_exact, Flags::ALLOW_REBUILD));
            assert!(t.deleted() <= t.len());
            validate_map(&t);
        }
        let ones: Vec<&[u8]> = t.iter_sorted().map(|e| e.value()).collect();
        assert_eq!(ones, vec![&b"1"[..]; keys.len()]);
        assert!(t
            .iter_sorted()
            .zip(t.iter_sorted().skip(1))
            .all(|(a, b)| keyvalue_exact(&a.as_key_value(), &b.as_key_value()) == Ordering::Less));
    });
}
