//! AVL tree whose nodes live inside arena entries.
//!
//! Every entry header carries two child links and a balance factor
//! (`height(right) - height(left)`, always in `-1..=1`). A node *is* its
//! entry: deleting an internal node moves the in-order successor node into
//! its place rather than moving element references between nodes, so a slot
//! index stays a valid handle for its entry while the entry is live.
//!
//! Insert and remove recurse; depth is bounded by the AVL height. Traversal
//! uses an explicit stack.

use std::cmp::Ordering;

use crate::arena::{Arena, Slot};
use crate::entry::KeyValue;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Dir {
    Left,
    Right,
}

impl Dir {
    #[inline]
    fn flip(self) -> Self {
        match self {
            Dir::Left => Dir::Right,
            Dir::Right => Dir::Left,
        }
    }

    /// Balance change when this side gets taller.
    #[inline]
    fn sign(self) -> i8 {
        match self {
            Dir::Left => -1,
            Dir::Right => 1,
        }
    }
}

#[inline]
pub(crate) fn elem(arena: &Arena, slot: Slot) -> KeyValue<'_> {
    KeyValue::new(arena.key(slot), arena.value(slot))
}

#[inline]
fn child(arena: &Arena, slot: Slot, dir: Dir) -> Slot {
    match dir {
        Dir::Left => arena.left(slot),
        Dir::Right => arena.right(slot),
    }
}

#[inline]
fn set_child(arena: &mut Arena, slot: Slot, dir: Dir, to: Slot) {
    match dir {
        Dir::Left => arena.set_left(slot, to),
        Dir::Right => arena.set_right(slot, to),
    }
}

/// Entries bracketing a probe, collected during one descent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Neighbors {
    /// Greatest entry comparing below the probe
    pub prev: Option<Slot>,
    /// Smallest entry comparing above the probe
    pub next: Option<Slot>,
    /// Leftmost entry comparing equal
    pub first: Option<Slot>,
    /// Rightmost entry comparing equal
    pub last: Option<Slot>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Tree {
    pub root: Slot,
}

impl Default for Tree {
    fn default() -> Self {
        Self { root: Slot::NIL }
    }
}

impl Tree {
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.root.is_nil()
    }

    /// Build a height-balanced tree over `slots`, which must be detached
    /// nodes already sorted in strictly increasing order.
    pub(crate) fn from_sorted(arena: &mut Arena, slots: &[Slot]) -> Self {
        fn build(arena: &mut Arena, slots: &[Slot]) -> (Slot, usize) {
            if slots.is_empty() {
                return (Slot::NIL, 0);
            }
            let mid = slots.len() / 2;
            let (l, lh) = build(arena, &slots[..mid]);
            let (r, rh) = build(arena, &slots[mid + 1..]);
            let t = slots[mid];
            arena.set_left(t, l);
            arena.set_right(t, r);
            arena.set_balance(t, rh as i8 - lh as i8);
            (t, lh.max(rh) + 1)
        }

        let (root, _) = build(arena, slots);
        Self { root }
    }

    /// Any entry comparing equal to `probe`.
    pub(crate) fn find<C>(&self, arena: &Arena, probe: &KeyValue<'_>, cmp: &C) -> Option<Slot>
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + ?Sized,
    {
        let mut t = self.root;
        while !t.is_nil() {
            match cmp(probe, &elem(arena, t)) {
                Ordering::Equal => return Some(t),
                Ordering::Less => t = arena.left(t),
                Ordering::Greater => t = arena.right(t),
            }
        }
        None
    }

    /// Like [`Tree::find`], also reporting the strict predecessor and
    /// successor of the probe and, on a match, the leftmost and rightmost
    /// matching entries.
    ///
    /// The boundary scans assume `cmp` is compatible with the tree order.
    pub(crate) fn find_with_neighbors<C>(
        &self,
        arena: &Arena,
        probe: &KeyValue<'_>,
        cmp: &C,
    ) -> (Option<Slot>, Neighbors)
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + ?Sized,
    {
        let mut nb = Neighbors::default();
        let mut t = self.root;
        while !t.is_nil() {
            match cmp(probe, &elem(arena, t)) {
                Ordering::Less => {
                    nb.next = Some(t);
                    t = arena.left(t);
                }
                Ordering::Greater => {
                    nb.prev = Some(t);
                    t = arena.right(t);
                }
                Ordering::Equal => {
                    nb.first = Some(t);
                    nb.last = Some(t);

                    let mut n = arena.left(t);
                    while !n.is_nil() {
                        if cmp(probe, &elem(arena, n)) == Ordering::Equal {
                            nb.first = Some(n);
                            n = arena.left(n);
                        } else {
                            nb.prev = Some(n);
                            n = arena.right(n);
                        }
                    }

                    let mut n = arena.right(t);
                    while !n.is_nil() {
                        if cmp(probe, &elem(arena, n)) == Ordering::Equal {
                            nb.last = Some(n);
                            n = arena.right(n);
                        } else {
                            nb.next = Some(n);
                            n = arena.left(n);
                        }
                    }
                    return (Some(t), nb);
                }
            }
        }
        (None, nb)
    }

    /// Link the detached node `new` into the tree.
    ///
    /// If an entry comparing equal already exists it is returned as `Err`
    /// and the tree is left untouched.
    pub(crate) fn insert<C>(&mut self, arena: &mut Arena, new: Slot, cmp: &C) -> Result<(), Slot>
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + ?Sized,
    {
        debug_assert!(arena.left(new).is_nil() && arena.right(new).is_nil());
        debug_assert_eq!(arena.balance(new), 0);
        let (root, _) = insert_rec(arena, self.root, new, cmp)?;
        self.root = root;
        Ok(())
    }

    /// Unlink the node at `target`, locating it with the tree's own order.
    ///
    /// Returns false if `target` is not reachable.
    pub(crate) fn remove<C>(&mut self, arena: &mut Arena, target: Slot, cmp: &C) -> bool
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + ?Sized,
    {
        match remove_rec(arena, self.root, target, cmp) {
            Some((root, _)) => {
                self.root = root;
                arena.set_left(target, Slot::NIL);
                arena.set_right(target, Slot::NIL);
                arena.set_balance(target, 0);
                true
            }
            None => false,
        }
    }

    /// In-order walk over the whole tree.
    pub(crate) fn iter<'a>(&self, arena: &'a Arena) -> InOrder<'a, impl FnMut(&KeyValue<'_>) -> Ordering> {
        InOrder::new(arena, self.root, |_: &KeyValue<'_>| Ordering::Equal)
    }

    /// In-order walk restricted to entries where `cmp(probe, entry)` is
    /// `Equal`.
    pub(crate) fn range<'a, C>(
        &self,
        arena: &'a Arena,
        probe: KeyValue<'a>,
        cmp: C,
    ) -> InOrder<'a, impl FnMut(&KeyValue<'_>) -> Ordering + 'a>
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + 'a,
    {
        InOrder::new(arena, self.root, move |e: &KeyValue<'_>| cmp(&probe, e))
    }
}

fn insert_rec<C>(arena: &mut Arena, t: Slot, new: Slot, cmp: &C) -> Result<(Slot, bool), Slot>
where
    C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + ?Sized,
{
    if t.is_nil() {
        return Ok((new, true));
    }
    let dir = match cmp(&elem(arena, new), &elem(arena, t)) {
        Ordering::Equal => return Err(t),
        Ordering::Less => Dir::Left,
        Ordering::Greater => Dir::Right,
    };
    let (c, grew) = insert_rec(arena, child(arena, t, dir), new, cmp)?;
    set_child(arena, t, dir, c);
    if grew {
        Ok(grown(arena, t, dir))
    } else {
        Ok((t, false))
    }
}

/// Returns `(new subtree root, subtree got shorter)`, or `None` when
/// `target` is not in the subtree.
fn remove_rec<C>(arena: &mut Arena, t: Slot, target: Slot, cmp: &C) -> Option<(Slot, bool)>
where
    C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + ?Sized,
{
    if t.is_nil() {
        return None;
    }
    if t == target {
        let l = arena.left(t);
        let r = arena.right(t);
        if l.is_nil() {
            return Some((r, true));
        }
        if r.is_nil() {
            return Some((l, true));
        }
        let (r, shrank, succ) = remove_min(arena, r);
        arena.set_left(succ, l);
        arena.set_right(succ, r);
        arena.set_balance(succ, arena.balance(t));
        return Some(if shrank {
            shrunk(arena, succ, Dir::Right)
        } else {
            (succ, false)
        });
    }

    let dir = match cmp(&elem(arena, target), &elem(arena, t)) {
        Ordering::Less => Dir::Left,
        Ordering::Greater => Dir::Right,
        Ordering::Equal => return None,
    };
    let (c, shrank) = remove_rec(arena, child(arena, t, dir), target, cmp)?;
    set_child(arena, t, dir, c);
    Some(if shrank { shrunk(arena, t, dir) } else { (t, false) })
}

/// Detach the leftmost node of a non-empty subtree.
///
/// Returns `(new subtree root, subtree got shorter, detached node)`.
fn remove_min(arena: &mut Arena, t: Slot) -> (Slot, bool, Slot) {
    let l = arena.left(t);
    if l.is_nil() {
        return (arena.right(t), true, t);
    }
    let (l, shrank, min) = remove_min(arena, l);
    arena.set_left(t, l);
    if shrank {
        let (root, shorter) = shrunk(arena, t, Dir::Left);
        (root, shorter, min)
    } else {
        (t, false, min)
    }
}

/// Side `dir` of `t` got taller. Returns `(new root, subtree got taller)`.
fn grown(arena: &mut Arena, t: Slot, dir: Dir) -> (Slot, bool) {
    let bal = arena.balance(t) + dir.sign();
    match bal {
        0 => {
            arena.set_balance(t, 0);
            (t, false)
        }
        -1 | 1 => {
            arena.set_balance(t, bal);
            (t, true)
        }
        _ => {
            let c = child(arena, t, dir);
            let root = if arena.balance(c) == dir.sign() {
                rotate_single(arena, t, dir)
            } else {
                rotate_double(arena, t, dir)
            };
            (root, false)
        }
    }
}

/// Side `dir` of `t` got shorter. Returns `(new root, subtree got shorter)`.
fn shrunk(arena: &mut Arena, t: Slot, dir: Dir) -> (Slot, bool) {
    let bal = arena.balance(t) - dir.sign();
    match bal {
        0 => {
            arena.set_balance(t, 0);
            (t, true)
        }
        -1 | 1 => {
            arena.set_balance(t, bal);
            (t, false)
        }
        _ => {
            let heavy = dir.flip();
            let c = child(arena, t, heavy);
            let bc = arena.balance(c);
            if bc == -heavy.sign() {
                (rotate_double(arena, t, heavy), true)
            } else if bc == 0 {
                (rotate_single(arena, t, heavy), false)
            } else {
                (rotate_single(arena, t, heavy), true)
            }
        }
    }
}

/// Rotate `t` away from its overweight side `dir`; the child on that side
/// becomes the subtree root.
fn rotate_single(arena: &mut Arena, t: Slot, dir: Dir) -> Slot {
    let c = child(arena, t, dir);
    let inner = child(arena, c, dir.flip());
    set_child(arena, t, dir, inner);
    set_child(arena, c, dir.flip(), t);

    let s = dir.sign();
    if arena.balance(c) == s {
        arena.set_balance(t, 0);
        arena.set_balance(c, 0);
    } else {
        // Only reachable on removal: the subtree keeps its height.
        arena.set_balance(t, s);
        arena.set_balance(c, -s);
    }
    c
}

/// Double rotation for a `dir`-heavy `t` whose child leans the other way;
/// the grandchild becomes the subtree root.
fn rotate_double(arena: &mut Arena, t: Slot, dir: Dir) -> Slot {
    let c = child(arena, t, dir);
    let g = child(arena, c, dir.flip());
    let g_outer = child(arena, g, dir);
    let g_inner = child(arena, g, dir.flip());

    set_child(arena, c, dir.flip(), g_outer);
    set_child(arena, t, dir, g_inner);
    set_child(arena, g, dir, c);
    set_child(arena, g, dir.flip(), t);

    let s = dir.sign();
    let bg = arena.balance(g);
    arena.set_balance(t, if bg == s { -s } else { 0 });
    arena.set_balance(c, if bg == -s { s } else { 0 });
    arena.set_balance(g, 0);
    g
}

/// In-order iterator with range pruning.
///
/// `prune` places an entry relative to the wanted range: `Less` means the
/// entry lies above it, `Greater` below, `Equal` inside.
pub(crate) struct InOrder<'a, P> {
    arena: &'a Arena,
    stack: Vec<Slot>,
    prune: P,
}

impl<'a, P> InOrder<'a, P>
where
    P: FnMut(&KeyValue<'_>) -> Ordering,
{
    fn new(arena: &'a Arena, root: Slot, prune: P) -> Self {
        let mut it = Self {
            arena,
            stack: Vec::new(),
            prune,
        };
        it.descend(root);
        it
    }

    fn descend(&mut self, mut n: Slot) {
        while !n.is_nil() {
            match (self.prune)(&elem(self.arena, n)) {
                Ordering::Less => n = self.arena.left(n),
                Ordering::Greater => n = self.arena.right(n),
                Ordering::Equal => {
                    self.stack.push(n);
                    n = self.arena.left(n);
                }
            }
        }
    }
}

impl<'a, P> Iterator for InOrder<'a, P>
where
    P: FnMut(&KeyValue<'_>) -> Ordering,
{
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let n = self.stack.pop()?;
        self.descend(self.arena.right(n));
        Some(n)
    }
}

/// Check the AVL and ordering invariants below `root`, returning
/// `(node count, height)`.
#[cfg(test)]
pub(crate) fn check_subtree<C>(arena: &Arena, root: Slot, cmp: &C) -> (usize, usize)
where
    C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + ?Sized,
{
    fn rec<C>(arena: &Arena, t: Slot, cmp: &C) -> (usize, usize)
    where
        C: Fn(&KeyValue<'_>, &KeyValue<'_>) -> Ordering + ?Sized,
    {
        if t.is_nil() {
            return (0, 0);
        }
        assert!(!arena.is_removed(t), "tombstoned entry reachable from the tree");
        let (ln, lh) = rec(arena, arena.left(t), cmp);
        let (rn, rh) = rec(arena, arena.right(t), cmp);
        let bal = rh as isize - lh as isize;
        assert_eq!(
            arena.balance(t) as isize,
            bal,
            "stored balance must match subtree heights"
        );
        (ln + rn + 1, lh.max(rh) + 1)
    }

    let (n, h) = rec(arena, root, cmp);
    let order: Vec<Slot> = InOrder::new(arena, root, |_: &KeyValue<'_>| Ordering::Equal).collect();
    assert_eq!(order.len(), n);
    for w in order.windows(2) {
        assert_eq!(
            cmp(&elem(arena, w[0]), &elem(arena, w[1])),
            Ordering::Less,
            "in-order walk must be strictly increasing"
        );
    }
    (n, h)
}
