// Copyright 2026 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! A Robin Hood open-addressed hash table with incremental rehashing.
//!
//! [`HashMap`] maps variable-length byte-string keys to values. It
//! differs from [`std::collections::HashMap`] in ways that matter to
//! the server:
//!
//! * Keys compare either exactly or ASCII-case-insensitively,
//!   selected per map with [`Case`]. DNS names are compared without
//!   regard to ASCII case, so the latter mode avoids allocating
//!   lowercased copies of every key at each lookup.
//! * Resizing is *incremental*: when the table grows or shrinks, a
//!   second table is allocated and entries migrate to it one at a
//!   time on subsequent [`add`](HashMap::add) and
//!   [`delete`](HashMap::delete) calls. No single operation rehashes
//!   the whole table, which keeps worst-case latency bounded for the
//!   large maps the server maintains.
//! * Deletion restores probe-sequence invariants with the
//!   backward-shift algorithm rather than tombstones, so lookup
//!   performance does not degrade under churn.
//!
//! The implementation follows the Robin Hood scheme with linear
//! probing described in [Celis's thesis] and the backward-shift
//! deletion described by [Ledem].
//!
//! Keys are any type usable as a byte slice. With `K = &[u8]` the map
//! borrows keys and the borrow checker enforces that the backing bytes
//! outlive the entry; with `K = Box<[u8]>` (or `String`, etc.) the map
//! owns them.
//!
//! [Celis's thesis]: https://cs.uwaterloo.ca/research/tr/1986/CS-86-14.pdf
//! [Ledem]: https://codecapsule.com/2013/11/17/robin-hood-hashing-backward-shift-deletion/

use std::fmt;
use std::hash::Hasher;
use std::iter::FusedIterator;
use std::mem;
use std::slice;

use siphasher::sip::SipHasher24;

/// The minimum table size, in bits.
const MIN_BITS: u8 = 1;

/// The maximum table size, in bits.
const MAX_BITS: u8 = 32;

/// The longest key a [`HashMap`] accepts, in bytes. Passing a longer
/// key to any operation is a contract violation and panics.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// How keys are hashed and compared in a [`HashMap`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Case {
    /// Keys are compared byte for byte.
    Sensitive,

    /// ASCII letters in keys are folded to lowercase before hashing
    /// and comparison, so that e.g. `b"Foo"` and `b"fOO"` address the
    /// same entry.
    Insensitive,
}

/// A Robin Hood hash table mapping byte-string keys to values.
///
/// See the [module documentation](self) for an overview. The key type
/// `K` may be any type viewable as a byte slice; lookup and deletion
/// take plain `&[u8]` arguments regardless of `K`.
///
/// Every operation hashes the key with a per-map keyed hash
/// ([`HashMap::hash`]). Callers that already hold a key's hash (for
/// example, because they probe several maps sharing a key) can avoid
/// recomputing it with the `*_hashed` variants.
pub struct HashMap<K, V> {
    case: Case,
    count: usize,
    hash_key: [u8; 16],
    state: State<K, V>,
}

/// The resize state of a [`HashMap`]. Exactly one table is active at
/// any time; a second table exists only while entries migrate to it.
enum State<K, V> {
    Steady(Table<K, V>),

    /// Entries below `cursor` in `source` have been migrated to
    /// `target`. `target` is the active table: new entries are
    /// inserted there, and lookups probe it first.
    Rehashing {
        source: Table<K, V>,
        target: Table<K, V>,
        cursor: usize,
    },
}

impl<K: AsRef<[u8]>, V> HashMap<K, V> {
    /// Creates a new `HashMap` with 2^`bits` slots.
    ///
    /// The table grows and shrinks automatically thereafter; `bits`
    /// only selects the initial capacity. `bits` outside `[1, 32]` is
    /// a contract violation and panics.
    pub fn new(bits: u8, case: Case) -> Self {
        assert!(
            (MIN_BITS..=MAX_BITS).contains(&bits),
            "initial size of 2^{} slots is out of range",
            bits,
        );
        let mut hash_key = [0; 16];
        hash_key[1] = 1;

        // Unit tests need a deterministic hash seed.
        #[cfg(not(test))]
        {
            use rand::RngCore;
            rand::thread_rng().fill_bytes(&mut hash_key);
        }

        Self {
            case,
            count: 0,
            hash_key,
            state: State::Steady(Table::new(bits)),
        }
    }

    /// Computes the keyed hash of `key` for this map.
    ///
    /// The hash is deterministic for a given map instance but varies
    /// between instances. For case-insensitive maps, ASCII letters are
    /// folded before hashing, so casefold-equal keys share a hash.
    pub fn hash(&self, key: &[u8]) -> u32 {
        let mut hasher = SipHasher24::new_with_key(&self.hash_key);
        match self.case {
            Case::Sensitive => hasher.write(key),
            Case::Insensitive => {
                let mut folded = [0; 64];
                for chunk in key.chunks(folded.len()) {
                    for (dst, src) in folded.iter_mut().zip(chunk) {
                        *dst = src.to_ascii_lowercase();
                    }
                    hasher.write(&folded[..chunk.len()]);
                }
            }
        }
        hasher.finish() as u32
    }

    /// Looks up `key`, returning a reference to its value if present.
    pub fn find(&self, key: &[u8]) -> Option<&V> {
        self.find_hashed(self.hash(key), key)
    }

    /// Like [`HashMap::find`], with the key's hash (as computed by
    /// [`HashMap::hash`]) supplied by the caller.
    pub fn find_hashed(&self, hashval: u32, key: &[u8]) -> Option<&V> {
        assert!(key.len() <= MAX_KEY_SIZE, "key too long");
        let (source, pos) = self.locate(hashval, key)?;
        self.table(source).slots[pos].as_ref().map(|node| &node.value)
    }

    /// Looks up `key`, returning a mutable reference to its value if
    /// present.
    pub fn find_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.find_mut_hashed(self.hash(key), key)
    }

    /// Like [`HashMap::find_mut`], with the key's hash supplied by the
    /// caller.
    pub fn find_mut_hashed(&mut self, hashval: u32, key: &[u8]) -> Option<&mut V> {
        assert!(key.len() <= MAX_KEY_SIZE, "key too long");
        let (source, pos) = self.locate(hashval, key)?;
        self.table_mut(source).slots[pos]
            .as_mut()
            .map(|node| &mut node.value)
    }

    /// Inserts an entry mapping `key` to `value`.
    ///
    /// If an equal key is already present, the existing entry is left
    /// untouched and ownership of `key` and `value` is handed back in
    /// an [`Exists`] error.
    pub fn add(&mut self, key: K, value: V) -> Result<(), Exists<K, V>> {
        let hashval = self.hash(key.as_ref());
        self.add_hashed(hashval, key, value)
    }

    /// Like [`HashMap::add`], with the key's hash supplied by the
    /// caller.
    pub fn add_hashed(&mut self, hashval: u32, key: K, value: V) -> Result<(), Exists<K, V>> {
        assert!(key.as_ref().len() <= MAX_KEY_SIZE, "key too long");
        if self.rehashing() {
            self.rehash_one();
        } else if self.over_threshold() {
            self.start_grow();
            self.rehash_one();
        }
        if self.locate(hashval, key.as_ref()).is_some() {
            return Err(Exists { key, value });
        }
        let node = Node {
            key,
            value,
            hashval,
            psl: 0,
        };
        self.table_mut(false).insert(node);
        self.count += 1;
        Ok(())
    }

    /// Removes the entry for `key`, returning its value if it was
    /// present.
    pub fn delete(&mut self, key: &[u8]) -> Option<V> {
        self.delete_hashed(self.hash(key), key)
    }

    /// Like [`HashMap::delete`], with the key's hash supplied by the
    /// caller.
    pub fn delete_hashed(&mut self, hashval: u32, key: &[u8]) -> Option<V> {
        assert!(key.len() <= MAX_KEY_SIZE, "key too long");
        if self.rehashing() {
            self.rehash_one();
        } else if self.under_threshold() {
            self.start_shrink();
            self.rehash_one();
        }
        let (source, pos) = self.locate(hashval, key)?;
        let node = self.table_mut(source).remove_at(pos);
        self.count -= 1;
        Some(node.value)
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns an iterator over the map's entries as
    /// `(key bytes, value)` pairs.
    ///
    /// Every live entry is visited exactly once, in no particular
    /// order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let empty: &[Option<Node<K, V>>] = &[];
        let (front, back) = match &self.state {
            State::Steady(table) => (&*table.slots, empty),
            State::Rehashing { source, target, .. } => (&*target.slots, &*source.slots),
        };
        Iter {
            front: front.iter(),
            back: back.iter(),
        }
    }

    /// Visits every entry exactly once, removing those for which `f`
    /// returns `false`.
    ///
    /// Unlike ad-hoc deletion during [`HashMap::iter`], which the
    /// borrow checker forbids, this walks the table slots directly and
    /// handles the entries that backward-shift deletion moves into
    /// already-examined slots.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&[u8], &mut V) -> bool,
    {
        match &mut self.state {
            State::Steady(table) => retain_table(table, &mut self.count, &mut f),
            State::Rehashing { source, target, .. } => {
                retain_table(target, &mut self.count, &mut f);
                retain_table(source, &mut self.count, &mut f);
            }
        }
    }

    /// Locates `key`, returning the table it is in (`true` for the
    /// rehashing source table) and its slot.
    fn locate(&self, hashval: u32, key: &[u8]) -> Option<(bool, usize)> {
        match &self.state {
            State::Steady(table) => table.find(hashval, key, self.case).map(|pos| (false, pos)),
            State::Rehashing { source, target, .. } => target
                .find(hashval, key, self.case)
                .map(|pos| (false, pos))
                .or_else(|| source.find(hashval, key, self.case).map(|pos| (true, pos))),
        }
    }

    fn table(&self, source: bool) -> &Table<K, V> {
        match (&self.state, source) {
            (State::Steady(table), _) => table,
            (State::Rehashing { target, .. }, false) => target,
            (State::Rehashing { source, .. }, true) => source,
        }
    }

    fn table_mut(&mut self, source: bool) -> &mut Table<K, V> {
        match (&mut self.state, source) {
            (State::Steady(table), _) => table,
            (State::Rehashing { target, .. }, false) => target,
            (State::Rehashing { source, .. }, true) => source,
        }
    }

    fn rehashing(&self) -> bool {
        matches!(self.state, State::Rehashing { .. })
    }

    fn over_threshold(&self) -> bool {
        let table = self.table(false);
        table.bits < MAX_BITS && self.count > approx_90_percent(table.capacity())
    }

    fn under_threshold(&self) -> bool {
        let table = self.table(false);
        table.bits > MIN_BITS && self.count < approx_20_percent(table.capacity())
    }

    /// Migrates one entry from the source table to the target table,
    /// retiring the source once it is empty. No-op in the steady
    /// state.
    fn rehash_one(&mut self) {
        if let State::Rehashing {
            source,
            target,
            cursor,
        } = &mut self.state
        {
            while *cursor < source.capacity() && source.slots[*cursor].is_none() {
                *cursor += 1;
            }
            if *cursor < source.capacity() {
                // The backward shift may move another entry into the
                // cursor's slot, so the cursor must not advance here.
                let mut node = source.remove_at(*cursor);
                node.psl = 0;
                target.insert(node);
                return;
            }
        } else {
            return;
        }

        // The source table has been drained; retire it.
        let target = match mem::replace(&mut self.state, State::Steady(Table::placeholder())) {
            State::Rehashing { target, .. } => target,
            State::Steady(_) => unreachable!(),
        };
        self.state = State::Steady(target);
    }

    /// Begins growing the table. Must be called in the steady state.
    fn start_grow(&mut self) {
        let oldbits = self.table(false).bits;
        let mut newbits = oldbits + 1;
        while self.count > approx_40_percent(1 << newbits) {
            newbits += 1;
        }
        newbits = newbits.min(MAX_BITS);
        if newbits > oldbits {
            self.start_rehash(newbits);
        }
    }

    /// Begins shrinking the table. Must be called in the steady state.
    fn start_shrink(&mut self) {
        let oldbits = self.table(false).bits;
        let newbits = (oldbits - 1).max(MIN_BITS);
        if newbits < oldbits {
            self.start_rehash(newbits);
        }
    }

    fn start_rehash(&mut self, newbits: u8) {
        let source = match mem::replace(&mut self.state, State::Steady(Table::placeholder())) {
            State::Steady(table) => table,
            State::Rehashing { .. } => unreachable!(),
        };
        self.state = State::Rehashing {
            source,
            target: Table::new(newbits),
            cursor: 0,
        };
    }

    /// Verifies the structural invariants of the map: every entry's
    /// recorded probe-sequence length matches its distance from its
    /// home slot, probe paths have no holes, and the entry count is
    /// accurate.
    #[cfg(test)]
    fn check_invariants(&self) {
        let (first, second) = match &self.state {
            State::Steady(table) => (table, None),
            State::Rehashing { source, target, .. } => (target, Some(source)),
        };
        let mut live = 0;
        for table in std::iter::once(first).chain(second) {
            for pos in 0..table.capacity() {
                let node = match &table.slots[pos] {
                    Some(node) => node,
                    None => continue,
                };
                live += 1;
                let home = table.home(node.hashval);
                assert_eq!(
                    node.psl as usize,
                    pos.wrapping_sub(home) & table.mask(),
                    "psl does not match distance from home slot",
                );
                if node.psl > 0 {
                    let prev = &table.slots[(pos + table.mask()) & table.mask()];
                    match prev {
                        Some(prev) => assert!(
                            prev.psl + 1 >= node.psl,
                            "probe path psl not non-decreasing",
                        ),
                        None => panic!("hole in probe path"),
                    }
                }
            }
        }
        assert_eq!(live, self.count, "count does not match live entries");
    }
}

/// The retention walk over one table. A slot is re-examined after a
/// removal, since backward-shift deletion may refill it.
fn retain_table<K, V, F>(table: &mut Table<K, V>, count: &mut usize, f: &mut F)
where
    K: AsRef<[u8]>,
    F: FnMut(&[u8], &mut V) -> bool,
{
    let mut pos = 0;
    while pos < table.capacity() {
        let keep = match &mut table.slots[pos] {
            Some(node) => f(node.key.as_ref(), &mut node.value),
            None => true,
        };
        if keep {
            pos += 1;
        } else {
            table.remove_at(pos);
            *count -= 1;
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TABLES                                                             //
////////////////////////////////////////////////////////////////////////

/// A single power-of-two table of slots.
struct Table<K, V> {
    bits: u8,
    slots: Box<[Option<Node<K, V>>]>,
}

/// A live entry in a [`Table`].
struct Node<K, V> {
    key: K,
    value: V,
    hashval: u32,

    /// The probe-sequence length: this entry's distance from its home
    /// slot.
    psl: u32,
}

impl<K: AsRef<[u8]>, V> Table<K, V> {
    fn new(bits: u8) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(1usize << bits, || None);
        Self {
            bits,
            slots: slots.into_boxed_slice(),
        }
    }

    /// A stand-in table used only while moving real tables between
    /// [`State`]s. Never probed.
    fn placeholder() -> Self {
        Self {
            bits: 0,
            slots: Vec::new().into_boxed_slice(),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> usize {
        self.capacity() - 1
    }

    /// The home slot for a hash value. The high bits of the hash are
    /// used, as the low bits of a truncated SipHash output are the
    /// weaker ones.
    fn home(&self, hashval: u32) -> usize {
        (hashval >> (32 - self.bits)) as usize
    }

    /// Probes for `key`, returning its slot if present. Probing stops
    /// at an empty slot or at an entry closer to its home than the
    /// probe distance, which the Robin Hood invariant guarantees
    /// cannot precede a match.
    fn find(&self, hashval: u32, key: &[u8], case: Case) -> Option<usize> {
        let mut pos = self.home(hashval);
        let mut psl = 0;
        loop {
            let node = self.slots[pos].as_ref()?;
            if psl > node.psl {
                return None;
            }
            if node.hashval == hashval && keys_equal(case, node.key.as_ref(), key) {
                return Some(pos);
            }
            psl += 1;
            pos = (pos + 1) & self.mask();
        }
    }

    /// Inserts a node, displacing entries closer to their home slots
    /// as needed ("stealing from the rich"). The caller has already
    /// ruled out a duplicate key.
    fn insert(&mut self, mut node: Node<K, V>) {
        let mask = self.mask();
        let mut pos = self.home(node.hashval);
        loop {
            match &mut self.slots[pos] {
                Some(occupant) => {
                    if node.psl > occupant.psl {
                        mem::swap(occupant, &mut node);
                    }
                    node.psl += 1;
                    pos = (pos + 1) & mask;
                }
                empty => {
                    *empty = Some(node);
                    return;
                }
            }
        }
    }

    /// Removes and returns the node at `pos`, which must be occupied,
    /// then backward-shifts the following run: entries after the
    /// vacated slot move one slot toward their home until an empty
    /// slot or an entry already at its home is reached.
    fn remove_at(&mut self, mut pos: usize) -> Node<K, V> {
        let mask = self.mask();
        let removed = self.slots[pos].take().unwrap();
        loop {
            let next = (pos + 1) & mask;
            match self.slots[next].take() {
                Some(mut node) if node.psl > 0 => {
                    node.psl -= 1;
                    self.slots[pos] = Some(node);
                    pos = next;
                }
                other => {
                    self.slots[next] = other;
                    break;
                }
            }
        }
        removed
    }
}

fn keys_equal(case: Case, a: &[u8], b: &[u8]) -> bool {
    match case {
        Case::Sensitive => a == b,
        Case::Insensitive => a.eq_ignore_ascii_case(b),
    }
}

// Fixed-point approximations of the occupancy thresholds.

fn approx_90_percent(x: usize) -> usize {
    (x * 921) >> 10
}

fn approx_40_percent(x: usize) -> usize {
    (x * 409) >> 10
}

fn approx_20_percent(x: usize) -> usize {
    (x * 205) >> 10
}

////////////////////////////////////////////////////////////////////////
// ITERATION                                                          //
////////////////////////////////////////////////////////////////////////

/// An iterator over the entries of a [`HashMap`]. See
/// [`HashMap::iter`].
pub struct Iter<'a, K, V> {
    front: slice::Iter<'a, Option<Node<K, V>>>,
    back: slice::Iter<'a, Option<Node<K, V>>>,
}

impl<'a, K: AsRef<[u8]>, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.front.by_ref().chain(self.back.by_ref()) {
            if let Some(node) = slot {
                return Some((node.key.as_ref(), &node.value));
            }
        }
        None
    }
}

impl<K: AsRef<[u8]>, V> FusedIterator for Iter<'_, K, V> {}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// The error returned by [`HashMap::add`] when an entry with an equal
/// key is already present. It hands ownership of the rejected key and
/// value back to the caller; the preexisting entry is not modified.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Exists<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> fmt::Display for Exists<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an entry with an equal key is already present")
    }
}

impl<K: fmt::Debug, V: fmt::Debug> std::error::Error for Exists<K, V> {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
