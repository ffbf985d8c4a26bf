//! The Array object: an insertion-ordered map with O(1) get/set/delete.
//!
//! Storage couples a `hashbrown::HashTable` index (hash → entry slot) with a
//! slot arena whose entries form a doubly linked list. Lookups go through
//! the index; iteration, length and serialization walk the list, so
//! deleting an entry never disturbs the order of the others.
//!
//! Keys are hashable values: ints, bools, strings and non-NaN floats.
//! Integral floats collapse to the equal int at key construction, so `1.0`
//! and `1` address the same entry. Everything else (including NaN) is
//! coerced to its display string by the caller.

use std::{rc::Rc, sync::LazyLock};

use hashbrown::HashTable;

use crate::{heap::Heap, value::Value};

const NIL: u32 = u32::MAX;

/// Fixed-seed hasher state shared by all maps.
///
/// Hashes must be stable across maps because entries cache them, and a
/// fixed seed keeps behavior reproducible between runs.
static HASH_STATE: LazyLock<ahash::RandomState> =
    LazyLock::new(|| ahash::RandomState::with_seeds(0x243f_6a88, 0x85a3_08d3, 0x1319_8a2e, 0x0370_7344));

/// A normalized, hashable map key.
///
/// The `Float` variant never holds a NaN or an integral value; those are
/// rejected or collapsed by [`MapKey::from_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum MapKey {
    Int(i64),
    Bool(bool),
    Str(Rc<str>),
    Float(f64),
}

impl MapKey {
    /// Builds a key from a value, coercing non-hashable values (arrays,
    /// functions, `none`, NaN) to their display string.
    #[must_use]
    pub fn from_value(value: &Value, heap: &Heap) -> Self {
        match Self::try_hashable(value) {
            Some(key) => key,
            None => Self::Str(Rc::from(value.display(heap).as_str())),
        }
    }

    /// Builds a key only when the value is hashable as-is.
    #[must_use]
    pub fn try_hashable(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Str(s) => Some(Self::Str(Rc::clone(s))),
            Value::Float(f) => {
                if f.is_nan() {
                    return None;
                }
                // Integral floats hash identically to the equal int.
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(Self::Int(*f as i64))
                } else {
                    Some(Self::Float(*f))
                }
            }
            Value::None | Value::Array(_) | Value::Function(_) => None,
        }
    }

    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::Int(*i),
            Self::Bool(b) => Value::Bool(*b),
            Self::Str(s) => Value::Str(Rc::clone(s)),
            Self::Float(f) => Value::Float(*f),
        }
    }

    /// Display form, also used when a key becomes a JSON object key.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Str(s) => s.to_string(),
            Self::Float(f) => f.to_string(),
        }
    }

    fn hash_u64(&self) -> u64 {
        match self {
            // Discriminant tags keep variants from aliasing; integral floats
            // were already collapsed to Int.
            Self::Int(i) => HASH_STATE.hash_one((0u8, *i)),
            Self::Bool(b) => HASH_STATE.hash_one((1u8, *b)),
            Self::Str(s) => HASH_STATE.hash_one((2u8, &**s)),
            Self::Float(f) => HASH_STATE.hash_one((3u8, f.to_bits())),
        }
    }
}

#[derive(Debug)]
struct Entry {
    key: MapKey,
    value: Value,
    /// Cached so table growth can rehash without touching keys.
    hash: u64,
    prev: u32,
    next: u32,
}

/// Insertion-ordered map backing every Array value.
#[derive(Debug, Default)]
pub struct OrderedMap {
    indices: HashTable<u32>,
    entries: Vec<Entry>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
    len: usize,
}

impl OrderedMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            indices: HashTable::new(),
            entries: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn find_slot(&self, key: &MapKey, hash: u64) -> Option<u32> {
        self.indices
            .find(hash, |&slot| self.entries[slot as usize].key == *key)
            .copied()
    }

    #[must_use]
    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        let slot = self.find_slot(key, key.hash_u64())?;
        Some(&self.entries[slot as usize].value)
    }

    #[must_use]
    pub fn contains_key(&self, key: &MapKey) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or updates. An existing key keeps its position in the order.
    pub fn set(&mut self, key: MapKey, value: Value) {
        let hash = key.hash_u64();
        if let Some(slot) = self.find_slot(&key, hash) {
            self.entries[slot as usize].value = value;
            return;
        }

        let slot = if let Some(slot) = self.free.pop() {
            self.entries[slot as usize] = Entry {
                key,
                value,
                hash,
                prev: self.tail,
                next: NIL,
            };
            slot
        } else {
            let slot = u32::try_from(self.entries.len()).expect("array entry count exceeds u32");
            self.entries.push(Entry {
                key,
                value,
                hash,
                prev: self.tail,
                next: NIL,
            });
            slot
        };

        if self.tail != NIL {
            self.entries[self.tail as usize].next = slot;
        } else {
            self.head = slot;
        }
        self.tail = slot;
        self.len += 1;

        let entries = &self.entries;
        self.indices
            .insert_unique(hash, slot, |&s| entries[s as usize].hash);
    }

    /// Removes a key, returning its value. Unlinks in O(1).
    pub fn remove(&mut self, key: &MapKey) -> Option<Value> {
        let hash = key.hash_u64();
        let entries = &self.entries;
        let occupied = self
            .indices
            .find_entry(hash, |&slot| entries[slot as usize].key == *key)
            .ok()?;
        let (slot, _) = occupied.remove();

        let (prev, next) = {
            let entry = &self.entries[slot as usize];
            (entry.prev, entry.next)
        };
        if prev != NIL {
            self.entries[prev as usize].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.entries[next as usize].prev = prev;
        } else {
            self.tail = prev;
        }

        let entry = std::mem::replace(
            &mut self.entries[slot as usize],
            Entry {
                key: MapKey::Int(0),
                value: Value::None,
                hash: 0,
                prev: NIL,
                next: NIL,
            },
        );
        self.free.push(slot);
        self.len -= 1;
        Some(entry.value)
    }

    pub fn clear(&mut self) {
        self.indices.clear();
        self.entries.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }

    /// First entry in insertion order.
    #[must_use]
    pub fn first(&self) -> Option<(&MapKey, &Value)> {
        if self.head == NIL {
            return None;
        }
        let entry = &self.entries[self.head as usize];
        Some((&entry.key, &entry.value))
    }

    /// Iterates entries in insertion order.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            map: self,
            cursor: self.head,
        }
    }

    /// Keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<MapKey> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Values in insertion order.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|(_, v)| v.clone()).collect()
    }
}

pub struct Iter<'a> {
    map: &'a OrderedMap,
    cursor: u32,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a MapKey, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let entry = &self.map.entries[self.cursor as usize];
        self.cursor = entry.next;
        Some((&entry.key, &entry.value))
    }
}

impl<'a> IntoIterator for &'a OrderedMap {
    type Item = (&'a MapKey, &'a Value);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
