//! Reference-counted arena backing all heap-only runtime values.
//!
//! Heap values are stored in slots (`Vec<Option<HeapValue>>`) addressed by
//! [`HeapId`]. A free list recycles slots so long-running loops that
//! allocate and free repeatedly keep memory usage flat. Reference counts
//! are plain (non-atomic) counters behind a `Cell`: one engine instance is
//! single-threaded by contract, and interior mutability lets `inc_ref` take
//! a shared borrow during value copies.
//!
//! There is no cycle collector. The language surface cannot form a cycle
//! today (containers cannot be re-seated into themselves through any
//! operator), so plain counting is sufficient; any future mutation operator
//! that changes that must add weak back-references.

use std::cell::Cell;

use indexmap::IndexMap;

use crate::value::Value;

/// Identifier of a slot in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeapId(usize);

impl HeapId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A growable byte string. Scripts index and mutate strings bytewise, so
/// the payload is raw bytes rather than validated UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Str {
    bytes: Vec<u8>,
}

impl Str {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Writes one byte in place. Returns false when out of bounds.
    pub fn set(&mut self, index: usize, byte: u8) -> bool {
        match self.bytes.get_mut(index) {
            Some(slot) => {
                *slot = byte;
                true
            }
            None => false,
        }
    }

    pub fn to_lossy_string(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Map keys are restricted to the hashable value types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum MapKey {
    Int(i32),
    Str(Vec<u8>),
}

/// Insertion-ordered hash map from [`MapKey`] to values.
#[derive(Debug, Default)]
pub(crate) struct Map {
    entries: IndexMap<MapKey, Value>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Inserts, returning the displaced value when the key was present.
    pub fn insert(&mut self, key: MapKey, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Value)> {
        self.entries.iter()
    }

    /// Removes and returns every value, clearing the map.
    pub fn drain_all(&mut self) -> Vec<Value> {
        self.entries.drain(..).map(|(_, value)| value).collect()
    }
}

/// Half-open integer range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Range {
    pub from: i32,
    pub to: i32,
}

/// Iteration progress over an iterable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IterState {
    /// Not yet advanced.
    Fresh,
    /// Positioned at this index.
    At(i32),
    /// Exhausted. Stays exhausted: ITERATE keeps producing `false`.
    Done,
}

/// An iterator value: the wrapped iterable plus the current index.
#[derive(Debug)]
pub(crate) struct Iter {
    pub iterable: Value,
    pub state: IterState,
}

/// Reserved object payload; the tag exists in the value model but no
/// language surface constructs one yet.
#[derive(Debug, Default)]
#[expect(dead_code, reason = "reserved payload; the language has no object constructor yet")]
pub(crate) struct ObjectCell;

/// Payload of one heap slot.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(Str),
    Array(Vec<Value>),
    Map(Map),
    Range(Range),
    Iter(Iter),
    #[expect(dead_code, reason = "reserved tag; the language has no object constructor yet")]
    Object(ObjectCell),
}

impl HeapData {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Range(_) => "range",
            Self::Iter(_) => "iterator",
            Self::Object(_) => "object",
        }
    }

    /// Collects the heap ids this payload owns, releasing the values in
    /// place. Called once when the slot is freed.
    fn take_child_ids(&mut self, out: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) | Self::Range(_) | Self::Object(_) => {}
            Self::Array(values) => {
                for value in values.drain(..) {
                    if let Value::Ref(id) = value {
                        out.push(id);
                    }
                }
            }
            Self::Map(map) => {
                for value in map.drain_all() {
                    if let Value::Ref(id) = value {
                        out.push(id);
                    }
                }
            }
            Self::Iter(iter) => {
                if let Value::Ref(id) = std::mem::take(&mut iter.iterable) {
                    out.push(id);
                }
            }
        }
    }
}

#[derive(Debug)]
struct HeapValue {
    refcount: Cell<usize>,
    data: HeapData,
}

/// The arena. Owned by the engine; every `Value::Ref` in the engine's
/// stack, scripts, and saved states points into it.
#[derive(Debug, Default)]
pub(crate) struct Heap {
    entries: Vec<Option<HeapValue>>,
    free_list: Vec<HeapId>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` with an initial reference count of one.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let entry = HeapValue {
            refcount: Cell::new(1),
            data,
        };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(entry));
            id
        }
    }

    /// Increments the reference count of a live slot.
    ///
    /// # Panics
    /// Panics if the slot is missing or already freed; both indicate a
    /// reference counting bug.
    pub fn inc_ref(&self, id: HeapId) {
        let entry = self
            .entries
            .get(id.index())
            .expect("Heap::inc_ref: slot missing")
            .as_ref()
            .expect("Heap::inc_ref: value already freed");
        entry.refcount.set(entry.refcount.get() + 1);
    }

    /// Decrements the reference count, freeing the slot (and recursively
    /// releasing its children) when it reaches zero. Freed slots go on the
    /// free list for reuse.
    pub fn dec_ref(&mut self, id: HeapId) {
        let entry = {
            let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
            let entry = slot.as_mut().expect("Heap::dec_ref: value already freed");
            let count = entry.refcount.get();
            if count > 1 {
                entry.refcount.set(count - 1);
                return;
            }
            slot.take().expect("Heap::dec_ref: value already freed")
        };

        self.free_list.push(id);

        let mut data = entry.data;
        let mut child_ids = Vec::new();
        data.take_child_ids(&mut child_ids);
        drop(data);
        for child in child_ids {
            self.dec_ref(child);
        }
    }

    /// # Panics
    /// Panics if the slot is missing or freed.
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: value already freed")
            .data
    }

    /// # Panics
    /// Panics if the slot is missing or freed.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: value already freed")
            .data
    }

    /// Current reference count of a slot, zero once freed. Test-only
    /// instrumentation for refcount-balance assertions.
    #[cfg(test)]
    pub fn refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .map_or(0, |entry| entry.refcount.get())
    }

    /// Number of live values, for leak assertions in tests.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_recycles_slots() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Str(Str::from_bytes(b"a".to_vec())));
        assert_eq!(heap.live_count(), 1);
        heap.dec_ref(a);
        assert_eq!(heap.live_count(), 0);

        let b = heap.allocate(HeapData::Str(Str::from_bytes(b"b".to_vec())));
        assert_eq!(b.index(), a.index());
    }

    #[test]
    fn inc_ref_delays_free() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Range(Range { from: 0, to: 3 }));
        heap.inc_ref(id);
        heap.dec_ref(id);
        assert_eq!(heap.live_count(), 1);
        heap.dec_ref(id);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn freeing_an_array_releases_elements() {
        let mut heap = Heap::new();
        let elem = heap.allocate(HeapData::Str(Str::from_bytes(b"x".to_vec())));
        let array = heap.allocate(HeapData::Array(vec![Value::Ref(elem), Value::Int(1)]));
        assert_eq!(heap.live_count(), 2);
        heap.dec_ref(array);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn freeing_an_iterator_releases_its_iterable() {
        let mut heap = Heap::new();
        let array = heap.allocate(HeapData::Array(vec![Value::Int(1)]));
        let iter = heap.allocate(HeapData::Iter(Iter {
            iterable: Value::Ref(array),
            state: IterState::Fresh,
        }));
        heap.dec_ref(iter);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn map_insert_returns_displaced_value() {
        let mut map = Map::new();
        assert!(map.insert(MapKey::Int(1), Value::Int(10)).is_none());
        let old = map.insert(MapKey::Int(1), Value::Int(20));
        assert!(matches!(old, Some(Value::Int(10))));
    }
}
