//! Element access and iteration over container values.

use crate::{
    error::EngineError,
    heap::{Heap, HeapData, HeapId, IterState},
    value::Value,
};

/// Reads `container[index]`.
///
/// Strings and arrays are bounds-checked; map lookups never fault and yield
/// None for absent (or unhashable) keys; ranges yield the index itself when
/// it falls inside `[from, to)`.
pub(crate) fn get_element(index: &Value, container: &Value, heap: &Heap) -> Result<Value, EngineError> {
    let Value::Ref(id) = container else {
        return Err(EngineError::runtime(format!(
            "type {} is not indexable",
            container.type_name(heap)
        )));
    };
    match heap.get(*id) {
        HeapData::Str(s) => {
            let Value::Int(i) = index else {
                return Err(EngineError::runtime("string index must be an int"));
            };
            usize::try_from(*i)
                .ok()
                .and_then(|i| s.get(i))
                .map(Value::Char)
                .ok_or_else(|| EngineError::runtime(format!("string index {i} out of range")))
        }
        HeapData::Array(values) => {
            let Value::Int(i) = index else {
                return Err(EngineError::runtime("array index must be an int"));
            };
            usize::try_from(*i)
                .ok()
                .and_then(|i| values.get(i))
                .map(|value| value.clone_with_heap(heap))
                .ok_or_else(|| EngineError::runtime(format!("array index {i} out of range")))
        }
        HeapData::Map(map) => {
            let value = index
                .as_map_key(heap)
                .and_then(|key| map.get(&key))
                .map_or(Value::None, |value| value.clone_with_heap(heap));
            Ok(value)
        }
        HeapData::Range(range) => {
            let Value::Int(i) = index else {
                return Err(EngineError::runtime("range index must be an int"));
            };
            if *i >= range.from && *i < range.to {
                Ok(Value::Int(*i))
            } else {
                Err(EngineError::runtime(format!("range index {i} out of range")))
            }
        }
        data => Err(EngineError::runtime(format!("type {} is not indexable", data.type_name()))),
    }
}

/// Writes `container[index] = value`, taking ownership of the value. The
/// value is released on failure so reference counts stay balanced.
pub(crate) fn set_element(
    container: &Value,
    index: &Value,
    value: Value,
    heap: &mut Heap,
) -> Result<(), EngineError> {
    let Value::Ref(id) = container else {
        let message = format!("type {} is not indexable", container.type_name(heap));
        value.drop_with_heap(heap);
        return Err(EngineError::runtime(message));
    };
    let id = *id;

    // map keys read the heap, so derive them before borrowing mutably
    let map_key = index.as_map_key(heap);

    enum TargetKind {
        Str,
        Array(usize),
        Map,
        Other(&'static str),
    }
    let kind = match heap.get(id) {
        HeapData::Str(_) => TargetKind::Str,
        HeapData::Array(values) => TargetKind::Array(values.len()),
        HeapData::Map(_) => TargetKind::Map,
        data => TargetKind::Other(data.type_name()),
    };

    match kind {
        TargetKind::Str => {
            let (Value::Int(i), Value::Char(byte)) = (index, &value) else {
                value.drop_with_heap(heap);
                return Err(EngineError::runtime(
                    "string element assignment requires an int index and a char value",
                ));
            };
            let (i, byte) = (*i, *byte);
            let HeapData::Str(s) = heap.get_mut(id) else {
                unreachable!("type checked above")
            };
            if usize::try_from(i).is_ok_and(|i| s.set(i, byte)) {
                Ok(())
            } else {
                Err(EngineError::runtime(format!("string index {i} out of range")))
            }
        }
        TargetKind::Array(len) => {
            let Value::Int(i) = index else {
                value.drop_with_heap(heap);
                return Err(EngineError::runtime("array index must be an int"));
            };
            let i = *i;
            if usize::try_from(i).is_ok_and(|i| i < len) {
                let HeapData::Array(values) = heap.get_mut(id) else {
                    unreachable!("type checked above")
                };
                let old = std::mem::replace(&mut values[i as usize], value);
                old.drop_with_heap(heap);
                Ok(())
            } else {
                value.drop_with_heap(heap);
                Err(EngineError::runtime(format!("array index {i} out of range")))
            }
        }
        TargetKind::Map => {
            let Some(key) = map_key else {
                let message = format!("map key must be an int or string, not {}", index.type_name(heap));
                value.drop_with_heap(heap);
                return Err(EngineError::runtime(message));
            };
            let HeapData::Map(map) = heap.get_mut(id) else {
                unreachable!("type checked above")
            };
            if let Some(old) = map.insert(key, value) {
                old.drop_with_heap(heap);
            }
            Ok(())
        }
        TargetKind::Other(type_name) => {
            let message = format!("type {type_name} does not support element assignment");
            value.drop_with_heap(heap);
            Err(EngineError::runtime(message))
        }
    }
}

/// What an iterator walks, flattened out of the heap so advancing does not
/// hold two borrows at once.
#[derive(Debug, Clone, Copy)]
enum IterableDesc {
    Int(i32),
    Str(HeapId),
    Array(HeapId),
    Range(i32, i32),
}

/// Checks that a value is iterable: Int, String, Array, or Range.
pub(crate) fn is_iterable(value: &Value, heap: &Heap) -> bool {
    match value {
        Value::Int(_) => true,
        Value::Ref(id) => matches!(
            heap.get(*id),
            HeapData::Str(_) | HeapData::Array(_) | HeapData::Range(..)
        ),
        _ => false,
    }
}

/// Advances the iterator stored at `iter_id` and produces its next element.
///
/// Returns `Some(element)` while the iterator yields values, `None` once
/// exhausted. Exhaustion is sticky: every later call keeps returning `None`.
pub(crate) fn iterate(iter_id: HeapId, heap: &mut Heap) -> Result<Option<Value>, EngineError> {
    let (desc, state) = {
        let HeapData::Iter(iter) = heap.get(iter_id) else {
            return Err(EngineError::runtime("iterate target is not an iterator"));
        };
        let desc = match &iter.iterable {
            Value::Int(n) => IterableDesc::Int(*n),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => IterableDesc::Str(*id),
                HeapData::Array(_) => IterableDesc::Array(*id),
                HeapData::Range(range) => IterableDesc::Range(range.from, range.to),
                data => {
                    return Err(EngineError::runtime(format!("type {} is not iterable", data.type_name())));
                }
            },
            value => {
                return Err(EngineError::runtime(format!(
                    "type {} is not iterable",
                    value.type_name(heap)
                )));
            }
        };
        (desc, iter.state)
    };

    let next_index = match state {
        IterState::Done => {
            return Ok(None);
        }
        IterState::Fresh => match desc {
            IterableDesc::Range(from, _) => from,
            _ => 0,
        },
        IterState::At(i) => i + 1,
    };

    let element = match desc {
        // an Int iterates 0, 1, .., n inclusive
        IterableDesc::Int(n) => (next_index <= n).then_some(Value::Int(next_index)),
        IterableDesc::Range(_, to) => (next_index < to).then_some(Value::Int(next_index)),
        IterableDesc::Str(id) => {
            let HeapData::Str(s) = heap.get(id) else {
                unreachable!("described above")
            };
            usize::try_from(next_index).ok().and_then(|i| s.get(i)).map(Value::Char)
        }
        IterableDesc::Array(id) => {
            let HeapData::Array(values) = heap.get(id) else {
                unreachable!("described above")
            };
            usize::try_from(next_index)
                .ok()
                .and_then(|i| values.get(i))
                .map(|value| value.clone_with_heap(heap))
        }
    };

    let new_state = if element.is_some() {
        IterState::At(next_index)
    } else {
        IterState::Done
    };
    let HeapData::Iter(iter) = heap.get_mut(iter_id) else {
        unreachable!("checked above")
    };
    iter.state = new_state;

    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Iter, Map, MapKey, Range, Str};

    #[test]
    fn string_indexing_is_bounds_checked() {
        let mut heap = Heap::new();
        let s = heap.allocate(HeapData::Str(Str::from_bytes(b"ab".to_vec())));
        let container = Value::Ref(s);
        assert!(matches!(
            get_element(&Value::Int(1), &container, &heap).unwrap(),
            Value::Char(b'b')
        ));
        assert!(get_element(&Value::Int(2), &container, &heap).is_err());
        assert!(get_element(&Value::Int(-1), &container, &heap).is_err());
        container.drop_with_heap(&mut heap);
    }

    #[test]
    fn map_lookups_never_fault() {
        let mut heap = Heap::new();
        let mut map = Map::new();
        map.insert(MapKey::Int(1), Value::Int(10));
        let m = heap.allocate(HeapData::Map(map));
        let container = Value::Ref(m);
        assert!(matches!(
            get_element(&Value::Int(1), &container, &heap).unwrap(),
            Value::Int(10)
        ));
        // absent key and unhashable key both give None
        assert!(matches!(
            get_element(&Value::Int(9), &container, &heap).unwrap(),
            Value::None
        ));
        assert!(matches!(
            get_element(&Value::Bool(true), &container, &heap).unwrap(),
            Value::None
        ));
        container.drop_with_heap(&mut heap);
    }

    #[test]
    fn range_element_is_the_index() {
        let mut heap = Heap::new();
        let r = heap.allocate(HeapData::Range(Range { from: 2, to: 5 }));
        let container = Value::Ref(r);
        assert!(matches!(
            get_element(&Value::Int(3), &container, &heap).unwrap(),
            Value::Int(3)
        ));
        assert!(get_element(&Value::Int(5), &container, &heap).is_err());
        container.drop_with_heap(&mut heap);
    }

    #[test]
    fn set_element_replaces_and_releases() {
        let mut heap = Heap::new();
        let old = heap.allocate(HeapData::Str(Str::from_bytes(b"old".to_vec())));
        let arr = heap.allocate(HeapData::Array(vec![Value::Ref(old)]));
        let container = Value::Ref(arr);
        set_element(&container, &Value::Int(0), Value::Int(5), &mut heap).unwrap();
        // the displaced string was freed
        assert_eq!(heap.refcount(old), 0);
        container.drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn string_accepts_char_assignment() {
        let mut heap = Heap::new();
        let s = heap.allocate(HeapData::Str(Str::from_bytes(b"cat".to_vec())));
        let container = Value::Ref(s);
        set_element(&container, &Value::Int(0), Value::Char(b'b'), &mut heap).unwrap();
        let HeapData::Str(s) = heap.get(s) else { panic!() };
        assert_eq!(s.as_bytes(), b"bat");
        container.drop_with_heap(&mut heap);
    }

    #[test]
    fn int_iteration_is_inclusive() {
        let mut heap = Heap::new();
        let iter = heap.allocate(HeapData::Iter(Iter {
            iterable: Value::Int(2),
            state: IterState::Fresh,
        }));
        let mut seen = Vec::new();
        while let Some(Value::Int(i)) = iterate(iter, &mut heap).unwrap() {
            seen.push(i);
        }
        assert_eq!(seen, vec![0, 1, 2]);
        // exhaustion is sticky
        assert!(iterate(iter, &mut heap).unwrap().is_none());
        assert!(iterate(iter, &mut heap).unwrap().is_none());
        Value::Ref(iter).drop_with_heap(&mut heap);
    }

    #[test]
    fn empty_range_iterates_zero_times() {
        let mut heap = Heap::new();
        let range = heap.allocate(HeapData::Range(Range { from: 3, to: 3 }));
        let iter = heap.allocate(HeapData::Iter(Iter {
            iterable: Value::Ref(range),
            state: IterState::Fresh,
        }));
        assert!(iterate(iter, &mut heap).unwrap().is_none());
        Value::Ref(iter).drop_with_heap(&mut heap);
        assert_eq!(heap.live_count(), 0);
    }
}
