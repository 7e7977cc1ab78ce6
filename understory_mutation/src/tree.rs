// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Path-addressed access to JSON data trees.
//!
//! `null` counts as a present value. Walking through `null` while writing
//! replaces it with an empty container; walking through any other primitive
//! is [`MutationError::Blocked`].

use serde_json::{Map, Value};

use crate::error::MutationError;
use crate::path::{PropertyPath, Segment};

/// Largest number of `null` slots a single write may pad an array with.
pub const MAX_ARRAY_PADDING: usize = 1 << 16;

fn child<'a>(value: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(&segment.to_key()),
        Value::Array(items) => items.get(segment.as_index()?),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &Segment) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(&segment.to_key()),
        Value::Array(items) => items.get_mut(segment.as_index()?),
        _ => None,
    }
}

/// Returns the value at `path`, or `None` if any step is missing.
#[must_use]
pub fn get<'a>(root: &'a Value, path: &PropertyPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |value, segment| child(value, segment))
}

/// Writes `value` at `path`, creating intermediate containers.
///
/// Index segments create arrays (padded with `null`), key segments create
/// objects.
///
/// # Errors
///
/// Returns [`MutationError::Blocked`] when an intermediate value is a
/// non-null primitive, or when an array is addressed with a non-numeric key.
/// Returns [`MutationError::IndexOutOfRange`] when an index lies more than
/// [`MAX_ARRAY_PADDING`] slots past the end of its array.
pub fn set(root: &mut Value, path: &PropertyPath, value: Value) -> Result<(), MutationError> {
    let segments = path.segments();
    let blocked = |depth: usize| MutationError::Blocked {
        path: path.to_string(),
        at: path.prefix(depth).to_string(),
    };

    let mut current = root;
    for (depth, segment) in segments.iter().enumerate() {
        if current.is_null() {
            *current = match segment {
                Segment::Index(_) => Value::Array(Vec::new()),
                Segment::Key(_) => Value::Object(Map::new()),
            };
        }
        let slot = match current {
            Value::Object(map) => map.entry(segment.to_key()).or_insert(Value::Null),
            Value::Array(items) => {
                let Some(index) = segment.as_index() else {
                    return Err(blocked(depth));
                };
                if items.len() <= index {
                    let out_of_range = || MutationError::IndexOutOfRange {
                        path: path.to_string(),
                        index,
                        len: items.len(),
                    };
                    let new_len = index.checked_add(1).ok_or_else(out_of_range)?;
                    if new_len - items.len() > MAX_ARRAY_PADDING {
                        return Err(out_of_range());
                    }
                    items.resize(new_len, Value::Null);
                }
                &mut items[index]
            }
            _ => return Err(blocked(depth)),
        };
        if depth + 1 == segments.len() {
            *slot = value;
            return Ok(());
        }
        current = slot;
    }
    // Only reachable for the root path.
    *current = value;
    Ok(())
}

/// Removes and returns the value at `path`.
///
/// Removing an array element shifts the following elements down.
pub fn remove(root: &mut Value, path: &PropertyPath) -> Option<Value> {
    let (last, parents) = path.segments().split_last()?;
    let mut current = root;
    for segment in parents {
        current = child_mut(current, segment)?;
    }
    match current {
        Value::Object(map) => map.remove(&last.to_key()),
        Value::Array(items) => {
            let index = last.as_index()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

/// Appends every path nested under `value` (intermediate and leaf) to `out`,
/// each prefixed by `prefix`.
pub fn nested_paths(value: &Value, prefix: &PropertyPath, out: &mut Vec<PropertyPath>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = prefix.child_key(key);
                out.push(path.clone());
                nested_paths(child, &path, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = prefix.child_index(index);
                out.push(path.clone());
                nested_paths(child, &path, out);
            }
        }
        _ => {}
    }
}

/// Returns the leaf paths of `value`, relative to it.
///
/// Empty containers have no leaves; a primitive is its own (root) leaf.
#[must_use]
pub fn leaf_paths(value: &Value) -> Vec<PropertyPath> {
    fn walk(value: &Value, prefix: PropertyPath, out: &mut Vec<PropertyPath>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    walk(child, prefix.child_key(key), out);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    walk(child, prefix.child_index(index), out);
                }
            }
            _ => out.push(prefix),
        }
    }

    let mut out = Vec::new();
    walk(value, PropertyPath::root(), &mut out);
    out
}

/// Deep-merges `source` into `target`.
///
/// Objects merge key by key; anything else in `source` replaces what
/// `target` held.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}
