// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed mutations and batch application.

use core::fmt;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MutationError;
use crate::path::PropertyPath;
use crate::tree;

/// One typed edit to a data tree.
///
/// Paths are kept as text and parsed when the mutation is applied, so a
/// malformed path surfaces as [`MutationError::InvalidPath`] from [`apply`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Mutation {
    /// Assign a value that must not already exist.
    ///
    /// If both the existing and the new value are objects with no leaf in
    /// common, the set is applied as a deep merge instead.
    Set {
        /// Target path.
        path: String,
        /// Value to assign.
        value: Value,
    },
    /// Assign regardless of the current value.
    ///
    /// Deep-equal values are a no-op unless `force` is set.
    Override {
        /// Target path.
        path: String,
        /// Value to assign.
        value: Value,
        /// Report a change even when nothing differs.
        #[serde(default)]
        force: bool,
    },
    /// Deep-merge an object into the object at `path`.
    Merge {
        /// Target path.
        path: String,
        /// Object to merge in.
        value: Value,
        /// Allow leaves present on both sides (the incoming leaf wins).
        #[serde(default, rename = "override")]
        override_leaves: bool,
    },
    /// Remove the value at `path`. Removing an absent path is a no-op.
    Delete {
        /// Target path.
        path: String,
    },
}

impl Mutation {
    /// `SET path = value`.
    #[must_use]
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    /// `OVERRIDE path = value`.
    #[must_use]
    pub fn overriding(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Override {
            path: path.into(),
            value: value.into(),
            force: false,
        }
    }

    /// `OVERRIDE path = value`, reported as a change even if equal.
    #[must_use]
    pub fn forced(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Override {
            path: path.into(),
            value: value.into(),
            force: true,
        }
    }

    /// `MERGE value into path`, rejecting shared leaves.
    #[must_use]
    pub fn merge(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Merge {
            path: path.into(),
            value: value.into(),
            override_leaves: false,
        }
    }

    /// `MERGE value into path`, letting incoming leaves win.
    #[must_use]
    pub fn merge_overriding(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Merge {
            path: path.into(),
            value: value.into(),
            override_leaves: true,
        }
    }

    /// `DELETE path`.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }

    /// Returns the target path text.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. }
            | Self::Override { path, .. }
            | Self::Merge { path, .. }
            | Self::Delete { path } => path,
        }
    }

    /// Returns the carried value, if this mutation has one.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Set { value, .. } | Self::Override { value, .. } | Self::Merge { value, .. } => {
                Some(value)
            }
            Self::Delete { .. } => None,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set { path, value } => write!(f, "SET {path} = {value}"),
            Self::Override { path, value, force } => {
                let force = if *force { " (forced)" } else { "" };
                write!(f, "OVERRIDE {path} = {value}{force}")
            }
            Self::Merge {
                path,
                value,
                override_leaves,
            } => {
                let over = if *override_leaves { " (override)" } else { "" };
                write!(f, "MERGE {path} <- {value}{over}")
            }
            Self::Delete { path } => write!(f, "DELETE {path}"),
        }
    }
}

/// Result of applying a mutation batch with [`apply`].
#[derive(Clone, Debug, PartialEq)]
pub struct Applied {
    /// The new data tree. Equal to the input when nothing changed.
    pub data: Value,
    /// Changed paths, deduplicated, in the order they were discovered.
    ///
    /// For each effective mutation this is the target path followed by
    /// every path nested under the previous value and under the new value.
    pub changed: Vec<PropertyPath>,
}

impl Applied {
    /// Returns `true` if any mutation took effect.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        !self.changed.is_empty()
    }
}

enum Step {
    Skipped,
    Changed { previous: Option<Value> },
}

#[derive(Default)]
struct ChangeSet {
    order: Vec<PropertyPath>,
    seen: HashSet<PropertyPath>,
}

impl ChangeSet {
    fn push(&mut self, path: PropertyPath) {
        if self.seen.insert(path.clone()) {
            self.order.push(path);
        }
    }

    fn record(&mut self, path: &PropertyPath, previous: Option<&Value>, current: Option<&Value>) {
        self.push(path.clone());
        let mut nested = Vec::new();
        for value in [previous, current].into_iter().flatten() {
            tree::nested_paths(value, path, &mut nested);
        }
        for path in nested {
            self.push(path);
        }
    }
}

/// Applies `mutations` in order to a clone of `base`.
///
/// Later mutations observe the effects of earlier ones. `base` is never
/// modified; on error the partially mutated clone is discarded.
///
/// # Errors
///
/// Returns the first [`MutationError`] raised by the batch.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use understory_mutation::{Mutation, apply};
///
/// let base = json!({ "level": 10 });
/// let applied = apply(&base, &[
///     Mutation::overriding("level", 10),
///     Mutation::set("stats", json!({ "st": 12 })),
/// ]).unwrap();
///
/// let changed: Vec<String> = applied.changed.iter().map(ToString::to_string).collect();
/// assert_eq!(changed, ["stats", "stats.st"]);
/// assert_eq!(applied.data, json!({ "level": 10, "stats": { "st": 12 } }));
/// ```
pub fn apply(base: &Value, mutations: &[Mutation]) -> Result<Applied, MutationError> {
    let mut data = base.clone();
    let mut changes = ChangeSet::default();

    for mutation in mutations {
        let path = PropertyPath::parse(mutation.path())?;
        if let Step::Changed { previous } = apply_one(&mut data, &path, mutation)? {
            changes.record(&path, previous.as_ref(), tree::get(&data, &path));
        }
    }

    Ok(Applied {
        data,
        changed: changes.order,
    })
}

fn apply_one(data: &mut Value, path: &PropertyPath, mutation: &Mutation) -> Result<Step, MutationError> {
    match mutation {
        Mutation::Set { value, .. } => match tree::get(data, path) {
            None => {
                tree::set(data, path, value.clone())?;
                Ok(Step::Changed { previous: None })
            }
            Some(current)
                if current.is_object()
                    && value.is_object()
                    && shared_leaves(current, value).is_empty() =>
            {
                merge_at(data, path, value)
            }
            Some(_) => Err(MutationError::AlreadySet {
                path: path.to_string(),
            }),
        },
        Mutation::Override { value, force, .. } => {
            let previous = tree::get(data, path).cloned();
            if !force && previous.as_ref() == Some(value) {
                return Ok(Step::Skipped);
            }
            tree::set(data, path, value.clone())?;
            Ok(Step::Changed { previous })
        }
        Mutation::Merge {
            value,
            override_leaves,
            ..
        } => {
            let mergeable = value.is_object() && tree::get(data, path).is_none_or(Value::is_object);
            if !mergeable {
                return Err(MutationError::NotMergeable {
                    path: path.to_string(),
                });
            }
            if !override_leaves && let Some(current) = tree::get(data, path) {
                let leaves = shared_leaves(current, value);
                if !leaves.is_empty() {
                    return Err(MutationError::SharedLeafKeys {
                        path: path.to_string(),
                        leaves,
                    });
                }
            }
            merge_at(data, path, value)
        }
        Mutation::Delete { .. } => Ok(match tree::remove(data, path) {
            Some(previous) => Step::Changed {
                previous: Some(previous),
            },
            None => Step::Skipped,
        }),
    }
}

fn merge_at(data: &mut Value, path: &PropertyPath, value: &Value) -> Result<Step, MutationError> {
    let previous = tree::get(data, path).cloned();
    let mut merged = previous
        .clone()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    tree::deep_merge(&mut merged, value);
    if previous.as_ref() == Some(&merged) {
        return Ok(Step::Skipped);
    }
    tree::set(data, path, merged)?;
    Ok(Step::Changed { previous })
}

fn shared_leaves(current: &Value, incoming: &Value) -> Vec<String> {
    let existing: HashSet<PropertyPath> = tree::leaf_paths(current).into_iter().collect();
    tree::leaf_paths(incoming)
        .into_iter()
        .filter(|leaf| existing.contains(leaf))
        .map(|leaf| leaf.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn changed(applied: &Applied) -> Vec<String> {
        applied.changed.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn set_on_absent_path() {
        let applied = apply(&json!({}), &[Mutation::set("name", "ST:Basic Move")]).unwrap();
        assert_eq!(applied.data, json!({ "name": "ST:Basic Move" }));
        assert_eq!(changed(&applied), ["name"]);
    }

    #[test]
    fn set_then_set_fails() {
        let base = apply(&json!({}), &[Mutation::set("level", 1)]).unwrap().data;
        let err = apply(&base, &[Mutation::set("level", 2)]).unwrap_err();
        assert_eq!(err, MutationError::AlreadySet { path: "level".into() });

        let applied = apply(&base, &[Mutation::overriding("level", 2)]).unwrap();
        assert_eq!(applied.data, json!({ "level": 2 }));
    }

    #[test]
    fn set_on_disjoint_objects_merges() {
        let base = json!({ "stats": { "st": 10 } });
        let applied = apply(&base, &[Mutation::set("stats", json!({ "dx": 11 }))]).unwrap();
        assert_eq!(applied.data, json!({ "stats": { "st": 10, "dx": 11 } }));
        assert_eq!(changed(&applied), ["stats", "stats.st", "stats.dx"]);

        let err = apply(&base, &[Mutation::set("stats", json!({ "st": 1 }))]).unwrap_err();
        assert!(matches!(err, MutationError::AlreadySet { .. }));
    }

    #[test]
    fn equal_override_is_a_no_op() {
        let base = json!({ "level": { "base": 10 } });
        let applied = apply(&base, &[Mutation::overriding("level", json!({ "base": 10 }))]).unwrap();
        assert!(!applied.is_changed());
        assert_eq!(applied.data, base);
    }

    #[test]
    fn forced_override_reports_change() {
        let base = json!({ "level": 10 });
        let applied = apply(&base, &[Mutation::forced("level", 10)]).unwrap();
        assert_eq!(changed(&applied), ["level"]);
        assert_eq!(applied.data, base);
    }

    #[test]
    fn override_reports_old_and_new_nested_paths() {
        let base = json!({ "mode": { "a": 1, "b": 2 } });
        let applied = apply(&base, &[Mutation::overriding("mode", json!({ "c": 3 }))]).unwrap();
        assert_eq!(changed(&applied), ["mode", "mode.a", "mode.b", "mode.c"]);
    }

    #[test]
    fn merge_rules() {
        let base = json!({ "m": { "a": 1 } });

        let applied = apply(&base, &[Mutation::merge("m", json!({ "b": 2 }))]).unwrap();
        assert_eq!(applied.data, json!({ "m": { "a": 1, "b": 2 } }));

        let err = apply(&base, &[Mutation::merge("m", json!({ "a": 5 }))]).unwrap_err();
        assert_eq!(
            err,
            MutationError::SharedLeafKeys {
                path: "m".into(),
                leaves: vec!["a".into()],
            }
        );

        let applied = apply(&base, &[Mutation::merge_overriding("m", json!({ "a": 5 }))]).unwrap();
        assert_eq!(applied.data, json!({ "m": { "a": 5 } }));

        let applied = apply(&base, &[Mutation::merge_overriding("m", json!({ "a": 1 }))]).unwrap();
        assert!(!applied.is_changed());

        let err = apply(&base, &[Mutation::merge("m.a", json!({ "x": 1 }))]).unwrap_err();
        assert!(matches!(err, MutationError::NotMergeable { .. }));
    }

    #[test]
    fn merge_into_absent_path_creates_object() {
        let applied = apply(&json!({}), &[Mutation::merge("m", json!({ "a": 1 }))]).unwrap();
        assert_eq!(applied.data, json!({ "m": { "a": 1 } }));
    }

    #[test]
    fn delete_of_absent_path_is_a_no_op() {
        let base = json!({ "a": 1 });
        let applied = apply(&base, &[Mutation::delete("missing")]).unwrap();
        assert!(!applied.is_changed());

        let applied = apply(&base, &[Mutation::delete("a")]).unwrap();
        assert_eq!(applied.data, json!({}));
        assert_eq!(changed(&applied), ["a"]);
    }

    #[test]
    fn later_mutations_see_earlier_ones() {
        let applied = apply(
            &json!({}),
            &[
                Mutation::set("a", 1),
                Mutation::overriding("a", 2),
                Mutation::delete("a"),
                Mutation::set("a", 3),
            ],
        )
        .unwrap();
        assert_eq!(applied.data, json!({ "a": 3 }));
        assert_eq!(changed(&applied), ["a"]);
    }

    #[test]
    fn failed_batch_leaves_base_untouched() {
        let base = json!({ "a": 1 });
        let result = apply(&base, &[Mutation::overriding("b", 2), Mutation::set("a", 5)]);
        assert!(result.is_err());
        assert_eq!(base, json!({ "a": 1 }));
    }

    #[test]
    fn oversized_array_indices_are_rejected() {
        let base = json!({ "a": [1] });
        for path in ["a[18446744073709551615]", "a[4000000000]", "b[4000000000].c"] {
            let error = apply(&base, &[Mutation::set(path, 2)]).unwrap_err();
            assert!(
                matches!(error, MutationError::IndexOutOfRange { .. }),
                "{path}: {error}"
            );
        }
        let applied = apply(&base, &[Mutation::set("a[3]", 2)]).unwrap();
        assert_eq!(applied.data, json!({ "a": [1, null, null, 2] }));
    }

    #[test]
    fn serde_uses_upper_case_tags() {
        let mutation: Mutation =
            serde_json::from_value(json!({ "type": "OVERRIDE", "path": "a", "value": 1, "force": true }))
                .unwrap();
        assert_eq!(mutation, Mutation::forced("a", 1));
        assert_eq!(mutation.to_string(), "OVERRIDE a = 1 (forced)");
    }
}
