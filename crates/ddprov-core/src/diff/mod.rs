//! Diff & drift engine
//!
//! Compares two configuration-shaped trees (last-known state against
//! desired configuration, or last-known state against freshly read remote
//! state) field by field, guided by the schema. Every canonicalization is
//! declared on the field through its [`DiffRule`]; a field without a rule
//! is compared exactly.
//!
//! ## Canonicalizations
//!
//! - set-typed fields and `AsSet` lists compare as multisets
//! - `JsonText` parses both sides and compares structurally
//! - `Numeric` compares parsed doubles within 1e-9
//! - `TrimSpace` ignores leading/trailing whitespace
//! - `SortBy` sorts block lists with a key function before pairing items
//! - `OmitEmpty` fields treat zero values as absent
//! - defaults are materialized on both sides
//! - computed fields never take part; optional-computed fields only when
//!   the desired side sets them

mod normalize;

pub use normalize::{canonical_json_text, format_number, numbers_equal};

use crate::path::AttrPath;
use crate::schema::{EmptyPolicy, Field, FieldType, Schema};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Tolerance for numeric comparisons
pub const NUMERIC_TOLERANCE: f64 = 1e-9;

/// Context handed to suppression functions
pub struct SuppressContext<'a> {
    /// Value on the prior side
    pub old: Option<&'a Value>,
    /// Value on the desired side
    pub new: Option<&'a Value>,
    /// Map holding the field on the desired side
    pub desired: &'a Map<String, Value>,
}

/// Per-field comparison rule
#[derive(Debug, Clone, Copy, Default)]
pub enum DiffRule {
    /// Byte-for-byte, numbers compared numerically
    #[default]
    Exact,
    /// Ignore surrounding whitespace
    TrimSpace,
    /// Compare a list as a multiset
    AsSet,
    /// Compare JSON text structurally
    JsonText,
    /// Compare as doubles within [`NUMERIC_TOLERANCE`]
    Numeric,
    /// Sort block lists by key before comparing
    SortBy(fn(&Map<String, Value>) -> i64),
    /// Never report a change
    Ignore,
    /// Report a change only when the function returns false
    Suppress(fn(&SuppressContext<'_>) -> bool),
}

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Set on the desired side only
    Added,
    /// Set on the prior side only
    Removed,
    /// Set on both sides with different values
    Modified,
}

/// One changed location
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Location in the configuration tree
    pub path: AttrPath,
    /// Kind of change
    pub kind: ChangeKind,
    /// Prior value
    pub old: Option<Value>,
    /// Desired value
    pub new: Option<Value>,
    /// Whether the change forces replacement
    pub force_new: bool,
}

/// Result of a diff
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    changes: Vec<Change>,
}

impl Diff {
    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changed locations
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Whether any change forces replacement
    pub fn requires_replace(&self) -> bool {
        self.changes.iter().any(|c| c.force_new)
    }

    /// Rendered paths of the changes
    pub fn paths(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.path.to_string()).collect()
    }

    /// Whether a change touches the given top-level field
    pub fn touches(&self, field: &str) -> bool {
        let prefix = AttrPath::root().key(field);
        self.changes.iter().any(|c| c.path.starts_with(&prefix))
    }
}

/// Compute the changes needed to go from `prior` to `desired`
pub fn diff(schema: &Schema, prior: &Map<String, Value>, desired: &Map<String, Value>) -> Diff {
    let mut changes = Vec::new();
    diff_map(schema, prior, desired, &AttrPath::root(), false, &mut changes);
    Diff { changes }
}

/// Apply a diff to the prior state, producing the converged state
pub fn apply_diff(prior: &Map<String, Value>, diff: &Diff) -> Map<String, Value> {
    let mut next = prior.clone();
    for change in &diff.changes {
        change.path.assign(&mut next, change.new.clone());
    }
    next
}

fn diff_map(
    schema: &Schema,
    prior: &Map<String, Value>,
    desired: &Map<String, Value>,
    path: &AttrPath,
    force_new: bool,
    changes: &mut Vec<Change>,
) {
    for field in schema.iter() {
        let new_raw = present(desired.get(field.name));
        if !field.participates_in_diff(new_raw.is_some()) {
            continue;
        }
        let old = normalize_side(field, present(prior.get(field.name)));
        let new = normalize_side(field, new_raw);

        if let DiffRule::Ignore = field.diff {
            continue;
        }
        if let DiffRule::Suppress(f) = field.diff {
            let ctx = SuppressContext {
                old: old.as_ref(),
                new: new.as_ref(),
                desired,
            };
            if f(&ctx) {
                continue;
            }
        }

        let fpath = path.key(field.name);
        let forced = force_new || field.force_new;
        diff_field(field, old, new, &fpath, forced, changes);
    }
}

fn diff_field(
    field: &Field,
    old: Option<Value>,
    new: Option<Value>,
    path: &AttrPath,
    force_new: bool,
    changes: &mut Vec<Change>,
) {
    let (old, new) = match (old, new) {
        (None, None) => return,
        (None, Some(n)) => return push(changes, path, ChangeKind::Added, None, Some(n), force_new),
        (Some(o), None) => return push(changes, path, ChangeKind::Removed, Some(o), None, force_new),
        (Some(o), Some(n)) => (o, n),
    };

    if let Some(schema) = field.nested_schema() {
        let modified = if field.is_block() {
            match (as_block(&old), as_block(&new)) {
                (Some(o), Some(n)) => {
                    diff_map(&schema, o, n, path, force_new, changes);
                    false
                }
                _ => true,
            }
        } else {
            match (as_blocks(&old), as_blocks(&new)) {
                (Some(mut olds), Some(mut news)) => {
                    let mut reordered = false;
                    if let DiffRule::SortBy(key) = field.diff {
                        let before: Vec<*const Map<String, Value>> = olds.iter().map(|m| *m as *const _).collect();
                        olds.sort_by_key(|m| key(m));
                        news.sort_by_key(|m| key(m));
                        reordered = olds.iter().zip(&before).any(|(m, b)| !std::ptr::eq(*m, *b));
                    }
                    if olds.len() == news.len() {
                        let mut nested = Vec::new();
                        for (i, (o, n)) in olds.iter().zip(news.iter()).enumerate() {
                            diff_map(&schema, o, n, &path.index(i), force_new, &mut nested);
                        }
                        // sorted indices no longer address the prior list
                        if reordered {
                            !nested.is_empty()
                        } else {
                            changes.extend(nested);
                            false
                        }
                    } else {
                        true
                    }
                }
                _ => true,
            }
        };
        if modified {
            push(changes, path, ChangeKind::Modified, Some(old), Some(new), force_new);
        }
        return;
    }

    if !values_equal(field, &old, &new) {
        push(changes, path, ChangeKind::Modified, Some(old), Some(new), force_new);
    }
}

fn push(
    changes: &mut Vec<Change>,
    path: &AttrPath,
    kind: ChangeKind,
    old: Option<Value>,
    new: Option<Value>,
    force_new: bool,
) {
    changes.push(Change {
        path: path.clone(),
        kind,
        old,
        new,
        force_new,
    });
}

/// Null, default and omit-empty handling for one side of a comparison
fn normalize_side(field: &Field, value: Option<&Value>) -> Option<Value> {
    let value = value.or(field.default.as_ref())?.clone();
    if field.empty == EmptyPolicy::OmitEmpty && is_zero(&value) {
        return None;
    }
    Some(value)
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty() || items.iter().all(|i| i.as_object().is_some_and(Map::is_empty)),
        Value::Object(map) => map.is_empty(),
    }
}

fn as_block(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Array(items) if items.len() == 1 => items[0].as_object(),
        _ => None,
    }
}

fn as_blocks(value: &Value) -> Option<Vec<&Map<String, Value>>> {
    match value {
        Value::Array(items) => items.iter().map(Value::as_object).collect(),
        Value::Object(map) => Some(vec![map]),
        _ => None,
    }
}

fn values_equal(field: &Field, old: &Value, new: &Value) -> bool {
    match &field.ty {
        FieldType::Set(elem) => multiset_equal(old, new, elem),
        FieldType::List(elem) if matches!(field.diff, DiffRule::AsSet) => multiset_equal(old, new, elem),
        FieldType::List(elem) => match (old, new) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| scalar_equal(elem, field.diff, x, y))
            }
            _ => false,
        },
        FieldType::Map(elem) => match (old, new) {
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, x)| b.get(k).is_some_and(|y| scalar_equal(elem, field.diff, x, y)))
            }
            _ => false,
        },
        ty => scalar_equal(ty, field.diff, old, new),
    }
}

fn scalar_equal(ty: &FieldType, rule: DiffRule, old: &Value, new: &Value) -> bool {
    match rule {
        DiffRule::TrimSpace => match (old.as_str(), new.as_str()) {
            (Some(a), Some(b)) => a.trim() == b.trim(),
            _ => loose_equal(ty, old, new),
        },
        DiffRule::JsonText => json_text_equal(old, new),
        DiffRule::Numeric => match (as_number(old), as_number(new)) {
            (Some(a), Some(b)) => numbers_equal(a, b),
            _ => old == new,
        },
        _ => loose_equal(ty, old, new),
    }
}

/// Exact comparison, except numbers compare by value and
/// string fields accept numbers that print the same
fn loose_equal(ty: &FieldType, old: &Value, new: &Value) -> bool {
    match (old, new) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            matches!(ty, FieldType::String | FieldType::Float)
                && s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_equal(ty, x, y))
        }
        _ => old == new,
    }
}

fn multiset_equal(old: &Value, new: &Value, elem: &FieldType) -> bool {
    let (Value::Array(a), Value::Array(b)) = (old, new) else {
        return false;
    };
    let mut a: Vec<String> = a.iter().map(|v| set_key(elem, v)).collect();
    let mut b: Vec<String> = b.iter().map(|v| set_key(elem, v)).collect();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}

fn set_key(elem: &FieldType, value: &Value) -> String {
    match (elem, value) {
        (FieldType::Int | FieldType::Float, v) => as_number(v).map(format_number).unwrap_or_else(|| v.to_string()),
        (_, Value::String(s)) => s.clone(),
        (_, v) => canonical_json_text(v),
    }
}

fn json_text_equal(old: &Value, new: &Value) -> bool {
    let parse = |v: &Value| -> Option<Value> {
        match v {
            Value::String(s) => serde_json::from_str(s).ok(),
            other => Some(other.clone()),
        }
    };
    match (parse(old), parse(new)) {
        (Some(a), Some(b)) => a == b,
        _ => old == new,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Rank helper for [`DiffRule::SortBy`] on string keys
pub fn rank_of(order: &[&str], value: Option<&Value>) -> i64 {
    value
        .and_then(Value::as_str)
        .and_then(|s| order.iter().position(|o| *o == s))
        .map(|p| p as i64)
        .unwrap_or(order.len() as i64)
}

/// Compare two numbers the way the `Numeric` rule does
pub fn compare_numbers(a: f64, b: f64) -> Ordering {
    if numbers_equal(a, b) {
        Ordering::Equal
    } else {
        a.partial_cmp(&b).unwrap_or(Ordering::Equal)
    }
}
