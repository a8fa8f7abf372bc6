//! Declarative resource schemas
//!
//! A [`Schema`] is an ordered list of [`Field`] descriptors. Every field
//! carries its semantic type, presence, default, cardinality, validators,
//! null-vs-absent policy, diff rule and wire mapping, so translation and
//! diffing never need per-field special cases scattered around the code.
//!
//! Schemas compose: shared sub-schemas (axis, style, conditional format,
//! log query, ...) are plain functions returning a `Schema`, and
//! [`Schema::merge`] layers them together.
//!
//! ## Example
//!
//! ```rust
//! use ddprov_core::schema::{Field, Schema};
//!
//! let axis = Schema::new()
//!     .field(Field::string("label"))
//!     .field(Field::string("scale"))
//!     .field(Field::bool("include_zero"));
//!
//! let widget = Schema::new()
//!     .field(Field::string("title").omit_empty())
//!     .field(Field::block("yaxis", axis));
//!
//! assert!(widget.get("yaxis").unwrap().is_block());
//! ```

mod validate;
mod validators;

pub use validate::{validate, MAX_DEPTH};
pub use validators::Validator;
pub(crate) use validate::{json_kind as validate_json_kind, type_name as validate_type_name};

use crate::diff::DiffRule;
use serde_json::Value;
use std::sync::Arc;

/// Required / optional / computed flags, collapsed into one enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Must be set by the user
    Required,
    /// May be set by the user
    Optional,
    /// Set by the server only
    Computed,
    /// May be set by the user; otherwise the server fills it in
    OptionalComputed,
}

/// Semantic type of a field
#[derive(Debug, Clone)]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// 64-bit integer
    Int,
    /// 64-bit float
    Float,
    /// Boolean
    Bool,
    /// Ordered list
    List(Box<FieldType>),
    /// Unordered collection
    Set(Box<FieldType>),
    /// Map from string keys
    Map(Box<FieldType>),
    /// Nested object
    Nested(NestedSchema),
}

/// Reference to a nested schema
///
/// `Deferred` breaks the cycle for recursive shapes such as nested
/// pipelines; the function is only called while walking a value.
#[derive(Debug, Clone)]
pub enum NestedSchema {
    /// Schema known up front
    Inline(Arc<Schema>),
    /// Schema resolved on use
    Deferred(fn() -> Arc<Schema>),
}

impl NestedSchema {
    /// Resolve the schema
    pub fn get(&self) -> Arc<Schema> {
        match self {
            NestedSchema::Inline(s) => s.clone(),
            NestedSchema::Deferred(f) => f(),
        }
    }
}

/// Handling of zero values (`""`, `0`, `false`, `[]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyPolicy {
    /// Zero values are real values and are sent
    #[default]
    Send,
    /// Zero values mean "absent": not sent, not read back, not diffed
    OmitEmpty,
}

/// Representation change between configuration and wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Same value on both sides
    #[default]
    Plain,
    /// Configuration string, wire number
    NumericString,
    /// Configuration JSON text, wire JSON value
    JsonText,
}

/// Where and how a field lives on the wire
#[derive(Debug, Clone, Default)]
pub struct WireMapping {
    /// Wire key when it differs from the field name
    pub key: Option<&'static str>,
    /// Dotted wire path (`time.live_span`), overrides `key`
    pub path: Option<&'static str>,
    /// Representation change
    pub codec: Codec,
    /// Translated by resource code rather than the generic engine
    pub manual: bool,
}

/// Field descriptor
#[derive(Debug, Clone)]
pub struct Field {
    /// Configuration name
    pub name: &'static str,
    /// Semantic type
    pub ty: FieldType,
    /// Presence flags
    pub presence: Presence,
    /// Default value materialized when the user leaves the field unset
    pub default: Option<Value>,
    /// Minimum list cardinality
    pub min_items: Option<usize>,
    /// Maximum list cardinality
    pub max_items: Option<usize>,
    /// Value validators, applied per element for scalar collections
    pub validators: Vec<Validator>,
    /// Sibling fields that may not be set together with this one
    pub conflicts_with: Vec<&'static str>,
    /// Null-vs-absent policy
    pub empty: EmptyPolicy,
    /// Diff rule
    pub diff: DiffRule,
    /// Never logged or echoed back
    pub sensitive: bool,
    /// Changing the value replaces the remote object
    pub force_new: bool,
    /// Deprecation notice
    pub deprecated: Option<&'static str>,
    /// Documentation
    pub description: &'static str,
    /// Wire mapping
    pub wire: WireMapping,
}

impl Field {
    /// Create an optional field of the given type
    pub fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            presence: Presence::Optional,
            default: None,
            min_items: None,
            max_items: None,
            validators: Vec::new(),
            conflicts_with: Vec::new(),
            empty: EmptyPolicy::Send,
            diff: DiffRule::Exact,
            sensitive: false,
            force_new: false,
            deprecated: None,
            description: "",
            wire: WireMapping::default(),
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn int(name: &'static str) -> Self {
        Self::new(name, FieldType::Int)
    }

    pub fn float(name: &'static str) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn bool(name: &'static str) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn string_list(name: &'static str) -> Self {
        Self::new(name, FieldType::List(Box::new(FieldType::String)))
    }

    pub fn string_set(name: &'static str) -> Self {
        Self::new(name, FieldType::Set(Box::new(FieldType::String)))
    }

    pub fn int_list(name: &'static str) -> Self {
        Self::new(name, FieldType::List(Box::new(FieldType::Int)))
    }

    pub fn int_set(name: &'static str) -> Self {
        Self::new(name, FieldType::Set(Box::new(FieldType::Int)))
    }

    pub fn map(name: &'static str, elem: FieldType) -> Self {
        Self::new(name, FieldType::Map(Box::new(elem)))
    }

    /// Single nested block (a one-element list in configuration, an object on the wire)
    pub fn block(name: &'static str, schema: Schema) -> Self {
        Self::new(
            name,
            FieldType::List(Box::new(FieldType::Nested(NestedSchema::Inline(Arc::new(schema))))),
        )
        .max_items(1)
    }

    /// Ordered list of nested blocks
    pub fn block_list(name: &'static str, schema: Schema) -> Self {
        Self::new(
            name,
            FieldType::List(Box::new(FieldType::Nested(NestedSchema::Inline(Arc::new(schema))))),
        )
    }

    /// Ordered list of nested blocks whose schema is resolved lazily
    pub fn block_list_deferred(name: &'static str, schema: fn() -> Arc<Schema>) -> Self {
        Self::new(
            name,
            FieldType::List(Box::new(FieldType::Nested(NestedSchema::Deferred(schema)))),
        )
    }

    pub fn required(mut self) -> Self {
        self.presence = Presence::Required;
        self
    }

    pub fn optional(mut self) -> Self {
        self.presence = Presence::Optional;
        self
    }

    pub fn computed(mut self) -> Self {
        self.presence = Presence::Computed;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.presence = Presence::OptionalComputed;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn min_items(mut self, n: usize) -> Self {
        self.min_items = Some(n);
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }

    /// Restrict values to an enumeration
    pub fn one_of(self, values: &'static [&'static str]) -> Self {
        self.validator(Validator::OneOf(values))
    }

    pub fn validator(mut self, v: Validator) -> Self {
        self.validators.push(v);
        self
    }

    pub fn conflicts_with(mut self, names: &[&'static str]) -> Self {
        self.conflicts_with.extend_from_slice(names);
        self
    }

    pub fn omit_empty(mut self) -> Self {
        self.empty = EmptyPolicy::OmitEmpty;
        self
    }

    pub fn diff(mut self, rule: DiffRule) -> Self {
        self.diff = rule;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn deprecated(mut self, notice: &'static str) -> Self {
        self.deprecated = Some(notice);
        self
    }

    pub fn describe(mut self, text: &'static str) -> Self {
        self.description = text;
        self
    }

    pub fn wire_key(mut self, key: &'static str) -> Self {
        self.wire.key = Some(key);
        self
    }

    pub fn wire_path(mut self, path: &'static str) -> Self {
        self.wire.path = Some(path);
        self
    }

    /// Configuration string carried as a wire number
    pub fn numeric_string(mut self) -> Self {
        self.wire.codec = Codec::NumericString;
        self.diff = DiffRule::Numeric;
        self
    }

    /// Configuration JSON text carried as a structured wire value
    pub fn json_text(mut self) -> Self {
        self.wire.codec = Codec::JsonText;
        self.diff = DiffRule::JsonText;
        self
    }

    /// Leave translation of this field to resource code
    pub fn manual(mut self) -> Self {
        self.wire.manual = true;
        self
    }

    /// Whether this is a single nested block
    pub fn is_block(&self) -> bool {
        self.max_items == Some(1) && self.nested_schema().is_some()
    }

    /// Schema of the nested element, for block fields
    pub fn nested_schema(&self) -> Option<Arc<Schema>> {
        match &self.ty {
            FieldType::List(elem) | FieldType::Set(elem) => match elem.as_ref() {
                FieldType::Nested(ns) => Some(ns.get()),
                _ => None,
            },
            FieldType::Nested(ns) => Some(ns.get()),
            _ => None,
        }
    }

    /// Wire location as path segments
    pub fn wire_segments(&self) -> Vec<&'static str> {
        match self.wire.path {
            Some(p) => p.split('.').collect(),
            None => vec![self.wire.key.unwrap_or(self.name)],
        }
    }

    /// Whether users may set this field
    pub fn accepts_config(&self) -> bool {
        self.presence != Presence::Computed
    }

    /// Whether the field takes part in a diff, given whether the desired
    /// side sets it
    pub fn participates_in_diff(&self, desired_set: bool) -> bool {
        match self.presence {
            Presence::Required | Presence::Optional => true,
            Presence::OptionalComputed => desired_set,
            Presence::Computed => false,
        }
    }
}

/// Ordered set of field descriptors plus cross-field union groups
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
    exactly_one_of: Vec<Vec<&'static str>>,
    at_most_one_of: Vec<Vec<&'static str>>,
}

impl Schema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a field
    pub fn field(mut self, field: Field) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    /// Add (or replace) several fields
    pub fn fields(self, fields: impl IntoIterator<Item = Field>) -> Self {
        fields.into_iter().fold(self, Schema::field)
    }

    /// Layer another schema on top of this one
    pub fn merge(self, other: Schema) -> Self {
        let Schema {
            fields,
            exactly_one_of,
            at_most_one_of,
        } = other;
        let mut merged = self.fields(fields);
        merged.exactly_one_of.extend(exactly_one_of);
        merged.at_most_one_of.extend(at_most_one_of);
        merged
    }

    /// Declare that exactly one of the named fields must be set
    pub fn exactly_one_of(mut self, names: &[&'static str]) -> Self {
        self.exactly_one_of.push(names.to_vec());
        self
    }

    /// Declare that at most one of the named fields may be set
    pub fn at_most_one_of(mut self, names: &[&'static str]) -> Self {
        self.at_most_one_of.push(names.to_vec());
        self
    }

    /// Look up a field by configuration name
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `exactly_one_of` groups
    pub fn unions(&self) -> &[Vec<&'static str>] {
        &self.exactly_one_of
    }

    /// `at_most_one_of` groups
    pub fn exclusive_groups(&self) -> &[Vec<&'static str>] {
        &self.at_most_one_of
    }

    /// Names of required fields
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter(|f| f.presence == Presence::Required)
            .map(|f| f.name)
    }

    pub fn into_arc(self) -> Arc<Schema> {
        Arc::new(self)
    }
}

/// Whether a configuration value counts as set.
///
/// `null`, empty lists and empty maps are unset; scalar zero values are set.
pub fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_replaces_fields_by_name() {
        let base = Schema::new()
            .field(Field::string("title"))
            .field(Field::string("live_span"));
        let overlay = Schema::new().field(Field::string("title").required());
        let merged = base.merge(overlay);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("title").unwrap().presence, Presence::Required);
        assert_eq!(merged.iter().next().unwrap().name, "title");
    }

    #[test]
    fn test_wire_segments() {
        assert_eq!(Field::string("live_span").wire_path("time.live_span").wire_segments(), vec!["time", "live_span"]);
        assert_eq!(Field::block_list("request", Schema::new()).wire_key("requests").wire_segments(), vec!["requests"]);
        assert_eq!(Field::string("q").wire_segments(), vec!["q"]);
    }

    #[test]
    fn test_participates_in_diff() {
        assert!(Field::string("a").participates_in_diff(false));
        assert!(!Field::int("version").computed().participates_in_diff(true));
        assert!(!Field::string("timeframe").optional_computed().participates_in_diff(false));
        assert!(Field::string("timeframe").optional_computed().participates_in_diff(true));
    }

    #[test]
    fn test_is_set() {
        assert!(!is_set(None));
        assert!(!is_set(Some(&json!(null))));
        assert!(!is_set(Some(&json!([]))));
        assert!(is_set(Some(&json!(0))));
        assert!(is_set(Some(&json!(false))));
        assert!(is_set(Some(&json!([{"q": "x"}]))));
    }
}
