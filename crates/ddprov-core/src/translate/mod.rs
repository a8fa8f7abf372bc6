//! Table-driven build/flatten engine
//!
//! `build` turns a configuration map into a wire object and `flatten`
//! turns a wire object back into configuration, both driven entirely by
//! the field descriptors of a [`Schema`]:
//!
//! - wire key renames and dotted wire paths (`time.live_span`)
//! - single blocks as wire objects, block lists as wire arrays
//! - the per-field empty-value policy (`Send` vs `OmitEmpty`)
//! - codecs for numeric strings and embedded JSON text
//! - defaults for unset fields
//!
//! Union-valued fields (`manual`) are skipped here and handled by the
//! resource code through [`union`].

pub mod union;

use crate::diff::{canonical_json_text, format_number};
use crate::error::{Error, Result, TranslationKind};
use crate::path::AttrPath;
use crate::schema::{Codec, EmptyPolicy, Field, FieldType, MAX_DEPTH, Presence, Schema};
use serde_json::{Map, Number, Value};

pub use union::{UnionKind, select_variant, variant_for_tag};

/// Build a wire object from configuration
pub fn build(schema: &Schema, config: &Map<String, Value>, path: &AttrPath) -> Result<Map<String, Value>> {
    build_at(schema, config, path, depth_of(path))
}

/// Flatten a wire object into configuration
pub fn flatten(schema: &Schema, wire: &Map<String, Value>, path: &AttrPath) -> Result<Map<String, Value>> {
    flatten_at(schema, wire, path, depth_of(path))
}

fn depth_of(path: &AttrPath) -> usize {
    path.steps()
        .iter()
        .filter(|s| matches!(s, crate::path::Step::Index(_)))
        .count()
}

fn check_depth(path: &AttrPath, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::translation(
            path.clone(),
            TranslationKind::ParseError,
            format!("nesting deeper than {} levels", MAX_DEPTH),
        ));
    }
    Ok(())
}

fn build_at(schema: &Schema, config: &Map<String, Value>, path: &AttrPath, depth: usize) -> Result<Map<String, Value>> {
    check_depth(path, depth)?;
    check_unions(schema, config, path)?;

    let mut out = Map::new();
    for field in schema.iter() {
        if field.wire.manual || field.presence == Presence::Computed {
            continue;
        }
        let fpath = path.key(field.name);
        let value = match config.get(field.name).filter(|v| !v.is_null()).or(field.default.as_ref()) {
            Some(v) => v,
            None if field.presence == Presence::Required => {
                return Err(Error::translation(
                    fpath,
                    TranslationKind::MissingRequired,
                    format!("{} is required", field.name),
                ));
            }
            None => continue,
        };
        if let Some(wire) = build_value(field, value, &fpath, depth)? {
            set_wire(&mut out, &field.wire_segments(), wire);
        }
    }
    Ok(out)
}

fn check_unions(schema: &Schema, config: &Map<String, Value>, path: &AttrPath) -> Result<()> {
    for group in schema.unions() {
        let present: Vec<&str> = group
            .iter()
            .copied()
            .filter(|k| crate::schema::is_set(config.get(*k)))
            .collect();
        match present.len() {
            1 => {}
            0 => {
                return Err(Error::translation(
                    path.clone(),
                    TranslationKind::MissingRequired,
                    format!("exactly one of [{}] must be set", group.join(", ")),
                ));
            }
            _ => {
                return Err(Error::translation(
                    path.clone(),
                    TranslationKind::AmbiguousUnion,
                    format!("only one of [{}] may be set, found [{}]", group.join(", "), present.join(", ")),
                ));
            }
        }
    }
    Ok(())
}

fn build_value(field: &Field, value: &Value, path: &AttrPath, depth: usize) -> Result<Option<Value>> {
    let omit = field.empty == EmptyPolicy::OmitEmpty;
    match &field.ty {
        FieldType::List(elem) | FieldType::Set(elem) => {
            if field.is_block() {
                let Some(block) = block_map(value, path)? else {
                    return Ok(None);
                };
                let schema = nested(elem, path)?;
                let built = build_at(&schema, block, path, depth + 1)?;
                if omit && built.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(Value::Object(built)));
            }

            let items = value.as_array().ok_or_else(|| mismatch(path, "a list", value))?;
            if omit && items.is_empty() {
                return Ok(None);
            }
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let ipath = path.index(i);
                match elem.as_ref() {
                    FieldType::Nested(ns) => {
                        let map = item.as_object().ok_or_else(|| mismatch(&ipath, "a block", item))?;
                        out.push(Value::Object(build_at(&ns.get(), map, &ipath, depth + 1)?));
                    }
                    scalar => out.push(to_wire_scalar(scalar, field.wire.codec, item, &ipath)?),
                }
            }
            if matches!(field.ty, FieldType::Set(_)) {
                sort_unique(&mut out);
            }
            Ok(Some(Value::Array(out)))
        }
        FieldType::Map(elem) => {
            let entries = value.as_object().ok_or_else(|| mismatch(path, "a map", value))?;
            if omit && entries.is_empty() {
                return Ok(None);
            }
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), to_wire_scalar(elem, field.wire.codec, v, &path.key(k.as_str()))?);
            }
            Ok(Some(Value::Object(out)))
        }
        FieldType::Nested(ns) => {
            let map = block_map(value, path)?.ok_or_else(|| mismatch(path, "a block", value))?;
            Ok(Some(Value::Object(build_at(&ns.get(), map, path, depth + 1)?)))
        }
        scalar => {
            let wire = to_wire_scalar(scalar, field.wire.codec, value, path)?;
            if omit && is_zero_scalar(&wire) {
                return Ok(None);
            }
            Ok(Some(wire))
        }
    }
}

fn flatten_at(schema: &Schema, wire: &Map<String, Value>, path: &AttrPath, depth: usize) -> Result<Map<String, Value>> {
    check_depth(path, depth)?;

    let mut out = Map::new();
    for field in schema.iter() {
        if field.wire.manual {
            continue;
        }
        let Some(value) = get_wire(wire, &field.wire_segments()) else {
            continue;
        };
        let fpath = path.key(field.name);
        if let Some(config) = flatten_value(field, value, &fpath, depth)? {
            out.insert(field.name.to_string(), config);
        }
    }
    Ok(out)
}

fn flatten_value(field: &Field, value: &Value, path: &AttrPath, depth: usize) -> Result<Option<Value>> {
    let omit = field.empty == EmptyPolicy::OmitEmpty;
    match &field.ty {
        FieldType::List(elem) | FieldType::Set(elem) => {
            if field.is_block() {
                let Some(block) = block_map(value, path)? else {
                    return Ok(None);
                };
                let schema = nested(elem, path)?;
                let flat = flatten_at(&schema, block, path, depth + 1)?;
                return Ok(Some(Value::Array(vec![Value::Object(flat)])));
            }

            let items = value.as_array().ok_or_else(|| mismatch(path, "a list", value))?;
            if omit && items.is_empty() {
                return Ok(None);
            }
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let ipath = path.index(i);
                match elem.as_ref() {
                    FieldType::Nested(ns) => {
                        let map = item.as_object().ok_or_else(|| mismatch(&ipath, "a block", item))?;
                        out.push(Value::Object(flatten_at(&ns.get(), map, &ipath, depth + 1)?));
                    }
                    scalar => out.push(from_wire_scalar(scalar, field.wire.codec, item, &ipath)?),
                }
            }
            if matches!(field.ty, FieldType::Set(_)) {
                sort_unique(&mut out);
            }
            Ok(Some(Value::Array(out)))
        }
        FieldType::Map(elem) => {
            let entries = value.as_object().ok_or_else(|| mismatch(path, "a map", value))?;
            if omit && entries.is_empty() {
                return Ok(None);
            }
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), from_wire_scalar(elem, field.wire.codec, v, &path.key(k.as_str()))?);
            }
            Ok(Some(Value::Object(out)))
        }
        FieldType::Nested(ns) => {
            let map = value.as_object().ok_or_else(|| mismatch(path, "a block", value))?;
            Ok(Some(Value::Object(flatten_at(&ns.get(), map, path, depth + 1)?)))
        }
        scalar => {
            let config = from_wire_scalar(scalar, field.wire.codec, value, path)?;
            if omit && is_zero_scalar(&config) {
                return Ok(None);
            }
            Ok(Some(config))
        }
    }
}

/// Configuration scalar to wire scalar
pub fn to_wire_scalar(ty: &FieldType, codec: Codec, value: &Value, path: &AttrPath) -> Result<Value> {
    match (ty, codec) {
        (FieldType::String, Codec::NumericString) => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => parse_float(s, path).map(float_value),
            other => Err(mismatch(path, "a numeric string", other)),
        },
        (FieldType::String, Codec::JsonText) => match value {
            Value::String(s) => serde_json::from_str(s).map_err(|e| {
                Error::translation(path.clone(), TranslationKind::ParseError, format!("invalid JSON text: {}", e))
            }),
            other => Err(mismatch(path, "JSON text", other)),
        },
        (FieldType::String, _) => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(path, "a string", other)),
        },
        (FieldType::Int, _) => as_int(value)
            .map(Value::from)
            .ok_or_else(|| mismatch(path, "an integer", value)),
        (FieldType::Float, _) => match value {
            Value::Number(n) => n.as_f64().map(float_value).ok_or_else(|| mismatch(path, "a number", value)),
            Value::String(s) => parse_float(s, path).map(float_value),
            other => Err(mismatch(path, "a number", other)),
        },
        (FieldType::Bool, _) => match value {
            Value::Bool(_) => Ok(value.clone()),
            other => Err(mismatch(path, "a boolean", other)),
        },
        (other, _) => Err(mismatch(path, crate::schema::validate_type_name(other), value)),
    }
}

/// Wire scalar to configuration scalar
pub fn from_wire_scalar(ty: &FieldType, codec: Codec, value: &Value, path: &AttrPath) -> Result<Value> {
    match (ty, codec) {
        (FieldType::String, Codec::NumericString) => match value {
            Value::Number(n) => n
                .as_f64()
                .map(|f| Value::String(format_number(f)))
                .ok_or_else(|| mismatch(path, "a number", value)),
            Value::String(s) => parse_float(s, path).map(|f| Value::String(format_number(f))),
            other => Err(mismatch(path, "a number", other)),
        },
        (FieldType::String, Codec::JsonText) => Ok(Value::String(canonical_json_text(value))),
        (FieldType::String, _) => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(path, "a string", other)),
        },
        (FieldType::Int, _) => as_int(value)
            .map(Value::from)
            .ok_or_else(|| mismatch(path, "an integer", value)),
        (FieldType::Float, _) => match value {
            Value::Number(n) => n.as_f64().map(float_value).ok_or_else(|| mismatch(path, "a number", value)),
            other => Err(mismatch(path, "a number", other)),
        },
        (FieldType::Bool, _) => match value {
            Value::Bool(_) => Ok(value.clone()),
            other => Err(mismatch(path, "a boolean", other)),
        },
        (other, _) => Err(mismatch(path, crate::schema::validate_type_name(other), value)),
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.is_finite()).map(|f| f as i64)),
        _ => None,
    }
}

fn parse_float(text: &str, path: &AttrPath) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| {
            Error::translation(path.clone(), TranslationKind::ParseError, format!("{:?} is not a valid number", text))
        })
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn is_zero_scalar(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Block value as its map: `{..}`, `[{..}]`, or nothing for `[]`/`null`
pub fn block_map<'a>(value: &'a Value, path: &AttrPath) -> Result<Option<&'a Map<String, Value>>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        Value::Array(items) if items.is_empty() => Ok(None),
        Value::Array(items) if items.len() == 1 => match &items[0] {
            Value::Object(map) => Ok(Some(map)),
            Value::Null => Ok(None),
            other => Err(mismatch(path, "a block", other)),
        },
        Value::Array(items) => Err(Error::translation(
            path.clone(),
            TranslationKind::TypeMismatch,
            format!("expected a single block, got {} items", items.len()),
        )),
        other => Err(mismatch(path, "a block", other)),
    }
}

fn nested(elem: &FieldType, path: &AttrPath) -> Result<std::sync::Arc<Schema>> {
    match elem {
        FieldType::Nested(ns) => Ok(ns.get()),
        other => Err(mismatch(path, crate::schema::validate_type_name(other), &Value::Null)),
    }
}

fn mismatch(path: &AttrPath, expected: &str, got: &Value) -> Error {
    Error::translation(
        path.clone(),
        TranslationKind::TypeMismatch,
        format!("expected {}, got {}", expected, crate::schema::validate_json_kind(got)),
    )
}

fn sort_unique(items: &mut Vec<Value>) {
    items.sort_by_key(canonical_json_text);
    items.dedup();
}

/// Read a value at a wire path; `null` counts as absent
pub fn get_wire<'a>(wire: &'a Map<String, Value>, segments: &[&str]) -> Option<&'a Value> {
    let (last, parents) = segments.split_last()?;
    let mut current = wire;
    for seg in parents {
        current = current.get(*seg)?.as_object()?;
    }
    current.get(*last).filter(|v| !v.is_null())
}

/// Write a value at a wire path, creating intermediate objects
pub fn set_wire(wire: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = wire;
    for seg in parents {
        let slot = current
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}
