//! Schema validation
//!
//! Walks a configuration tree against its schema and reports every
//! violation at once, each anchored at its path. Validation is pure: it
//! never touches the network.

use super::{Codec, Field, FieldType, Presence, Schema, is_set};
use crate::error::{Error, TranslationKind};
use crate::path::AttrPath;
use serde_json::{Map, Value};

/// Maximum nesting depth accepted for recursive shapes
pub const MAX_DEPTH: usize = 10;

/// Validate a configuration map against a schema
pub fn validate(config: &Map<String, Value>, schema: &Schema) -> Result<(), Vec<Error>> {
    let mut errors = Vec::new();
    validate_map(config, schema, &AttrPath::root(), 0, &mut errors);
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validate_map(
    map: &Map<String, Value>,
    schema: &Schema,
    path: &AttrPath,
    depth: usize,
    errors: &mut Vec<Error>,
) {
    if depth > MAX_DEPTH {
        errors.push(Error::translation(
            path.clone(),
            TranslationKind::ParseError,
            format!("nesting deeper than {} levels", MAX_DEPTH),
        ));
        return;
    }

    for key in map.keys() {
        if schema.get(key).is_none() {
            errors.push(Error::config_at(path.key(key.as_str()), "unsupported field"));
        }
    }

    for field in schema.iter() {
        let fpath = path.key(field.name);
        match map.get(field.name).filter(|v| !v.is_null()) {
            None => {
                if field.presence == Presence::Required && field.default.is_none() {
                    errors.push(Error::translation(
                        fpath,
                        TranslationKind::MissingRequired,
                        format!("{} is required", field.name),
                    ));
                }
            }
            Some(value) => {
                if field.presence == Presence::Computed {
                    errors.push(Error::config_at(fpath, "value is computed by the server and cannot be set"));
                    continue;
                }
                for other in &field.conflicts_with {
                    if is_set(map.get(*other)) && is_set(Some(value)) {
                        errors.push(Error::config_at(
                            fpath.clone(),
                            format!("\"{}\" conflicts with \"{}\"", field.name, other),
                        ));
                    }
                }
                validate_field(value, field, &fpath, depth, errors);
            }
        }
    }

    for group in schema.unions() {
        let present: Vec<&str> = group.iter().copied().filter(|k| is_set(map.get(*k))).collect();
        match present.len() {
            1 => {}
            0 => errors.push(Error::translation(
                path.clone(),
                TranslationKind::MissingRequired,
                format!("exactly one of [{}] must be set", group.join(", ")),
            )),
            _ => errors.push(Error::translation(
                path.clone(),
                TranslationKind::AmbiguousUnion,
                format!("only one of [{}] may be set, found [{}]", group.join(", "), present.join(", ")),
            )),
        }
    }

    for group in schema.exclusive_groups() {
        let present: Vec<&str> = group.iter().copied().filter(|k| is_set(map.get(*k))).collect();
        if present.len() > 1 {
            errors.push(Error::translation(
                path.clone(),
                TranslationKind::AmbiguousUnion,
                format!("only one of [{}] may be set, found [{}]", group.join(", "), present.join(", ")),
            ));
        }
    }
}

fn validate_field(value: &Value, field: &Field, path: &AttrPath, depth: usize, errors: &mut Vec<Error>) {
    match &field.ty {
        FieldType::List(elem) | FieldType::Set(elem) => {
            let items: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                Value::Object(_) if field.is_block() => vec![value],
                _ => {
                    errors.push(mismatch(path, "expected a list"));
                    return;
                }
            };
            if let Some(min) = field.min_items {
                if items.len() < min {
                    errors.push(Error::config_at(
                        path.clone(),
                        format!("expected at least {} item(s), got {}", min, items.len()),
                    ));
                }
            }
            if let Some(max) = field.max_items {
                if items.len() > max {
                    errors.push(Error::config_at(
                        path.clone(),
                        format!("expected at most {} item(s), got {}", max, items.len()),
                    ));
                }
            }
            let block = field.is_block();
            for (i, item) in items.into_iter().enumerate() {
                let ipath = if block { path.clone() } else { path.index(i) };
                validate_element(item, elem, field, &ipath, depth, errors);
            }
        }
        FieldType::Map(elem) => match value {
            Value::Object(entries) => {
                for (k, v) in entries {
                    validate_element(v, elem, field, &path.key(k.as_str()), depth, errors);
                }
            }
            _ => errors.push(mismatch(path, "expected a map")),
        },
        other => validate_element(value, other, field, path, depth, errors),
    }
}

fn validate_element(
    value: &Value,
    ty: &FieldType,
    field: &Field,
    path: &AttrPath,
    depth: usize,
    errors: &mut Vec<Error>,
) {
    if let FieldType::Nested(ns) = ty {
        match value {
            Value::Object(map) => validate_map(map, &ns.get(), path, depth + 1, errors),
            _ => errors.push(mismatch(path, "expected a block")),
        }
        return;
    }

    if let Err(msg) = check_scalar_type(value, ty, field.wire.codec) {
        let kind = if matches!(field.wire.codec, Codec::Plain) || !value.is_string() {
            TranslationKind::TypeMismatch
        } else {
            TranslationKind::ParseError
        };
        errors.push(Error::translation(path.clone(), kind, msg));
        return;
    }

    for validator in &field.validators {
        if let Err((kind, msg)) = validator.check(value) {
            errors.push(Error::translation(path.clone(), kind, msg));
        }
    }
}

fn check_scalar_type(value: &Value, ty: &FieldType, codec: Codec) -> Result<(), String> {
    match (ty, value) {
        (FieldType::String, Value::String(s)) => match codec {
            Codec::Plain => Ok(()),
            Codec::NumericString => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(|_| ())
                .ok_or_else(|| format!("{:?} is not a valid number", s)),
            Codec::JsonText => serde_json::from_str::<Value>(s)
                .map(|_| ())
                .map_err(|e| format!("invalid JSON text: {}", e)),
        },
        (FieldType::String, Value::Number(_)) | (FieldType::String, Value::Bool(_)) => Ok(()),
        (FieldType::Int, Value::Number(n)) => {
            if n.as_i64().is_some() || n.as_f64().is_some_and(|f| f.fract() == 0.0) {
                Ok(())
            } else {
                Err(format!("expected an integer, got {}", n))
            }
        }
        (FieldType::Float, Value::Number(_)) => Ok(()),
        (FieldType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| format!("{:?} is not a valid number", s)),
        (FieldType::Bool, Value::Bool(_)) => Ok(()),
        (ty, v) => Err(format!("expected {}, got {}", type_name(ty), json_kind(v))),
    }
}

fn mismatch(path: &AttrPath, msg: &str) -> Error {
    Error::translation(path.clone(), TranslationKind::TypeMismatch, msg)
}

pub(crate) fn type_name(ty: &FieldType) -> &'static str {
    match ty {
        FieldType::String => "a string",
        FieldType::Int => "an integer",
        FieldType::Float => "a number",
        FieldType::Bool => "a boolean",
        FieldType::List(_) => "a list",
        FieldType::Set(_) => "a set",
        FieldType::Map(_) => "a map",
        FieldType::Nested(_) => "a block",
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
