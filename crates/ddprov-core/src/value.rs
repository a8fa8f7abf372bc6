//! Typed access to configuration maps
//!
//! [`Fields`] is the `optionalOk`-style reader used by hand-written
//! translators: every getter distinguishes "unset" (`Ok(None)`) from a
//! present value, and reports ill-typed input as a translation error
//! anchored at the field's path instead of panicking.

use crate::error::{Error, Result, TranslationKind};
use crate::path::AttrPath;
use crate::schema::is_set;
use crate::translate::block_map;
use serde_json::{Map, Value};

/// Configuration tree node type
pub type ConfigMap = Map<String, Value>;

/// Path-aware reader over a configuration map
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    map: &'a ConfigMap,
    path: AttrPath,
}

impl<'a> Fields<'a> {
    /// Reader at the root of a tree
    pub fn new(map: &'a ConfigMap) -> Self {
        Self {
            map,
            path: AttrPath::root(),
        }
    }

    /// Reader anchored at a path
    pub fn at(map: &'a ConfigMap, path: AttrPath) -> Self {
        Self { map, path }
    }

    pub fn path(&self) -> &AttrPath {
        &self.path
    }

    pub fn map(&self) -> &'a ConfigMap {
        self.map
    }

    /// Raw non-null value
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    /// Whether the key is set (non-null, non-empty collection)
    pub fn is_set(&self, key: &str) -> bool {
        is_set(self.map.get(key))
    }

    pub fn str(&self, key: &str) -> Result<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(self.mismatch(key, "a string", other)),
        }
    }

    pub fn required_str(&self, key: &str) -> Result<&'a str> {
        self.str(key)?.ok_or_else(|| self.missing(key))
    }

    /// String value; numbers and booleans are rendered as text
    pub fn string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(other) => Err(self.mismatch(key, "a string", other)),
        }
    }

    /// Non-empty string value
    pub fn non_empty_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.string(key)?.filter(|s| !s.is_empty()))
    }

    pub fn i64(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Some)
                .ok_or_else(|| self.mismatch(key, "an integer", &Value::Number(n.clone()))),
            Some(other) => Err(self.mismatch(key, "an integer", other)),
        }
    }

    pub fn required_i64(&self, key: &str) -> Result<i64> {
        self.i64(key)?.ok_or_else(|| self.missing(key))
    }

    /// Float value; numeric strings are accepted
    pub fn f64(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
                Error::translation(
                    self.path.key(key),
                    TranslationKind::ParseError,
                    format!("{:?} is not a valid number", s),
                )
            }),
            Some(other) => Err(self.mismatch(key, "a number", other)),
        }
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.mismatch(key, "a boolean", other)),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.bool(key)?.unwrap_or(default))
    }

    /// List of strings
    pub fn strings(&self, key: &str) -> Result<Option<Vec<String>>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let items = value.as_array().ok_or_else(|| self.mismatch(key, "a list", value))?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(Error::translation(
                    self.path.key(key).index(i),
                    TranslationKind::TypeMismatch,
                    format!("expected a string, got {}", other),
                )),
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// List of strings, sorted and de-duplicated
    pub fn string_set(&self, key: &str) -> Result<Option<Vec<String>>> {
        Ok(self.strings(key)?.map(|mut items| {
            items.sort();
            items.dedup();
            items
        }))
    }

    /// List of integers
    pub fn i64s(&self, key: &str) -> Result<Option<Vec<i64>>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let items = value.as_array().ok_or_else(|| self.mismatch(key, "a list", value))?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_i64().ok_or_else(|| {
                    Error::translation(
                        self.path.key(key).index(i),
                        TranslationKind::TypeMismatch,
                        format!("expected an integer, got {}", item),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Map value
    pub fn object(&self, key: &str) -> Result<Option<&'a ConfigMap>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(self.mismatch(key, "a map", other)),
        }
    }

    /// Single block (`{..}` or `[{..}]`)
    pub fn block(&self, key: &str) -> Result<Option<Fields<'a>>> {
        let bpath = self.path.key(key);
        match self.map.get(key) {
            None => Ok(None),
            Some(value) => Ok(block_map(value, &bpath)?.map(|map| Fields::at(map, bpath))),
        }
    }

    /// List of blocks; unset yields an empty list
    pub fn blocks(&self, key: &str) -> Result<Vec<Fields<'a>>> {
        let Some(value) = self.get(key) else {
            return Ok(Vec::new());
        };
        match value {
            Value::Object(map) => Ok(vec![Fields::at(map, self.path.key(key))]),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let ipath = self.path.key(key).index(i);
                    match item {
                        Value::Object(map) => Ok(Fields::at(map, ipath)),
                        other => Err(Error::translation(
                            ipath,
                            TranslationKind::TypeMismatch,
                            format!("expected a block, got {}", other),
                        )),
                    }
                })
                .collect(),
            other => Err(self.mismatch(key, "a list of blocks", other)),
        }
    }

    /// Missing-required error for a key
    pub fn missing(&self, key: &str) -> Error {
        Error::translation(
            self.path.key(key),
            TranslationKind::MissingRequired,
            format!("{} is required", key),
        )
    }

    fn mismatch(&self, key: &str, expected: &str, got: &Value) -> Error {
        Error::translation(
            self.path.key(key),
            TranslationKind::TypeMismatch,
            format!("expected {}, got {}", expected, got),
        )
    }
}

/// Insert `value` when present
pub fn put_opt<T: Into<Value>>(map: &mut ConfigMap, key: &str, value: Option<T>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v.into());
    }
}

/// Insert a non-empty string
pub fn put_non_empty(map: &mut ConfigMap, key: &str, value: Option<&str>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        map.insert(key.to_string(), Value::String(v.to_string()));
    }
}

/// Wrap a map as a single-block configuration value
pub fn single_block(map: ConfigMap) -> Value {
    Value::Array(vec![Value::Object(map)])
}

/// Build a `ConfigMap` from a `json!` literal; non-objects yield an empty map
pub fn config_map(value: Value) -> ConfigMap {
    match value {
        Value::Object(map) => map,
        _ => ConfigMap::new(),
    }
}
