//! Attribute paths into configuration trees
//!
//! A path renders the way users write it:
//! `widget[3].timeseries_definition.request[1].log_query.group_by[0].sort`.
//! Single blocks are stored as one-element lists but are addressed without
//! an index; navigation steps through the lone element transparently.

use serde_json::{Map, Value};
use std::fmt;

/// One step of an attribute path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Map key
    Key(String),
    /// List index
    Index(usize),
}

/// Location of a value inside a configuration tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AttrPath(Vec<Step>);

impl AttrPath {
    /// The empty path
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Extend with a key
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut steps = self.0.clone();
        steps.push(Step::Key(key.into()));
        Self(steps)
    }

    /// Extend with a list index
    pub fn index(&self, index: usize) -> Self {
        let mut steps = self.0.clone();
        steps.push(Step::Index(index));
        Self(steps)
    }

    /// Whether this is the empty path
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Steps of the path
    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no steps
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` starts with `prefix`
    pub fn starts_with(&self, prefix: &AttrPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Resolve the path inside a tree
    pub fn lookup<'a>(&self, root: &'a Map<String, Value>) -> Option<&'a Value> {
        let mut current: Option<&Value> = None;
        for step in &self.0 {
            current = match (current, step) {
                (None, Step::Key(k)) => root.get(k),
                (Some(v), Step::Key(k)) => single(v)?.get(k),
                (Some(Value::Array(items)), Step::Index(i)) => items.get(*i),
                _ => return None,
            };
        }
        current
    }

    /// Store `value` at the path, creating intermediate maps as needed.
    ///
    /// `None` removes the final key. Returns false when the path crosses
    /// a scalar or an out-of-range index.
    pub fn assign(&self, root: &mut Map<String, Value>, value: Option<Value>) -> bool {
        let Some((last, parents)) = self.0.split_last() else {
            return false;
        };

        let mut container = Container::Map(root);
        for (pos, step) in parents.iter().enumerate() {
            let next_is_index = matches!(parents.get(pos + 1).unwrap_or(last), Step::Index(_));
            container = match (container, step) {
                (Container::Map(map), Step::Key(k)) => {
                    let slot = map.entry(k.clone()).or_insert_with(|| {
                        if next_is_index {
                            Value::Array(Vec::new())
                        } else {
                            Value::Array(vec![Value::Object(Map::new())])
                        }
                    });
                    match descend(slot, next_is_index) {
                        Some(c) => c,
                        None => return false,
                    }
                }
                (Container::List(items), Step::Index(i)) => match items.get_mut(*i) {
                    Some(slot) => match descend(slot, next_is_index) {
                        Some(c) => c,
                        None => return false,
                    },
                    None => return false,
                },
                _ => return false,
            };
        }

        match (container, last) {
            (Container::Map(map), Step::Key(k)) => {
                match value {
                    Some(v) => {
                        map.insert(k.clone(), v);
                    }
                    None => {
                        map.remove(k);
                    }
                }
                true
            }
            (Container::List(items), Step::Index(i)) => match value {
                Some(v) if *i < items.len() => {
                    items[*i] = v;
                    true
                }
                Some(v) if *i == items.len() => {
                    items.push(v);
                    true
                }
                None if *i < items.len() => {
                    items.remove(*i);
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}

enum Container<'a> {
    Map(&'a mut Map<String, Value>),
    List(&'a mut Vec<Value>),
}

fn descend(slot: &mut Value, want_list: bool) -> Option<Container<'_>> {
    match slot {
        Value::Array(items) => {
            if want_list {
                return Some(Container::List(items));
            }
            if items.is_empty() {
                items.push(Value::Object(Map::new()));
            }
            match items.as_mut_slice() {
                [Value::Object(map)] => Some(Container::Map(map)),
                _ => None,
            }
        }
        Value::Object(map) if !want_list => Some(Container::Map(map)),
        _ => None,
    }
}

/// View a block value (`{..}` or `[{..}]`) as its map
fn single(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Array(items) if items.len() == 1 => items[0].as_object(),
        _ => None,
    }
}

impl fmt::Display for AttrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        let mut first = true;
        for step in &self.0 {
            match step {
                Step::Key(k) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(k)?;
                }
                Step::Index(i) => write!(f, "[{}]", i)?,
            }
            first = false;
        }
        Ok(())
    }
}
