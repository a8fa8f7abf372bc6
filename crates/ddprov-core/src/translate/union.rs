//! Tagged-union dispatch
//!
//! Configuration spells a union as sibling blocks (`note_definition`,
//! `timeseries_definition`, ...) of which exactly one is present. Resource
//! code canonicalizes that shape into a sum type implementing
//! [`UnionKind`] right away and dispatches on it exhaustively; the wire
//! side carries an explicit discriminator string.

use crate::error::{Error, Result, TranslationKind};
use crate::path::AttrPath;
use crate::schema::is_set;
use serde_json::{Map, Value};
use std::fmt::Debug;

/// A closed set of union variants
pub trait UnionKind: Copy + Eq + Debug + Send + Sync + 'static {
    /// Every variant, in dispatch priority order
    const ALL: &'static [Self];

    /// Sibling block name in configuration
    fn config_key(self) -> &'static str;

    /// Discriminator on the wire
    fn wire_tag(self) -> &'static str;

    /// Variant for a wire discriminator
    fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.wire_tag() == tag)
    }

    /// Every sibling block name
    fn config_keys() -> Vec<&'static str> {
        Self::ALL.iter().map(|k| k.config_key()).collect()
    }
}

/// Pick the single present variant of a sibling-block union.
///
/// Keys are inspected in priority order. Returns the variant and its
/// block map; zero or several present variants are errors.
pub fn select_variant<'a, K: UnionKind>(
    config: &'a Map<String, Value>,
    path: &AttrPath,
) -> Result<(K, &'a Map<String, Value>)> {
    let present: Vec<K> = K::ALL
        .iter()
        .copied()
        .filter(|k| is_set(config.get(k.config_key())))
        .collect();

    let kind = match present.as_slice() {
        [only] => *only,
        [] => {
            return Err(Error::translation(
                path.clone(),
                TranslationKind::MissingRequired,
                format!("exactly one of [{}] must be set", K::config_keys().join(", ")),
            ));
        }
        many => {
            let names: Vec<&str> = many.iter().map(|k| k.config_key()).collect();
            return Err(Error::translation(
                path.clone(),
                TranslationKind::AmbiguousUnion,
                format!("only one variant may be set, found [{}]", names.join(", ")),
            ));
        }
    };

    let bpath = path.key(kind.config_key());
    let block = config
        .get(kind.config_key())
        .map(|v| super::block_map(v, &bpath))
        .transpose()?
        .flatten()
        .ok_or_else(|| {
            Error::translation(bpath.clone(), TranslationKind::TypeMismatch, "expected a block")
        })?;
    Ok((kind, block))
}

/// Resolve a wire discriminator
pub fn variant_for_tag<K: UnionKind>(tag: Option<&str>, path: &AttrPath) -> Result<K> {
    let tag = tag.ok_or_else(|| {
        Error::translation(path.clone(), TranslationKind::MissingRequired, "missing type discriminator")
    })?;
    K::from_tag(tag).ok_or_else(|| {
        Error::translation(
            path.clone(),
            TranslationKind::InvalidEnum,
            format!("unsupported type {:?}", tag),
        )
    })
}
