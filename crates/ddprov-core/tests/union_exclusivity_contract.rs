//! Architectural Contract Test: Tagged Union Exclusivity
//!
//! This test verifies that sibling-block unions are canonicalized into a
//! single variant before anything is sent, and that zero or several
//! present variants are rejected with a located error.
//!
//! Constraints verified:
//! - exactly one variant selects that variant and its block
//! - no variant is MissingRequired, several are AmbiguousUnion
//! - errors are anchored at the block holding the union
//! - empty sibling blocks do not count as present
//! - an unknown wire discriminator is InvalidEnum
//!
//! If this test fails, an ambiguous configuration could reach the remote
//! API or a variant could be silently dropped.

use ddprov_core::error::TranslationKind;
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, Schema};
use ddprov_core::translate::{self, UnionKind, select_variant, variant_for_tag};
use ddprov_core::value::config_map;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processor {
    Grok,
    Remapper,
    Nested,
}

impl UnionKind for Processor {
    const ALL: &'static [Self] = &[Processor::Grok, Processor::Remapper, Processor::Nested];

    fn config_key(self) -> &'static str {
        match self {
            Processor::Grok => "grok_parser",
            Processor::Remapper => "attribute_remapper",
            Processor::Nested => "pipeline",
        }
    }

    fn wire_tag(self) -> &'static str {
        match self {
            Processor::Grok => "grok-parser",
            Processor::Remapper => "attribute-remapper",
            Processor::Nested => "pipeline",
        }
    }
}

#[test]
fn single_variant_is_selected() {
    let block = config_map(json!({
        "grok_parser": [],
        "attribute_remapper": [{"sources": ["a"], "target": "b"}]
    }));
    let (kind, body) = select_variant::<Processor>(&block, &AttrPath::root().key("processor").index(2)).unwrap();
    assert_eq!(kind, Processor::Remapper);
    assert_eq!(body["target"], json!("b"));
}

#[test]
fn missing_variant_is_rejected_at_the_union() {
    let path = AttrPath::root().key("processor").index(0);
    let err = select_variant::<Processor>(&config_map(json!({"grok_parser": []})), &path).unwrap_err();
    assert_eq!(err.translation_kind(), Some(TranslationKind::MissingRequired));
    assert_eq!(err.path().unwrap().to_string(), "processor[0]");
}

#[test]
fn several_variants_are_ambiguous() {
    let path = AttrPath::root().key("processor").index(1);
    let block = config_map(json!({
        "grok_parser": {"source": "message"},
        "pipeline": {"name": "inner"}
    }));
    let err = select_variant::<Processor>(&block, &path).unwrap_err();
    assert_eq!(err.translation_kind(), Some(TranslationKind::AmbiguousUnion));
    assert_eq!(err.path().unwrap().to_string(), "processor[1]");
    assert!(err.to_string().contains("grok_parser"));
    assert!(err.to_string().contains("pipeline"));
}

#[test]
fn wire_discriminators_resolve_exhaustively() {
    let path = AttrPath::root();
    for kind in Processor::ALL {
        assert_eq!(variant_for_tag::<Processor>(Some(kind.wire_tag()), &path).unwrap(), *kind);
    }
    let err = variant_for_tag::<Processor>(Some("lookup-processor"), &path).unwrap_err();
    assert_eq!(err.translation_kind(), Some(TranslationKind::InvalidEnum));
}

#[test]
fn schema_level_unions_are_enforced_by_build() {
    let schema = Schema::new()
        .field(Field::string("q").omit_empty())
        .field(Field::block("apm_query", Schema::new().field(Field::string("index").required())))
        .field(Field::block("log_query", Schema::new().field(Field::string("index").required())))
        .exactly_one_of(&["q", "apm_query", "log_query"]);
    let path = AttrPath::root().key("request").index(0);

    let err = translate::build(
        &schema,
        &config_map(json!({"q": "avg:x{*}", "log_query": [{"index": "main"}]})),
        &path,
    )
    .unwrap_err();
    assert_eq!(err.translation_kind(), Some(TranslationKind::AmbiguousUnion));
    assert_eq!(err.path().unwrap().to_string(), "request[0]");

    let err = translate::build(&schema, &config_map(json!({"apm_query": []})), &path).unwrap_err();
    assert_eq!(err.translation_kind(), Some(TranslationKind::MissingRequired));

    let wire = translate::build(&schema, &config_map(json!({"apm_query": [{"index": "trace-search"}]})), &path).unwrap();
    assert_eq!(wire.get("apm_query"), Some(&json!({"index": "trace-search"})));
    assert!(!wire.contains_key("q"));
}
