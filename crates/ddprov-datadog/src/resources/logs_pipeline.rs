//! `datadog_logs_custom_pipeline`
//!
//! A pipeline is a filter plus an ordered list of processors. Processors are
//! a 15-way union keyed by `<kind>` blocks in configuration and by `type` on
//! the wire; the `pipeline` processor nests a whole pipeline, so build and
//! flatten recurse with a depth cap.
//!
//! Pipeline writes are serialized: the pipeline order list is rewritten by
//! every create and delete on the server side.

use async_trait::async_trait;
use ddprov_core::error::{Error, Result, TranslationKind};
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, FieldType, MAX_DEPTH, NestedSchema, Schema};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::translate::{self, UnionKind, select_variant, variant_for_tag};
use ddprov_core::value::{ConfigMap, single_block};
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::response_id;

const PIPELINE_PATH: &str = "/api/v1/logs/config/pipelines";

pub const KIND: &str = "datadog_logs_custom_pipeline";

/// Processor kinds, in dispatch priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Arithmetic,
    AttributeRemapper,
    Category,
    DateRemapper,
    GeoIpParser,
    GrokParser,
    Lookup,
    MessageRemapper,
    Pipeline,
    ServiceRemapper,
    StatusRemapper,
    StringBuilder,
    TraceIdRemapper,
    UrlParser,
    UserAgentParser,
}

impl UnionKind for ProcessorKind {
    const ALL: &'static [Self] = &[
        ProcessorKind::Arithmetic,
        ProcessorKind::AttributeRemapper,
        ProcessorKind::Category,
        ProcessorKind::DateRemapper,
        ProcessorKind::GeoIpParser,
        ProcessorKind::GrokParser,
        ProcessorKind::Lookup,
        ProcessorKind::MessageRemapper,
        ProcessorKind::Pipeline,
        ProcessorKind::ServiceRemapper,
        ProcessorKind::StatusRemapper,
        ProcessorKind::StringBuilder,
        ProcessorKind::TraceIdRemapper,
        ProcessorKind::UrlParser,
        ProcessorKind::UserAgentParser,
    ];

    fn config_key(self) -> &'static str {
        match self {
            ProcessorKind::Arithmetic => "arithmetic_processor",
            ProcessorKind::AttributeRemapper => "attribute_remapper",
            ProcessorKind::Category => "category_processor",
            ProcessorKind::DateRemapper => "date_remapper",
            ProcessorKind::GeoIpParser => "geo_ip_parser",
            ProcessorKind::GrokParser => "grok_parser",
            ProcessorKind::Lookup => "lookup_processor",
            ProcessorKind::MessageRemapper => "message_remapper",
            ProcessorKind::Pipeline => "pipeline",
            ProcessorKind::ServiceRemapper => "service_remapper",
            ProcessorKind::StatusRemapper => "status_remapper",
            ProcessorKind::StringBuilder => "string_builder_processor",
            ProcessorKind::TraceIdRemapper => "trace_id_remapper",
            ProcessorKind::UrlParser => "url_parser",
            ProcessorKind::UserAgentParser => "user_agent_parser",
        }
    }

    fn wire_tag(self) -> &'static str {
        match self {
            ProcessorKind::Arithmetic => "arithmetic-processor",
            ProcessorKind::AttributeRemapper => "attribute-remapper",
            ProcessorKind::Category => "category-processor",
            ProcessorKind::DateRemapper => "date-remapper",
            ProcessorKind::GeoIpParser => "geo-ip-parser",
            ProcessorKind::GrokParser => "grok-parser",
            ProcessorKind::Lookup => "lookup-processor",
            ProcessorKind::MessageRemapper => "message-remapper",
            ProcessorKind::Pipeline => "pipeline",
            ProcessorKind::ServiceRemapper => "service-remapper",
            ProcessorKind::StatusRemapper => "status-remapper",
            ProcessorKind::StringBuilder => "string-builder-processor",
            ProcessorKind::TraceIdRemapper => "trace-id-remapper",
            ProcessorKind::UrlParser => "url-parser",
            ProcessorKind::UserAgentParser => "user-agent-parser",
        }
    }
}

impl ProcessorKind {
    /// Body schema of this kind, built once
    pub fn schema(self) -> Arc<Schema> {
        static SCHEMAS: LazyLock<Vec<(ProcessorKind, Arc<Schema>)>> = LazyLock::new(|| {
            ProcessorKind::ALL
                .iter()
                .map(|kind| (*kind, kind.definition().into_arc()))
                .collect()
        });
        SCHEMAS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, schema)| schema.clone())
            .unwrap_or_else(|| self.definition().into_arc())
    }

    fn definition(self) -> Schema {
        match self {
            ProcessorKind::Arithmetic => base().fields([
                Field::string("expression").required(),
                Field::string("target").required(),
                Field::bool("is_replace_missing").omit_empty(),
            ]),
            ProcessorKind::AttributeRemapper => base().fields([
                Field::string_list("sources").required(),
                Field::string("source_type").required().one_of(&["attribute", "tag"]),
                Field::string("target").required(),
                Field::string("target_type").required().one_of(&["attribute", "tag"]),
                Field::string("target_format").omit_empty().one_of(&["auto", "string", "integer", "double"]),
                Field::bool("preserve_source").omit_empty(),
                Field::bool("override_on_conflict").omit_empty(),
            ]),
            ProcessorKind::Category => {
                let category = Schema::new().fields([
                    Field::block("filter", filter()).required(),
                    Field::string("name").required(),
                ]);
                base().fields([
                    Field::string("target").required(),
                    Field::block_list("category", category).wire_key("categories").required(),
                ])
            }
            ProcessorKind::GeoIpParser | ProcessorKind::UrlParser | ProcessorKind::UserAgentParser => {
                let schema = base().fields([
                    Field::string_list("sources").required(),
                    Field::string("target").required(),
                ]);
                match self {
                    ProcessorKind::UrlParser => schema.field(Field::bool("normalize_ending_slashes").omit_empty()),
                    ProcessorKind::UserAgentParser => schema.field(Field::bool("is_encoded").omit_empty()),
                    _ => schema,
                }
            }
            ProcessorKind::GrokParser => {
                let grok = Schema::new().fields([
                    Field::string("support_rules").required(),
                    Field::string("match_rules").required(),
                ]);
                base().fields([
                    Field::string("source").required(),
                    Field::string_list("samples").omit_empty(),
                    Field::block("grok", grok).required(),
                ])
            }
            ProcessorKind::Lookup => base().fields([
                Field::string("source").required(),
                Field::string("target").required(),
                Field::string_list("lookup_table").required(),
                Field::string("default_lookup").omit_empty(),
            ]),
            ProcessorKind::DateRemapper
            | ProcessorKind::MessageRemapper
            | ProcessorKind::ServiceRemapper
            | ProcessorKind::StatusRemapper
            | ProcessorKind::TraceIdRemapper => base().field(Field::string_list("sources").required()),
            ProcessorKind::StringBuilder => base().fields([
                Field::string("template").required(),
                Field::string("target").required(),
                Field::bool("is_replace_missing").omit_empty(),
            ]),
            ProcessorKind::Pipeline => pipeline_body(),
        }
    }
}

/// `name` / `is_enabled`, shared by every processor
fn base() -> Schema {
    Schema::new().fields([
        Field::string("name").omit_empty(),
        Field::bool("is_enabled").default(false),
    ])
}

fn filter() -> Schema {
    Schema::new().field(Field::string("query").required())
}

/// Fields of a pipeline, top level or nested
fn pipeline_body() -> Schema {
    Schema::new().fields([
        Field::string("name").required(),
        Field::bool("is_enabled").default(false),
        Field::block("filter", filter()).required(),
        Field::block_list_deferred("processor", processor_schema)
            .wire_key("processors")
            .omit_empty()
            .manual(),
    ])
}

/// Schema of one processor entry (every kind)
pub fn processor_schema() -> Arc<Schema> {
    static SCHEMA: LazyLock<Arc<Schema>> = LazyLock::new(|| {
        let keys = ProcessorKind::config_keys();
        ProcessorKind::ALL
            .iter()
            .fold(Schema::new(), |schema, kind| {
                let nested = FieldType::Nested(NestedSchema::Inline(kind.schema()));
                schema.field(Field::new(kind.config_key(), FieldType::List(Box::new(nested))).max_items(1))
            })
            .exactly_one_of(&keys)
            .into_arc()
    });
    SCHEMA.clone()
}

pub fn schema() -> Schema {
    pipeline_body()
}

fn depth_error(path: &AttrPath) -> Error {
    Error::translation(
        path.clone(),
        TranslationKind::TypeMismatch,
        format!("pipelines nest deeper than {} levels", MAX_DEPTH),
    )
}

/// Build the wire form of one processor
///
/// # Parameters
///
/// - `config`: Processor entry (`{"grok_parser": [..]}`)
/// - `path`: Location of the entry, e.g. `processor[2]`
/// - `depth`: Pipeline nesting level of the entry
pub fn build_processor(config: &ConfigMap, path: &AttrPath, depth: usize) -> Result<Map<String, Value>> {
    if depth > MAX_DEPTH {
        return Err(depth_error(path));
    }
    let (kind, body) = select_variant::<ProcessorKind>(config, path)?;
    let body_path = path.key(kind.config_key());
    let mut wire = translate::build(&kind.schema(), body, &body_path)?;
    wire.insert("type".to_string(), Value::String(kind.wire_tag().to_string()));
    if kind == ProcessorKind::Pipeline {
        let processors = build_processors(body.get("processor"), &body_path.key("processor"), depth + 1)?;
        wire.insert("processors".to_string(), Value::Array(processors));
    }
    Ok(wire)
}

fn build_processors(value: Option<&Value>, path: &AttrPath, depth: usize) -> Result<Vec<Value>> {
    let items = match value {
        Some(Value::Array(items)) => items.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => {
            return Err(Error::translation(
                path.clone(),
                TranslationKind::TypeMismatch,
                "expected a list of processors",
            ));
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let ppath = path.index(i);
            let map = item.as_object().ok_or_else(|| {
                Error::translation(ppath.clone(), TranslationKind::TypeMismatch, "expected a processor block")
            })?;
            build_processor(map, &ppath, depth).map(Value::Object)
        })
        .collect()
}

/// Flatten one wire processor into its configuration entry
pub fn flatten_processor(wire: &Map<String, Value>, path: &AttrPath, depth: usize) -> Result<ConfigMap> {
    if depth > MAX_DEPTH {
        return Err(depth_error(path));
    }
    let kind = variant_for_tag::<ProcessorKind>(wire.get("type").and_then(Value::as_str), path)?;
    let body_path = path.key(kind.config_key());
    let mut body = translate::flatten(&kind.schema(), wire, &body_path)?;
    if kind == ProcessorKind::Pipeline {
        let processors = flatten_processors(wire.get("processors"), &body_path.key("processor"), depth + 1)?;
        body.insert("processor".to_string(), Value::Array(processors));
    }
    let mut flat = ConfigMap::new();
    flat.insert(kind.config_key().to_string(), single_block(body));
    Ok(flat)
}

fn flatten_processors(value: Option<&Value>, path: &AttrPath, depth: usize) -> Result<Vec<Value>> {
    let items = value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let ppath = path.index(i);
            let map = item.as_object().ok_or_else(|| {
                Error::translation(ppath.clone(), TranslationKind::TypeMismatch, "expected a processor object")
            })?;
            flatten_processor(map, &ppath, depth).map(Value::Object)
        })
        .collect()
}

/// Wire entity for a configuration
pub fn build_pipeline(config: &ConfigMap) -> Result<Value> {
    let mut wire = translate::build(&schema(), config, &AttrPath::root())?;
    let processors = build_processors(config.get("processor"), &AttrPath::root().key("processor"), 1)?;
    wire.insert("processors".to_string(), Value::Array(processors));
    Ok(Value::Object(wire))
}

/// Configuration view of a wire entity
pub fn flatten_pipeline(wire: &Value) -> Result<ConfigMap> {
    let map = wire
        .as_object()
        .ok_or_else(|| Error::Other("pipeline response is not an object".to_string()))?;
    let mut flat = translate::flatten(&schema(), map, &AttrPath::root())?;
    let processors = flatten_processors(map.get("processors"), &AttrPath::root().key("processor"), 1)?;
    flat.insert("processor".to_string(), Value::Array(processors));
    Ok(flat)
}

/// Resource implementation for custom log pipelines
pub struct LogsPipelineResource {
    descriptor: ResourceDescriptor,
    write_lock: Mutex<()>,
}

impl LogsPipelineResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()),
            write_lock: Mutex::new(()),
        }
    }
}

impl Default for LogsPipelineResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for LogsPipelineResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = build_pipeline(bag.config())?;
        let _guard = self.write_lock.lock().await;
        let created = ctx.call_json(ApiRequest::post(PIPELINE_PATH, body)).await?;
        let id = response_id(&created, "/id")?;
        info!("Logs pipeline {} created", id);
        bag.set_id(id);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let wire = match ctx.call_json(ApiRequest::get(format!("{}/{}", PIPELINE_PATH, id))).await {
            Ok(wire) => wire,
            // unknown pipeline ids answer 400, not 404
            Err(Error::RemoteRejected { status: 400, .. }) => {
                warn!("Logs pipeline {} no longer exists", id);
                bag.clear_id();
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let state = flatten_pipeline(&wire)?;
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let body = build_pipeline(bag.config())?;
        let _guard = self.write_lock.lock().await;
        ctx.call(ApiRequest::put(format!("{}/{}", PIPELINE_PATH, id), body)).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let _guard = self.write_lock.lock().await;
        match ctx.call(ApiRequest::delete(format!("{}/{}", PIPELINE_PATH, id))).await {
            Ok(_) => Ok(()),
            Err(Error::RemoteRejected { status: 400, .. }) => {
                debug!("Logs pipeline {} was already gone", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddprov_core::diff;
    use ddprov_core::schema::validate;
    use ddprov_core::value::config_map;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pipeline() -> ConfigMap {
        config_map(json!({
            "name": "nginx",
            "is_enabled": true,
            "filter": [{"query": "source:nginx"}],
            "processor": [
                {"grok_parser": [{
                    "name": "access",
                    "is_enabled": true,
                    "source": "message",
                    "samples": ["GET /index.html 200"],
                    "grok": [{"support_rules": "", "match_rules": "rule %{word:method} %{notSpace:path} %{integer:status}"}]
                }]},
                {"category_processor": [{
                    "target": "http.status_category",
                    "category": [
                        {"name": "OK", "filter": [{"query": "@http.status_code:[200 TO 299]"}]},
                        {"name": "Error", "filter": [{"query": "@http.status_code:[500 TO 599]"}]}
                    ]
                }]},
                {"pipeline": [{
                    "name": "inner",
                    "filter": [{"query": "env:prod"}],
                    "processor": [{"status_remapper": [{"sources": ["level"]}]}]
                }]}
            ]
        }))
    }

    #[test]
    fn test_build_tags_processors_and_keeps_order() {
        let config = pipeline();
        assert!(validate(&config, &schema()).is_ok());
        let wire = build_pipeline(&config).unwrap();
        let processors = wire["processors"].as_array().unwrap();
        assert_eq!(processors[0]["type"], json!("grok-parser"));
        assert_eq!(processors[0]["grok"]["match_rules"], json!("rule %{word:method} %{notSpace:path} %{integer:status}"));
        assert_eq!(processors[1]["categories"][1]["filter"]["query"], json!("@http.status_code:[500 TO 599]"));
        assert_eq!(processors[2]["type"], json!("pipeline"));
        assert_eq!(processors[2]["processors"][0]["type"], json!("status-remapper"));
        assert_eq!(wire["filter"], json!({"query": "source:nginx"}));
    }

    #[test]
    fn test_read_back_has_no_diff() {
        let config = pipeline();
        let mut wire = build_pipeline(&config).unwrap();
        wire["id"] = json!("p-123");
        wire["type"] = json!("pipeline");
        wire["is_read_only"] = json!(false);

        let state = flatten_pipeline(&wire).unwrap();
        assert_eq!(state["processor"][2]["pipeline"][0]["processor"][0]["status_remapper"][0]["sources"], json!(["level"]));
        let d = diff::diff(&schema(), &state, &config);
        assert!(d.is_empty(), "unexpected changes: {:?}", d.paths());
    }

    #[test]
    fn test_reordered_processors_are_a_change() {
        let config = pipeline();
        let state = flatten_pipeline(&build_pipeline(&config).unwrap()).unwrap();
        let mut desired = config.clone();
        let processors = desired["processor"].as_array_mut().unwrap();
        processors.swap(0, 1);
        assert!(diff::diff(&schema(), &state, &desired).touches("processor"));
    }

    #[test]
    fn test_processor_needs_exactly_one_kind() {
        let path = AttrPath::root().key("processor").index(0);
        let both = config_map(json!({
            "date_remapper": [{"sources": ["ts"]}],
            "message_remapper": [{"sources": ["msg"]}]
        }));
        let err = build_processor(&both, &path, 1).unwrap_err();
        assert_eq!(err.translation_kind(), Some(TranslationKind::AmbiguousUnion));
    }

    #[test]
    fn test_unknown_wire_type_is_rejected() {
        let wire = json!({"type": "mystery-processor"});
        let err = flatten_processor(wire.as_object().unwrap(), &AttrPath::root(), 1).unwrap_err();
        assert_eq!(err.translation_kind(), Some(TranslationKind::InvalidEnum));
    }

    #[test]
    fn test_nesting_is_capped() {
        let mut processor = json!({"status_remapper": [{"sources": ["level"]}]});
        for _ in 0..MAX_DEPTH + 1 {
            processor = json!({"pipeline": [{
                "name": "n",
                "filter": [{"query": "*"}],
                "processor": [processor]
            }]});
        }
        let config = config_map(json!({
            "name": "deep",
            "filter": [{"query": "*"}],
            "processor": [processor]
        }));
        assert!(build_pipeline(&config).is_err());
    }
}
