//! `datadog_security_monitoring_rule`
//!
//! One resource covers three rule shapes that share a payload but differ
//! in which query and case lists they carry:
//!
//! - standard detection rules: `query` blocks and `case` blocks
//! - third-party rules (`detection_method = "third_party"`): `third_party_case`
//! - signal correlation rules (`type = "signal_correlation"`): `signal_query`
//!   blocks referencing other rules, plus `case` blocks
//!
//! Scalar fields, options and filters go through the table-driven
//! translator; the shape-dependent lists are built here.

use super::response_id;
use async_trait::async_trait;
use ddprov_core::diff::DiffRule;
use ddprov_core::error::{Error, Result, TranslationKind};
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, Schema, Validator};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::translate;
use ddprov_core::value::{ConfigMap, Fields};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

pub(crate) const RULES_PATH: &str = "/api/v2/security_monitoring/rules";

pub const KIND: &str = "datadog_security_monitoring_rule";

const RULE_TYPES: &[&str] = &["application_security", "log_detection", "workload_security", "signal_correlation"];

const SEVERITIES: &[&str] = &["info", "low", "medium", "high", "critical"];

const AGGREGATIONS: &[&str] = &["count", "cardinality", "sum", "max", "new_value", "geo_data", "event_count", "none"];

/// Windows accepted by evaluation, keep-alive and max-signal durations (seconds)
const WINDOWS: &[i64] = &[0, 60, 300, 600, 900, 1800, 3600, 7200, 10800, 21600, 43200, 86400];

/// Payload shape of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleShape {
    Standard,
    ThirdParty,
    SignalCorrelation,
}

impl RuleShape {
    /// Shape selected by a configuration
    pub fn of_config(config: &ConfigMap) -> Result<Self> {
        let f = Fields::new(config);
        let method = match f.block("options")? {
            Some(options) => options.str("detection_method")?.map(str::to_string),
            None => None,
        };
        Ok(Self::select(f.str("type")?, method.as_deref()))
    }

    /// Shape of a rule returned by the API
    pub fn of_wire(wire: &Map<String, Value>) -> Self {
        let method = wire.get("options").and_then(|o| o.get("detectionMethod")).and_then(Value::as_str);
        Self::select(wire.get("type").and_then(Value::as_str), method)
    }

    fn select(rule_type: Option<&str>, detection_method: Option<&str>) -> Self {
        if rule_type == Some("signal_correlation") {
            RuleShape::SignalCorrelation
        } else if detection_method == Some("third_party") {
            RuleShape::ThirdParty
        } else {
            RuleShape::Standard
        }
    }
}

fn window(value: &Value) -> std::result::Result<(), String> {
    match value.as_i64() {
        Some(n) if WINDOWS.contains(&n) => Ok(()),
        _ => Err(format!("{} is not a supported window, expected one of {:?}", value, WINDOWS)),
    }
}

fn learning_duration(value: &Value) -> std::result::Result<(), String> {
    match value.as_i64() {
        Some(0 | 1 | 7) => Ok(()),
        _ => Err(format!("learning_duration must be 0, 1 or 7 days, got {}", value)),
    }
}

fn forget_after(value: &Value) -> std::result::Result<(), String> {
    match value.as_i64() {
        Some(1 | 2 | 7 | 14 | 21 | 28) => Ok(()),
        _ => Err(format!("forget_after must be one of 1, 2, 7, 14, 21 or 28 days, got {}", value)),
    }
}

fn options_schema() -> Schema {
    let new_value = Schema::new().fields([
        Field::string("learning_method")
            .wire_key("learningMethod")
            .default("duration")
            .one_of(&["duration", "threshold"]),
        Field::int("learning_duration")
            .wire_key("learningDuration")
            .default(1)
            .validator(Validator::Custom(learning_duration)),
        Field::int("learning_threshold")
            .wire_key("learningThreshold")
            .default(0)
            .validator(Validator::IntRange { min: 0, max: 1 }),
        Field::int("forget_after")
            .wire_key("forgetAfter")
            .required()
            .validator(Validator::Custom(forget_after)),
    ]);
    let impossible_travel = Schema::new().field(
        Field::bool("baseline_user_locations")
            .wire_key("baselineUserLocations")
            .default(false),
    );
    let anomaly = Schema::new().fields([
        Field::int("bucket_duration").wire_key("bucketDuration").omit_empty(),
        Field::int("learning_duration").wire_key("learningDuration").omit_empty(),
        Field::int("detection_tolerance")
            .wire_key("detectionTolerance")
            .omit_empty()
            .validator(Validator::IntRange { min: 1, max: 5 }),
        Field::int("learning_period_baseline").wire_key("learningPeriodBaseline").omit_empty(),
    ]);
    let root_query = Schema::new().fields([
        Field::string("query").required(),
        Field::string_list("group_by_fields").wire_key("groupByFields").omit_empty(),
    ]);
    let third_party = Schema::new().fields([
        Field::string_list("default_notifications")
            .wire_key("defaultNotifications")
            .omit_empty(),
        Field::string("default_status")
            .wire_key("defaultStatus")
            .required()
            .one_of(SEVERITIES),
        Field::string("signal_title_template")
            .wire_key("signalTitleTemplate")
            .omit_empty(),
        Field::block_list("root_query", root_query)
            .wire_key("rootQueries")
            .required()
            .max_items(10),
    ]);
    let step = Schema::new().fields([
        Field::string("name").required(),
        Field::string("condition").required(),
        Field::int("evaluation_window")
            .wire_key("evaluationWindow")
            .omit_empty()
            .validator(Validator::Custom(window)),
    ]);
    let transition = Schema::new().fields([
        Field::string("parent").required(),
        Field::string("child").required(),
        Field::int("evaluation_window")
            .wire_key("evaluationWindow")
            .omit_empty()
            .validator(Validator::Custom(window)),
    ]);
    let sequence = Schema::new().fields([
        Field::block_list("steps", step).required(),
        Field::block_list("step_transitions", transition)
            .wire_key("stepTransitions")
            .omit_empty(),
    ]);

    Schema::new().fields([
        Field::string("detection_method")
            .wire_key("detectionMethod")
            .default("threshold")
            .one_of(&[
                "threshold",
                "new_value",
                "anomaly_detection",
                "impossible_travel",
                "hardcoded",
                "third_party",
                "anomaly_threshold",
                "sequence_detection",
            ]),
        Field::int("evaluation_window")
            .wire_key("evaluationWindow")
            .validator(Validator::Custom(window)),
        Field::int("keep_alive").wire_key("keepAlive").validator(Validator::Custom(window)),
        Field::int("max_signal_duration")
            .wire_key("maxSignalDuration")
            .validator(Validator::Custom(window)),
        Field::bool("decrease_criticality_based_on_env")
            .wire_key("decreaseCriticalityBasedOnEnv")
            .default(false)
            .describe("Only honoured by log_detection rules."),
        Field::block("new_value_options", new_value).wire_key("newValueOptions"),
        Field::block("impossible_travel_options", impossible_travel).wire_key("impossibleTravelOptions"),
        Field::block("anomaly_detection_options", anomaly).wire_key("anomalyDetectionOptions"),
        Field::block("third_party_rule_options", third_party).wire_key("thirdPartyRuleOptions"),
        Field::block("sequence_detection_options", sequence).wire_key("sequenceDetectionOptions"),
    ])
}

/// One `case` block
pub fn case_schema() -> Schema {
    let action_options = Schema::new().field(Field::int("duration").omit_empty());
    let action = Schema::new().fields([
        Field::string("type")
            .required()
            .one_of(&["block_ip", "block_user", "user_behavior", "flag_ip"]),
        Field::block("options", action_options).omit_empty(),
    ]);
    Schema::new().fields([
        Field::string("name").omit_empty(),
        Field::string("condition").omit_empty(),
        Field::string_list("notifications").omit_empty(),
        Field::string("status").required().one_of(SEVERITIES),
        Field::block_list("action", action).wire_key("actions").omit_empty(),
    ])
}

/// One `third_party_case` block
pub fn third_party_case_schema() -> Schema {
    Schema::new().fields([
        Field::string("name").omit_empty(),
        Field::string("query").omit_empty(),
        Field::string_list("notifications").omit_empty(),
        Field::string("status").required().one_of(SEVERITIES),
    ])
}

/// One standard `query` block; `indexes` maps to the single wire `index`
pub fn query_schema() -> Schema {
    Schema::new().fields([
        Field::string("aggregation").default("count").one_of(AGGREGATIONS),
        Field::string_list("distinct_fields").wire_key("distinctFields").omit_empty(),
        Field::string_list("group_by_fields").wire_key("groupByFields").omit_empty(),
        Field::bool("has_optional_group_by_fields")
            .wire_key("hasOptionalGroupByFields")
            .default(false),
        Field::string("data_source")
            .wire_key("dataSource")
            .default("logs")
            .one_of(&["logs", "audit", "app_sec_spans", "spans", "security_runtime", "network", "events"]),
        Field::string("metric")
            .omit_empty()
            .deprecated("Use `metrics` instead."),
        Field::string_list("metrics").omit_empty(),
        Field::string("name").omit_empty(),
        Field::string("query").required(),
        Field::string_list("indexes").max_items(1).omit_empty().manual(),
    ])
}

/// One `signal_query` block; `correlated_query_index` is text in
/// configuration and an integer on the wire
pub fn signal_query_schema() -> Schema {
    Schema::new().fields([
        Field::string("aggregation").default("event_count").one_of(AGGREGATIONS),
        Field::string("name").omit_empty(),
        Field::string_list("correlated_by_fields")
            .wire_key("correlatedByFields")
            .omit_empty(),
        Field::string("correlated_query_index").omit_empty().manual(),
        Field::string("rule_id").wire_key("ruleId").required(),
        Field::string("default_rule_id")
            .wire_key("defaultRuleId")
            .computed()
            .describe("Default rule id of the referenced rule, when it is a managed rule."),
    ])
}

pub fn schema() -> Schema {
    let filter = Schema::new().fields([
        Field::string("query").required(),
        Field::string("action").required().one_of(&["require", "suppress"]),
    ]);
    let reference_table = Schema::new().fields([
        Field::string("table_name").wire_key("tableName").required().validator(Validator::NotEmpty),
        Field::string("column_name").wire_key("columnName").required().validator(Validator::NotEmpty),
        Field::string("log_field_path").wire_key("logFieldPath").required().validator(Validator::NotEmpty),
        Field::string("rule_query_name").wire_key("ruleQueryName").required().validator(Validator::NotEmpty),
        Field::bool("check_presence").wire_key("checkPresence").required(),
    ]);
    let calculated = Schema::new().fields([
        Field::string("name").required().validator(Validator::NotEmpty),
        Field::string("expression").required().validator(Validator::NotEmpty),
    ]);
    let scheduling = Schema::new().fields([
        Field::string("rrule").required(),
        Field::string("start").required(),
        Field::string("timezone").required(),
    ]);

    Schema::new()
        .fields([
            Field::string("name").required().describe("The name of the rule."),
            Field::string("message").required().describe("Message for generated signals."),
            Field::bool("enabled").wire_key("isEnabled").default(true),
            Field::bool("has_extended_title").wire_key("hasExtendedTitle").default(false),
            Field::string("type")
                .default("log_detection")
                .one_of(RULE_TYPES)
                .force_new(),
            Field::string_set("tags").omit_empty(),
            Field::block_list("filter", filter).wire_key("filters").omit_empty(),
            Field::block_list("reference_tables", reference_table)
                .wire_key("referenceTables")
                .omit_empty(),
            Field::string_list("group_signals_by").wire_key("groupSignalsBy").omit_empty(),
            Field::block_list("calculated_field", calculated)
                .wire_key("calculatedFields")
                .omit_empty(),
            Field::block("scheduling_options", scheduling).wire_key("schedulingOptions"),
            Field::block("options", options_schema()).optional_computed(),
            Field::block_list("query", query_schema()).omit_empty().manual(),
            Field::block_list("signal_query", signal_query_schema()).omit_empty().manual(),
            Field::block_list("case", case_schema()).max_items(10).omit_empty().manual(),
            Field::block_list("third_party_case", third_party_case_schema())
                .max_items(10)
                .omit_empty()
                .manual(),
            Field::bool("validate").manual().diff(DiffRule::Ignore),
        ])
        .at_most_one_of(&["query", "signal_query"])
}

fn build_blocks(schema: &Schema, f: &Fields<'_>, key: &str) -> Result<Vec<Map<String, Value>>> {
    f.blocks(key)?
        .iter()
        .map(|block| translate::build(schema, block.map(), block.path()))
        .collect()
}

fn build_queries(f: &Fields<'_>) -> Result<Vec<Value>> {
    let schema = query_schema();
    let mut queries = Vec::new();
    for (block, mut wire) in f.blocks("query")?.iter().zip(build_blocks(&schema, f, "query")?) {
        if let Some(index) = block.strings("indexes")?.and_then(|i| i.into_iter().next()) {
            wire.insert("index".to_string(), Value::String(index));
        }
        queries.push(Value::Object(wire));
    }
    Ok(queries)
}

fn build_signal_queries(f: &Fields<'_>) -> Result<Vec<Value>> {
    let schema = signal_query_schema();
    let mut queries = Vec::new();
    for (block, mut wire) in f.blocks("signal_query")?.iter().zip(build_blocks(&schema, f, "signal_query")?) {
        if let Some(text) = block.str("correlated_query_index")?.filter(|s| !s.is_empty()) {
            let index: i32 = text.trim().parse().map_err(|_| {
                Error::translation(
                    block.path().key("correlated_query_index"),
                    TranslationKind::ParseError,
                    format!("{:?} is not a query index", text),
                )
            })?;
            wire.insert("correlatedQueryIndex".to_string(), index.into());
        }
        queries.push(Value::Object(wire));
    }
    Ok(queries)
}

fn objects(items: Vec<Map<String, Value>>) -> Value {
    Value::Array(items.into_iter().map(Value::Object).collect())
}

/// Wire payload for a configuration
pub fn build_rule(config: &ConfigMap) -> Result<Map<String, Value>> {
    let f = Fields::new(config);
    let mut wire = translate::build(&schema(), config, &AttrPath::root())?;

    match RuleShape::of_config(config)? {
        RuleShape::Standard => {
            wire.insert("queries".to_string(), Value::Array(build_queries(&f)?));
            wire.insert("cases".to_string(), objects(build_blocks(&case_schema(), &f, "case")?));
        }
        RuleShape::ThirdParty => {
            let cases = build_blocks(&third_party_case_schema(), &f, "third_party_case")?;
            wire.insert("thirdPartyCases".to_string(), objects(cases));
        }
        RuleShape::SignalCorrelation => {
            wire.insert("queries".to_string(), Value::Array(build_signal_queries(&f)?));
            wire.insert("cases".to_string(), objects(build_blocks(&case_schema(), &f, "case")?));
            for key in ["referenceTables", "groupSignalsBy", "calculatedFields", "schedulingOptions"] {
                wire.remove(key);
            }
        }
    }

    if f.str("type")?.unwrap_or("log_detection") != "log_detection" {
        if let Some(Value::Object(options)) = wire.get_mut("options") {
            options.remove("decreaseCriticalityBasedOnEnv");
        }
    }
    Ok(wire)
}

/// Update payload: the full rule minus `type`, with cleared lists sent
/// explicitly so the server drops them
pub fn build_update(bag: &StateBag) -> Result<Map<String, Value>> {
    let config = bag.config();
    let shape = RuleShape::of_config(config)?;
    let mut wire = build_rule(config)?;
    wire.remove("type");

    for key in ["tags", "filters"] {
        wire.entry(key).or_insert_with(|| json!([]));
    }
    if shape != RuleShape::SignalCorrelation {
        wire.entry("calculatedFields").or_insert_with(|| json!([]));
        wire.entry("schedulingOptions").or_insert(Value::Null);
        for (field, key) in [("reference_tables", "referenceTables"), ("group_signals_by", "groupSignalsBy")] {
            if bag.prior(field).is_some_and(|v| ddprov_core::schema::is_set(Some(v))) {
                wire.entry(key).or_insert_with(|| json!([]));
            }
        }
    }
    Ok(wire)
}

fn flatten_blocks(schema: &Schema, wire: &Map<String, Value>, key: &str, path: &AttrPath) -> Result<Vec<ConfigMap>> {
    let items = wire.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let ipath = path.index(i);
            let map = item.as_object().ok_or_else(|| {
                Error::translation(ipath.clone(), TranslationKind::TypeMismatch, format!("expected an object in {}", key))
            })?;
            translate::flatten(schema, map, &ipath)
        })
        .collect()
}

fn put_blocks(state: &mut ConfigMap, key: &str, blocks: Vec<ConfigMap>) {
    if !blocks.is_empty() {
        state.insert(key.to_string(), objects(blocks));
    }
}

/// Configuration view of a rule returned by the API
pub fn flatten_rule(wire: &Value, config: &ConfigMap) -> Result<ConfigMap> {
    let map = wire
        .as_object()
        .ok_or_else(|| Error::Other("security rule response is not an object".to_string()))?;
    let root = AttrPath::root();
    let mut state = translate::flatten(&schema(), map, &root)?;

    match RuleShape::of_wire(map) {
        RuleShape::Standard => {
            let mut queries = flatten_blocks(&query_schema(), map, "queries", &root.key("query"))?;
            for (query, item) in queries.iter_mut().zip(map.get("queries").and_then(Value::as_array).into_iter().flatten()) {
                if let Some(index) = item.get("index").and_then(Value::as_str) {
                    query.insert("indexes".to_string(), json!([index]));
                }
            }
            put_blocks(&mut state, "query", queries);
            put_blocks(&mut state, "case", flatten_blocks(&case_schema(), map, "cases", &root.key("case"))?);
        }
        RuleShape::ThirdParty => {
            let cases = flatten_blocks(&third_party_case_schema(), map, "thirdPartyCases", &root.key("third_party_case"))?;
            put_blocks(&mut state, "third_party_case", cases);
        }
        RuleShape::SignalCorrelation => {
            let mut queries = flatten_blocks(&signal_query_schema(), map, "queries", &root.key("signal_query"))?;
            for (query, item) in queries.iter_mut().zip(map.get("queries").and_then(Value::as_array).into_iter().flatten()) {
                if let Some(index) = item.get("correlatedQueryIndex").and_then(Value::as_i64) {
                    query.insert("correlated_query_index".to_string(), Value::String(index.to_string()));
                }
            }
            put_blocks(&mut state, "signal_query", queries);
            put_blocks(&mut state, "case", flatten_blocks(&case_schema(), map, "cases", &root.key("case"))?);
        }
    }

    if let Some(v) = config.get("validate").filter(|v| !v.is_null()) {
        state.insert("validate".to_string(), v.clone());
    }
    Ok(state)
}

/// Resource implementation for security monitoring rules
pub struct SecurityRuleResource {
    descriptor: ResourceDescriptor,
}

impl SecurityRuleResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()),
        }
    }

    /// Server-side check of the rule before it is created
    async fn preflight(&self, ctx: &OpContext, bag: &StateBag, body: &Map<String, Value>) -> Result<()> {
        if !Fields::new(bag.config()).bool_or("validate", false)? {
            return Ok(());
        }
        debug!("Validating security rule definition");
        let path = format!("{}/validation", RULES_PATH);
        ctx.call(ApiRequest::post(path, Value::Object(body.clone()))).await?;
        Ok(())
    }
}

impl Default for SecurityRuleResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for SecurityRuleResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), Vec<Error>> {
        let f = Fields::new(config);
        let root = AttrPath::root();
        let mut errors = Vec::new();
        let shape = match RuleShape::of_config(config) {
            Ok(shape) => shape,
            Err(e) => return Err(vec![e]),
        };

        if f.is_set("query") && f.is_set("signal_query") {
            errors.push(Error::config("query and signal_query cannot both be set"));
        }
        match shape {
            RuleShape::SignalCorrelation => {
                if f.is_set("query") {
                    errors.push(Error::config_at(
                        root.key("query"),
                        "query is not supported by signal_correlation rules, use signal_query",
                    ));
                }
            }
            RuleShape::Standard | RuleShape::ThirdParty => {
                if f.is_set("signal_query") {
                    errors.push(Error::config_at(
                        root.key("signal_query"),
                        "signal_query is only supported by signal_correlation rules",
                    ));
                }
            }
        }
        if f.is_set("third_party_case") && shape != RuleShape::ThirdParty {
            errors.push(Error::config_at(
                root.key("third_party_case"),
                "third_party_case requires options.detection_method = \"third_party\"",
            ));
        }
        if shape == RuleShape::ThirdParty && f.is_set("case") {
            errors.push(Error::config_at(root.key("case"), "third-party rules take third_party_case, not case"));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = build_rule(bag.config())?;
        self.preflight(ctx, bag, &body).await?;
        let created = ctx.call_json(ApiRequest::post(RULES_PATH, Value::Object(body))).await?;
        let id = response_id(&created, "/id")?;
        info!("Security rule {} created", id);
        bag.set_id(id);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let wire = ctx.call_json(ApiRequest::get(format!("{}/{}", RULES_PATH, id))).await?;
        let state = flatten_rule(&wire, bag.config())?;
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let body = build_update(bag)?;
        ctx.call(ApiRequest::put(format!("{}/{}", RULES_PATH, id), Value::Object(body))).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        ctx.call(ApiRequest::delete(format!("{}/{}", RULES_PATH, id))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddprov_core::diff;
    use ddprov_core::schema::validate;
    use ddprov_core::value::config_map;
    use pretty_assertions::assert_eq;

    fn standard() -> ConfigMap {
        config_map(json!({
            "name": "brute force",
            "message": "Too many failed logins",
            "tags": ["team:sec", "env:prod"],
            "query": [
                {
                    "name": "failures",
                    "query": "@evt.outcome:failure",
                    "group_by_fields": ["@usr.id"],
                    "indexes": ["main"]
                },
                {
                    "name": "successes",
                    "query": "@evt.outcome:success",
                    "aggregation": "cardinality",
                    "distinct_fields": ["@network.client.ip"]
                }
            ],
            "case": [
                {
                    "name": "high",
                    "status": "high",
                    "condition": "failures > 10 && successes > 0",
                    "notifications": ["@sec-oncall"],
                    "action": [{"type": "block_ip", "options": [{"duration": 900}]}]
                },
                {"status": "info", "condition": "failures > 3"}
            ],
            "options": [{"evaluation_window": 300, "keep_alive": 600, "max_signal_duration": 900}],
            "filter": [{"query": "env:staging", "action": "suppress"}]
        }))
    }

    fn signal() -> ConfigMap {
        config_map(json!({
            "name": "correlated",
            "message": "Two rules fired",
            "type": "signal_correlation",
            "signal_query": [
                {"name": "a", "rule_id": "abc-123", "correlated_by_fields": ["host"]},
                {"name": "b", "rule_id": "def-456", "correlated_query_index": "0"}
            ],
            "case": [{"status": "medium", "condition": "a > 0 && b > 0"}],
            "reference_tables": [{
                "table_name": "t", "column_name": "c", "log_field_path": "p",
                "rule_query_name": "a", "check_presence": true
            }],
            "options": [{"evaluation_window": 300, "keep_alive": 300, "max_signal_duration": 600}]
        }))
    }

    #[test]
    fn test_standard_rule_payload() {
        let config = standard();
        assert!(validate(&config, &schema()).is_ok());
        let wire = build_rule(&config).unwrap();

        assert_eq!(wire["isEnabled"], json!(true));
        assert_eq!(wire["type"], json!("log_detection"));
        assert_eq!(wire["queries"][0]["index"], json!("main"));
        assert_eq!(wire["queries"][0]["aggregation"], json!("count"));
        assert_eq!(wire["queries"][0]["groupByFields"], json!(["@usr.id"]));
        assert!(wire["queries"][0].get("indexes").is_none());
        assert_eq!(wire["queries"][1]["distinctFields"], json!(["@network.client.ip"]));
        assert_eq!(wire["cases"][0]["actions"][0], json!({"type": "block_ip", "options": {"duration": 900}}));
        assert_eq!(wire["options"]["evaluationWindow"], json!(300));
        assert_eq!(wire["options"]["detectionMethod"], json!("threshold"));
        assert_eq!(wire["options"]["decreaseCriticalityBasedOnEnv"], json!(false));
        assert_eq!(wire["filters"][0]["action"], json!("suppress"));
        assert!(wire.get("thirdPartyCases").is_none());
    }

    #[test]
    fn test_cases_and_queries_read_back_without_diff() {
        let config = standard();
        let mut wire = build_rule(&config).unwrap();
        wire.insert("id".to_string(), json!("rule-1"));
        wire.insert("isDefault".to_string(), json!(false));
        wire.insert("tags".to_string(), json!(["env:prod", "team:sec"]));

        let state = flatten_rule(&Value::Object(wire), &config).unwrap();
        assert_eq!(state["query"][0]["indexes"], json!(["main"]));
        assert_eq!(state["case"][0]["action"][0]["options"][0]["duration"], json!(900));
        let d = diff::diff(&schema(), &state, &config);
        assert!(d.is_empty(), "unexpected changes: {:?}", d.paths());
    }

    #[test]
    fn test_changed_case_status_is_a_change() {
        let config = standard();
        let state = flatten_rule(&Value::Object(build_rule(&config).unwrap()), &config).unwrap();
        let mut desired = config.clone();
        desired["case"][1]["status"] = json!("low");
        let d = diff::diff(&schema(), &state, &desired);
        assert_eq!(d.paths(), vec!["case[1].status"]);
    }

    #[test]
    fn test_signal_rule_payload_and_read_back() {
        let config = signal();
        let wire = build_rule(&config).unwrap();
        assert_eq!(wire["queries"][0]["ruleId"], json!("abc-123"));
        assert_eq!(wire["queries"][0]["aggregation"], json!("event_count"));
        assert_eq!(wire["queries"][1]["correlatedQueryIndex"], json!(0));
        assert!(wire.get("referenceTables").is_none());
        assert!(wire["options"].get("decreaseCriticalityBasedOnEnv").is_none());

        let mut echoed = wire.clone();
        echoed["queries"][0]["defaultRuleId"] = json!("def-abc");
        let mut expected = config.clone();
        expected.remove("reference_tables");
        let state = flatten_rule(&Value::Object(echoed), &expected).unwrap();
        assert_eq!(state["signal_query"][1]["correlated_query_index"], json!("0"));
        assert_eq!(state["signal_query"][0]["default_rule_id"], json!("def-abc"));
        assert!(state.get("query").is_none());
        let d = diff::diff(&schema(), &state, &expected);
        assert!(d.is_empty(), "unexpected changes: {:?}", d.paths());
    }

    #[test]
    fn test_bad_query_index_is_a_parse_error() {
        let mut config = signal();
        config["signal_query"][1]["correlated_query_index"] = json!("first");
        let err = build_rule(&config).unwrap_err();
        assert_eq!(err.translation_kind(), Some(TranslationKind::ParseError));
    }

    #[test]
    fn test_third_party_rule_uses_third_party_cases() {
        let config = config_map(json!({
            "name": "guardduty",
            "message": "m",
            "options": [{
                "detection_method": "third_party",
                "third_party_rule_options": [{
                    "default_status": "info",
                    "root_query": [{"query": "source:guardduty", "group_by_fields": ["instance"]}]
                }]
            }],
            "third_party_case": [{"name": "crit", "query": "status:critical", "status": "critical"}]
        }));
        assert_eq!(RuleShape::of_config(&config).unwrap(), RuleShape::ThirdParty);
        assert!(SecurityRuleResource::new().validate_config(&config).is_ok());

        let wire = build_rule(&config).unwrap();
        assert_eq!(wire["thirdPartyCases"][0]["query"], json!("status:critical"));
        assert_eq!(wire["options"]["thirdPartyRuleOptions"]["rootQueries"][0]["groupByFields"], json!(["instance"]));
        assert!(wire.get("cases").is_none());
        assert!(wire.get("queries").is_none());

        let state = flatten_rule(&Value::Object(wire), &config).unwrap();
        assert!(diff::diff(&schema(), &state, &config).is_empty());
    }

    #[test]
    fn test_query_kinds_must_match_rule_type() {
        let resource = SecurityRuleResource::new();

        let mut config = standard();
        config.insert("signal_query".to_string(), json!([{"rule_id": "x"}]));
        let errors = resource.validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);

        let mut config = signal();
        config.insert("query".to_string(), json!([{"query": "*"}]));
        config.remove("signal_query");
        let errors = resource.validate_config(&config).unwrap_err();
        assert!(errors[0].to_string().contains("use signal_query"), "{}", errors[0]);

        let mut config = standard();
        config.insert("third_party_case".to_string(), json!([{"status": "low"}]));
        let errors = resource.validate_config(&config).unwrap_err();
        assert!(errors[0].to_string().contains("third_party"), "{}", errors[0]);

        assert!(resource.validate_config(&standard()).is_ok());
        assert!(resource.validate_config(&signal()).is_ok());
    }

    #[test]
    fn test_update_clears_removed_lists() {
        let mut config = standard();
        config.remove("tags");
        config.remove("filter");
        let prior = config_map(json!({"reference_tables": [{"table_name": "t"}]}));
        let bag = StateBag::from_state("rule-1", prior, config);

        let wire = build_update(&bag).unwrap();
        assert!(wire.get("type").is_none());
        assert_eq!(wire["tags"], json!([]));
        assert_eq!(wire["filters"], json!([]));
        assert_eq!(wire["calculatedFields"], json!([]));
        assert_eq!(wire["schedulingOptions"], Value::Null);
        assert_eq!(wire["referenceTables"], json!([]));
        assert!(wire.get("groupSignalsBy").is_none());
    }

    #[test]
    fn test_window_values_are_checked() {
        let mut config = standard();
        config["options"][0]["evaluation_window"] = json!(120);
        assert!(validate(&config, &schema()).is_err());
    }
}
