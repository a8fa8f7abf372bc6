//! `datadog_service_level_objective`
//!
//! Metric SLOs carry a numerator/denominator `query`, monitor SLOs a set of
//! `monitor_ids`. The server returns thresholds ordered by timeframe, so
//! the diff sorts both sides the same way before comparing them.

use super::response_id;
use async_trait::async_trait;
use ddprov_core::diff::{DiffRule, rank_of};
use ddprov_core::error::{Error, Result};
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, Schema};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::value::{ConfigMap, Fields, put_opt, single_block};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

const SLO_PATH: &str = "/api/v1/slo";

pub const KIND: &str = "datadog_service_level_objective";

const TIMEFRAMES: &[&str] = &["7d", "30d", "90d", "custom"];

const SLO_TYPES: &[&str] = &["metric", "monitor"];

fn timeframe_rank(threshold: &Map<String, Value>) -> i64 {
    rank_of(TIMEFRAMES, threshold.get("timeframe"))
}

fn threshold_schema() -> Schema {
    Schema::new().fields([
        Field::string("timeframe").required().one_of(TIMEFRAMES),
        Field::float("target").required().diff(DiffRule::Numeric),
        Field::string("target_display").computed(),
        Field::float("warning").diff(DiffRule::Numeric),
        Field::string("warning_display").computed(),
    ])
}

pub fn schema() -> Schema {
    let query = Schema::new().fields([
        Field::string("numerator").required().diff(DiffRule::TrimSpace),
        Field::string("denominator").required().diff(DiffRule::TrimSpace),
    ]);

    Schema::new().fields([
        Field::string("name").required().describe("Name of the service level objective."),
        Field::string("description").omit_empty().diff(DiffRule::TrimSpace),
        Field::string_set("tags").omit_empty(),
        Field::string("type").required().force_new().one_of(SLO_TYPES),
        Field::block_list("thresholds", threshold_schema())
            .required()
            .min_items(1)
            .diff(DiffRule::SortBy(timeframe_rank)),
        Field::string("timeframe").optional_computed().one_of(TIMEFRAMES),
        Field::float("target_threshold").optional_computed().diff(DiffRule::Numeric),
        Field::float("warning_threshold").optional_computed().diff(DiffRule::Numeric),
        Field::block("query", query).conflicts_with(&["monitor_ids", "groups"]),
        Field::int_set("monitor_ids").omit_empty().conflicts_with(&["query"]),
        Field::string_set("groups").omit_empty().conflicts_with(&["query"]),
        Field::bool("force_delete").manual().diff(DiffRule::Ignore),
        Field::bool("validate").manual().diff(DiffRule::Ignore),
    ])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SloThreshold {
    pub timeframe: String,
    pub target: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<f64>,
    #[serde(default, skip_serializing)]
    pub target_display: Option<String>,
    #[serde(default, skip_serializing)]
    pub warning_display: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SloQuery {
    pub numerator: String,
    pub denominator: String,
}

/// SLO entity as sent and received
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SloWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub slo_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub thresholds: Vec<SloThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<SloQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_threshold: Option<f64>,
}

/// Build the wire entity for a configuration
pub fn build_slo(config: &ConfigMap) -> Result<SloWire> {
    let f = Fields::new(config);
    let slo_type = f.required_str("type")?.to_string();

    let mut thresholds = Vec::new();
    for t in f.blocks("thresholds")? {
        thresholds.push(SloThreshold {
            timeframe: t.required_str("timeframe")?.to_string(),
            target: t.f64("target")?.ok_or_else(|| t.missing("target"))?,
            warning: t.f64("warning")?,
            ..Default::default()
        });
    }

    let mut slo = SloWire {
        name: f.required_str("name")?.to_string(),
        description: f.string("description")?.map(|d| d.trim().to_string()),
        tags: f.string_set("tags")?.unwrap_or_default(),
        thresholds,
        timeframe: f.non_empty_string("timeframe")?,
        target_threshold: f.f64("target_threshold")?,
        warning_threshold: f.f64("warning_threshold")?,
        slo_type,
        ..Default::default()
    };

    match slo.slo_type.as_str() {
        "monitor" => {
            slo.monitor_ids = Some(f.i64s("monitor_ids")?.filter(|ids| !ids.is_empty()).ok_or_else(|| {
                Error::config_at(AttrPath::root().key("monitor_ids"), "monitor_ids is required for monitor SLOs")
            })?);
            slo.groups = f.string_set("groups")?.filter(|g| !g.is_empty());
        }
        _ => {
            let query = f.block("query")?.ok_or_else(|| {
                Error::config_at(AttrPath::root().key("query"), "query is required for metric SLOs")
            })?;
            slo.query = Some(SloQuery {
                numerator: query.required_str("numerator")?.trim().to_string(),
                denominator: query.required_str("denominator")?.trim().to_string(),
            });
        }
    }
    Ok(slo)
}

/// Flatten an SLO into state
pub fn flatten_slo(slo: &SloWire, config: &ConfigMap) -> ConfigMap {
    let mut state = ConfigMap::new();
    state.insert("name".to_string(), slo.name.clone().into());
    state.insert("type".to_string(), slo.slo_type.clone().into());
    state.insert(
        "description".to_string(),
        slo.description.as_deref().unwrap_or_default().trim().into(),
    );

    let mut tags = slo.tags.clone();
    tags.sort();
    tags.dedup();
    state.insert("tags".to_string(), tags.into());

    let thresholds: Vec<Value> = slo
        .thresholds
        .iter()
        .map(|t| {
            let mut m = ConfigMap::new();
            m.insert("timeframe".to_string(), t.timeframe.clone().into());
            m.insert("target".to_string(), t.target.into());
            put_opt(&mut m, "warning", t.warning);
            put_opt(&mut m, "target_display", t.target_display.clone());
            put_opt(&mut m, "warning_display", t.warning_display.clone());
            Value::Object(m)
        })
        .collect();
    state.insert("thresholds".to_string(), Value::Array(thresholds));
    put_opt(&mut state, "timeframe", slo.timeframe.clone());
    put_opt(&mut state, "target_threshold", slo.target_threshold);
    put_opt(&mut state, "warning_threshold", slo.warning_threshold);

    if slo.slo_type == "monitor" {
        if let Some(ids) = slo.monitor_ids.clone().filter(|ids| !ids.is_empty()) {
            state.insert("monitor_ids".to_string(), ids.into());
        }
        state.insert("groups".to_string(), slo.groups.clone().unwrap_or_default().into());
    } else if let Some(q) = &slo.query {
        let mut query = ConfigMap::new();
        query.insert("numerator".to_string(), q.numerator.clone().into());
        query.insert("denominator".to_string(), q.denominator.clone().into());
        state.insert("query".to_string(), single_block(query));
    }

    for key in ["force_delete", "validate"] {
        if let Some(v) = config.get(key).filter(|v| !v.is_null()) {
            state.insert(key.to_string(), v.clone());
        }
    }
    state
}

/// Pull the single SLO out of a `{"data": ...}` envelope
fn unwrap_data(body: Value) -> Result<SloWire> {
    let data = match body.get("data") {
        Some(Value::Array(items)) => items.first().cloned(),
        Some(item @ Value::Object(_)) => Some(item.clone()),
        _ => None,
    };
    let data = data.ok_or_else(|| Error::Other("SLO response has no data".to_string()))?;
    Ok(serde_json::from_value(data)?)
}

/// Resource implementation for service level objectives
pub struct SloResource {
    descriptor: ResourceDescriptor,
}

impl SloResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()),
        }
    }

    /// Check that every monitor referenced by a monitor SLO exists
    async fn preflight(&self, ctx: &OpContext, slo: &SloWire, config: &ConfigMap) -> Result<()> {
        if !Fields::new(config).bool_or("validate", true)? || slo.slo_type != "monitor" {
            return Ok(());
        }
        for id in slo.monitor_ids.iter().flatten() {
            debug!("Checking monitor {} referenced by SLO {}", id, slo.name);
            ctx.call(ApiRequest::get(format!("/api/v1/monitor/{}", id)))
                .await
                .map_err(|e| match e {
                    e if e.is_not_found() => Error::config_at(
                        AttrPath::root().key("monitor_ids"),
                        format!("monitor {} referenced by the SLO does not exist", id),
                    ),
                    e => e,
                })?;
        }
        Ok(())
    }
}

impl Default for SloResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for SloResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), Vec<Error>> {
        let f = Fields::new(config);
        let mut errors = Vec::new();
        match f.str("type") {
            Ok(Some("monitor")) if !f.is_set("monitor_ids") => errors.push(Error::config_at(
                AttrPath::root().key("monitor_ids"),
                "monitor_ids is required for monitor SLOs",
            )),
            Ok(Some("metric")) if !f.is_set("query") => errors.push(Error::config_at(
                AttrPath::root().key("query"),
                "query is required for metric SLOs",
            )),
            _ => {}
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let slo = build_slo(bag.config())?;
        self.preflight(ctx, &slo, bag.config()).await?;
        let created = ctx.call_json(ApiRequest::post(SLO_PATH, serde_json::to_value(&slo)?)).await?;
        let id = response_id(&created, "/data/0/id")?;
        info!("SLO {} created", id);
        bag.set_id(id);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let body = ctx.call_json(ApiRequest::get(format!("{}/{}", SLO_PATH, id))).await?;
        let slo = unwrap_data(body)?;
        let state = flatten_slo(&slo, bag.known());
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let mut slo = build_slo(bag.config())?;
        self.preflight(ctx, &slo, bag.config()).await?;
        slo.id = Some(id.clone());
        ctx.call(ApiRequest::put(format!("{}/{}", SLO_PATH, id), serde_json::to_value(&slo)?))
            .await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let mut request = ApiRequest::delete(format!("{}/{}", SLO_PATH, id));
        if Fields::new(bag.known()).bool_or("force_delete", false)? {
            request = request.with_query("force", "true");
        }
        ctx.call(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddprov_core::diff;
    use ddprov_core::schema;
    use ddprov_core::value::config_map;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn metric_slo() -> ConfigMap {
        config_map(json!({
            "name": "availability",
            "type": "metric",
            "query": [{"numerator": "sum:good{*}.as_count() ", "denominator": "sum:total{*}.as_count()"}],
            "thresholds": [
                {"timeframe": "30d", "target": 99.5, "warning": 99.8},
                {"timeframe": "7d", "target": 99}
            ]
        }))
    }

    #[test]
    fn test_build_trims_queries() {
        let slo = build_slo(&metric_slo()).unwrap();
        assert_eq!(slo.query.unwrap().numerator, "sum:good{*}.as_count()");
        assert_eq!(slo.thresholds.len(), 2);
        assert_eq!(slo.monitor_ids, None);
    }

    #[test]
    fn test_server_sorted_thresholds_are_not_a_change() {
        let config = metric_slo();
        assert!(schema::validate(&config, &schema()).is_ok());
        let mut wire = build_slo(&config).unwrap();
        wire.thresholds.sort_by_key(|t| rank_of(TIMEFRAMES, Some(&Value::from(t.timeframe.clone()))));
        wire.thresholds[0].target_display = Some("99.0".to_string());
        wire.id = Some("abc123".to_string());

        let state = flatten_slo(&wire, &config);
        assert_eq!(state["thresholds"][0]["timeframe"], json!("7d"));
        let d = diff::diff(&schema(), &state, &config);
        assert!(d.is_empty(), "unexpected changes: {:?}", d.paths());
    }

    #[test]
    fn test_changed_target_is_reported() {
        let config = metric_slo();
        let state = flatten_slo(&build_slo(&config).unwrap(), &config);
        let mut desired = config.clone();
        desired["thresholds"][1]["target"] = json!(99.9);
        assert!(diff::diff(&schema(), &state, &desired).touches("thresholds"));
    }

    #[test]
    fn test_monitor_slo_requires_monitor_ids() {
        let config = config_map(json!({
            "name": "m",
            "type": "monitor",
            "thresholds": [{"timeframe": "7d", "target": 99}]
        }));
        let errors = SloResource::new().validate_config(&config).unwrap_err();
        assert_eq!(errors[0].path().unwrap().to_string(), "monitor_ids");
    }

    #[test]
    fn test_query_conflicts_with_monitor_ids() {
        let mut config = metric_slo();
        config.insert("monitor_ids".to_string(), json!([1, 2]));
        assert!(schema::validate(&config, &schema()).is_err());
    }

    #[test]
    fn test_response_envelope_accepts_list_and_object() {
        let item = json!({"id": "x", "name": "n", "type": "metric", "thresholds": []});
        assert_eq!(unwrap_data(json!({"data": [item.clone()]})).unwrap().id.as_deref(), Some("x"));
        assert_eq!(unwrap_data(json!({"data": item})).unwrap().name, "n");
        assert!(unwrap_data(json!({"data": []})).is_err());
    }
}
