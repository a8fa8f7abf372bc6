//! `datadog_security_monitoring_filter`
//!
//! Security filters are version-gated: every PATCH echoes the version last
//! read, and the server answers 409 when the filter moved on since. The
//! lifecycle layer refuses to update without a version and attaches the
//! current remote version to a conflict.

use async_trait::async_trait;
use ddprov_core::error::{Error, Result};
use ddprov_core::schema::{Field, Schema};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::value::{ConfigMap, Fields};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

const FILTER_PATH: &str = "/api/v2/security_monitoring/configuration/security_filters";

const FILTER_TYPE: &str = "security_filters";

pub const KIND: &str = "datadog_security_monitoring_filter";

pub fn schema() -> Schema {
    let exclusion = Schema::new().fields([
        Field::string("name").required(),
        Field::string("query").required(),
    ]);
    Schema::new().fields([
        Field::string("name").required().describe("The name of the security filter."),
        Field::string("query").required(),
        Field::bool("is_enabled").required(),
        Field::block_list("exclusion_filter", exclusion).omit_empty(),
        Field::string("filtered_data_type").default("logs").one_of(&["logs"]),
        Field::int("version").computed().describe("The version of the security filter."),
    ])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExclusionFilter {
    pub name: String,
    pub query: String,
}

/// `attributes` of a security filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterAttributes {
    pub name: String,
    pub query: String,
    pub is_enabled: bool,
    #[serde(default)]
    pub exclusion_filters: Vec<ExclusionFilter>,
    pub filtered_data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing)]
    pub is_builtin: Option<bool>,
}

/// Build filter attributes for a configuration
pub fn build_filter(config: &ConfigMap) -> Result<FilterAttributes> {
    let f = Fields::new(config);
    let mut exclusion_filters = Vec::new();
    for block in f.blocks("exclusion_filter")? {
        exclusion_filters.push(ExclusionFilter {
            name: block.required_str("name")?.to_string(),
            query: block.required_str("query")?.to_string(),
        });
    }
    Ok(FilterAttributes {
        name: f.required_str("name")?.to_string(),
        query: f.required_str("query")?.to_string(),
        is_enabled: f.bool("is_enabled")?.ok_or_else(|| f.missing("is_enabled"))?,
        exclusion_filters,
        filtered_data_type: f.str("filtered_data_type")?.unwrap_or("logs").to_string(),
        version: None,
        is_builtin: None,
    })
}

pub fn flatten_filter(attributes: &FilterAttributes) -> ConfigMap {
    let mut state = ConfigMap::new();
    state.insert("name".to_string(), attributes.name.clone().into());
    state.insert("query".to_string(), attributes.query.clone().into());
    state.insert("is_enabled".to_string(), attributes.is_enabled.into());
    state.insert("filtered_data_type".to_string(), attributes.filtered_data_type.clone().into());
    let exclusions: Vec<Value> = attributes
        .exclusion_filters
        .iter()
        .map(|e| json!({"name": e.name, "query": e.query}))
        .collect();
    state.insert("exclusion_filter".to_string(), Value::Array(exclusions));
    if let Some(version) = attributes.version {
        state.insert("version".to_string(), version.into());
    }
    state
}

fn envelope(attributes: &FilterAttributes) -> Result<Value> {
    Ok(json!({"data": {"type": FILTER_TYPE, "attributes": serde_json::to_value(attributes)?}}))
}

fn attributes_of(body: &Value) -> Result<FilterAttributes> {
    let attributes = body
        .pointer("/data/attributes")
        .cloned()
        .ok_or_else(|| Error::Other("security filter response has no attributes".to_string()))?;
    Ok(serde_json::from_value(attributes)?)
}

/// Resource implementation for security monitoring filters
pub struct SecurityFilterResource {
    descriptor: ResourceDescriptor,
}

impl SecurityFilterResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()).versioned("version"),
        }
    }
}

impl Default for SecurityFilterResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for SecurityFilterResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = envelope(&build_filter(bag.config())?)?;
        let created = ctx.call_json(ApiRequest::post(FILTER_PATH, body)).await?;
        let id = super::response_id(&created, "/data/id")?;
        info!("Security filter {} created", id);
        bag.set_id(id);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let body = ctx.call_json(ApiRequest::get(format!("{}/{}", FILTER_PATH, id))).await?;
        let state = flatten_filter(&attributes_of(&body)?);
        if let Some(warning) = body.pointer("/meta/warning").and_then(Value::as_str) {
            warn!("Security filter {}: {}", id, warning);
            bag.warn(warning);
        }
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let mut attributes = build_filter(bag.config())?;
        attributes.version = bag.version("version");
        let body = envelope(&attributes)?;
        ctx.call(ApiRequest::patch(format!("{}/{}", FILTER_PATH, id), body)).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        ctx.call(ApiRequest::delete(format!("{}/{}", FILTER_PATH, id))).await?;
        Ok(())
    }
}
