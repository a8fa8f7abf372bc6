//! `datadog_security_monitoring_suppression`
//!
//! `expiration_date` is RFC3339 text in configuration and epoch
//! milliseconds on the wire. Read-back keeps the configured text when it
//! denotes the same instant. PATCH leaves an omitted expiration untouched,
//! so updates send an explicit null to clear it.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ddprov_core::error::{Error, Result};
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, Schema, Validator};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::value::{ConfigMap, Fields};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

const SUPPRESSION_PATH: &str = "/api/v2/security_monitoring/configuration/suppressions";

const SUPPRESSION_TYPE: &str = "suppressions";

pub const KIND: &str = "datadog_security_monitoring_suppression";

pub fn schema() -> Schema {
    Schema::new().fields([
        Field::string("name").required(),
        Field::string("description").omit_empty(),
        Field::bool("enabled").required(),
        Field::string("expiration_date")
            .omit_empty()
            .validator(Validator::Rfc3339)
            .describe("A RFC3339 timestamp giving an expiration date for the suppression rule."),
        Field::string("rule_query").required(),
        Field::string("suppression_query").required(),
    ])
}

/// `attributes` of a suppression
///
/// `expiration_date` is `Some(None)` when it must be sent as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuppressionAttributes {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "nullable")]
    pub expiration_date: Option<Option<i64>>,
    pub rule_query: String,
    pub suppression_query: String,
}

/// Distinguishes an absent field from an explicit null
mod nullable {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Option<i64>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Option<i64>>, D::Error> {
        Option::<i64>::deserialize(d).map(Some)
    }
}

fn parse_expiration(text: &str) -> Result<i64> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.timestamp_millis())
        .map_err(|e| Error::config_at(AttrPath::root().key("expiration_date"), format!("not a RFC3339 date: {}", e)))
}

/// Build suppression attributes
///
/// With `clear_expiration`, an unset expiration is sent as null.
pub fn build_suppression(config: &ConfigMap, clear_expiration: bool) -> Result<SuppressionAttributes> {
    let f = Fields::new(config);
    let expiration = f.non_empty_string("expiration_date")?.map(|t| parse_expiration(&t)).transpose()?;
    let expiration_date = match expiration {
        Some(ms) => Some(Some(ms)),
        None if clear_expiration => Some(None),
        None => None,
    };
    Ok(SuppressionAttributes {
        name: f.required_str("name")?.to_string(),
        description: f.non_empty_string("description")?,
        enabled: f.bool("enabled")?.ok_or_else(|| f.missing("enabled"))?,
        expiration_date,
        rule_query: f.required_str("rule_query")?.to_string(),
        suppression_query: f.required_str("suppression_query")?.to_string(),
    })
}

/// Flatten suppression attributes, keeping configured date text for the same instant
pub fn flatten_suppression(attributes: &SuppressionAttributes, config: &ConfigMap) -> ConfigMap {
    let mut state = ConfigMap::new();
    state.insert("name".to_string(), attributes.name.clone().into());
    state.insert("description".to_string(), attributes.description.clone().unwrap_or_default().into());
    state.insert("enabled".to_string(), attributes.enabled.into());
    state.insert("rule_query".to_string(), attributes.rule_query.clone().into());
    state.insert("suppression_query".to_string(), attributes.suppression_query.clone().into());

    if let Some(ms) = attributes.expiration_date.flatten() {
        let configured = config
            .get("expiration_date")
            .and_then(Value::as_str)
            .filter(|text| parse_expiration(text).ok() == Some(ms));
        let text = match configured {
            Some(text) => text.to_string(),
            None => DateTime::<Utc>::from_timestamp_millis(ms)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
        };
        state.insert("expiration_date".to_string(), text.into());
    }
    state
}

fn envelope(attributes: &SuppressionAttributes) -> Result<Value> {
    Ok(json!({"data": {"type": SUPPRESSION_TYPE, "attributes": serde_json::to_value(attributes)?}}))
}

fn attributes_of(body: &Value) -> Result<SuppressionAttributes> {
    let attributes = body
        .pointer("/data/attributes")
        .cloned()
        .ok_or_else(|| Error::Other("suppression response has no attributes".to_string()))?;
    Ok(serde_json::from_value(attributes)?)
}

/// Resource implementation for security monitoring suppressions
pub struct SuppressionResource {
    descriptor: ResourceDescriptor,
}

impl SuppressionResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()),
        }
    }
}

impl Default for SuppressionResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for SuppressionResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = envelope(&build_suppression(bag.config(), false)?)?;
        let created = ctx.call_json(ApiRequest::post(SUPPRESSION_PATH, body)).await?;
        let id = super::response_id(&created, "/data/id")?;
        info!("Suppression {} created", id);
        bag.set_id(id);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let body = ctx.call_json(ApiRequest::get(format!("{}/{}", SUPPRESSION_PATH, id))).await?;
        let state = flatten_suppression(&attributes_of(&body)?, bag.known());
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let body = envelope(&build_suppression(bag.config(), true)?)?;
        ctx.call(ApiRequest::patch(format!("{}/{}", SUPPRESSION_PATH, id), body)).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        ctx.call(ApiRequest::delete(format!("{}/{}", SUPPRESSION_PATH, id))).await?;
        Ok(())
    }
}
