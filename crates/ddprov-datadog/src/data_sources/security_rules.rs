//! `datadog_security_monitoring_rules` lookup
//!
//! Lists rules, filtered on the server by name and tags and locally by
//! origin: `default_only_filter` keeps the rules Datadog ships,
//! `user_only_filter` the ones an organization wrote itself.

use crate::pagination::{self, DEFAULT_PAGE_SIZE};
use crate::resources::security_rule::{self, RULES_PATH, flatten_rule};
use async_trait::async_trait;
use ddprov_core::error::{Error, Result};
use ddprov_core::schema::{Field, Schema};
use ddprov_core::traits::{DataSource, OpContext};
use ddprov_core::value::{ConfigMap, Fields};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const KIND: &str = "datadog_security_monitoring_rules";

pub fn schema() -> Schema {
    Schema::new().fields([
        Field::string("name_filter").describe("A rule name to limit the search."),
        Field::string_list("tags_filter").describe("A list of tags to limit the search."),
        Field::bool("default_only_filter").describe("Limit the search to default rules."),
        Field::bool("user_only_filter").describe("Limit the search to user rules."),
        Field::string_list("rule_ids").computed(),
        Field::block_list("rules", security_rule::schema()).computed(),
    ])
}

/// Server-side search string: `name:"..."` followed by the tags
pub fn search_query(f: &Fields<'_>) -> Result<Option<String>> {
    let mut terms = Vec::new();
    if let Some(name) = f.non_empty_string("name_filter")? {
        terms.push(format!("name:\"{}\"", name.replace('"', "\\\"")));
    }
    terms.extend(f.strings("tags_filter")?.unwrap_or_default());
    Ok(if terms.is_empty() { None } else { Some(terms.join(" ")) })
}

/// Whether a listed rule passes the origin filters
fn keeps(rule: &Value, default_only: bool, user_only: bool) -> bool {
    let is_default = rule.get("isDefault").and_then(Value::as_bool).unwrap_or(false);
    !(default_only && !is_default) && !(user_only && is_default)
}

/// Data source implementation for security monitoring rules
pub struct SecurityRulesLookup {
    schema: Arc<Schema>,
}

impl SecurityRulesLookup {
    pub fn new() -> Self {
        Self {
            schema: schema().into_arc(),
        }
    }
}

impl Default for SecurityRulesLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for SecurityRulesLookup {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), Vec<Error>> {
        let f = Fields::new(config);
        if f.bool_or("default_only_filter", false).unwrap_or(false) && f.bool_or("user_only_filter", false).unwrap_or(false) {
            return Err(vec![Error::config(
                "default_only_filter and user_only_filter cannot be true at the same time",
            )]);
        }
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, config: &ConfigMap) -> Result<ConfigMap> {
        let f = Fields::new(config);
        let search = search_query(&f)?;
        let query: Vec<(&str, &str)> = search.iter().map(|q| ("query", q.as_str())).collect();
        let listed = pagination::collect_pages(ctx, RULES_PATH, &query, DEFAULT_PAGE_SIZE).await?;

        let default_only = f.bool_or("default_only_filter", false)?;
        let user_only = f.bool_or("user_only_filter", false)?;
        let mut ids = Vec::new();
        let mut rules = Vec::new();
        for rule in listed.iter().filter(|r| keeps(r, default_only, user_only)) {
            let id = rule
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Other("listed rule has no id".to_string()))?;
            ids.push(Value::String(id.to_string()));
            rules.push(Value::Object(flatten_rule(rule, &ConfigMap::new())?));
        }
        debug!("Security rule search kept {} of {} rule(s)", ids.len(), listed.len());

        let mut state = config.clone();
        state.insert("rule_ids".to_string(), Value::Array(ids));
        state.insert("rules".to_string(), Value::Array(rules));
        Ok(state)
    }
}
