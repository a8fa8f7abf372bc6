//! `datadog_monitor` lookup

use super::only;
use crate::pagination::{self, DEFAULT_PAGE_SIZE, Paging};
use crate::resources::monitor::{MONITOR_PATH, MonitorWire, flatten_monitor};
use async_trait::async_trait;
use ddprov_core::error::{Error, Result};
use ddprov_core::schema::{Field, Schema};
use ddprov_core::traits::{DataSource, OpContext};
use ddprov_core::value::{ConfigMap, Fields};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const KIND: &str = "datadog_monitor";

/// Filters; the outputs mirror the monitor resource attributes
pub fn schema() -> Schema {
    Schema::new().fields([
        Field::string("name_filter").describe("A monitor name to limit the search."),
        Field::string_list("tags_filter").describe("Scope tags to limit the search."),
        Field::string_list("monitor_tags_filter").describe("Monitor tags to limit the search."),
        Field::string("id").computed(),
        Field::string("name").computed(),
        Field::string("message").computed(),
        Field::string("query").computed(),
        Field::string("type").computed(),
        Field::int("priority").computed(),
        Field::string_set("tags").computed(),
        Field::string_set("restricted_roles").computed(),
    ])
}

/// Query parameters for the v1 monitor search
pub fn search_query(config: &ConfigMap) -> Result<Vec<(&'static str, String)>> {
    let f = Fields::new(config);
    let mut query = Vec::new();
    if let Some(name) = f.non_empty_string("name_filter")? {
        query.push(("name", name));
    }
    for (key, param) in [("tags_filter", "tags"), ("monitor_tags_filter", "monitor_tags")] {
        let tags = f.strings(key)?.unwrap_or_default();
        if !tags.is_empty() {
            query.push((param, tags.join(",")));
        }
    }
    Ok(query)
}

fn describe(query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return "an unfiltered search".to_string();
    }
    query.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(" ")
}

/// Data source implementation for monitors
pub struct MonitorLookup {
    schema: Arc<Schema>,
}

impl MonitorLookup {
    pub fn new() -> Self {
        Self {
            schema: schema().into_arc(),
        }
    }
}

impl Default for MonitorLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for MonitorLookup {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    async fn read(&self, ctx: &OpContext, config: &ConfigMap) -> Result<ConfigMap> {
        let query = search_query(config)?;
        let params: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let monitors = pagination::collect(ctx, MONITOR_PATH, &params, Paging::V1, DEFAULT_PAGE_SIZE).await?;
        debug!("Monitor search {} returned {} monitor(s)", describe(&query), monitors.len());

        let item = only(monitors, &describe(&query))?;
        let id = match item.get("id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => return Err(Error::Other("monitor in search result has no id".to_string())),
        };
        let monitor: MonitorWire = serde_json::from_value(item)?;

        let mut state = flatten_monitor(&monitor, &ConfigMap::new());
        for (key, value) in config {
            state.insert(key.clone(), value.clone());
        }
        state.insert("id".to_string(), id.into());
        Ok(state)
    }
}
