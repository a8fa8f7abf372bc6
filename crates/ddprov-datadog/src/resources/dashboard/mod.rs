//! `datadog_dashboard`
//!
//! Dashboards are written with a full-replace PUT, so the builder always
//! emits every field the configuration still holds. Widgets go through
//! the [`widgets`] union; everything else is table-driven.
//!
//! Dashboard list membership is not part of the dashboard entity. It is
//! maintained through `/api/v2/dashboard/lists/manual/{id}/dashboards`
//! and is never read back, so the last applied value is kept in state.

pub mod common;
pub mod requests;
pub mod widgets;

use async_trait::async_trait;
use ddprov_core::error::{Error, Result, TranslationKind};
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, Schema};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::translate;
use ddprov_core::value::{ConfigMap, Fields};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub use widgets::{WidgetKind, build_widget, flatten_widget};

const DASHBOARD_PATH: &str = "/api/v1/dashboard";

/// Resource kind name
pub const KIND: &str = "datadog_dashboard";

fn template_variable() -> Schema {
    Schema::new().fields([
        Field::string("name").required(),
        Field::string("prefix").omit_empty(),
        Field::string("default").omit_empty(),
        Field::string_list("defaults").omit_empty(),
        Field::string_list("available_values").omit_empty(),
    ])
}

fn template_variable_preset() -> Schema {
    let value = Schema::new().fields([
        Field::string("name").omit_empty(),
        Field::string("value").omit_empty(),
        Field::string_list("values").omit_empty(),
    ]);
    Schema::new().fields([
        Field::string("name").omit_empty(),
        Field::block_list("template_variable", value).wire_key("template_variables"),
    ])
}

/// Full dashboard schema
pub fn schema() -> Schema {
    Schema::new().fields([
        Field::string("title").required().describe("The title of the dashboard."),
        Field::string("description").omit_empty(),
        Field::string("layout_type").required().one_of(&["ordered", "free"]).force_new(),
        Field::string("reflow_type").optional_computed().one_of(&["auto", "fixed"]),
        Field::string_set("notify_list").omit_empty(),
        Field::string_set("tags").omit_empty().max_items(5),
        Field::string_set("restricted_roles").omit_empty(),
        Field::bool("is_read_only").omit_empty(),
        Field::string("url").computed(),
        Field::block_list("template_variable", template_variable())
            .wire_key("template_variables")
            .omit_empty(),
        Field::block_list("template_variable_preset", template_variable_preset())
            .wire_key("template_variable_presets")
            .omit_empty(),
        Field::int_set("dashboard_lists")
            .manual()
            .describe("Manual dashboard lists this dashboard belongs to."),
        Field::block_list_deferred("widget", widgets::widget_schema)
            .wire_key("widgets")
            .omit_empty()
            .manual(),
    ])
}

/// Wire entity for a configuration
pub fn build_dashboard(config: &ConfigMap) -> Result<Value> {
    let mut wire = translate::build(&schema(), config, &AttrPath::root())?;
    let items = match config.get("widget") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => {
            return Err(Error::translation(
                AttrPath::root().key("widget"),
                TranslationKind::TypeMismatch,
                "expected a list of widgets",
            ));
        }
    };
    let built = widgets::build_widgets(items, &AttrPath::root().key("widget"))?;
    wire.insert("widgets".to_string(), Value::Array(built));
    Ok(Value::Object(wire))
}

/// Configuration view of a wire entity
pub fn flatten_dashboard(wire: &Value) -> Result<ConfigMap> {
    let map = wire
        .as_object()
        .ok_or_else(|| Error::Other("dashboard response is not an object".to_string()))?;
    let mut flat = translate::flatten(&schema(), map, &AttrPath::root())?;
    let items = map.get("widgets").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    let widgets = widgets::flatten_widgets(items, &AttrPath::root().key("widget"))?;
    flat.insert("widget".to_string(), Value::Array(widgets));
    Ok(flat)
}

fn board_type(layout_type: &str) -> &'static str {
    if layout_type == "free" { "custom_screenboard" } else { "custom_timeboard" }
}

fn list_ids(value: Option<&Value>) -> BTreeSet<i64> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

fn lists_path(list_id: i64) -> String {
    format!("/api/v2/dashboard/lists/manual/{}/dashboards", list_id)
}

/// Resource implementation for dashboards
pub struct DashboardResource {
    descriptor: ResourceDescriptor,
}

impl DashboardResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()),
        }
    }

    /// Bring list membership from `before` to what the configuration asks for
    async fn sync_lists(&self, ctx: &OpContext, bag: &StateBag, before: &BTreeSet<i64>) -> Result<()> {
        let id = bag.require_id()?;
        let wanted = list_ids(bag.config().get("dashboard_lists"));
        let layout = Fields::new(bag.config()).str("layout_type")?.unwrap_or("ordered");
        let entry = json!({"dashboards": [{"type": board_type(layout), "id": id}]});

        for list in wanted.difference(before) {
            debug!("Adding dashboard {} to list {}", id, list);
            ctx.call(ApiRequest::post(lists_path(*list), entry.clone())).await?;
        }
        for list in before.difference(&wanted) {
            debug!("Removing dashboard {} from list {}", id, list);
            match ctx.call(ApiRequest::delete(lists_path(*list)).with_body(entry.clone())).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Default for DashboardResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for DashboardResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), Vec<Error>> {
        let fields = Fields::new(config);
        let mut errors = Vec::new();
        if let (Ok(Some("free")), Ok(Some(_))) = (fields.str("layout_type"), fields.str("reflow_type")) {
            errors.push(Error::config_at(
                AttrPath::root().key("reflow_type"),
                "reflow_type can only be set on ordered dashboards",
            ));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = build_dashboard(bag.config())?;
        let created = ctx.call_json(ApiRequest::post(DASHBOARD_PATH, body)).await?;
        let id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Other("dashboard create response has no id".to_string()))?;
        bag.set_id(id);
        info!("Dashboard {} created", id);
        self.sync_lists(ctx, bag, &BTreeSet::new()).await
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let wire = ctx.call_json(ApiRequest::get(format!("{}/{}", DASHBOARD_PATH, id))).await?;
        let mut state = flatten_dashboard(&wire)?;
        let lists = bag.prior("dashboard_lists").or_else(|| bag.config().get("dashboard_lists"));
        if let Some(lists) = lists.filter(|v| !v.is_null()) {
            state.insert("dashboard_lists".to_string(), lists.clone());
        }
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let body = build_dashboard(bag.config())?;
        ctx.call(ApiRequest::put(format!("{}/{}", DASHBOARD_PATH, id), body)).await?;
        let before = list_ids(bag.prior("dashboard_lists"));
        self.sync_lists(ctx, bag, &before).await?;
        bag.state_mut().remove("dashboard_lists");
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        ctx.call(ApiRequest::delete(format!("{}/{}", DASHBOARD_PATH, id))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddprov_core::diff;
    use ddprov_core::value::config_map;
    use pretty_assertions::assert_eq;

    fn ordered() -> ConfigMap {
        config_map(json!({
            "title": "T",
            "layout_type": "ordered",
            "widget": [{"timeseries_definition": {"request": [{"q": "avg:system.cpu.user{*}"}], "title": "W"}}]
        }))
    }

    #[test]
    fn test_build_emits_full_entity() {
        let wire = build_dashboard(&ordered()).unwrap();
        assert_eq!(
            wire,
            json!({
                "title": "T",
                "layout_type": "ordered",
                "widgets": [{
                    "definition": {
                        "type": "timeseries",
                        "title": "W",
                        "requests": [{"q": "avg:system.cpu.user{*}"}]
                    }
                }]
            })
        );
    }

    #[test]
    fn test_read_back_has_no_diff() {
        let mut wire = build_dashboard(&ordered()).unwrap();
        wire["id"] = json!("abc-def-ghi");
        wire["url"] = json!("/dashboard/abc-def-ghi/t");
        wire["widgets"][0]["id"] = json!(4711);
        wire["reflow_type"] = json!("auto");

        let state = flatten_dashboard(&wire).unwrap();
        assert_eq!(
            state["widget"][0]["timeseries_definition"][0]["request"][0]["q"],
            json!("avg:system.cpu.user{*}")
        );
        assert!(diff::diff(&schema(), &state, &ordered()).is_empty());
    }

    #[test]
    fn test_empty_widget_list_is_not_a_change() {
        let config = config_map(json!({"title": "T", "layout_type": "free"}));
        let state = flatten_dashboard(&build_dashboard(&config).unwrap()).unwrap();
        assert_eq!(state["widget"], json!([]));
        assert!(diff::diff(&schema(), &state, &config).is_empty());
    }

    #[test]
    fn test_reflow_type_needs_ordered_layout() {
        let resource = DashboardResource::new();
        let config = config_map(json!({"title": "T", "layout_type": "free", "reflow_type": "fixed"}));
        let errors = resource.validate_config(&config).unwrap_err();
        assert_eq!(errors[0].path().unwrap().to_string(), "reflow_type");
    }

    #[test]
    fn test_layout_change_forces_replacement() {
        let prior = ordered();
        let mut desired = ordered();
        desired.insert("layout_type".to_string(), json!("free"));
        assert!(diff::diff(&schema(), &prior, &desired).requires_replace());
    }
}
