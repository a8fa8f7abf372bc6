//! Widget union
//!
//! A widget is exactly one of 22 `<kind>_definition` blocks plus an
//! optional `widget_layout`. [`WidgetKind`] canonicalizes the sibling
//! blocks into a sum type; each kind has one schema, and the generic
//! translator does the rest. Group widgets recurse through the same
//! builder, one level only: a group holds non-group widgets.
//!
//! Wire shape:
//!
//! ```text
//! {"id": 12, "definition": {"type": "note", ..}, "layout": {"x": 0, "y": 0, "width": 2, "height": 2}}
//! ```

use super::common::{ALIGNMENTS, SORT_ORDERS, VERTICAL_ALIGNMENTS, axis, common, custom_links, event, live_span, marker, titled};
use super::requests;
use ddprov_core::error::{Error, Result, TranslationKind};
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, FieldType, NestedSchema, Schema, Validator};
use ddprov_core::translate::{self, UnionKind, select_variant, variant_for_tag};
use ddprov_core::value::{ConfigMap, single_block};
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

/// Widget kinds, in dispatch priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    Group,
    Timeseries,
    Toplist,
    Heatmap,
    Hostmap,
    Scatterplot,
    QueryValue,
    Change,
    Distribution,
    CheckStatus,
    EventStream,
    EventTimeline,
    AlertGraph,
    AlertValue,
    FreeText,
    Note,
    Iframe,
    Image,
    LogStream,
    ManageStatus,
    TraceService,
    ServiceLevelObjective,
}

impl UnionKind for WidgetKind {
    const ALL: &'static [Self] = &[
        WidgetKind::Group,
        WidgetKind::Timeseries,
        WidgetKind::Toplist,
        WidgetKind::Heatmap,
        WidgetKind::Hostmap,
        WidgetKind::Scatterplot,
        WidgetKind::QueryValue,
        WidgetKind::Change,
        WidgetKind::Distribution,
        WidgetKind::CheckStatus,
        WidgetKind::EventStream,
        WidgetKind::EventTimeline,
        WidgetKind::AlertGraph,
        WidgetKind::AlertValue,
        WidgetKind::FreeText,
        WidgetKind::Note,
        WidgetKind::Iframe,
        WidgetKind::Image,
        WidgetKind::LogStream,
        WidgetKind::ManageStatus,
        WidgetKind::TraceService,
        WidgetKind::ServiceLevelObjective,
    ];

    fn config_key(self) -> &'static str {
        match self {
            WidgetKind::Group => "group_definition",
            WidgetKind::Timeseries => "timeseries_definition",
            WidgetKind::Toplist => "toplist_definition",
            WidgetKind::Heatmap => "heatmap_definition",
            WidgetKind::Hostmap => "hostmap_definition",
            WidgetKind::Scatterplot => "scatterplot_definition",
            WidgetKind::QueryValue => "query_value_definition",
            WidgetKind::Change => "change_definition",
            WidgetKind::Distribution => "distribution_definition",
            WidgetKind::CheckStatus => "check_status_definition",
            WidgetKind::EventStream => "event_stream_definition",
            WidgetKind::EventTimeline => "event_timeline_definition",
            WidgetKind::AlertGraph => "alert_graph_definition",
            WidgetKind::AlertValue => "alert_value_definition",
            WidgetKind::FreeText => "free_text_definition",
            WidgetKind::Note => "note_definition",
            WidgetKind::Iframe => "iframe_definition",
            WidgetKind::Image => "image_definition",
            WidgetKind::LogStream => "log_stream_definition",
            WidgetKind::ManageStatus => "manage_status_definition",
            WidgetKind::TraceService => "trace_service_definition",
            WidgetKind::ServiceLevelObjective => "service_level_objective_definition",
        }
    }

    fn wire_tag(self) -> &'static str {
        match self {
            WidgetKind::Group => "group",
            WidgetKind::Timeseries => "timeseries",
            WidgetKind::Toplist => "toplist",
            WidgetKind::Heatmap => "heatmap",
            WidgetKind::Hostmap => "hostmap",
            WidgetKind::Scatterplot => "scatterplot",
            WidgetKind::QueryValue => "query_value",
            WidgetKind::Change => "change",
            WidgetKind::Distribution => "distribution",
            WidgetKind::CheckStatus => "check_status",
            WidgetKind::EventStream => "event_stream",
            WidgetKind::EventTimeline => "event_timeline",
            WidgetKind::AlertGraph => "alert_graph",
            WidgetKind::AlertValue => "alert_value",
            WidgetKind::FreeText => "free_text",
            WidgetKind::Note => "note",
            WidgetKind::Iframe => "iframe",
            WidgetKind::Image => "image",
            WidgetKind::LogStream => "log_stream",
            WidgetKind::ManageStatus => "manage_status",
            WidgetKind::TraceService => "trace_service",
            WidgetKind::ServiceLevelObjective => "slo",
        }
    }
}

impl WidgetKind {
    /// Definition schema of this kind, built once
    pub fn schema(self) -> Arc<Schema> {
        static SCHEMAS: LazyLock<Vec<(WidgetKind, Arc<Schema>)>> = LazyLock::new(|| {
            WidgetKind::ALL
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
            WidgetKind::Group => group(),
            WidgetKind::Timeseries => common().fields([
                Field::block_list("request", requests::timeseries()).wire_key("requests").min_items(1),
                Field::bool("show_legend"),
                Field::string("legend_size").omit_empty().one_of(&["0", "2", "4", "8", "16", "auto"]),
                Field::string("legend_layout").omit_empty().one_of(&["auto", "horizontal", "vertical"]),
                Field::string_set("legend_columns").omit_empty().one_of(&["value", "avg", "sum", "min", "max"]),
                Field::block("yaxis", axis()).omit_empty(),
                Field::block("right_yaxis", axis()).omit_empty(),
                Field::block_list("marker", marker()).wire_key("markers").omit_empty(),
                Field::block_list("event", event()).wire_key("events").omit_empty(),
            ]),
            WidgetKind::Toplist => common()
                .field(Field::block_list("request", requests::toplist()).wire_key("requests").min_items(1)),
            WidgetKind::Heatmap => common().fields([
                Field::block_list("request", requests::heatmap()).wire_key("requests").min_items(1),
                Field::bool("show_legend"),
                Field::string("legend_size").omit_empty(),
                Field::block("yaxis", axis()).omit_empty(),
                Field::block_list("event", event()).wire_key("events").omit_empty(),
            ]),
            WidgetKind::Hostmap => {
                let style = Schema::new().fields([
                    Field::string("palette").omit_empty(),
                    Field::bool("palette_flip").omit_empty(),
                    Field::string("fill_min").omit_empty(),
                    Field::string("fill_max").omit_empty(),
                ]);
                titled().field(custom_links()).fields([
                    Field::block("request", requests::hostmap()).wire_key("requests").omit_empty(),
                    Field::string("node_type").omit_empty().one_of(&["host", "container"]),
                    Field::bool("no_metric_hosts").omit_empty(),
                    Field::bool("no_group_hosts").omit_empty(),
                    Field::string_list("group").omit_empty(),
                    Field::string_list("scope").omit_empty(),
                    Field::block("style", style).omit_empty(),
                ])
            }
            WidgetKind::Scatterplot => common().fields([
                Field::block("request", requests::scatterplot()).wire_key("requests").required(),
                Field::block("xaxis", axis()).omit_empty(),
                Field::block("yaxis", axis()).omit_empty(),
                Field::string_list("color_by_groups").omit_empty(),
            ]),
            WidgetKind::QueryValue => common().fields([
                Field::block_list("request", requests::query_value()).wire_key("requests").min_items(1),
                Field::bool("autoscale"),
                Field::string("custom_unit").omit_empty(),
                Field::int("precision"),
                Field::string("text_align").omit_empty().one_of(ALIGNMENTS),
            ]),
            WidgetKind::Change => common()
                .field(Field::block_list("request", requests::change()).wire_key("requests").min_items(1)),
            WidgetKind::Distribution => {
                let x_axis = Schema::new().fields([
                    Field::string("scale").omit_empty(),
                    Field::string("min").omit_empty(),
                    Field::string("max").omit_empty(),
                    Field::bool("include_zero").omit_empty(),
                ]);
                let y_axis = x_axis.clone().field(Field::string("label").omit_empty());
                common().fields([
                    Field::block_list("request", requests::distribution()).wire_key("requests").min_items(1),
                    Field::bool("show_legend"),
                    Field::string("legend_size").omit_empty(),
                    Field::block("xaxis", x_axis).omit_empty(),
                    Field::block("yaxis", y_axis).omit_empty(),
                ])
            }
            WidgetKind::CheckStatus => common().fields([
                Field::string("check").required(),
                Field::string("grouping").required().one_of(&["check", "cluster"]),
                Field::string("group").omit_empty(),
                Field::string_list("group_by").omit_empty(),
                Field::string_list("tags").omit_empty(),
            ]),
            WidgetKind::EventStream => common().fields([
                Field::string("query").required(),
                Field::string("event_size").omit_empty().one_of(&["s", "l"]),
                Field::string("tags_execution").omit_empty(),
            ]),
            WidgetKind::EventTimeline => common().fields([
                Field::string("query").required(),
                Field::string("tags_execution").omit_empty(),
            ]),
            WidgetKind::AlertGraph => common().fields([
                Field::string("alert_id").required(),
                Field::string("viz_type").required().one_of(&["timeseries", "toplist"]),
            ]),
            WidgetKind::AlertValue => titled().fields([
                Field::string("alert_id").required(),
                Field::int("precision").omit_empty(),
                Field::string("unit").omit_empty(),
                Field::string("text_align").omit_empty().one_of(ALIGNMENTS),
            ]),
            WidgetKind::FreeText => Schema::new().fields([
                Field::string("text").required(),
                Field::string("color").omit_empty(),
                Field::string("font_size").omit_empty(),
                Field::string("text_align").omit_empty().one_of(ALIGNMENTS),
            ]),
            WidgetKind::Note => Schema::new().fields([
                Field::string("content").required().validator(Validator::NotEmpty),
                Field::string("background_color").omit_empty(),
                Field::string("font_size").omit_empty(),
                Field::string("text_align").omit_empty().one_of(ALIGNMENTS),
                Field::string("vertical_align").omit_empty().one_of(VERTICAL_ALIGNMENTS),
                Field::bool("has_padding").default(true),
                Field::bool("show_tick"),
                Field::string("tick_pos").omit_empty(),
                Field::string("tick_edge").omit_empty().one_of(&["bottom", "left", "right", "top"]),
            ]),
            WidgetKind::Iframe => Schema::new().field(Field::string("url").required()),
            WidgetKind::Image => Schema::new().fields([
                Field::string("url").required(),
                Field::string("url_dark_theme").omit_empty(),
                Field::string("sizing")
                    .omit_empty()
                    .one_of(&["fill", "contain", "cover", "none", "scale-down", "zoom", "fit", "center"]),
                Field::string("margin").omit_empty().one_of(&["sm", "md", "lg", "small", "large"]),
                Field::bool("has_background").default(true),
                Field::bool("has_border").default(true),
                Field::string("horizontal_align").omit_empty().one_of(ALIGNMENTS),
                Field::string("vertical_align").omit_empty().one_of(VERTICAL_ALIGNMENTS),
            ]),
            WidgetKind::LogStream => {
                let sort = Schema::new().fields([
                    Field::string("column").required(),
                    Field::string("order").required().one_of(SORT_ORDERS),
                ]);
                common().fields([
                    Field::string_list("indexes").omit_empty(),
                    Field::string("query").omit_empty(),
                    Field::string_list("columns").omit_empty(),
                    Field::bool("show_date_column").omit_empty(),
                    Field::bool("show_message_column").omit_empty(),
                    Field::string("message_display").omit_empty().one_of(&["inline", "expanded-md", "expanded-lg"]),
                    Field::block("sort", sort).omit_empty(),
                ])
            }
            WidgetKind::ManageStatus => titled().fields([
                Field::string("query").required(),
                Field::string("summary_type").omit_empty().one_of(&["monitors", "groups", "combined"]),
                Field::string("sort").omit_empty(),
                Field::string("display_format").omit_empty().one_of(&["counts", "countsAndList", "list"]),
                Field::string("color_preference").omit_empty().one_of(&["background", "text"]),
                Field::bool("hide_zero_counts").omit_empty(),
                Field::bool("show_last_triggered").omit_empty(),
                Field::bool("show_priority").omit_empty(),
            ]),
            WidgetKind::TraceService => titled().merge(live_span()).fields([
                Field::string("env").required(),
                Field::string("service").required(),
                Field::string("span_name").required(),
                Field::bool("show_hits").omit_empty(),
                Field::bool("show_errors").omit_empty(),
                Field::bool("show_latency").omit_empty(),
                Field::bool("show_breakdown").omit_empty(),
                Field::bool("show_distribution").omit_empty(),
                Field::bool("show_resource_list").omit_empty(),
                Field::string("size_format").omit_empty().one_of(&["small", "medium", "large"]),
                Field::string("display_format").omit_empty().one_of(&["one_column", "two_column", "three_column"]),
            ]),
            WidgetKind::ServiceLevelObjective => titled().fields([
                Field::string("slo_id").required(),
                Field::string("view_type").required(),
                Field::string("view_mode").required().one_of(&["overall", "component", "both"]),
                Field::string_list("time_windows").required().one_of(&[
                    "7d",
                    "30d",
                    "90d",
                    "week_to_date",
                    "previous_week",
                    "month_to_date",
                    "previous_month",
                    "global_time",
                ]),
                Field::bool("show_error_budget").omit_empty(),
                Field::string("global_time_target").omit_empty(),
                Field::string("additional_query_filters").omit_empty(),
            ]),
        }
    }
}

/// Group definition; child widgets are translated by [`build_widget`]
fn group() -> Schema {
    Schema::new().fields([
        Field::string("title").omit_empty(),
        Field::string("layout_type").required().one_of(&["ordered"]),
        Field::string("background_color").omit_empty(),
        Field::string("banner_img").omit_empty(),
        Field::bool("show_title").default(true),
        Field::block_list_deferred("widget", child_widget_schema)
            .wire_key("widgets")
            .manual()
            .describe("The widgets inside the group. Groups cannot be nested."),
    ])
}

/// `widget_layout` block; coordinates are numeric strings
pub fn layout() -> Schema {
    Schema::new().fields([
        Field::string("x").required().numeric_string(),
        Field::string("y").required().numeric_string(),
        Field::string("width").required().numeric_string(),
        Field::string("height").required().numeric_string(),
        Field::bool("is_column_break").omit_empty(),
    ])
}

fn widget_schema_for(kinds: &[WidgetKind]) -> Schema {
    let keys: Vec<&'static str> = kinds.iter().map(|k| k.config_key()).collect();
    kinds
        .iter()
        .fold(Schema::new(), |schema, kind| {
            let nested = FieldType::Nested(NestedSchema::Inline(kind.schema()));
            schema.field(Field::new(kind.config_key(), FieldType::List(Box::new(nested))).max_items(1))
        })
        .fields([
            Field::block("widget_layout", layout()).optional_computed(),
            Field::int("id").computed(),
        ])
        .exactly_one_of(&keys)
}

/// Schema of one dashboard widget (every kind)
pub fn widget_schema() -> Arc<Schema> {
    static SCHEMA: LazyLock<Arc<Schema>> = LazyLock::new(|| widget_schema_for(WidgetKind::ALL).into_arc());
    SCHEMA.clone()
}

/// Schema of a widget inside a group (every kind but group)
pub fn child_widget_schema() -> Arc<Schema> {
    static SCHEMA: LazyLock<Arc<Schema>> = LazyLock::new(|| {
        let kinds: Vec<WidgetKind> = WidgetKind::ALL.iter().copied().filter(|k| *k != WidgetKind::Group).collect();
        widget_schema_for(&kinds).into_arc()
    });
    SCHEMA.clone()
}

/// Build the wire form of one widget
///
/// # Parameters
///
/// - `config`: Widget block (`{"note_definition": [..], "widget_layout": [..]}`)
/// - `path`: Location of the widget, e.g. `widget[3]`
/// - `nested`: Whether the widget sits inside a group
pub fn build_widget(config: &ConfigMap, path: &AttrPath, nested: bool) -> Result<Map<String, Value>> {
    let (kind, body) = select_variant::<WidgetKind>(config, path)?;
    let def_path = path.key(kind.config_key());
    if nested && kind == WidgetKind::Group {
        return Err(Error::translation(
            def_path,
            TranslationKind::InvalidEnum,
            "group widgets cannot be nested inside a group",
        ));
    }

    let mut definition = translate::build(&kind.schema(), body, &def_path)?;
    definition.insert("type".to_string(), Value::String(kind.wire_tag().to_string()));

    if kind == WidgetKind::Group {
        let children = match body.get("widget") {
            Some(Value::Array(items)) => items.as_slice(),
            Some(Value::Null) | None => &[],
            Some(_) => {
                return Err(Error::translation(
                    def_path.key("widget"),
                    TranslationKind::TypeMismatch,
                    "expected a list of widgets",
                ));
            }
        };
        let mut widgets = Vec::with_capacity(children.len());
        for (i, child) in children.iter().enumerate() {
            let cpath = def_path.key("widget").index(i);
            let map = child.as_object().ok_or_else(|| {
                Error::translation(cpath.clone(), TranslationKind::TypeMismatch, "expected a widget block")
            })?;
            widgets.push(Value::Object(build_widget(map, &cpath, true)?));
        }
        definition.insert("widgets".to_string(), Value::Array(widgets));
    }

    let mut wire = Map::new();
    wire.insert("definition".to_string(), Value::Object(definition));
    if let Some(layout_value) = config.get("widget_layout") {
        let lpath = path.key("widget_layout");
        if let Some(block) = translate::block_map(layout_value, &lpath)? {
            wire.insert("layout".to_string(), Value::Object(translate::build(&layout(), block, &lpath)?));
        }
    }
    Ok(wire)
}

/// Flatten one wire widget into its configuration block
pub fn flatten_widget(wire: &Map<String, Value>, path: &AttrPath, nested: bool) -> Result<ConfigMap> {
    let definition = wire.get("definition").and_then(Value::as_object).ok_or_else(|| {
        Error::translation(path.clone(), TranslationKind::MissingRequired, "widget has no definition")
    })?;
    let kind = variant_for_tag::<WidgetKind>(definition.get("type").and_then(Value::as_str), path)?;
    let def_path = path.key(kind.config_key());
    if nested && kind == WidgetKind::Group {
        return Err(Error::translation(
            def_path,
            TranslationKind::InvalidEnum,
            "group widgets cannot be nested inside a group",
        ));
    }

    let mut body = translate::flatten(&kind.schema(), definition, &def_path)?;
    if kind == WidgetKind::Group {
        let mut children = Vec::new();
        if let Some(items) = definition.get("widgets").and_then(Value::as_array) {
            for (i, item) in items.iter().enumerate() {
                let cpath = def_path.key("widget").index(i);
                let map = item.as_object().ok_or_else(|| {
                    Error::translation(cpath.clone(), TranslationKind::TypeMismatch, "expected a widget object")
                })?;
                children.push(Value::Object(flatten_widget(map, &cpath, true)?));
            }
        }
        body.insert("widget".to_string(), Value::Array(children));
    }

    let mut flat = ConfigMap::new();
    flat.insert(kind.config_key().to_string(), single_block(body));
    if let Some(id) = wire.get("id").filter(|v| v.is_number()) {
        flat.insert("id".to_string(), id.clone());
    }
    if let Some(layout_wire) = wire.get("layout").and_then(Value::as_object) {
        let lpath = path.key("widget_layout");
        flat.insert(
            "widget_layout".to_string(),
            single_block(translate::flatten(&layout(), layout_wire, &lpath)?),
        );
    }
    Ok(flat)
}

/// Build every widget of a list
pub fn build_widgets(items: &[Value], path: &AttrPath) -> Result<Vec<Value>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let wpath = path.index(i);
            let map = item.as_object().ok_or_else(|| {
                Error::translation(wpath.clone(), TranslationKind::TypeMismatch, "expected a widget block")
            })?;
            build_widget(map, &wpath, false).map(Value::Object)
        })
        .collect()
}

/// Flatten every widget of a wire list
pub fn flatten_widgets(items: &[Value], path: &AttrPath) -> Result<Vec<Value>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let wpath = path.index(i);
            let map = item.as_object().ok_or_else(|| {
                Error::translation(wpath.clone(), TranslationKind::TypeMismatch, "expected a widget object")
            })?;
            flatten_widget(map, &wpath, false).map(Value::Object)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddprov_core::schema::validate;
    use ddprov_core::value::config_map;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn root() -> AttrPath {
        AttrPath::root().key("widget").index(0)
    }

    #[test]
    fn test_every_kind_has_a_distinct_key_and_tag() {
        let mut keys: Vec<_> = WidgetKind::config_keys();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 22);
        for kind in WidgetKind::ALL {
            assert_eq!(WidgetKind::from_tag(kind.wire_tag()), Some(*kind));
            assert!(widget_schema().get(kind.config_key()).is_some());
        }
        assert!(child_widget_schema().get("group_definition").is_none());
    }

    #[test]
    fn test_note_round_trip_with_layout() {
        let config = config_map(json!({
            "note_definition": [{"content": "on-call: ✓ 監視", "background_color": "pink", "show_tick": false}],
            "widget_layout": [{"x": "0", "y": "5", "width": "2.5", "height": "2"}]
        }));
        let wire = build_widget(&config, &root(), false).unwrap();
        assert_eq!(
            Value::Object(wire.clone()),
            json!({
                "definition": {
                    "type": "note",
                    "content": "on-call: ✓ 監視",
                    "background_color": "pink",
                    "show_tick": false,
                    "has_padding": true
                },
                "layout": {"x": 0.0, "y": 5.0, "width": 2.5, "height": 2.0}
            })
        );

        let flat = flatten_widget(&wire, &root(), false).unwrap();
        assert_eq!(flat["note_definition"][0]["content"], json!("on-call: ✓ 監視"));
        assert_eq!(flat["widget_layout"][0]["width"], json!("2.5"));
        assert_eq!(flat["widget_layout"][0]["x"], json!("0"));
    }

    #[test]
    fn test_group_recurses_and_keeps_order() {
        let config = config_map(json!({
            "group_definition": [{
                "layout_type": "ordered",
                "title": "Ops",
                "widget": [
                    {"note_definition": [{"content": "first"}]},
                    {"alert_graph_definition": [{"alert_id": "123", "viz_type": "timeseries"}]}
                ]
            }]
        }));
        let wire = build_widget(&config, &root(), false).unwrap();
        let children = wire["definition"]["widgets"].as_array().unwrap();
        assert_eq!(children[0]["definition"]["type"], json!("note"));
        assert_eq!(children[1]["definition"]["type"], json!("alert_graph"));

        let flat = flatten_widget(&wire, &root(), false).unwrap();
        assert_eq!(flat.len(), 1);
        let group = &flat["group_definition"][0];
        assert_eq!(group["widget"][0]["note_definition"][0]["content"], json!("first"));
        assert_eq!(group["widget"][1]["alert_graph_definition"][0]["alert_id"], json!("123"));
        assert!(group["widget"][1].get("note_definition").is_none());
    }

    #[test]
    fn test_nested_groups_are_rejected() {
        let config = config_map(json!({
            "group_definition": [{
                "layout_type": "ordered",
                "widget": [{"group_definition": [{"layout_type": "ordered", "widget": []}]}]
            }]
        }));
        let err = build_widget(&config, &root(), false).unwrap_err();
        assert_eq!(err.translation_kind(), Some(TranslationKind::InvalidEnum));
        assert_eq!(
            err.path().unwrap().to_string(),
            "widget[0].group_definition.widget[0].group_definition"
        );
    }

    #[test]
    fn test_error_path_reaches_into_requests() {
        let config = config_map(json!({
            "timeseries_definition": [{
                "request": [
                    {"q": "avg:a{*}"},
                    {"log_query": [{"index": "main", "group_by": [{"facet": "host", "sort_query": [{"aggregation": "count"}]}]}]}
                ]
            }]
        }));
        let err = build_widget(&config, &AttrPath::root().key("widget").index(3), false).unwrap_err();
        assert_eq!(err.translation_kind(), Some(TranslationKind::MissingRequired));
        assert_eq!(
            err.path().unwrap().to_string(),
            "widget[3].timeseries_definition.request[1].log_query.group_by[0].sort_query.order"
        );
    }

    #[test]
    fn test_unknown_wire_type_is_invalid_enum() {
        let wire = config_map(json!({"definition": {"type": "sunburst"}}));
        let err = flatten_widget(&wire, &root(), false).unwrap_err();
        assert_eq!(err.translation_kind(), Some(TranslationKind::InvalidEnum));
    }

    #[test]
    fn test_schema_validation_sees_sibling_definitions() {
        let config = config_map(json!({
            "note_definition": [{"content": "a"}],
            "free_text_definition": [{"text": "b"}]
        }));
        let errors = validate(&config, &widget_schema()).unwrap_err();
        assert!(errors.iter().any(|e| e.translation_kind() == Some(TranslationKind::AmbiguousUnion)));
    }
}
