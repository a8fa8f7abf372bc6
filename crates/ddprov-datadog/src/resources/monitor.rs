//! `datadog_monitor`
//!
//! Monitors are written with a full-replace PUT. Thresholds are numeric
//! strings in configuration and nullable doubles on the wire: a zero is a
//! value and is always sent. `thresholds` is the deprecated spelling of
//! `monitor_thresholds`; read-back follows whichever one the
//! configuration uses.

use super::response_id;
use async_trait::async_trait;
use ddprov_core::diff::{DiffRule, SuppressContext, format_number};
use ddprov_core::error::{Error, Result};
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, Schema, Validator};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::value::{ConfigMap, Fields, put_opt, single_block};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub(crate) const MONITOR_PATH: &str = "/api/v1/monitor";

pub const KIND: &str = "datadog_monitor";

/// Default `no_data_timeframe`, in minutes
const DEFAULT_NO_DATA_TIMEFRAME: i64 = 10;

const MONITOR_TYPES: &[&str] = &[
    "composite",
    "event alert",
    "log alert",
    "metric alert",
    "process alert",
    "query alert",
    "rum alert",
    "service check",
    "synthetics alert",
    "trace-analytics alert",
    "slo alert",
    "event-v2 alert",
    "audit alert",
    "ci-pipelines alert",
    "ci-tests alert",
    "error-tracking alert",
    "database-monitoring alert",
];

const THRESHOLD_KEYS: &[&str] = &["ok", "warning", "critical", "unknown", "warning_recovery", "critical_recovery"];

const ON_MISSING_DATA: &[&str] = &["default", "show_no_data", "show_and_notify_no_data", "resolve"];

const NOTIFICATION_PRESETS: &[&str] = &["show_all", "hide_query", "hide_handles", "hide_all"];

fn threshold_schema() -> Schema {
    Schema::new().fields(THRESHOLD_KEYS.iter().map(|&key| {
        Field::string(key)
            .validator(Validator::FloatString)
            .diff(DiffRule::Numeric)
    }))
}

/// `query alert` and `metric alert` are the same monitor type
fn same_alert_type(ctx: &SuppressContext<'_>) -> bool {
    fn alias(v: Option<&Value>) -> Option<&str> {
        match v.and_then(Value::as_str) {
            Some("query alert") => Some("metric alert"),
            other => other,
        }
    }
    alias(ctx.old) == alias(ctx.new)
}

/// The timeframe only matters while `notify_no_data` is on
fn no_data_timeframe_unused(ctx: &SuppressContext<'_>) -> bool {
    let notify = ctx.desired.get("notify_no_data").and_then(Value::as_bool).unwrap_or(false);
    !notify || ctx.old == ctx.new
}

pub fn schema() -> Schema {
    let evaluation_window = Schema::new().fields([
        Field::string("day_starts").omit_empty(),
        Field::int("hour_starts").validator(Validator::IntRange { min: 0, max: 59 }),
        Field::int("month_starts").omit_empty().validator(Validator::IntRange { min: 1, max: 1 }),
    ]);
    let scheduling = Schema::new().field(Field::block("evaluation_window", evaluation_window).required());
    let windows = Schema::new().fields([
        Field::string("recovery_window").omit_empty(),
        Field::string("trigger_window").omit_empty(),
    ]);

    Schema::new()
        .fields([
            Field::string("name").required().describe("Name of the monitor."),
            Field::string("message").required().diff(DiffRule::TrimSpace),
            Field::string("escalation_message").omit_empty().diff(DiffRule::TrimSpace),
            Field::string("query").required().diff(DiffRule::TrimSpace),
            Field::string("type")
                .required()
                .force_new()
                .one_of(MONITOR_TYPES)
                .diff(DiffRule::Suppress(same_alert_type)),
            Field::int("priority").omit_empty().validator(Validator::IntRange { min: 1, max: 5 }),
            Field::block("monitor_thresholds", threshold_schema()),
            Field::block("thresholds", threshold_schema()).deprecated("Use `monitor_thresholds`."),
            Field::block("monitor_threshold_windows", windows),
            Field::bool("notify_no_data").default(false).conflicts_with(&["on_missing_data"]),
            Field::string("on_missing_data")
                .omit_empty()
                .one_of(ON_MISSING_DATA)
                .conflicts_with(&["notify_no_data", "no_data_timeframe"]),
            Field::string("group_retention_duration").omit_empty(),
            Field::int("new_group_delay").optional_computed(),
            Field::int("new_host_delay")
                .default(300)
                .deprecated("Use `new_group_delay` except when setting `new_host_delay` to zero."),
            Field::int("evaluation_delay").optional_computed(),
            Field::int("no_data_timeframe")
                .default(DEFAULT_NO_DATA_TIMEFRAME)
                .diff(DiffRule::Suppress(no_data_timeframe_unused))
                .conflicts_with(&["on_missing_data"]),
            Field::int("renotify_interval").omit_empty(),
            Field::int("renotify_occurrences").omit_empty(),
            Field::string_set("renotify_statuses").omit_empty().one_of(&["alert", "warn", "no data"]),
            Field::bool("notify_audit").omit_empty(),
            Field::int("timeout_h").omit_empty(),
            Field::bool("require_full_window").default(true),
            Field::bool("locked")
                .omit_empty()
                .deprecated("Use `restricted_roles`.")
                .conflicts_with(&["restricted_roles"]),
            Field::string_set("restricted_roles").omit_empty().conflicts_with(&["locked"]),
            Field::bool("include_tags").default(true),
            Field::string_set("tags").omit_empty(),
            Field::bool("groupby_simple_monitor").omit_empty(),
            Field::string_set("notify_by").omit_empty(),
            Field::bool("enable_logs_sample").omit_empty(),
            Field::bool("enable_samples").omit_empty(),
            Field::bool("force_delete").manual().diff(DiffRule::Ignore),
            Field::bool("validate").manual().diff(DiffRule::Ignore),
            Field::block("scheduling_options", scheduling),
            Field::string("notification_preset_name").omit_empty().one_of(NOTIFICATION_PRESETS),
        ])
        .at_most_one_of(&["monitor_thresholds", "thresholds"])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_recovery: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_recovery: Option<f64>,
}

impl Thresholds {
    fn entries(&self) -> [(&'static str, Option<f64>); 6] {
        [
            ("ok", self.ok),
            ("warning", self.warning),
            ("critical", self.critical),
            ("unknown", self.unknown),
            ("warning_recovery", self.warning_recovery),
            ("critical_recovery", self.critical_recovery),
        ]
    }

    fn slot(&mut self, key: &str) -> Option<&mut Option<f64>> {
        match key {
            "ok" => Some(&mut self.ok),
            "warning" => Some(&mut self.warning),
            "critical" => Some(&mut self.critical),
            "unknown" => Some(&mut self.unknown),
            "warning_recovery" => Some(&mut self.warning_recovery),
            "critical_recovery" => Some(&mut self.critical_recovery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdWindows {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_window: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationWindow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_starts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour_starts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month_starts: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_window: Option<EvaluationWindow>,
}

/// `options` object of a monitor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorOptions {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_windows: Option<ThresholdWindows>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_no_data: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_missing_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_retention_duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_group_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_host_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_data_timeframe: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renotify_interval: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renotify_occurrences: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renotify_statuses: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_audit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_h: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_full_window: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_tags: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groupby_simple_monitor: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_by: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_logs_sample: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_samples: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling_options: Option<SchedulingOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_preset_name: Option<String>,
}

/// Monitor entity as sent and received
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub message: String,
    pub query: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricted_roles: Option<Vec<String>>,
    #[serde(default)]
    pub options: MonitorOptions,
}

/// Configuration key holding the thresholds block
fn thresholds_key(config: &ConfigMap) -> &'static str {
    if Fields::new(config).is_set("thresholds") { "thresholds" } else { "monitor_thresholds" }
}

/// Build the wire entity for a configuration
pub fn build_monitor(config: &ConfigMap) -> Result<MonitorWire> {
    let f = Fields::new(config);
    let monitor_type = f.required_str("type")?.to_string();

    let mut o = MonitorOptions::default();
    if let Some(block) = f.block(thresholds_key(config))? {
        for key in THRESHOLD_KEYS {
            if let (Some(value), Some(slot)) = (block.f64(key)?, o.thresholds.slot(key)) {
                *slot = Some(value);
            }
        }
    }
    if let Some(block) = f.block("monitor_threshold_windows")? {
        let windows = ThresholdWindows {
            recovery_window: block.non_empty_string("recovery_window")?,
            trigger_window: block.non_empty_string("trigger_window")?,
        };
        if windows != ThresholdWindows::default() {
            o.threshold_windows = Some(windows);
        }
    }

    o.notify_no_data = Some(f.bool_or("notify_no_data", false)?);
    o.require_full_window = Some(f.bool_or("require_full_window", true)?);
    o.include_tags = Some(f.bool_or("include_tags", true)?);
    o.group_retention_duration = f.non_empty_string("group_retention_duration")?;
    o.new_group_delay = f.i64("new_group_delay")?;
    // zero is meaningful here, so the default is always sent
    o.new_host_delay = Some(f.i64("new_host_delay")?.unwrap_or(300));
    o.evaluation_delay = f.i64("evaluation_delay")?;
    o.on_missing_data = f.non_empty_string("on_missing_data")?;
    if o.on_missing_data.is_none() {
        o.no_data_timeframe = Some(f.i64("no_data_timeframe")?.unwrap_or(DEFAULT_NO_DATA_TIMEFRAME));
    }
    o.renotify_interval = f.i64("renotify_interval")?.filter(|v| *v != 0);
    o.renotify_occurrences = f.i64("renotify_occurrences")?.filter(|v| *v != 0);
    o.renotify_statuses = f.string_set("renotify_statuses")?.filter(|v| !v.is_empty());
    o.notify_audit = f.bool("notify_audit")?.filter(|v| *v);
    o.timeout_h = f.i64("timeout_h")?.filter(|v| *v != 0);
    o.escalation_message = f.non_empty_string("escalation_message")?;
    o.locked = f.bool("locked")?.filter(|v| *v);
    o.notify_by = f.string_set("notify_by")?.filter(|v| !v.is_empty());
    o.notification_preset_name = f.non_empty_string("notification_preset_name")?;

    match monitor_type.as_str() {
        "log alert" => {
            o.enable_logs_sample = Some(f.bool_or("enable_logs_sample", false)?);
            o.groupby_simple_monitor = f.bool("groupby_simple_monitor")?.filter(|v| *v);
        }
        "ci-pipelines alert" | "ci-tests alert" => {
            o.enable_samples = Some(f.bool_or("enable_samples", false)?);
        }
        _ => {}
    }

    if let Some(scheduling) = f.block("scheduling_options")? {
        if let Some(window) = scheduling.block("evaluation_window")? {
            let day_starts = window.non_empty_string("day_starts")?;
            let month_starts = window.i64("month_starts")?.filter(|v| *v != 0);
            let day_or_month = day_starts.is_some() || month_starts.is_some();
            o.scheduling_options = Some(SchedulingOptions {
                evaluation_window: Some(EvaluationWindow {
                    hour_starts: if day_or_month { None } else { window.i64("hour_starts")? },
                    day_starts,
                    month_starts,
                }),
            });
        }
    }

    Ok(MonitorWire {
        id: None,
        name: f.required_str("name")?.to_string(),
        message: f.string("message")?.unwrap_or_default(),
        query: f.required_str("query")?.trim().to_string(),
        monitor_type,
        priority: f.i64("priority")?.filter(|v| *v != 0),
        tags: f.string_set("tags")?.unwrap_or_default(),
        restricted_roles: f.string_set("restricted_roles")?.filter(|v| !v.is_empty()),
        options: o,
    })
}

/// Flatten a monitor into state
///
/// `config` decides which thresholds key is populated and carries the
/// configuration-only flags through.
pub fn flatten_monitor(m: &MonitorWire, config: &ConfigMap) -> ConfigMap {
    let o = &m.options;
    let mut state = ConfigMap::new();
    state.insert("name".to_string(), m.name.clone().into());
    state.insert("message".to_string(), m.message.clone().into());
    state.insert("query".to_string(), m.query.clone().into());
    state.insert("type".to_string(), m.monitor_type.clone().into());
    put_opt(&mut state, "priority", m.priority);

    let mut thresholds = ConfigMap::new();
    for (key, value) in o.thresholds.entries() {
        put_opt(&mut thresholds, key, value.map(format_number));
    }
    if !thresholds.is_empty() {
        state.insert(thresholds_key(config).to_string(), single_block(thresholds));
    }
    if let Some(w) = &o.threshold_windows {
        let mut windows = ConfigMap::new();
        put_opt(&mut windows, "recovery_window", w.recovery_window.clone());
        put_opt(&mut windows, "trigger_window", w.trigger_window.clone());
        if !windows.is_empty() {
            state.insert("monitor_threshold_windows".to_string(), single_block(windows));
        }
    }

    state.insert("notify_no_data".to_string(), o.notify_no_data.unwrap_or(false).into());
    put_opt(&mut state, "on_missing_data", o.on_missing_data.clone());
    put_opt(&mut state, "group_retention_duration", o.group_retention_duration.clone());
    state.insert("new_group_delay".to_string(), o.new_group_delay.unwrap_or(0).into());
    put_opt(&mut state, "new_host_delay", o.new_host_delay);
    state.insert("evaluation_delay".to_string(), o.evaluation_delay.unwrap_or(0).into());
    put_opt(&mut state, "no_data_timeframe", o.no_data_timeframe);
    state.insert("renotify_interval".to_string(), o.renotify_interval.unwrap_or(0).into());
    state.insert("renotify_occurrences".to_string(), o.renotify_occurrences.unwrap_or(0).into());
    if let Some(statuses) = o.renotify_statuses.clone().filter(|s| !s.is_empty()) {
        state.insert("renotify_statuses".to_string(), statuses.into());
    }
    state.insert("notify_audit".to_string(), o.notify_audit.unwrap_or(false).into());
    state.insert("timeout_h".to_string(), o.timeout_h.unwrap_or(0).into());
    state.insert("escalation_message".to_string(), o.escalation_message.clone().unwrap_or_default().into());
    state.insert("include_tags".to_string(), o.include_tags.unwrap_or(true).into());
    state.insert("require_full_window".to_string(), o.require_full_window.unwrap_or(true).into());
    state.insert("locked".to_string(), o.locked.unwrap_or(false).into());

    let mut tags = m.tags.clone();
    tags.sort();
    tags.dedup();
    state.insert("tags".to_string(), tags.into());
    if let Some(roles) = m.restricted_roles.clone().filter(|r| !r.is_empty()) {
        state.insert("restricted_roles".to_string(), roles.into());
    }

    if m.monitor_type == "log alert" {
        state.insert("enable_logs_sample".to_string(), o.enable_logs_sample.unwrap_or(false).into());
        state.insert(
            "groupby_simple_monitor".to_string(),
            o.groupby_simple_monitor.unwrap_or(false).into(),
        );
    }
    if let Some(enable_samples) = o.enable_samples {
        state.insert("enable_samples".to_string(), enable_samples.into());
    }
    if let Some(notify_by) = o.notify_by.clone() {
        state.insert("notify_by".to_string(), notify_by.into());
    }

    if let Some(window) = o.scheduling_options.as_ref().and_then(|s| s.evaluation_window.as_ref()) {
        let mut w = ConfigMap::new();
        put_opt(&mut w, "day_starts", window.day_starts.clone());
        put_opt(&mut w, "hour_starts", window.hour_starts);
        put_opt(&mut w, "month_starts", window.month_starts);
        if !w.is_empty() {
            let mut scheduling = ConfigMap::new();
            scheduling.insert("evaluation_window".to_string(), single_block(w));
            state.insert("scheduling_options".to_string(), single_block(scheduling));
        }
    }
    put_opt(&mut state, "notification_preset_name", o.notification_preset_name.clone());

    for key in ["force_delete", "validate"] {
        if let Some(v) = config.get(key).filter(|v| !v.is_null()) {
            state.insert(key.to_string(), v.clone());
        }
    }
    state
}

/// Resource implementation for monitors
pub struct MonitorResource {
    descriptor: ResourceDescriptor,
}

impl MonitorResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()),
        }
    }

    /// Server-side dry run of the monitor definition
    async fn preflight(&self, ctx: &OpContext, bag: &StateBag, body: &Value) -> Result<()> {
        if !Fields::new(bag.config()).bool_or("validate", true)? {
            return Ok(());
        }
        let path = match bag.id() {
            Some(id) => format!("{}/{}/validate", MONITOR_PATH, id),
            None => format!("{}/validate", MONITOR_PATH),
        };
        debug!("Validating monitor definition via {}", path);
        ctx.call(ApiRequest::post(path, body.clone())).await?;
        Ok(())
    }
}

impl Default for MonitorResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for MonitorResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), Vec<Error>> {
        let f = Fields::new(config);
        let mut errors = Vec::new();
        let service_check = matches!(f.str("type"), Ok(Some("service check")));
        let key = thresholds_key(config);
        if let Ok(Some(block)) = f.block(key) {
            for only_service_check in ["ok", "unknown"] {
                if block.is_set(only_service_check) && !service_check {
                    errors.push(Error::config_at(
                        AttrPath::root().key(key).key(only_service_check),
                        format!("{} thresholds are only supported by service check monitors", only_service_check),
                    ));
                }
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = serde_json::to_value(build_monitor(bag.config())?)?;
        self.preflight(ctx, bag, &body).await?;
        let created = ctx.call_json(ApiRequest::post(MONITOR_PATH, body)).await?;
        let id = response_id(&created, "/id")?;
        info!("Monitor {} created", id);
        bag.set_id(id);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let body = ctx.call_json(ApiRequest::get(format!("{}/{}", MONITOR_PATH, id))).await?;
        let monitor: MonitorWire = serde_json::from_value(body)?;
        let state = flatten_monitor(&monitor, bag.known());
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let mut monitor = build_monitor(bag.config())?;
        monitor.id = id.parse().ok();
        let body = serde_json::to_value(monitor)?;
        self.preflight(ctx, bag, &body).await?;
        ctx.call(ApiRequest::put(format!("{}/{}", MONITOR_PATH, id), body)).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let mut request = ApiRequest::delete(format!("{}/{}", MONITOR_PATH, id));
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

    fn query_alert() -> ConfigMap {
        config_map(json!({
            "name": "cpu",
            "message": "CPU high @ops",
            "query": "avg(last_5m):avg:system.cpu.user{*} > 2",
            "type": "query alert",
            "monitor_thresholds": [{
                "warning": 1.0,
                "warning_recovery": 0.0,
                "critical": 2.0,
                "critical_recovery": 1.0
            }]
        }))
    }

    #[test]
    fn test_zero_threshold_is_sent() {
        let wire = serde_json::to_value(build_monitor(&query_alert()).unwrap()).unwrap();
        assert_eq!(
            wire["options"]["thresholds"],
            json!({"warning": 1.0, "warning_recovery": 0.0, "critical": 2.0, "critical_recovery": 1.0})
        );
        assert_eq!(wire["options"]["no_data_timeframe"], json!(10));
        assert_eq!(wire["options"]["new_host_delay"], json!(300));
    }

    #[test]
    fn test_read_back_converges() {
        let config = query_alert();
        assert!(schema::validate(&config, &schema()).is_ok());
        let mut wire = build_monitor(&config).unwrap();
        wire.id = Some(12345);
        let state = flatten_monitor(&wire, &config);
        assert_eq!(state["monitor_thresholds"][0]["warning_recovery"], json!("0"));
        let d = diff::diff(&schema(), &state, &config);
        assert!(d.is_empty(), "unexpected changes: {:?}", d.paths());
    }

    #[test]
    fn test_metric_alert_alias_is_not_a_change() {
        let config = query_alert();
        let mut wire = build_monitor(&config).unwrap();
        wire.monitor_type = "metric alert".to_string();
        let state = flatten_monitor(&wire, &config);
        assert!(!diff::diff(&schema(), &state, &config).touches("type"));
    }

    #[test]
    fn test_deprecated_thresholds_alias_reads_back_under_its_own_key() {
        let mut config = query_alert();
        let block = config.remove("monitor_thresholds").unwrap();
        config.insert("thresholds".to_string(), block);
        let state = flatten_monitor(&build_monitor(&config).unwrap(), &config);
        assert!(state.contains_key("thresholds"));
        assert!(!state.contains_key("monitor_thresholds"));
    }

    #[test]
    fn test_on_missing_data_drops_no_data_timeframe() {
        let mut config = query_alert();
        config.insert("on_missing_data".to_string(), json!("show_no_data"));
        let wire = build_monitor(&config).unwrap();
        assert_eq!(wire.options.no_data_timeframe, None);
        assert_eq!(wire.options.on_missing_data.as_deref(), Some("show_no_data"));
    }

    #[test]
    fn test_logs_sample_only_for_log_alerts() {
        let mut config = query_alert();
        config.insert("enable_logs_sample".to_string(), json!(true));
        assert_eq!(build_monitor(&config).unwrap().options.enable_logs_sample, None);
        config.insert("type".to_string(), json!("log alert"));
        assert_eq!(build_monitor(&config).unwrap().options.enable_logs_sample, Some(true));
    }

    #[test]
    fn test_ok_threshold_requires_service_check() {
        let mut config = query_alert();
        config.insert("monitor_thresholds".to_string(), json!([{"ok": "0", "critical": "2"}]));
        let errors = MonitorResource::new().validate_config(&config).unwrap_err();
        assert_eq!(errors[0].path().unwrap().to_string(), "monitor_thresholds.ok");

        config.insert("type".to_string(), json!("service check"));
        assert!(MonitorResource::new().validate_config(&config).is_ok());
    }

    #[test]
    fn test_hour_starts_dropped_with_day_starts() {
        let mut config = query_alert();
        config.insert(
            "scheduling_options".to_string(),
            json!([{"evaluation_window": [{"day_starts": "04:00", "hour_starts": 5}]}]),
        );
        let window = build_monitor(&config).unwrap().options.scheduling_options.unwrap().evaluation_window.unwrap();
        assert_eq!(window.day_starts.as_deref(), Some("04:00"));
        assert_eq!(window.hour_starts, None);
    }
}
