//! `datadog_downtime`
//!
//! A downtime is cancelled, never hard-deleted. The API keeps returning a
//! cancelled downtime with `canceled` set, so reading one clears the
//! identifier.
//!
//! Recurrence is either a calendar rule (`type`, `period`, optional
//! `week_days`, `until_date`/`until_occurrences`) or an RFC 5545 `rrule`.

use super::response_id;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ddprov_core::diff::{DiffRule, SuppressContext};
use ddprov_core::error::{Error, Result, TranslationKind};
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, Schema, Validator, is_set};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::value::{ConfigMap, Fields, put_opt, single_block};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

const DOWNTIME_PATH: &str = "/api/v1/downtime";

pub const KIND: &str = "datadog_downtime";

const RECURRENCE_TYPES: &[&str] = &["days", "weeks", "months", "years", "rrule"];

const WEEK_DAYS: &[&str] = &["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// `UTC`, or something shaped like an IANA zone name (`Europe/Paris`)
fn check_timezone(value: &Value) -> std::result::Result<(), String> {
    let tz = value.as_str().unwrap_or_default();
    let iana = tz.split('/').count() >= 2
        && tz.split('/').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || "_-+".contains(c))
        });
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("gmt") || iana {
        Ok(())
    } else {
        Err(format!("{:?} is not a valid IANA time zone name", tz))
    }
}

fn start_from_date(ctx: &SuppressContext<'_>) -> bool {
    is_set(ctx.desired.get("start_date"))
}

fn end_from_date(ctx: &SuppressContext<'_>) -> bool {
    is_set(ctx.desired.get("end_date"))
}

pub fn schema() -> Schema {
    let recurrence = Schema::new().fields([
        Field::string("type").required().one_of(RECURRENCE_TYPES),
        Field::int("period").omit_empty(),
        Field::string_list("week_days").omit_empty().one_of(WEEK_DAYS),
        Field::int("until_date").omit_empty().conflicts_with(&["until_occurrences"]),
        Field::int("until_occurrences").omit_empty().conflicts_with(&["until_date"]),
        Field::string("rrule").omit_empty().describe("RRULE (RFC 5545) recurrence, with type = \"rrule\"."),
    ]);

    Schema::new()
        .fields([
            Field::bool("active").computed(),
            Field::bool("disabled").computed(),
            Field::int("start").diff(DiffRule::Suppress(start_from_date)),
            Field::string("start_date")
                .validator(Validator::Rfc3339)
                .conflicts_with(&["start"]),
            Field::int("end").omit_empty().diff(DiffRule::Suppress(end_from_date)),
            Field::string("end_date").validator(Validator::Rfc3339).conflicts_with(&["end"]),
            Field::string("timezone").default("UTC").validator(Validator::Custom(check_timezone)),
            Field::string("message").omit_empty().diff(DiffRule::TrimSpace),
            Field::block("recurrence", recurrence),
            Field::string_list("scope").required().min_items(1),
            Field::int("monitor_id").omit_empty().conflicts_with(&["monitor_tags"]),
            Field::string_set("monitor_tags").omit_empty().conflicts_with(&["monitor_id"]),
        ])
        .exactly_one_of(&["start", "start_date"])
        .at_most_one_of(&["end", "end_date"])
}

/// Recurrence, canonicalized from the configuration block
#[derive(Debug, Clone, PartialEq)]
pub enum Recurrence {
    Calendar {
        unit: String,
        period: i64,
        week_days: Option<Vec<String>>,
        until_date: Option<i64>,
        until_occurrences: Option<i64>,
    },
    Rule(String),
}

impl Recurrence {
    /// Read and check a `recurrence` block
    pub fn from_config(block: &Fields<'_>) -> Result<Self> {
        let unit = block.required_str("type")?;
        let path = block.path();
        if unit == "rrule" {
            for key in ["week_days", "until_date", "until_occurrences"] {
                if block.is_set(key) {
                    return Err(Error::config_at(
                        path.key(key),
                        format!("{} cannot be combined with an rrule recurrence", key),
                    ));
                }
            }
            let rule = block.non_empty_string("rrule")?.ok_or_else(|| block.missing("rrule"))?;
            return Ok(Recurrence::Rule(rule));
        }
        if block.is_set("rrule") {
            return Err(Error::config_at(path.key("rrule"), "rrule requires type = \"rrule\""));
        }
        Ok(Recurrence::Calendar {
            unit: unit.to_string(),
            period: block.i64("period")?.ok_or_else(|| block.missing("period"))?,
            week_days: block.strings("week_days")?.filter(|d| !d.is_empty()),
            until_date: block.i64("until_date")?,
            until_occurrences: block.i64("until_occurrences")?,
        })
    }

    fn to_wire(&self) -> RecurrenceWire {
        match self {
            Recurrence::Calendar {
                unit,
                period,
                week_days,
                until_date,
                until_occurrences,
            } => RecurrenceWire {
                recurrence_type: unit.clone(),
                period: Some(*period),
                week_days: week_days.clone(),
                until_date: *until_date,
                until_occurrences: *until_occurrences,
                rrule: None,
            },
            Recurrence::Rule(rule) => RecurrenceWire {
                recurrence_type: "rrule".to_string(),
                rrule: Some(rule.clone()),
                ..RecurrenceWire::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceWire {
    #[serde(rename = "type")]
    pub recurrence_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_days: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until_occurrences: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrule: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DowntimeWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_id: Option<i64>,
    #[serde(default)]
    pub monitor_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceWire>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Epoch seconds of a boundary, from `<name>_date` or `<name>`
fn boundary(f: &Fields<'_>, name: &str) -> Result<Option<i64>> {
    let date_key = format!("{}_date", name);
    if let Some(date) = f.non_empty_string(&date_key)? {
        let parsed = DateTime::parse_from_rfc3339(&date).map_err(|e| {
            Error::translation(
                f.path().key(date_key.as_str()),
                TranslationKind::ParseError,
                format!("{:?} is not a valid RFC3339 timestamp: {}", date, e),
            )
        })?;
        return Ok(Some(parsed.timestamp()));
    }
    f.i64(name)
}

/// Build the wire entity
///
/// # Parameters
///
/// - `config`: Desired configuration
/// - `current`: Last read state, on update. A boundary is only sent when it
///   differs from it, so other fields can change after the start has passed.
pub fn build_downtime(config: &ConfigMap, current: Option<&ConfigMap>) -> Result<DowntimeWire> {
    let f = Fields::new(config);
    let prior = |key: &str| current.and_then(|c| c.get(key)).and_then(Value::as_i64);
    let keep = |key: &str, desired: Option<i64>| match (current, desired) {
        (Some(_), Some(value)) if prior(key) == Some(value) => None,
        (_, desired) => desired,
    };

    let start = boundary(&f, "start")?;
    if start.is_none() {
        return Err(f.missing("start"));
    }
    let recurrence = match f.block("recurrence")? {
        Some(block) => Some(Recurrence::from_config(&block)?.to_wire()),
        None => None,
    };

    Ok(DowntimeWire {
        start: keep("start", start),
        end: keep("end", boundary(&f, "end")?),
        message: f.string("message")?.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
        monitor_id: f.i64("monitor_id")?.filter(|id| *id != 0),
        monitor_tags: f.string_set("monitor_tags")?.unwrap_or_default(),
        recurrence,
        scope: f.strings("scope")?.ok_or_else(|| f.missing("scope"))?,
        timezone: Some(f.non_empty_string("timezone")?.unwrap_or_else(|| "UTC".to_string())),
        ..DowntimeWire::default()
    })
}

fn rfc3339(ts: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Keep the configured date text when it denotes the same instant
fn date_state(config: &ConfigMap, key: &str, ts: Option<i64>) -> Option<String> {
    let configured = config.get(key).and_then(Value::as_str)?;
    let ts = ts?;
    match DateTime::parse_from_rfc3339(configured) {
        Ok(t) if t.timestamp() == ts => Some(configured.to_string()),
        _ => rfc3339(ts),
    }
}

/// Flatten a downtime into state
pub fn flatten_downtime(dt: &DowntimeWire, config: &ConfigMap) -> ConfigMap {
    let mut state = ConfigMap::new();
    state.insert("active".to_string(), dt.active.unwrap_or(false).into());
    state.insert("disabled".to_string(), dt.disabled.unwrap_or(false).into());
    put_opt(&mut state, "start", dt.start);
    put_opt(&mut state, "end", dt.end);
    put_opt(&mut state, "start_date", date_state(config, "start_date", dt.start));
    put_opt(&mut state, "end_date", date_state(config, "end_date", dt.end));
    put_opt(&mut state, "message", dt.message.clone());
    put_opt(&mut state, "monitor_id", dt.monitor_id);
    put_opt(&mut state, "timezone", dt.timezone.clone());
    state.insert("scope".to_string(), dt.scope.clone().into());

    // the server fills in ["*"] when no tags were given
    let defaulted = dt.monitor_tags == ["*"] && !is_set(config.get("monitor_tags"));
    if !defaulted && !dt.monitor_tags.is_empty() {
        let mut tags = dt.monitor_tags.clone();
        tags.sort();
        state.insert("monitor_tags".to_string(), tags.into());
    }

    if let Some(r) = &dt.recurrence {
        let mut rec = ConfigMap::new();
        rec.insert("type".to_string(), r.recurrence_type.clone().into());
        put_opt(&mut rec, "period", r.period);
        put_opt(&mut rec, "week_days", r.week_days.clone());
        put_opt(&mut rec, "until_date", r.until_date);
        put_opt(&mut rec, "until_occurrences", r.until_occurrences);
        put_opt(&mut rec, "rrule", r.rrule.clone());
        state.insert("recurrence".to_string(), single_block(rec));
    }
    state
}

/// Resource implementation for downtimes
pub struct DowntimeResource {
    descriptor: ResourceDescriptor,
}

impl DowntimeResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()).disables("active", false),
        }
    }
}

impl Default for DowntimeResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for DowntimeResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), Vec<Error>> {
        let f = Fields::new(config);
        match f.block("recurrence") {
            Ok(Some(block)) => Recurrence::from_config(&block).map(|_| ()).map_err(|e| vec![e]),
            Ok(None) => Ok(()),
            Err(e) => Err(vec![e]),
        }
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = serde_json::to_value(build_downtime(bag.config(), None)?)?;
        let created = ctx.call_json(ApiRequest::post(DOWNTIME_PATH, body)).await?;
        let id = response_id(&created, "/id")?;
        info!("Downtime {} scheduled", id);
        bag.set_id(id);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let body = ctx.call_json(ApiRequest::get(format!("{}/{}", DOWNTIME_PATH, id))).await?;
        let dt: DowntimeWire = serde_json::from_value(body)?;
        if dt.canceled.is_some() {
            debug!("Downtime {} is cancelled", id);
            bag.clear_id();
            return Ok(());
        }
        let state = flatten_downtime(&dt, bag.known());
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let mut dt = build_downtime(bag.config(), Some(bag.state()))?;
        dt.id = id.parse().ok();
        if dt.start.is_none() {
            debug!("Downtime {} start unchanged, not re-sent", id);
        }
        let body = serde_json::to_value(dt)?;
        let updated = ctx.call_json(ApiRequest::put(format!("{}/{}", DOWNTIME_PATH, id), body)).await?;
        // the API may answer an update with a replacement downtime
        if let Ok(new_id) = response_id(&updated, "/id") {
            if new_id != id {
                info!("Downtime {} replaced by {}", id, new_id);
                bag.set_id(new_id);
            }
        }
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        ctx.call(ApiRequest::delete(format!("{}/{}", DOWNTIME_PATH, id))).await?;
        Ok(())
    }
}
