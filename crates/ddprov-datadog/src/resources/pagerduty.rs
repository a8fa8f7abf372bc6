//! `datadog_integration_pagerduty` and `datadog_integration_pagerduty_service_object`
//!
//! The integration used to carry its services inline. With
//! `individual_services = true` the parent stops sending `services` (the
//! server keeps the keys it already has) and every service becomes its own
//! resource. Migrating is two applies:
//!
//! 1. set `individual_services = true` and drop the inline list
//! 2. declare one service object per service; their Create adopts the
//!    service the server still holds
//!
//! An interrupted migration is finished by re-running it. The API never
//! returns service keys or the API token, so state keeps the configured
//! values and shows `*****` otherwise.
//!
//! Both resources share one write lock: every write rewrites the same
//! integration object server-side.

use async_trait::async_trait;
use ddprov_core::error::{Error, Result};
use ddprov_core::path::AttrPath;
use ddprov_core::schema::{Field, Schema};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::value::{ConfigMap, Fields};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const INTEGRATION_PATH: &str = "/api/v1/integration/pagerduty";

const SERVICES_PATH: &str = "/api/v1/integration/pagerduty/configuration/services";

/// Bytes escaped in a service name used as a single path segment
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'=')
    .remove(b'@');

/// Endpoint of one service; the name is user text and may contain `/` or `?`
fn service_path(name: &str) -> String {
    format!("{}/{}", SERVICES_PATH, utf8_percent_encode(name, SEGMENT))
}

/// Placeholder for secrets the API never returns
pub const MASKED_SECRET: &str = "*****";

/// Identifier of the (singleton) integration
const INTEGRATION_ID: &str = "pagerduty";

pub const KIND: &str = "datadog_integration_pagerduty";

pub const SERVICE_KIND: &str = "datadog_integration_pagerduty_service_object";

pub fn schema() -> Schema {
    let service = Schema::new().fields([
        Field::string("service_name").required(),
        Field::string("service_key").required().sensitive(),
    ]);
    Schema::new().fields([
        Field::bool("individual_services")
            .default(false)
            .describe("Manage services through the service object resource instead of `services`."),
        Field::block_list("services", service)
            .omit_empty()
            .deprecated("Use the service object resource with `individual_services = true`."),
        Field::string_list("schedules").omit_empty(),
        Field::string("subdomain").required(),
        Field::string("api_token").omit_empty().sensitive(),
    ])
}

pub fn service_schema() -> Schema {
    Schema::new().fields([
        Field::string("service_name").required().force_new(),
        Field::string("service_key").required().sensitive(),
    ])
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PagerdutyService {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,
}

impl fmt::Debug for PagerdutyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagerdutyService")
            .field("service_name", &self.service_name)
            .field("service_key", &"<REDACTED>")
            .finish()
    }
}

/// Integration entity as sent and received
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PagerdutyIntegration {
    pub subdomain: String,
    #[serde(default)]
    pub schedules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<PagerdutyService>>,
}

impl fmt::Debug for PagerdutyIntegration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagerdutyIntegration")
            .field("subdomain", &self.subdomain)
            .field("schedules", &self.schedules)
            .field("api_token", &"<REDACTED>")
            .field("services", &self.services)
            .finish()
    }
}

/// Build the integration entity
///
/// With `individual_services`, `services` is left out so the server keeps
/// the ones it holds.
pub fn build_integration(config: &ConfigMap) -> Result<PagerdutyIntegration> {
    let f = Fields::new(config);
    let services = if f.bool_or("individual_services", false)? {
        None
    } else {
        let mut services = Vec::new();
        for s in f.blocks("services")? {
            services.push(PagerdutyService {
                service_name: s.required_str("service_name")?.to_string(),
                service_key: Some(s.required_str("service_key")?.to_string()),
            });
        }
        Some(services)
    };
    Ok(PagerdutyIntegration {
        subdomain: f.required_str("subdomain")?.to_string(),
        schedules: f.strings("schedules")?.unwrap_or_default(),
        api_token: f.non_empty_string("api_token")?,
        services,
    })
}

/// Configured key of an inline service, by name
fn configured_key<'a>(config: &'a ConfigMap, name: &str) -> Option<&'a str> {
    config
        .get("services")
        .and_then(Value::as_array)?
        .iter()
        .find(|s| s.get("service_name").and_then(Value::as_str) == Some(name))
        .and_then(|s| s.get("service_key"))
        .and_then(Value::as_str)
}

/// Flatten the integration, restoring the secrets the API masks
pub fn flatten_integration(pd: &PagerdutyIntegration, config: &ConfigMap) -> ConfigMap {
    let individual = config.get("individual_services").and_then(Value::as_bool).unwrap_or(false);
    let mut state = ConfigMap::new();
    state.insert("individual_services".to_string(), individual.into());
    state.insert("subdomain".to_string(), pd.subdomain.clone().into());
    state.insert("schedules".to_string(), pd.schedules.clone().into());

    let services: Vec<Value> = if individual {
        Vec::new()
    } else {
        pd.services
            .iter()
            .flatten()
            .map(|s| {
                let key = configured_key(config, &s.service_name).unwrap_or(MASKED_SECRET);
                json!({"service_name": s.service_name, "service_key": key})
            })
            .collect()
    };
    state.insert("services".to_string(), Value::Array(services));

    if pd.api_token.is_some() || config.contains_key("api_token") {
        let token = config.get("api_token").and_then(Value::as_str).unwrap_or(MASKED_SECRET);
        state.insert("api_token".to_string(), token.into());
    }
    state
}

/// Resource implementation for the PagerDuty integration
pub struct PagerdutyResource {
    descriptor: ResourceDescriptor,
    write_lock: Arc<Mutex<()>>,
}

impl PagerdutyResource {
    pub fn new(write_lock: Arc<Mutex<()>>) -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()),
            write_lock,
        }
    }
}

#[async_trait]
impl Resource for PagerdutyResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    fn validate_config(&self, config: &ConfigMap) -> std::result::Result<(), Vec<Error>> {
        let f = Fields::new(config);
        if f.bool_or("individual_services", false).unwrap_or(false) && f.is_set("services") {
            return Err(vec![Error::config_at(
                AttrPath::root().key("services"),
                "services cannot be set when individual_services is true",
            )]);
        }
        Ok(())
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = serde_json::to_value(build_integration(bag.config())?)?;
        let _guard = self.write_lock.lock().await;
        ctx.call(ApiRequest::post(INTEGRATION_PATH, body)).await?;
        info!("PagerDuty integration enabled");
        bag.set_id(INTEGRATION_ID);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = ctx.call_json(ApiRequest::get(INTEGRATION_PATH)).await?;
        let pd: PagerdutyIntegration = serde_json::from_value(body)?;
        let state = flatten_integration(&pd, bag.known());
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let pd = build_integration(bag.config())?;
        if pd.services.is_none() {
            debug!("individual_services is set; leaving remote services untouched");
        }
        let body = serde_json::to_value(pd)?;
        let _guard = self.write_lock.lock().await;
        ctx.call(ApiRequest::put(INTEGRATION_PATH, body)).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, _bag: &mut StateBag) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        ctx.call(ApiRequest::delete(INTEGRATION_PATH)).await?;
        Ok(())
    }
}

/// Resource implementation for standalone PagerDuty services
pub struct PagerdutyServiceResource {
    descriptor: ResourceDescriptor,
    write_lock: Arc<Mutex<()>>,
}

impl PagerdutyServiceResource {
    pub fn new(write_lock: Arc<Mutex<()>>) -> Self {
        Self {
            // the API never returns service keys, so an import could not fill them
            descriptor: ResourceDescriptor::new(SERVICE_KIND, service_schema().into_arc()).not_importable(),
            write_lock,
        }
    }

    async fn exists(&self, ctx: &OpContext, name: &str) -> Result<bool> {
        match ctx.call(ApiRequest::get(service_path(name))).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Both PagerDuty resources, sharing one write lock
pub fn resources() -> (PagerdutyResource, PagerdutyServiceResource) {
    let lock = Arc::new(Mutex::new(()));
    (PagerdutyResource::new(lock.clone()), PagerdutyServiceResource::new(lock))
}

fn service_of(config: &ConfigMap) -> Result<PagerdutyService> {
    let f = Fields::new(config);
    Ok(PagerdutyService {
        service_name: f.required_str("service_name")?.to_string(),
        service_key: Some(f.required_str("service_key")?.to_string()),
    })
}

#[async_trait]
impl Resource for PagerdutyServiceResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let service = service_of(bag.config())?;
        let _guard = self.write_lock.lock().await;
        if self.exists(ctx, &service.service_name).await? {
            info!("Adopting existing PagerDuty service {}", service.service_name);
            let key = json!({"service_key": service.service_key});
            ctx.call(ApiRequest::put(service_path(&service.service_name), key))
                .await?;
        } else {
            ctx.call(ApiRequest::post(SERVICES_PATH, serde_json::to_value(&service)?)).await?;
            info!("PagerDuty service {} created", service.service_name);
        }
        bag.set_id(service.service_name);
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let body = ctx.call_json(ApiRequest::get(service_path(id))).await?;
        let service: PagerdutyService = serde_json::from_value(body)?;
        let key = bag
            .known()
            .get("service_key")
            .or_else(|| bag.prior("service_key"))
            .and_then(Value::as_str)
            .unwrap_or(MASKED_SECRET)
            .to_string();
        let mut state = ConfigMap::new();
        state.insert("service_name".to_string(), service.service_name.into());
        state.insert("service_key".to_string(), key.into());
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let service = service_of(bag.config())?;
        let _guard = self.write_lock.lock().await;
        ctx.call(ApiRequest::put(
            service_path(&id),
            json!({"service_key": service.service_key}),
        ))
        .await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let _guard = self.write_lock.lock().await;
        ctx.call(ApiRequest::delete(service_path(id))).await?;
        Ok(())
    }
}
