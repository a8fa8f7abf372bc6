//! Test doubles and common utilities for architecture contract tests
//!
//! This module provides minimal test doubles that exercise the core's
//! policies without any real remote API.

#![allow(dead_code)]

use async_trait::async_trait;
use ddprov_core::config::EngineConfig;
use ddprov_core::diff::DiffRule;
use ddprov_core::engine::{EngineEvent, ReconcileEngine};
use ddprov_core::error::{Error, Result};
use ddprov_core::registry::ResourceRegistry;
use ddprov_core::retry::RetryPolicy;
use ddprov_core::schema::{Field, Schema};
use ddprov_core::state::MemoryStateStore;
use ddprov_core::traits::{
    ApiClient, ApiRequest, ApiResponse, OpContext, Resource, ResourceDescriptor, StateBag,
};
use ddprov_core::value::ConfigMap;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// An ApiClient that replays scripted responses, then a fallback
pub struct ScriptedApi {
    script: Mutex<VecDeque<Result<ApiResponse>>>,
    fallback: ApiResponse,
    calls: Arc<AtomicUsize>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedApi {
    pub fn new(script: Vec<Result<ApiResponse>>, fallback: ApiResponse) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request answered with the same status
    pub fn always(status: u16) -> Self {
        Self::new(Vec::new(), ApiResponse::new(status, Value::Null))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiClient for ScriptedApi {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(next) => next,
            None => Ok(self.fallback.clone()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Retry policy with short sleeps and no jitter
pub fn quick_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_first_backoff(Duration::from_millis(100))
        .with_jitter(0.0)
}

/// Context over an API that must never be called
pub fn offline_ctx() -> OpContext {
    OpContext::new(Arc::new(ScriptedApi::always(599)), RetryPolicy::disabled())
}

/// Schema used by [`MemoryResource`]
pub fn thing_schema() -> Arc<Schema> {
    Schema::new()
        .field(Field::string("name").required())
        .field(Field::string("message").diff(DiffRule::TrimSpace))
        .field(Field::string_set("tags"))
        .field(Field::int("size").force_new())
        .field(Field::int("version").computed())
        .into_arc()
}

/// A resource kept in process memory
///
/// Records every handler call, tracks how many handlers run at once, and
/// fails on demand: a `name` listed in `reject` is refused with a 400, and
/// `"fatal"` fails authentication.
pub struct MemoryResource {
    descriptor: ResourceDescriptor,
    objects: Mutex<HashMap<String, ConfigMap>>,
    next_id: AtomicUsize,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Mutex<Vec<String>>,
    reject: Mutex<HashSet<String>>,
}

impl MemoryResource {
    pub fn new(kind: &'static str) -> Self {
        Self::with_delay(kind, Duration::ZERO)
    }

    pub fn with_delay(kind: &'static str, delay: Duration) -> Self {
        Self {
            descriptor: ResourceDescriptor::new(kind, thing_schema()),
            objects: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            reject: Mutex::new(HashSet::new()),
        }
    }

    pub fn reject(&self, name: &str) {
        self.reject.lock().unwrap().insert(name.to_string());
    }

    /// Remove an object behind the provider's back
    pub fn remove_out_of_band(&self, id: &str) {
        self.objects.lock().unwrap().remove(id);
    }

    /// Edit an object behind the provider's back
    pub fn edit_out_of_band(&self, id: &str, key: &str, value: Value) {
        if let Some(obj) = self.objects.lock().unwrap().get_mut(id) {
            obj.insert(key.to_string(), value);
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// `op:name` entries in call order
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn enter(&self, ctx: &OpContext, op: &str, name: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("{}:{}", op, name));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let slept = if self.delay.is_zero() {
            Ok(())
        } else {
            ctx.sleep(self.delay).await
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        slept?;

        if name == "fatal" {
            return Err(Error::fatal("authentication failed (403)"));
        }
        if self.reject.lock().unwrap().contains(name) {
            return Err(Error::rejected(400, format!(r#"{{"errors":["{} is invalid"]}}"#, name)));
        }
        Ok(())
    }

    fn name_of(map: &ConfigMap) -> String {
        map.get("name").and_then(Value::as_str).unwrap_or_default().to_string()
    }
}

#[async_trait]
impl Resource for MemoryResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let name = Self::name_of(bag.config());
        self.enter(ctx, "create", &name).await?;
        let id = format!("obj-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut obj = bag.config().clone();
        obj.insert("version".into(), json!(1));
        self.objects.lock().unwrap().insert(id.clone(), obj);
        bag.set_id(id);
        Ok(())
    }

    async fn read(&self, _ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let obj = self.objects.lock().unwrap().get(&id).cloned();
        match obj {
            Some(obj) => {
                bag.set_state(obj);
                Ok(())
            }
            None => Err(Error::not_found(format!("{} not found", id))),
        }
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let name = Self::name_of(bag.config());
        self.enter(ctx, "update", &name).await?;
        let mut objects = self.objects.lock().unwrap();
        let Some(existing) = objects.get(&id) else {
            return Err(Error::not_found(format!("{} not found", id)));
        };
        let version = existing.get("version").and_then(Value::as_i64).unwrap_or(0);
        let mut obj = bag.config().clone();
        obj.insert("version".into(), json!(version + 1));
        objects.insert(id, obj);
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let name = bag
            .prior("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.enter(ctx, "delete", &name).await?;
        match self.objects.lock().unwrap().remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(format!("{} not found", id))),
        }
    }
}

/// Configuration map from a `json!` literal
pub fn cfg(value: Value) -> ConfigMap {
    ddprov_core::value::config_map(value)
}

/// Engine over the given resources and a fresh in-memory store
pub fn engine_with(
    resources: Vec<Arc<MemoryResource>>,
    parallelism: usize,
) -> (ReconcileEngine, mpsc::Receiver<EngineEvent>, Arc<MemoryStateStore>) {
    let registry = Arc::new(ResourceRegistry::new());
    for resource in resources {
        registry.register_resource(resource);
    }
    let store = Arc::new(MemoryStateStore::new());
    let config = EngineConfig {
        parallelism,
        ..EngineConfig::default()
    };
    let (engine, events) = ReconcileEngine::new(registry, store.clone(), offline_ctx(), config).unwrap();
    (engine, events, store)
}

/// Drain every event sent so far
pub fn drain(events: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
