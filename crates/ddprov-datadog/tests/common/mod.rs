//! Test doubles for the Datadog resources
//!
//! [`FakeDatadog`] is an in-memory stand-in for the REST API. It assigns
//! identifiers and canonicalizes what the real server canonicalizes (SLO
//! thresholds sorted by timeframe, de-duplicated tags). It also keeps
//! security filter versions and answers 409 to stale writes. Downtimes are
//! cancelled rather than deleted, PagerDuty keeps its services when a
//! write leaves them out, and user e-mails are unique. Listings page
//! like the real endpoints: v2 through `page[size]` / `page[number]`, the
//! v1 monitor search through `page_size` / `page`.

#![allow(dead_code)]

use async_trait::async_trait;
use ddprov_core::config::EngineConfig;
use ddprov_core::engine::{EngineEvent, ReconcileEngine};
use ddprov_core::error::Result;
use ddprov_core::registry::ResourceRegistry;
use ddprov_core::retry::RetryPolicy;
use ddprov_core::state::MemoryStateStore;
use ddprov_core::traits::{ApiClient, ApiRequest, ApiResponse, Method, OpContext, StateRecord};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const MASKED: &str = "*****";

const TIMEFRAME_ORDER: &[&str] = &["7d", "30d", "90d", "custom"];

fn not_found() -> ApiResponse {
    ApiResponse::new(404, json!({"errors": ["Not found"]}))
}

fn bad_request(message: &str) -> ApiResponse {
    ApiResponse::new(400, json!({"errors": [message]}))
}

#[derive(Default)]
struct PagerdutyState {
    subdomain: String,
    schedules: Value,
    api_token: Option<String>,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    /// Objects by collection name, then id
    collections: HashMap<&'static str, BTreeMap<String, Value>>,
    pagerduty: Option<PagerdutyState>,
    /// Services outlive the integration entity
    pagerduty_services: BTreeMap<String, String>,
    lambdas: Vec<(String, String)>,
    role_members: BTreeMap<String, BTreeSet<String>>,
}

impl FakeState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn collection(&mut self, name: &'static str) -> &mut BTreeMap<String, Value> {
        self.collections.entry(name).or_default()
    }

    fn user_json(&self, id: &str) -> Option<Value> {
        let attributes = self.collections.get("users")?.get(id)?.clone();
        let roles: Vec<Value> = self
            .role_members
            .iter()
            .filter(|(_, members)| members.contains(id))
            .map(|(role, _)| json!({"id": role, "type": "roles"}))
            .collect();
        Some(json!({
            "id": id,
            "type": "users",
            "attributes": attributes,
            "relationships": {"roles": {"data": roles}}
        }))
    }
}

/// In-memory Datadog API
pub struct FakeDatadog {
    state: Mutex<FakeState>,
    calls: Arc<AtomicUsize>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeDatadog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests with the given method whose path starts with `prefix`
    pub fn count(&self, method: Method, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path.starts_with(prefix))
            .count()
    }

    pub fn object(&self, collection: &'static str, id: &str) -> Option<Value> {
        self.state.lock().unwrap().collection(collection).get(id).cloned()
    }

    /// Edit a stored object behind the provider's back
    pub fn edit(&self, collection: &'static str, id: &str, pointer: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.collection(collection).get_mut(id).and_then(|o| o.pointer_mut(pointer)) {
            *slot = value;
        }
    }

    /// Remove a stored object behind the provider's back
    pub fn remove(&self, collection: &'static str, id: &str) {
        self.state.lock().unwrap().collection(collection).remove(id);
    }

    /// Move a security filter to `version` as if someone else edited it
    pub fn set_filter_version(&self, id: &str, version: i64) {
        self.edit("security_filters", id, "/version", json!(version));
    }

    /// Integration with inline services, as left by an earlier apply
    pub fn seed_pagerduty(&self, subdomain: &str, services: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        state.pagerduty = Some(PagerdutyState {
            subdomain: subdomain.to_string(),
            schedules: json!([]),
            api_token: None,
        });
        state.pagerduty_services = services
            .iter()
            .map(|(name, key)| (name.to_string(), key.to_string()))
            .collect();
    }

    pub fn pagerduty_key(&self, service: &str) -> Option<String> {
        self.state.lock().unwrap().pagerduty_services.get(service).cloned()
    }

    /// Existing account, e.g. created through the UI
    pub fn seed_user(&self, email: &str, name: &str, roles: &[&str]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = format!("user-{}", state.next());
        state.collection("users").insert(
            id.clone(),
            json!({
                "email": email,
                "handle": email,
                "name": name,
                "disabled": false,
                "verified": true,
                "service_account": false
            }),
        );
        for role in roles {
            state.role_members.entry(role.to_string()).or_default().insert(id.clone());
        }
        id
    }

    /// Monitor created outside the provider
    pub fn seed_monitor(&self, name: &str, query: &str, tags: &[&str]) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next();
        state.collection("monitors").insert(
            id.to_string(),
            json!({
                "id": id,
                "name": name,
                "message": "",
                "query": query,
                "type": "metric alert",
                "tags": tags,
                "options": {}
            }),
        );
        id.to_string()
    }

    /// Security rule created outside the provider; `is_default` marks
    /// the ones Datadog ships
    pub fn seed_security_rule(&self, rule: Map<String, Value>, is_default: bool) -> String {
        let mut state = self.state.lock().unwrap();
        let id = format!("rule-{}", state.next());
        let mut stored = Value::Object(rule);
        stored["id"] = json!(id);
        stored["isDefault"] = json!(is_default);
        state.collection("security_rules").insert(id.clone(), stored);
        id
    }

    pub fn role_members(&self, role: &str) -> BTreeSet<String> {
        self.state.lock().unwrap().role_members.get(role).cloned().unwrap_or_default()
    }

    pub fn lambdas(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().lambdas.clone()
    }

    fn route(&self, st: &mut FakeState, req: &ApiRequest) -> ApiResponse {
        let segments: Vec<&str> = req.path.trim_start_matches('/').split('/').collect();
        let body = req.body.clone().unwrap_or(Value::Null);
        match (req.method, segments.as_slice()) {
            (Method::Get, ["api", "v1", "validate"]) => ApiResponse::ok(json!({"valid": true})),

            // dashboards
            (Method::Post, ["api", "v1", "dashboard"]) => {
                let id = format!("abc-{}", st.next());
                let stored = dashboard_with_ids(st, body, &id);
                st.collection("dashboards").insert(id, stored.clone());
                ApiResponse::ok(stored)
            }
            (Method::Put, ["api", "v1", "dashboard", id]) => {
                if !st.collection("dashboards").contains_key(*id) {
                    return not_found();
                }
                let stored = dashboard_with_ids(st, body, id);
                st.collection("dashboards").insert(id.to_string(), stored.clone());
                ApiResponse::ok(stored)
            }
            (Method::Post | Method::Delete, ["api", "v2", "dashboard", "lists", "manual", _, "dashboards"]) => {
                ApiResponse::ok(json!({}))
            }

            // monitors
            (Method::Post, ["api", "v1", "monitor", "validate"]) | (Method::Post, ["api", "v1", "monitor", _, "validate"]) => {
                match body.get("query").and_then(Value::as_str) {
                    Some(q) if q.contains("invalid") => bad_request("The value provided for parameter 'query' is invalid"),
                    _ => ApiResponse::ok(json!({})),
                }
            }
            (Method::Get, ["api", "v1", "monitor"]) => {
                let name = query(req, "name").unwrap_or_default().to_lowercase();
                let scope: Vec<&str> = query(req, "tags").map(|t| t.split(',').collect()).unwrap_or_default();
                let labels: Vec<&str> = query(req, "monitor_tags").map(|t| t.split(',').collect()).unwrap_or_default();
                let matching: Vec<Value> = st
                    .collection("monitors")
                    .values()
                    .filter(|m| m["name"].as_str().unwrap_or_default().to_lowercase().contains(&name))
                    .filter(|m| scope.iter().all(|t| m["query"].as_str().unwrap_or_default().contains(t)))
                    .filter(|m| labels.iter().all(|t| m["tags"].as_array().is_some_and(|tags| tags.contains(&json!(t)))))
                    .cloned()
                    .collect();
                ApiResponse::ok(Value::Array(page_of(matching, req, "page_size", "page")))
            }
            (Method::Post, ["api", "v1", "monitor"]) => {
                let id = st.next();
                let mut stored = body;
                stored["id"] = json!(id);
                st.collection("monitors").insert(id.to_string(), stored.clone());
                ApiResponse::ok(stored)
            }

            // downtimes
            (Method::Post, ["api", "v1", "downtime"]) => {
                let id = st.next();
                let mut stored = body;
                stored["id"] = json!(id);
                stored["active"] = json!(true);
                stored["disabled"] = json!(false);
                st.collection("downtimes").insert(id.to_string(), stored.clone());
                ApiResponse::ok(stored)
            }
            (Method::Put, ["api", "v1", "downtime", id]) => {
                match st.collection("downtimes").get_mut(*id) {
                    Some(stored) => {
                        merge(stored, &body);
                        ApiResponse::ok(stored.clone())
                    }
                    None => not_found(),
                }
            }
            (Method::Delete, ["api", "v1", "downtime", id]) => {
                match st.collection("downtimes").get_mut(*id) {
                    Some(stored) => {
                        stored["canceled"] = json!(1_735_700_000);
                        stored["active"] = json!(false);
                        ApiResponse::no_content()
                    }
                    None => not_found(),
                }
            }

            // service level objectives
            (Method::Post, ["api", "v1", "slo"]) => {
                let id = format!("slo{:04}", st.next());
                let stored = canonical_slo(body, &id);
                st.collection("slos").insert(id, stored.clone());
                ApiResponse::ok(json!({"data": [stored]}))
            }
            (Method::Get, ["api", "v1", "slo", id]) => match st.collection("slos").get(*id) {
                Some(stored) => ApiResponse::ok(json!({"data": stored})),
                None => not_found(),
            },
            (Method::Put, ["api", "v1", "slo", id]) => {
                if !st.collection("slos").contains_key(*id) {
                    return not_found();
                }
                let stored = canonical_slo(body, id);
                st.collection("slos").insert(id.to_string(), stored.clone());
                ApiResponse::ok(json!({"data": [stored]}))
            }
            (Method::Delete, ["api", "v1", "slo", id]) => match st.collection("slos").remove(*id) {
                Some(_) => ApiResponse::ok(json!({"data": [id]})),
                None => not_found(),
            },

            // custom log pipelines; unknown ids answer 400
            (Method::Post, ["api", "v1", "logs", "config", "pipelines"]) => {
                let id = format!("pipe-{}", st.next());
                let mut stored = body;
                stored["id"] = json!(id);
                stored["type"] = json!("pipeline");
                stored["is_read_only"] = json!(false);
                st.collection("pipelines").insert(id, stored.clone());
                ApiResponse::ok(stored)
            }
            (method, ["api", "v1", "logs", "config", "pipelines", id]) => {
                let pipelines = st.collection("pipelines");
                let Some(stored) = pipelines.get_mut(*id) else {
                    return bad_request("Pipeline not found");
                };
                match method {
                    Method::Get => ApiResponse::ok(stored.clone()),
                    Method::Put => {
                        let mut updated = body;
                        updated["id"] = json!(id);
                        updated["type"] = json!("pipeline");
                        updated["is_read_only"] = json!(false);
                        *stored = updated.clone();
                        ApiResponse::ok(updated)
                    }
                    Method::Delete => {
                        pipelines.remove(*id);
                        ApiResponse::ok(json!({}))
                    }
                    _ => bad_request("unsupported"),
                }
            }

            // security monitoring filters and suppressions
            (Method::Post, ["api", "v2", "security_monitoring", "configuration", kind]) => {
                let Some(collection) = security_collection(kind) else {
                    return not_found();
                };
                let id = format!("{}-{}", &kind[..3], st.next());
                let mut attributes = body.pointer("/data/attributes").cloned().unwrap_or_default();
                if collection == "security_filters" {
                    attributes["version"] = json!(1);
                    attributes["is_builtin"] = json!(false);
                }
                st.collection(collection).insert(id.clone(), attributes.clone());
                ApiResponse::ok(json!({"data": {"id": id, "type": kind, "attributes": attributes}}))
            }
            (method, ["api", "v2", "security_monitoring", "configuration", kind, id]) => {
                let Some(collection) = security_collection(kind) else {
                    return not_found();
                };
                let objects = st.collection(collection);
                let Some(stored) = objects.get_mut(*id) else {
                    return not_found();
                };
                match method {
                    Method::Get => ApiResponse::ok(json!({"data": {"id": id, "type": kind, "attributes": stored}})),
                    Method::Patch => {
                        let mut attributes = body.pointer("/data/attributes").cloned().unwrap_or_default();
                        if collection == "security_filters" {
                            let current = stored["version"].as_i64().unwrap_or_default();
                            if attributes["version"].as_i64() != Some(current) {
                                return ApiResponse::new(409, json!({"errors": ["version mismatch"]}));
                            }
                            attributes["version"] = json!(current + 1);
                        }
                        merge(stored, &attributes);
                        ApiResponse::ok(json!({"data": {"id": id, "type": kind, "attributes": stored}}))
                    }
                    Method::Delete => {
                        objects.remove(*id);
                        ApiResponse::no_content()
                    }
                    _ => bad_request("unsupported"),
                }
            }

            // security monitoring rules; names or queries containing
            // "invalid" fail the validation endpoint
            (Method::Post, ["api", "v2", "security_monitoring", "rules", "validation"]) => {
                let queries = body["queries"].as_array().cloned().unwrap_or_default();
                let invalid = body["name"].as_str().is_some_and(|n| n.contains("invalid"))
                    || queries.iter().any(|q| q["query"].as_str().is_some_and(|q| q.contains("invalid")));
                if invalid {
                    bad_request("Invalid rule configuration")
                } else {
                    ApiResponse::ok(json!({}))
                }
            }
            (Method::Get, ["api", "v2", "security_monitoring", "rules"]) => {
                let search = query(req, "query").unwrap_or_default().to_string();
                let matching: Vec<Value> = st
                    .collection("security_rules")
                    .values()
                    .filter(|r| rule_matches(r, &search))
                    .cloned()
                    .collect();
                ApiResponse::ok(json!({"data": page_of(matching, req, "page[size]", "page[number]")}))
            }
            (Method::Post, ["api", "v2", "security_monitoring", "rules"]) => {
                let id = format!("rule-{}", st.next());
                let mut stored = body;
                stored["id"] = json!(id);
                stored["isDefault"] = json!(false);
                st.collection("security_rules").insert(id, stored.clone());
                ApiResponse::ok(stored)
            }
            (method, ["api", "v2", "security_monitoring", "rules", id]) => {
                let rules = st.collection("security_rules");
                let Some(stored) = rules.get_mut(*id) else {
                    return not_found();
                };
                match method {
                    Method::Get => ApiResponse::ok(stored.clone()),
                    Method::Put => {
                        if body.get("type").is_some() {
                            return bad_request("rule type cannot be changed");
                        }
                        merge(stored, &body);
                        ApiResponse::ok(stored.clone())
                    }
                    Method::Delete => {
                        rules.remove(*id);
                        ApiResponse::no_content()
                    }
                    _ => bad_request("unsupported"),
                }
            }

            // pagerduty
            (Method::Get, ["api", "v1", "integration", "pagerduty"]) => match &st.pagerduty {
                Some(pd) => {
                    let services: Vec<Value> = st
                        .pagerduty_services
                        .keys()
                        .map(|name| json!({"service_name": name, "service_key": MASKED}))
                        .collect();
                    let mut out = json!({"subdomain": pd.subdomain, "schedules": pd.schedules, "services": services});
                    if pd.api_token.is_some() {
                        out["api_token"] = json!(MASKED);
                    }
                    ApiResponse::ok(out)
                }
                None => not_found(),
            },
            (Method::Post | Method::Put, ["api", "v1", "integration", "pagerduty"]) => {
                let pd = st.pagerduty.get_or_insert_with(PagerdutyState::default);
                pd.subdomain = body["subdomain"].as_str().unwrap_or_default().to_string();
                pd.schedules = body.get("schedules").cloned().unwrap_or(json!([]));
                pd.api_token = body["api_token"].as_str().map(str::to_string);
                if let Some(services) = body.get("services").and_then(Value::as_array) {
                    st.pagerduty_services = services
                        .iter()
                        .map(|s| {
                            (
                                s["service_name"].as_str().unwrap_or_default().to_string(),
                                s["service_key"].as_str().unwrap_or_default().to_string(),
                            )
                        })
                        .collect();
                }
                ApiResponse::no_content()
            }
            (Method::Delete, ["api", "v1", "integration", "pagerduty"]) => {
                st.pagerduty = None;
                st.pagerduty_services.clear();
                ApiResponse::no_content()
            }
            (Method::Post, ["api", "v1", "integration", "pagerduty", "configuration", "services"]) => {
                let name = body["service_name"].as_str().unwrap_or_default().to_string();
                let key = body["service_key"].as_str().unwrap_or_default().to_string();
                st.pagerduty_services.insert(name.clone(), key);
                ApiResponse::ok(json!({"service_name": name}))
            }
            (method, ["api", "v1", "integration", "pagerduty", "configuration", "services", name]) => {
                if !st.pagerduty_services.contains_key(*name) {
                    return not_found();
                }
                match method {
                    Method::Get => ApiResponse::ok(json!({"service_name": name})),
                    Method::Put => {
                        let key = body["service_key"].as_str().unwrap_or_default().to_string();
                        st.pagerduty_services.insert(name.to_string(), key);
                        ApiResponse::ok(json!({"service_name": name}))
                    }
                    Method::Delete => {
                        st.pagerduty_services.remove(*name);
                        ApiResponse::no_content()
                    }
                    _ => bad_request("unsupported"),
                }
            }

            // users
            (Method::Get, ["api", "v2", "users"]) => {
                let filter = query(req, "filter").unwrap_or_default().to_lowercase();
                let mut ids: Vec<String> = st
                    .collection("users")
                    .iter()
                    .filter(|(_, u)| {
                        ["email", "name"]
                            .iter()
                            .any(|k| u[*k].as_str().unwrap_or_default().to_lowercase().contains(&filter))
                    })
                    .map(|(id, _)| id.clone())
                    .collect();
                ids.sort_by_key(|id| sequence(id));
                let users: Vec<Value> = ids.iter().filter_map(|id| st.user_json(id)).collect();
                ApiResponse::ok(json!({"data": page_of(users, req, "page[size]", "page[number]")}))
            }
            (Method::Post, ["api", "v2", "users"]) => {
                let email = body.pointer("/data/attributes/email").and_then(Value::as_str).unwrap_or_default();
                let taken = st
                    .collection("users")
                    .values()
                    .any(|u| u["email"].as_str().is_some_and(|e| e.eq_ignore_ascii_case(email)));
                if taken {
                    return ApiResponse::new(409, json!({"errors": ["User already exists"]}));
                }
                let id = format!("user-{}", st.next());
                let mut attributes = body.pointer("/data/attributes").cloned().unwrap_or_default();
                attributes["disabled"] = json!(false);
                attributes["verified"] = json!(false);
                st.collection("users").insert(id.clone(), attributes);
                let roles: Vec<String> = body
                    .pointer("/data/relationships/roles/data")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|r| r["id"].as_str().map(str::to_string))
                    .collect();
                for role in roles {
                    st.role_members.entry(role).or_default().insert(id.clone());
                }
                ApiResponse::new(201, json!({"data": st.user_json(&id)}))
            }
            (method, ["api", "v2", "users", id]) => {
                let Some(stored) = st.collection("users").get_mut(*id) else {
                    return not_found();
                };
                match method {
                    Method::Get => {}
                    Method::Patch => {
                        let attributes = body.pointer("/data/attributes").cloned().unwrap_or_default();
                        merge(stored, &attributes);
                    }
                    Method::Delete => {
                        stored["disabled"] = json!(true);
                        return ApiResponse::no_content();
                    }
                    _ => return bad_request("unsupported"),
                }
                ApiResponse::ok(json!({"data": st.user_json(id)}))
            }
            (method, ["api", "v2", "roles", role, "users"]) => {
                let user = body.pointer("/data/id").and_then(Value::as_str).unwrap_or_default().to_string();
                let members = st.role_members.entry(role.to_string()).or_default();
                match method {
                    Method::Post => members.insert(user),
                    Method::Delete => members.remove(&user),
                    _ => return bad_request("unsupported"),
                };
                ApiResponse::ok(json!({"data": []}))
            }
            (Method::Post, ["api", "v2", "user_invitations"]) => {
                let id = format!("inv-{}", st.next());
                ApiResponse::new(201, json!({"data": [{"id": id, "type": "user_invitations"}]}))
            }

            // AWS log forwarder lambdas
            (Method::Get, ["api", "v1", "integration", "aws", "logs"]) => {
                let mut accounts: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
                for (account, arn) in &st.lambdas {
                    accounts.entry(account).or_default().push(json!({"arn": arn}));
                }
                let listing: Vec<Value> = accounts
                    .into_iter()
                    .map(|(account, lambdas)| json!({"account_id": account, "lambdas": lambdas, "services": []}))
                    .collect();
                ApiResponse::ok(Value::Array(listing))
            }
            (method @ (Method::Post | Method::Delete), ["api", "v1", "integration", "aws", "logs"]) => {
                let pair = (
                    body["account_id"].as_str().unwrap_or_default().to_string(),
                    body["lambda_arn"].as_str().unwrap_or_default().to_string(),
                );
                if method == Method::Post {
                    if !st.lambdas.contains(&pair) {
                        st.lambdas.push(pair);
                    }
                } else {
                    st.lambdas.retain(|p| p != &pair);
                }
                ApiResponse::ok(json!({}))
            }

            // plain v1 collections
            (method, ["api", "v1", name, id]) => {
                let Some(collection) = v1_collection(name) else {
                    return not_found();
                };
                let objects = st.collection(collection);
                let Some(stored) = objects.get_mut(*id) else {
                    return not_found();
                };
                match method {
                    Method::Get => ApiResponse::ok(stored.clone()),
                    Method::Put => {
                        let mut updated = body;
                        updated["id"] = stored["id"].clone();
                        *stored = updated.clone();
                        ApiResponse::ok(updated)
                    }
                    Method::Delete => {
                        objects.remove(*id);
                        ApiResponse::ok(json!({"deleted": id}))
                    }
                    _ => bad_request("unsupported"),
                }
            }

            _ => not_found(),
        }
    }
}

#[async_trait]
impl ApiClient for FakeDatadog {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let mut state = self.state.lock().unwrap();
        Ok(self.route(&mut state, request))
    }

    fn name(&self) -> &'static str {
        "fake-datadog"
    }
}

fn query<'a>(req: &'a ApiRequest, key: &str) -> Option<&'a str> {
    req.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// One page of `items`; the page size defaults to 100 like the API
fn page_of(items: Vec<Value>, req: &ApiRequest, size_key: &str, number_key: &str) -> Vec<Value> {
    let size: usize = query(req, size_key).and_then(|v| v.parse().ok()).unwrap_or(100);
    let number: usize = query(req, number_key).and_then(|v| v.parse().ok()).unwrap_or(0);
    items.into_iter().skip(size * number).take(size).collect()
}

/// Creation order of an identifier like `user-12`
fn sequence(id: &str) -> u64 {
    id.rsplit('-').next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

/// Rule search: an optional `name:"..."` term, then tags the rule must carry
fn rule_matches(rule: &Value, search: &str) -> bool {
    let mut rest = search;
    if let Some(after) = search.strip_prefix("name:\"") {
        let Some(end) = after.find('"') else {
            return false;
        };
        if !rule["name"].as_str().unwrap_or_default().contains(&after[..end]) {
            return false;
        }
        rest = &after[end + 1..];
    }
    rest.split_whitespace()
        .all(|tag| rule["tags"].as_array().is_some_and(|tags| tags.contains(&json!(tag))))
}

fn v1_collection(name: &str) -> Option<&'static str> {
    match name {
        "dashboard" => Some("dashboards"),
        "monitor" => Some("monitors"),
        "downtime" => Some("downtimes"),
        _ => None,
    }
}

fn security_collection(kind: &str) -> Option<&'static str> {
    match kind {
        "security_filters" => Some("security_filters"),
        "suppressions" => Some("suppressions"),
        _ => None,
    }
}

/// Shallow merge; a null value removes the key
fn merge(target: &mut Value, patch: &Value) {
    let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) else {
        return;
    };
    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Give a dashboard and its widgets (nested ones too) server identifiers
fn dashboard_with_ids(st: &mut FakeState, mut body: Value, id: &str) -> Value {
    fn assign(st: &mut FakeState, widgets: Option<&mut Value>) {
        for widget in widgets.and_then(Value::as_array_mut).into_iter().flatten() {
            widget["id"] = json!(st.next());
            assign(st, widget.pointer_mut("/definition/widgets"));
        }
    }
    assign(st, body.get_mut("widgets"));
    body["id"] = json!(id);
    body["url"] = json!(format!("/dashboard/{}", id));
    body
}

/// Sort thresholds by timeframe and de-duplicate tags, like the server
fn canonical_slo(mut body: Value, id: &str) -> Value {
    if let Some(thresholds) = body.get_mut("thresholds").and_then(Value::as_array_mut) {
        let rank = |t: &Value| {
            let timeframe = t["timeframe"].as_str().unwrap_or_default();
            TIMEFRAME_ORDER.iter().position(|f| *f == timeframe).unwrap_or(TIMEFRAME_ORDER.len())
        };
        thresholds.sort_by_key(rank);
        for t in thresholds.iter_mut() {
            if let Some(target) = t["target"].as_f64() {
                t["target_display"] = json!(format!("{:.1}", target));
            }
        }
    }
    if let Some(tags) = body.get_mut("tags").and_then(Value::as_array_mut) {
        let unique: BTreeSet<String> = tags.iter().filter_map(Value::as_str).map(str::to_string).collect();
        *tags = unique.into_iter().map(Value::from).collect();
    }
    body["id"] = json!(id);
    body
}

/// Engine wired to a fresh fake
pub struct Harness {
    pub fake: Arc<FakeDatadog>,
    pub store: Arc<MemoryStateStore>,
    pub engine: ReconcileEngine,
    pub ctx: OpContext,
    pub events: mpsc::Receiver<EngineEvent>,
}

impl Harness {
    pub fn new() -> Self {
        let fake = Arc::new(FakeDatadog::new());
        let registry = ResourceRegistry::new();
        ddprov_datadog::register(&registry);
        let store = Arc::new(MemoryStateStore::new());
        let ctx = OpContext::new(fake.clone(), RetryPolicy::disabled());
        let (engine, events) =
            ReconcileEngine::new(Arc::new(registry), store.clone(), ctx.clone(), EngineConfig::default()).unwrap();
        Self {
            fake,
            store,
            engine,
            ctx,
            events,
        }
    }

    pub async fn record(&self, address: &str) -> Option<StateRecord> {
        self.store.snapshot().await.get(address).cloned()
    }

    /// Drain the events emitted so far
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Shorthand for an object literal
pub fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
