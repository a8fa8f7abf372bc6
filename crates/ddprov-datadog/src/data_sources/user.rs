//! `datadog_user` lookup
//!
//! Searches the user listing with the API's fuzzy `filter`. Without
//! `exact_match` the search has to narrow down to one account by itself;
//! with it the results are matched on e-mail first, then on name.

use crate::pagination::{self, DEFAULT_PAGE_SIZE};
use crate::resources::user::USERS_PATH;
use async_trait::async_trait;
use ddprov_core::error::{Error, Result};
use ddprov_core::schema::{Field, Schema};
use ddprov_core::traits::{DataSource, OpContext};
use ddprov_core::value::{ConfigMap, Fields};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const KIND: &str = "datadog_user";

/// Attributes copied to the outputs as they come
const OUTPUTS: &[&str] = &[
    "email",
    "handle",
    "name",
    "disabled",
    "verified",
    "service_account",
    "status",
    "title",
    "created_at",
    "modified_at",
    "mfa_enabled",
    "icon",
];

pub fn schema() -> Schema {
    Schema::new().fields([
        Field::string("filter")
            .required()
            .describe("Filter all users by the given string."),
        Field::bool("exact_match")
            .default(false)
            .describe("Match `filter` exactly against the e-mail, then the name."),
        Field::bool("exclude_service_accounts").default(false),
        Field::string("id").computed(),
        Field::string("email").computed(),
        Field::string("handle").computed(),
        Field::string("name").computed(),
        Field::bool("disabled").computed(),
        Field::bool("verified").computed(),
        Field::bool("service_account").computed(),
        Field::string("status").computed(),
        Field::string("title").computed(),
        Field::string("created_at").computed(),
        Field::string("modified_at").computed(),
        Field::bool("mfa_enabled").computed(),
        Field::string("icon").computed(),
    ])
}

fn attribute<'a>(user: &'a Value, key: &str) -> Option<&'a str> {
    user.pointer(&format!("/attributes/{}", key)).and_then(Value::as_str)
}

fn is_service_account(user: &Value) -> bool {
    user.pointer("/attributes/service_account")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Pick the one account `filter` designates
pub fn select_user(mut users: Vec<Value>, filter: &str, exact_match: bool, exclude_service_accounts: bool) -> Result<Value> {
    let prefix = if exclude_service_accounts {
        users.retain(|u| !is_service_account(u));
        "after excluding service accounts, "
    } else {
        ""
    };

    if users.is_empty() {
        return Err(Error::Other(format!(
            "{}didn't find any user matching filter string {}",
            prefix, filter
        )));
    }
    if !exact_match {
        if users.len() > 1 {
            return Err(Error::Other(format!(
                "{}your query returned more than one result for filter {}, please try a more specific search criteria",
                prefix, filter
            )));
        }
        return Ok(users.remove(0));
    }

    let mut matches: Vec<Value> = users
        .iter()
        .filter(|u| attribute(u, "email") == Some(filter))
        .cloned()
        .collect();
    if matches.is_empty() {
        matches = users.into_iter().filter(|u| attribute(u, "name") == Some(filter)).collect();
    }
    match matches.len() {
        0 => Err(Error::Other(format!(
            "{}didn't find any user matching filter string {} exactly",
            prefix, filter
        ))),
        1 => Ok(matches.remove(0)),
        _ => Err(Error::Other(format!(
            "{}your query returned more than one result for filter {} exactly",
            prefix, filter
        ))),
    }
}

/// Outputs of a selected account
pub fn flatten_user(user: &Value, config: &ConfigMap) -> ConfigMap {
    let mut state = config.clone();
    if let Some(id) = user.get("id").and_then(Value::as_str) {
        state.insert("id".to_string(), id.into());
    }
    for key in OUTPUTS {
        if let Some(value) = user.get("attributes").and_then(|a| a.get(*key)).filter(|v| !v.is_null()) {
            state.insert((*key).to_string(), value.clone());
        }
    }
    state
}

/// Data source implementation for users
pub struct UserLookup {
    schema: Arc<Schema>,
}

impl UserLookup {
    pub fn new() -> Self {
        Self {
            schema: schema().into_arc(),
        }
    }
}

impl Default for UserLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for UserLookup {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    async fn read(&self, ctx: &OpContext, config: &ConfigMap) -> Result<ConfigMap> {
        let f = Fields::new(config);
        let filter = f.required_str("filter")?;
        let users = pagination::collect_pages(ctx, USERS_PATH, &[("filter", filter)], DEFAULT_PAGE_SIZE).await?;
        debug!("User filter {} returned {} account(s)", filter, users.len());

        let user = select_user(
            users,
            filter,
            f.bool_or("exact_match", false)?,
            f.bool_or("exclude_service_accounts", false)?,
        )?;
        Ok(flatten_user(&user, config))
    }
}
