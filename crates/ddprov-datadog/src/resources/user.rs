//! `datadog_user`
//!
//! Users cannot be deleted, only disabled. Create adopts an existing
//! account when the e-mail is already taken (the API answers 409), and
//! role membership is synced through the role endpoints rather than the
//! user entity.

use crate::pagination;
use async_trait::async_trait;
use ddprov_core::diff::DiffRule;
use ddprov_core::error::{Error, Result};
use ddprov_core::schema::{Field, Schema};
use ddprov_core::traits::{ApiRequest, OpContext, Resource, ResourceDescriptor, StateBag};
use ddprov_core::value::{ConfigMap, Fields};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub(crate) const USERS_PATH: &str = "/api/v2/users";

const ROLES_PATH: &str = "/api/v2/roles";

const INVITATIONS_PATH: &str = "/api/v2/user_invitations";

pub const KIND: &str = "datadog_user";

pub fn schema() -> Schema {
    Schema::new().fields([
        Field::string("email").required().describe("Email address for user."),
        Field::string("name").omit_empty(),
        Field::bool("disabled").default(false),
        Field::string_set("roles").omit_empty().describe("Role IDs assigned to the user."),
        Field::bool("send_user_invitation")
            .default(true)
            .manual()
            .diff(DiffRule::Ignore)
            .describe("Whether an invitation email should be sent when the user is created."),
        Field::bool("verified").computed(),
        Field::string("user_invitation_id").computed(),
    ])
}

/// `attributes` of a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAttributes {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing)]
    pub verified: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct RoleRef {
    id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct RoleRefs {
    #[serde(default)]
    data: Vec<RoleRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct UserRelationships {
    #[serde(default)]
    roles: RoleRefs,
}

/// User resource object as returned by the API
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserData {
    pub id: String,
    #[serde(default)]
    pub attributes: UserAttributes,
    #[serde(default)]
    relationships: UserRelationships,
}

impl UserData {
    /// Role IDs the user holds
    pub fn role_ids(&self) -> BTreeSet<String> {
        self.relationships.roles.data.iter().map(|r| r.id.clone()).collect()
    }
}

fn desired_roles(f: &Fields<'_>) -> Result<BTreeSet<String>> {
    Ok(f.string_set("roles")?.unwrap_or_default().into_iter().collect())
}

/// Create request: attributes plus the initial role relationships
pub fn build_create(config: &ConfigMap) -> Result<Value> {
    let f = Fields::new(config);
    let attributes = UserAttributes {
        email: f.required_str("email")?.to_string(),
        name: f.non_empty_string("name")?,
        ..Default::default()
    };
    let roles: Vec<Value> = desired_roles(&f)?
        .into_iter()
        .map(|id| json!({"type": "roles", "id": id}))
        .collect();
    Ok(json!({
        "data": {
            "type": "users",
            "attributes": serde_json::to_value(attributes)?,
            "relationships": {"roles": {"data": roles}}
        }
    }))
}

/// Update request; roles are not part of it
pub fn build_update(config: &ConfigMap, id: &str) -> Result<Value> {
    let f = Fields::new(config);
    let attributes = UserAttributes {
        email: f.required_str("email")?.to_string(),
        name: f.non_empty_string("name")?,
        disabled: Some(f.bool_or("disabled", false)?),
        verified: None,
    };
    Ok(json!({
        "data": {"type": "users", "id": id, "attributes": serde_json::to_value(attributes)?}
    }))
}

pub fn flatten_user(user: &UserData) -> ConfigMap {
    let a = &user.attributes;
    let mut state = ConfigMap::new();
    state.insert("email".to_string(), a.email.clone().into());
    state.insert("name".to_string(), a.name.clone().unwrap_or_default().into());
    state.insert("disabled".to_string(), a.disabled.unwrap_or(false).into());
    state.insert("verified".to_string(), a.verified.unwrap_or(false).into());
    let roles: Vec<String> = user.role_ids().into_iter().collect();
    state.insert("roles".to_string(), roles.into());
    state
}

fn user_of(body: &Value) -> Result<UserData> {
    let data = body
        .get("data")
        .cloned()
        .ok_or_else(|| Error::Other("user response has no data".to_string()))?;
    Ok(serde_json::from_value(data)?)
}

/// Resource implementation for users
pub struct UserResource {
    descriptor: ResourceDescriptor,
}

impl UserResource {
    pub fn new() -> Self {
        Self {
            descriptor: ResourceDescriptor::new(KIND, schema().into_arc()).disables("disabled", true),
        }
    }

    /// Move the user from `current` roles to `desired` ones
    async fn sync_roles(
        &self,
        ctx: &OpContext,
        user_id: &str,
        current: &BTreeSet<String>,
        desired: &BTreeSet<String>,
    ) -> Result<()> {
        let relation = json!({"data": {"type": "users", "id": user_id}});
        for role in current.difference(desired) {
            debug!("Removing user {} from role {}", user_id, role);
            let request = ApiRequest::delete(format!("{}/{}/users", ROLES_PATH, role)).with_body(relation.clone());
            ctx.call(request).await?;
        }
        for role in desired.difference(current) {
            debug!("Adding user {} to role {}", user_id, role);
            ctx.call(ApiRequest::post(format!("{}/{}/users", ROLES_PATH, role), relation.clone()))
                .await?;
        }
        Ok(())
    }

    /// Find the account holding `email`
    async fn find_by_email(&self, ctx: &OpContext, email: &str) -> Result<UserData> {
        let found = pagination::find_first(ctx, USERS_PATH, &[("filter", email)], |item| {
            item.pointer("/attributes/email")
                .and_then(Value::as_str)
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
        })
        .await?;
        let item = found.ok_or_else(|| Error::Other(format!("could not find single user with email {}", email)))?;
        Ok(serde_json::from_value(item)?)
    }

    async fn send_invitation(&self, ctx: &OpContext, user_id: &str) -> Result<String> {
        let body = json!({
            "data": [{
                "type": "user_invitations",
                "relationships": {"user": {"data": {"type": "users", "id": user_id}}}
            }]
        });
        let response = ctx.call_json(ApiRequest::post(INVITATIONS_PATH, body)).await?;
        super::response_id(&response, "/data/0/id")
    }
}

impl Default for UserResource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resource for UserResource {
    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let body = build_create(bag.config())?;
        let user_id = match ctx.call_json(ApiRequest::post(USERS_PATH, body)).await {
            Ok(created) => {
                let id = super::response_id(&created, "/data/id")?;
                info!("User {} created", id);
                id
            }
            Err(Error::Conflict { .. }) => {
                let f = Fields::new(bag.config());
                let email = f.required_str("email")?;
                info!("Updating existing user {}", email);
                let existing = self.find_by_email(ctx, email).await?;
                let update = build_update(bag.config(), &existing.id)?;
                let updated = ctx
                    .call_json(ApiRequest::patch(format!("{}/{}", USERS_PATH, existing.id), update))
                    .await?;
                let current = user_of(&updated).map(|u| u.role_ids()).unwrap_or_else(|_| existing.role_ids());
                self.sync_roles(ctx, &existing.id, &current, &desired_roles(&f)?).await?;
                existing.id
            }
            Err(e) => return Err(e),
        };
        bag.set_id(user_id.clone());

        if Fields::new(bag.config()).bool_or("send_user_invitation", true)? {
            let invitation = self.send_invitation(ctx, &user_id).await?;
            bag.state_mut().insert("user_invitation_id".to_string(), invitation.into());
        }
        Ok(())
    }

    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        let body = ctx.call_json(ApiRequest::get(format!("{}/{}", USERS_PATH, id))).await?;
        let mut state = flatten_user(&user_of(&body)?);
        if let Some(invitation) = bag.prior("user_invitation_id") {
            state.insert("user_invitation_id".to_string(), invitation.clone());
        }
        bag.set_state(state);
        Ok(())
    }

    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?.to_string();
        let desired = desired_roles(&Fields::new(bag.config()))?;
        let current: BTreeSet<String> = bag
            .prior("roles")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        if current != desired {
            self.sync_roles(ctx, &id, &current, &desired).await?;
        }
        let body = build_update(bag.config(), &id)?;
        ctx.call(ApiRequest::patch(format!("{}/{}", USERS_PATH, id), body)).await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.require_id()?;
        ctx.call(ApiRequest::delete(format!("{}/{}", USERS_PATH, id))).await?;
        info!("User {} disabled", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddprov_core::diff;
    use ddprov_core::value::config_map;
    use pretty_assertions::assert_eq;

    fn config() -> ConfigMap {
        config_map(json!({
            "email": "new@example.com",
            "name": "New User",
            "roles": ["role-b", "role-a"]
        }))
    }

    #[test]
    fn test_create_request_carries_roles() {
        let body = build_create(&config()).unwrap();
        assert_eq!(body["data"]["attributes"], json!({"email": "new@example.com", "name": "New User"}));
        assert_eq!(
            body["data"]["relationships"]["roles"]["data"],
            json!([{"type": "roles", "id": "role-a"}, {"type": "roles", "id": "role-b"}])
        );
    }

    #[test]
    fn test_update_request_sends_disabled() {
        let body = build_update(&config(), "u1").unwrap();
        assert_eq!(body["data"]["id"], json!("u1"));
        assert_eq!(body["data"]["attributes"]["disabled"], json!(false));
        assert!(body["data"].get("relationships").is_none());
    }

    #[test]
    fn test_read_back_matches_config() {
        let body = json!({
            "data": {
                "id": "u1",
                "type": "users",
                "attributes": {"email": "new@example.com", "name": "New User", "disabled": false, "verified": true},
                "relationships": {"roles": {"data": [{"id": "role-a", "type": "roles"}, {"id": "role-b", "type": "roles"}]}}
            }
        });
        let state = flatten_user(&user_of(&body).unwrap());
        assert_eq!(state["verified"], json!(true));
        let d = diff::diff(&schema(), &state, &config());
        assert!(d.is_empty(), "unexpected changes: {:?}", d.paths());
    }

    #[test]
    fn test_invitation_flag_never_drives_an_update() {
        let body = json!({"data": {"id": "u1", "attributes": {"email": "new@example.com", "name": "New User"}}});
        let state = flatten_user(&user_of(&body).unwrap());
        let mut desired = config();
        desired.remove("roles");
        desired.insert("send_user_invitation".to_string(), json!(false));
        assert!(diff::diff(&schema(), &state, &desired).is_empty());
    }
}
