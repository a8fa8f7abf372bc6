// # Resource Trait
//
// Defines the five lifecycle handlers every managed resource implements.
//
// ## Purpose
//
// A resource knows how to turn its configuration into API requests and how
// to turn API responses back into state. It does not know about retries,
// cancellation policy, diagnostics or 404 handling: those are applied
// uniformly by `crate::lifecycle::Lifecycle`.
//
// ## Handler contract
//
// - `create`: POST the built entity and record the identifier in the bag
// - `read`: GET by identifier and flatten into `bag.state`; must not write
// - `update`: PUT/PATCH the full desired entity
// - `delete`: DELETE (or disable) by identifier
// - `import`: defaults to `read`
//
// ## Usage
//
// ```rust,ignore
// let mut bag = StateBag::new(config);
// resource.create(&ctx, &mut bag).await?;
// resource.read(&ctx, &mut bag).await?;
// ```

use crate::error::{Error, Result};
use crate::retry::{self, RetryPolicy};
use crate::schema::Schema;
use crate::traits::api_client::{ApiClient, ApiRequest, ApiResponse};
use crate::value::ConfigMap;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Whether updates are gated on an echoed version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Last write wins
    None,
    /// Updates must carry the version stored in `field`; stale writes conflict
    Versioned { field: &'static str },
}

/// How a resource is destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyMode {
    /// DELETE removes the object
    Delete,
    /// The object is disabled rather than removed. After the delete handler
    /// runs, the object is read back until `field == value` (or it reads as
    /// vanished).
    Disable { field: &'static str, value: bool },
}

/// Static description of a resource kind
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    /// Resource type name (`datadog_monitor`, ...)
    pub kind: &'static str,
    /// Configuration schema
    pub schema: Arc<Schema>,
    /// Version gating
    pub concurrency: Concurrency,
    /// Destroy semantics
    pub destroy: DestroyMode,
    /// Whether `import` is supported
    pub importable: bool,
}

impl ResourceDescriptor {
    pub fn new(kind: &'static str, schema: Arc<Schema>) -> Self {
        Self {
            kind,
            schema,
            concurrency: Concurrency::None,
            destroy: DestroyMode::Delete,
            importable: true,
        }
    }

    /// Gate updates on the version stored in `field`
    pub fn versioned(mut self, field: &'static str) -> Self {
        self.concurrency = Concurrency::Versioned { field };
        self
    }

    /// Destroy by disabling; confirmed once `field` reads back as `value`
    pub fn disables(mut self, field: &'static str, value: bool) -> Self {
        self.destroy = DestroyMode::Disable { field, value };
        self
    }

    pub fn not_importable(mut self) -> Self {
        self.importable = false;
        self
    }
}

/// Per-operation context handed to every handler
///
/// Holds the shared API client, the retry policy and the cancellation token
/// for this operation. Cloning is cheap.
#[derive(Clone)]
pub struct OpContext {
    api: Arc<dyn ApiClient>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl OpContext {
    pub fn new(api: Arc<dyn ApiClient>, retry: RetryPolicy) -> Self {
        Self {
            api,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Same client and policy, different cancellation token
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            api: self.api.clone(),
            retry: self.retry.clone(),
            cancel,
        }
    }

    /// Context whose token is cancelled when this one is
    pub fn child(&self) -> Self {
        self.with_cancel(self.cancel.child_token())
    }

    pub fn api(&self) -> &Arc<dyn ApiClient> {
        &self.api
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send a request through the retry loop
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse> {
        retry::execute(self.api.as_ref(), &self.retry, &self.cancel, &request).await
    }

    /// Send a request and return its JSON body
    pub async fn call_json(&self, request: ApiRequest) -> Result<Value> {
        Ok(self.call(request).await?.body)
    }

    /// Sleep, abandoning early on cancellation
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

impl fmt::Debug for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("api", &self.api.name())
            .field("retry", &self.retry)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Mutable per-instance state handed to handlers
///
/// `config` is the desired configuration, `state` the last flattened remote
/// view. An instance without an identifier does not exist remotely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateBag {
    id: Option<String>,
    config: ConfigMap,
    state: ConfigMap,
    warnings: Vec<String>,
}

impl StateBag {
    /// Bag for a new instance
    pub fn new(config: ConfigMap) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Bag for an instance known from prior state
    pub fn from_state(id: impl Into<String>, state: ConfigMap, config: ConfigMap) -> Self {
        Self {
            id: Some(id.into()),
            config,
            state,
            warnings: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Forget the instance; the state goes with the identifier
    pub fn clear_id(&mut self) {
        self.id = None;
        self.state.clear();
    }

    /// Identifier, or an error for handlers that need one
    pub fn require_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| Error::config("resource identifier is not set"))
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn set_config(&mut self, config: ConfigMap) {
        self.config = config;
    }

    pub fn state(&self) -> &ConfigMap {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ConfigMap {
        &mut self.state
    }

    pub fn set_state(&mut self, state: ConfigMap) {
        self.state = state;
    }

    /// Values the user is known to want
    ///
    /// The desired configuration when one is attached, otherwise the last
    /// state. Read handlers use it to restore what the API does not echo
    /// (masked secrets, date formatting), so a refresh without
    /// configuration keeps the previous values.
    pub fn known(&self) -> &ConfigMap {
        if self.config.is_empty() { &self.state } else { &self.config }
    }

    /// Previously read value of a top-level field
    pub fn prior(&self, key: &str) -> Option<&Value> {
        self.state.get(key).filter(|v| !v.is_null())
    }

    /// Integer version stored in state
    pub fn version(&self, field: &str) -> Option<i64> {
        self.prior(field).and_then(Value::as_i64)
    }

    /// Record a server-side warning for the lifecycle layer to surface
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

/// Trait for managed resource implementations
///
/// One implementation per resource kind. Handlers receive the operation
/// context and the instance's state bag and report failures as [`Error`];
/// the lifecycle layer turns those into diagnostics.
///
/// # Thread Safety
///
/// A single instance serves every resource of its kind, concurrently.
/// Per-instance data lives in the `StateBag`, never on `self`.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Build and flatten entities for its own kind
/// - ✅ Send requests through `OpContext::call`
/// - ✅ Poll with `OpContext::sleep`
///
/// ## Forbidden Capabilities
/// - ❌ Talk to the network other than through `OpContext`
/// - ❌ Retry on its own (owned by the retry loop)
/// - ❌ Hold per-instance mutable state
/// - ❌ Decide plan actions (owned by the reconcile engine)
#[async_trait]
pub trait Resource: Send + Sync {
    /// Static description (kind, schema, concurrency, destroy mode)
    fn descriptor(&self) -> &ResourceDescriptor;

    /// Cross-field checks beyond what the schema expresses
    ///
    /// Runs before any network call; every error is reported.
    fn validate_config(&self, _config: &ConfigMap) -> std::result::Result<(), Vec<Error>> {
        Ok(())
    }

    /// Create the remote object and set the identifier
    async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()>;

    /// Read the remote object into state
    ///
    /// # Returns
    ///
    /// - `Ok(())`: state refreshed, or the identifier was cleared because
    ///   the object vanished
    /// - `Err(Error::RemoteNotFound)`: the object vanished (the lifecycle
    ///   layer clears the identifier)
    async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()>;

    /// Write the desired configuration to the existing object
    async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()>;

    /// Delete (or disable) the remote object
    async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()>;

    /// Adopt an existing object; the identifier is already set
    async fn import(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        self.read(ctx, bag).await
    }
}
