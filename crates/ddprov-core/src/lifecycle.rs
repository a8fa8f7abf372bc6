//! Lifecycle wrapper around resource handlers
//!
//! [`Lifecycle`] applies the policies every resource shares, so handlers
//! only deal with their own entity:
//!
//! - configuration is validated before any network call
//! - Create and Update are followed by a Read
//! - a 404 on Read clears the identifier; on Update and Delete it is success
//! - version-gated resources must hold a version, and conflicts carry the
//!   current remote version
//! - destroy-by-disable is confirmed by reading back
//! - Import checks that required fields came back populated
//! - errors become diagnostics prefixed with `<kind> "<id>"`, and server
//!   warnings recorded on the bag become warning diagnostics

use crate::diag::{Diagnostic, Diagnostics};
use crate::error::{Error, Result};
use crate::path::AttrPath;
use crate::schema::{self, is_set};
use crate::traits::{Concurrency, DestroyMode, OpContext, Resource, ResourceDescriptor, StateBag};
use crate::value::ConfigMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Read-back attempts when confirming destroy-by-disable
const DESTROY_CONFIRM_ATTEMPTS: u32 = 10;

/// Delay between destroy confirmation reads
const DESTROY_CONFIRM_INTERVAL: Duration = Duration::from_millis(500);

/// Policy wrapper for one resource kind
#[derive(Clone)]
pub struct Lifecycle {
    resource: Arc<dyn Resource>,
}

impl Lifecycle {
    pub fn new(resource: Arc<dyn Resource>) -> Self {
        Self { resource }
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        self.resource.descriptor()
    }

    pub fn kind(&self) -> &'static str {
        self.descriptor().kind
    }

    /// Validate a configuration against the schema and the resource's
    /// cross-field rules, reporting every problem at once
    pub fn validate(&self, config: &ConfigMap, id: Option<&str>) -> Diagnostics {
        let mut errors = schema::validate(config, &self.descriptor().schema)
            .err()
            .unwrap_or_default();
        if let Err(more) = self.resource.validate_config(config) {
            errors.extend(more);
        }

        errors
            .iter()
            .map(|e| Diagnostic::from(e).in_resource(self.kind(), id))
            .collect::<Vec<_>>()
            .into()
    }

    /// Create the remote object, then read it back
    pub async fn create(&self, ctx: &OpContext, bag: &mut StateBag) -> Diagnostics {
        let mut diags = self.validate(bag.config(), None);
        if diags.has_errors() {
            return diags;
        }

        info!("Creating {}", self.kind());
        if let Err(e) = self.resource.create(ctx, bag).await {
            diags.push(self.failure("create", bag.id(), &e));
            bag.clear_id();
            self.drain_warnings(bag, &mut diags);
            return diags;
        }

        let Some(id) = bag.id().map(str::to_string) else {
            diags.push(
                Diagnostic::error("create did not return an identifier").in_resource(self.kind(), None),
            );
            return diags;
        };
        info!("Created {} {:?}", self.kind(), id);

        self.read_back(ctx, bag, &mut diags, "create").await;
        self.drain_warnings(bag, &mut diags);
        diags
    }

    /// Refresh state from the remote object
    ///
    /// An object that vanished out of band clears the identifier and is not
    /// an error.
    pub async fn read(&self, ctx: &OpContext, bag: &mut StateBag) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if bag.id().is_none() {
            return diags;
        }

        match self.read_inner(ctx, bag).await {
            Ok(()) => {}
            Err(e) => diags.push(self.failure("read", bag.id(), &e)),
        }
        self.drain_warnings(bag, &mut diags);
        diags
    }

    /// Write the desired configuration, then read it back
    pub async fn update(&self, ctx: &OpContext, bag: &mut StateBag) -> Diagnostics {
        let id = bag.id().map(str::to_string);
        let mut diags = self.validate(bag.config(), id.as_deref());
        if diags.has_errors() {
            return diags;
        }
        let Some(id) = id else {
            diags.push(Diagnostic::error("cannot update an object without an identifier").in_resource(self.kind(), None));
            return diags;
        };

        if let Concurrency::Versioned { field } = self.descriptor().concurrency {
            if bag.version(field).is_none() {
                diags.push(
                    Diagnostic::error(format!("{} is unknown; refresh before updating", field))
                        .with_path(AttrPath::root().key(field))
                        .in_resource(self.kind(), Some(&id)),
                );
                return diags;
            }
        }

        info!("Updating {} {:?}", self.kind(), id);
        match self.resource.update(ctx, bag).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!("{} {:?} vanished during update", self.kind(), id);
                bag.clear_id();
                diags.push(
                    Diagnostic::warning("remote object no longer exists; it will be re-created")
                        .in_resource(self.kind(), Some(&id)),
                );
                self.drain_warnings(bag, &mut diags);
                return diags;
            }
            Err(e) => {
                let e = self.with_current_version(ctx, bag, e).await;
                diags.push(self.failure("update", Some(&id), &e));
                self.drain_warnings(bag, &mut diags);
                return diags;
            }
        }

        self.read_back(ctx, bag, &mut diags, "update").await;
        self.drain_warnings(bag, &mut diags);
        diags
    }

    /// Delete (or disable) the remote object and clear the identifier
    pub async fn delete(&self, ctx: &OpContext, bag: &mut StateBag) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let Some(id) = bag.id().map(str::to_string) else {
            return diags;
        };

        info!("Deleting {} {:?}", self.kind(), id);
        match self.resource.delete(ctx, bag).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("{} {:?} already gone", self.kind(), id);
                bag.clear_id();
                self.drain_warnings(bag, &mut diags);
                return diags;
            }
            Err(e) => {
                diags.push(self.failure("delete", Some(&id), &e));
                self.drain_warnings(bag, &mut diags);
                return diags;
            }
        }

        if let DestroyMode::Disable { field, value } = self.descriptor().destroy {
            if let Err(e) = self.confirm_disabled(ctx, bag, field, value).await {
                diags.push(self.failure("delete", Some(&id), &e));
                self.drain_warnings(bag, &mut diags);
                return diags;
            }
        }

        self.drain_warnings(bag, &mut diags);
        bag.clear_id();
        info!("Deleted {} {:?}", self.kind(), id);
        diags
    }

    /// Adopt an existing remote object by identifier
    ///
    /// Import never writes. The object must exist and every required field
    /// must come back populated.
    pub async fn import(&self, ctx: &OpContext, id: &str, bag: &mut StateBag) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if !self.descriptor().importable {
            diags.push(Diagnostic::error("resource does not support import").in_resource(self.kind(), Some(id)));
            return diags;
        }

        bag.set_id(id);
        info!("Importing {} {:?}", self.kind(), id);
        match self.resource.import(ctx, bag).await {
            Ok(()) if bag.id().is_some() => {}
            Ok(()) => {
                diags.push(self.vanished(id));
                return diags;
            }
            Err(e) if e.is_not_found() => {
                bag.clear_id();
                diags.push(self.vanished(id));
                return diags;
            }
            Err(e) => {
                diags.push(self.failure("import", Some(id), &e));
                bag.clear_id();
                return diags;
            }
        }

        let schema = self.descriptor().schema.clone();
        for field in schema.iter().filter(|f| f.presence == schema::Presence::Required && !f.sensitive) {
            if !is_set(bag.state().get(field.name)) {
                diags.push(
                    Diagnostic::error(format!("imported object is missing required field {:?}", field.name))
                        .with_path(AttrPath::root().key(field.name))
                        .in_resource(self.kind(), Some(id)),
                );
            }
        }
        self.drain_warnings(bag, &mut diags);
        diags
    }

    async fn read_inner(&self, ctx: &OpContext, bag: &mut StateBag) -> Result<()> {
        let id = bag.id().map(str::to_string);
        match self.resource.read(ctx, bag).await {
            Ok(()) => {
                if bag.id().is_none() {
                    info!("{} {:?} no longer exists remotely", self.kind(), id);
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!("{} {:?} no longer exists remotely", self.kind(), id);
                bag.clear_id();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn read_back(&self, ctx: &OpContext, bag: &mut StateBag, diags: &mut Diagnostics, op: &str) {
        let id = bag.id().map(str::to_string);
        match self.read_inner(ctx, bag).await {
            Ok(()) if bag.id().is_none() => diags.push(
                Diagnostic::error(format!("object not found when reading back after {}", op))
                    .in_resource(self.kind(), id.as_deref()),
            ),
            Ok(()) => {}
            Err(e) => diags.push(self.failure("read", id.as_deref(), &e)),
        }
    }

    /// Attach the current remote version to a conflict that lacks one
    async fn with_current_version(&self, ctx: &OpContext, bag: &StateBag, err: Error) -> Error {
        let Concurrency::Versioned { field } = self.descriptor().concurrency else {
            return err;
        };
        match err {
            Error::Conflict {
                message,
                current_version: None,
            } => {
                let mut fresh = bag.clone();
                let current = match self.resource.read(ctx, &mut fresh).await {
                    Ok(()) => fresh.version(field),
                    Err(e) => {
                        warn!("Could not read current version of {}: {}", self.kind(), e);
                        None
                    }
                };
                Error::conflict(message, current)
            }
            other => other,
        }
    }

    async fn confirm_disabled(
        &self,
        ctx: &OpContext,
        bag: &StateBag,
        field: &'static str,
        value: bool,
    ) -> Result<()> {
        for attempt in 0..DESTROY_CONFIRM_ATTEMPTS {
            let mut fresh = bag.clone();
            match self.resource.read(ctx, &mut fresh).await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
                Ok(()) if fresh.id().is_none() => return Ok(()),
                Ok(()) if fresh.prior(field) == Some(&Value::Bool(value)) => return Ok(()),
                Ok(()) => {
                    debug!(
                        "{} not yet {}={} (check {})",
                        self.kind(),
                        field,
                        value,
                        attempt + 1
                    );
                    ctx.sleep(DESTROY_CONFIRM_INTERVAL).await?;
                }
            }
        }
        Err(Error::transient(format!(
            "{} did not become {} after {} checks",
            field, value, DESTROY_CONFIRM_ATTEMPTS
        )))
    }

    fn failure(&self, op: &str, id: Option<&str>, err: &Error) -> Diagnostic {
        error!("{} {} failed for {:?}: {}", self.kind(), op, id, err);
        Diagnostic::from(err).in_resource(self.kind(), id)
    }

    fn vanished(&self, id: &str) -> Diagnostic {
        Diagnostic::error("cannot import non-existent remote object").in_resource(self.kind(), Some(id))
    }

    fn drain_warnings(&self, bag: &mut StateBag, diags: &mut Diagnostics) {
        let id = bag.id().map(str::to_string);
        for message in bag.take_warnings() {
            warn!("{} {:?}: {}", self.kind(), id, message);
            diags.push(Diagnostic::warning(message).in_resource(self.kind(), id.as_deref()));
        }
    }
}
