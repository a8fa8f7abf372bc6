//! Resource registry
//!
//! The registry maps resource and data source type names to their
//! implementations, so the engine and the driver look them up by kind
//! instead of hardcoding them. Resources and data sources live in separate
//! namespaces: `datadog_user` names both.
//!
//! ## Registration
//!
//! Resource crates register themselves during initialization:
//!
//! ```rust,ignore
//! // In ddprov-datadog
//! pub fn register(registry: &ResourceRegistry) {
//!     registry.register_resource(Arc::new(MonitorResource::new()));
//!     registry.register_data_source(Arc::new(MonitorLookup::new()));
//! }
//! ```

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::traits::{DataSource, Resource};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type ResourceMap = HashMap<String, Arc<dyn Resource>>;

type DataSourceMap = HashMap<String, Arc<dyn DataSource>>;

/// Registry of resource implementations keyed by kind
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: RwLock<ResourceMap>,
    data_sources: RwLock<DataSourceMap>,
}

impl ResourceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource under its descriptor's kind
    ///
    /// A later registration for the same kind replaces the earlier one.
    ///
    /// # Parameters
    ///
    /// - `resource`: Resource implementation
    pub fn register_resource(&self, resource: Arc<dyn Resource>) {
        let kind = resource.descriptor().kind.to_string();
        self.write().insert(kind, resource);
    }

    /// Look up a resource implementation
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn Resource>)`: The implementation
    /// - `Err(Error)`: If the kind is not registered
    pub fn resource(&self, kind: &str) -> Result<Arc<dyn Resource>> {
        self.read()
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown resource type: {}", kind)))
    }

    /// Full schema tree for a kind
    pub fn schema_of(&self, kind: &str) -> Result<Arc<Schema>> {
        Ok(self.resource(kind)?.descriptor().schema.clone())
    }

    /// List all registered kinds, sorted
    pub fn list_resources(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Check if a kind is registered
    pub fn has_resource(&self, kind: &str) -> bool {
        self.read().contains_key(kind)
    }

    /// Register a data source under its kind
    pub fn register_data_source(&self, source: Arc<dyn DataSource>) {
        let kind = source.kind().to_string();
        self.data_sources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(kind, source);
    }

    /// Look up a data source implementation
    pub fn data_source(&self, kind: &str) -> Result<Arc<dyn DataSource>> {
        self.sources()
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown data source type: {}", kind)))
    }

    /// List all registered data source kinds, sorted
    pub fn list_data_sources(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.sources().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    fn sources(&self) -> RwLockReadGuard<'_, DataSourceMap> {
        self.data_sources.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> RwLockReadGuard<'_, ResourceMap> {
        self.resources.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ResourceMap> {
        self.resources.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
