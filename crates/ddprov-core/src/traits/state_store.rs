// # State Store Trait
//
// Defines the interface for holding reconciled instance state.
//
// ## Purpose
//
// The reconcile engine keeps one record per managed instance: its remote
// identifier and the last flattened view of the remote object. The record
// is what `plan` diffs against and what `refresh` compares fresh reads to.
//
// The orchestrator owns persistence. Stores are seeded from the state
// document the orchestrator hands in and exported back to it afterwards.
//
// ## Implementations
//
// - `MemoryStateStore`: in-process map with snapshot export/import

use crate::value::ConfigMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State record for one managed instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Resource type name
    pub kind: String,
    /// Remote identifier
    pub id: String,
    /// Last flattened remote view
    #[serde(default)]
    pub values: ConfigMap,
    /// When the record was last written
    pub last_updated: DateTime<Utc>,
}

impl StateRecord {
    /// Create a record stamped now
    pub fn new(kind: impl Into<String>, id: impl Into<String>, values: ConfigMap) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            values,
            last_updated: Utc::now(),
        }
    }
}

/// Trait for state store implementations
///
/// Records are keyed by instance address (`datadog_monitor.cpu`).
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Hold records in memory or on durable storage
/// - ✅ Implement locking for thread safety
///
/// ## Forbidden Capabilities
/// - ❌ Call the remote API (owned by resources)
/// - ❌ Decide plan actions (owned by `ReconcileEngine`)
/// - ❌ Spawn background tasks
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the record for an address
    ///
    /// # Returns
    ///
    /// - `Ok(Some(StateRecord))`: the record
    /// - `Ok(None)`: no record
    /// - `Err(Error)`: storage error
    async fn get(&self, address: &str) -> Result<Option<StateRecord>, crate::Error>;

    /// Create or replace the record for an address
    async fn put(&self, address: &str, record: StateRecord) -> Result<(), crate::Error>;

    /// Remove a record (absent records are fine)
    async fn remove(&self, address: &str) -> Result<(), crate::Error>;

    /// List every address in the store, sorted
    async fn list(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
