// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Purpose
//
// The orchestrator owns the durable state document. The driver seeds a
// memory store from that document, runs the reconcile engine against it
// and exports the result back out, so the store itself never persists.
//
// ## Crash Behavior
//
// - All state is lost on crash
// - The orchestrator's previous document is still authoritative; re-running
//   converges because every handler is idempotent on re-run

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use async_trait::async_trait;

use crate::traits::state_store::{StateRecord, StateStore};
use crate::Error;

/// In-memory state store implementation
///
/// # Example
///
/// ```rust,no_run
/// use ddprov_core::state::MemoryStateStore;
/// use ddprov_core::traits::{StateRecord, StateStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new();
///     store.put("datadog_monitor.cpu", StateRecord::new("datadog_monitor", "42", Default::default())).await?;
///
///     let record = store.get("datadog_monitor.cpu").await?;
///     assert_eq!(record.map(|r| r.id), Some("42".to_string()));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<String, StateRecord>>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a store seeded with records
    pub fn from_records(records: impl IntoIterator<Item = (String, StateRecord)>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(records.into_iter().collect())),
        }
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Clear all records from the store
    pub async fn clear(&self) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.clear();
        Ok(())
    }

    /// Copy every record out, ordered by address
    pub async fn snapshot(&self) -> BTreeMap<String, StateRecord> {
        let guard = self.inner.read().await;
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, address: &str) -> Result<Option<StateRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(address).cloned())
    }

    async fn put(&self, address: &str, record: StateRecord) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(address.to_string(), record);
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(address);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        let guard = self.inner.read().await;
        let mut addresses: Vec<String> = guard.keys().cloned().collect();
        addresses.sort();
        Ok(addresses)
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}
