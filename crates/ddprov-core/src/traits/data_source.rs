// # Data Source Trait
//
// Read-only lookups. A data source takes a filter configuration, queries
// the remote API (usually a paginated listing) and returns computed
// outputs. It never creates, changes or tracks anything, so it has no
// state record and no lifecycle beyond validation.
//
// ## Usage
//
// ```rust,ignore
// let outputs = source.read(&ctx, &config).await?;
// let id = outputs["id"].as_str();
// ```

use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::traits::OpContext;
use crate::value::ConfigMap;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for read-only lookups
///
/// Like [`crate::traits::Resource`], one instance serves every lookup of its
/// kind concurrently and keeps nothing on `self`.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Data source type name (`datadog_user`, ...)
    fn kind(&self) -> &'static str;

    /// Filter arguments and computed outputs
    fn schema(&self) -> Arc<Schema>;

    /// Cross-field checks beyond what the schema expresses
    fn validate_config(&self, _config: &ConfigMap) -> std::result::Result<(), Vec<Error>> {
        Ok(())
    }

    /// Run the lookup
    ///
    /// # Returns
    ///
    /// - `Ok(ConfigMap)`: the filter arguments plus computed outputs
    /// - `Err(Error)`: the remote call failed, or the filter matched
    ///   nothing (or too much)
    async fn read(&self, ctx: &OpContext, config: &ConfigMap) -> Result<ConfigMap>;
}
