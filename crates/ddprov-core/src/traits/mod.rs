//! Core traits for the provider
//!
//! This module defines the abstract interfaces the core is written against.
//!
//! - [`ApiClient`]: Send one request to the remote REST API
//! - [`Resource`]: Lifecycle handlers for one resource kind
//! - [`DataSource`]: Read-only lookups
//! - [`StateStore`]: Reconciled instance state

pub mod api_client;
pub mod data_source;
pub mod resource;
pub mod state_store;

pub use api_client::{ApiClient, ApiRequest, ApiResponse, Method};
pub use data_source::DataSource;
pub use resource::{Concurrency, DestroyMode, OpContext, Resource, ResourceDescriptor, StateBag};
pub use state_store::{StateRecord, StateStore};
