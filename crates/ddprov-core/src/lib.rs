// # ddprov-core
//
// Core library for the ddprov infrastructure-as-code provider.
//
// ## Architecture Overview
//
// This library holds everything that does not know about a particular
// resource or about HTTP:
// - **Schema**: Static field descriptors, validation, tagged unions
// - **Translator**: Table-driven build (config → wire) and flatten (wire → config)
// - **Diff**: Per-field canonicalized comparison and drift detection
// - **ApiClient**: Trait for sending one request; retry and cancellation on top
// - **Resource / Lifecycle**: The five handlers and the policies shared by all of them
// - **ResourceRegistry**: Resources registered by kind, no hard-coded dispatch
// - **ReconcileEngine**: Plan, apply, refresh and import over a StateStore
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Resources describe entities, the core owns policy
// 2. **Null vs absent**: The empty-value policy lives on the field descriptor
// 3. **Sum types for unions**: Sibling blocks are canonicalized into enums at once
// 4. **Library-First**: The driver binary is a thin shell over this crate
// 5. **Idempotency**: Every handler is safe to re-run

pub mod config;
pub mod diag;
pub mod diff;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod path;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod state;
pub mod traits;
pub mod translate;
pub mod value;

// Re-export core types for convenience
pub use config::{EngineConfig, ProviderBlock, ProviderConfig};
pub use diag::{Diagnostic, Diagnostics, Severity};
pub use diff::{Change, ChangeKind, Diff, DiffRule};
pub use engine::{DesiredResource, EngineEvent, Outcome, Plan, PlanAction, ReconcileEngine, RunReport};
pub use error::{Error, Result, TranslationKind};
pub use lifecycle::Lifecycle;
pub use path::AttrPath;
pub use registry::ResourceRegistry;
pub use retry::RetryPolicy;
pub use schema::{Field, FieldType, Presence, Schema};
pub use state::MemoryStateStore;
pub use traits::{
    ApiClient, ApiRequest, ApiResponse, DataSource, Method, OpContext, Resource, ResourceDescriptor, StateBag,
    StateRecord, StateStore,
};
pub use value::{ConfigMap, Fields};
