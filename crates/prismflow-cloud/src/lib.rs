//! PrismFlow Cloud
//!
//! Task reconciliation core for resources managed through Nutanix Prism
//! Central v3. Every mutation against Prism is asynchronous: the API
//! accepts a request and hands back a task. This crate drives those tasks
//! to a terminal state and decides what to do when they do not succeed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           schema / CRUD layer (caller)           │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ResourceSpec
//! ┌─────────────────▼───────────────────────────────┐
//! │               prismflow-cloud                    │
//! │  ┌────────────┐ ┌────────────┐ ┌─────────────┐  │
//! │  │ Reconciler │ │  Resolver  │ │  Classifier │  │
//! │  └─────┬──────┘ └────────────┘ └─────────────┘  │
//! │  ┌─────▼──────┐ ┌────────────┐                  │
//! │  │ TaskPoller │ │ PowerCtrl  │                  │
//! │  └────────────┘ └────────────┘                  │
//! │          trait PrismApi { ... }                  │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │       prismflow-cloud-v3 (REST transport)        │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod classify;
pub mod error;
pub mod kind;
pub mod poll;
pub mod power;
pub mod reconcile;
pub mod resolve;
pub mod resource;
pub mod vm;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use api::{
    ApiResult, Entity, IntentInput, PrismApi, SpecVersion, Submitted, TaskId, TaskState,
    TaskStatus,
};
pub use classify::{Change, ChangeSet, Disruption};
pub use error::{ApiError, CloudError, Result};
pub use kind::ResourceKind;
pub use poll::{PollConfig, Refresh, TaskPoller, Timeouts, wait_for};
pub use power::{PowerController, PowerState};
pub use reconcile::{ReconciliationOutcome, Reconciler};
pub use resolve::{Selector, name_filter, resolve, resolve_entity};
pub use resource::{Checksum, GenericSpec, ImageSpec, ResourceSpec};
pub use vm::{BootDevice, Reference, VmSpec};
