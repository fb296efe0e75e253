//! Prism Central v3 transport for PrismFlow
//!
//! This crate implements the `PrismApi` trait from `prismflow-cloud` over
//! the Prism Central v3 REST API.
//!
//! # Requirements
//!
//! - `NUTANIX_ENDPOINT`, `NUTANIX_USERNAME`, `NUTANIX_PASSWORD` env vars, or
//!   a `prismflow.yaml` file (see `prismflow-config`)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use prismflow_cloud::{Reconciler, Selector, Timeouts, resolve, ResourceKind};
//! use prismflow_cloud_v3::PrismClient;
//! use prismflow_config::ProviderConfig;
//!
//! let config = ProviderConfig::load()?;
//! let client = Arc::new(PrismClient::new(&config)?);
//! let timeouts = Timeouts::default().with_wait_timeout(config.wait_timeout.unwrap_or(0));
//! let reconciler = Reconciler::new(client.clone(), timeouts);
//!
//! let uuid = resolve(client.as_ref(), ResourceKind::Vm, &Selector::parse("db-server")).await?;
//! reconciler.delete(ResourceKind::Vm, &uuid).await?;
//! ```

pub mod client;
pub mod error;

pub use client::{PAGE_SIZE, PrismClient};
pub use error::{PrismApiError, Result};
