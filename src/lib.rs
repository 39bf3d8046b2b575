//! apihub - a configuration-driven API gateway.
//!
//! Each API is described by a JSON definition: the backend URL and method,
//! rules resolving outbound query, header and body values from the inbound
//! request, earlier step results or private stores, an optional response
//! mapping and an optional cache policy whose expiration is discovered in
//! the backend response itself.
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping the call pipeline inside `core`:
//!
//! * [`core::RequestBuilder`] turns a definition and a call context into an
//!   outbound request
//! * [`core::transform`] shapes the backend response
//! * [`core::CachePolicy`] holds the per-definition cache with double-checked
//!   locking
//! * [`core::ApiExecutor`] ties them together for one call
//!
//! # Quick Example
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use apihub::{
//!     adapters::HttpClientAdapter,
//!     core::{ApiDefinition, ApiExecutor, ApiRegistry, CallContext, InboundRequest},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let mut registry = ApiRegistry::new();
//! registry.insert_api(ApiDefinition::new("ip", "https://api.ipify.org?format=json", "GET"));
//!
//! let client = Arc::new(HttpClientAdapter::new(Duration::from_secs(10))?);
//! let executor = ApiExecutor::new(Arc::new(registry), client);
//!
//! let mut ctx = CallContext::new("ip", serde_json::json!({}), InboundRequest::default());
//! let outcome = executor.run(&mut ctx).await?;
//! println!("{} {:?}", outcome.status, outcome.body);
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Startup paths return `eyre::Result<T>` with context attached through
//! `WrapErr`. The call pipeline uses `thiserror` enums and degrades to a
//! status code instead of failing where a partial answer is possible.
pub mod config;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::{ApiExecutor, ApiRegistry, CallContext, CallOutcome},
    ports::http_client::HttpClient,
};
