//! NAS Config Manager - Declarative Cluster Configuration
//!
//! A configuration manager for scale-out NAS clusters: desired state in,
//! REST calls against the cluster management API out, with a `changed`
//! flag and a server-side snapshot reported per resource.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Plan (YAML desired state)                     │
//! └────────────────────────────────┬────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Resource Managers                             │
//! │  alerts · network pools · NFS/SMB · quotas · snapshots · SyncIQ     │
//! │         certificates · users · groups · roles                       │
//! └───────────────┬─────────────────────────────────┬───────────────────┘
//!                 │                                 │
//!                 ▼                                 ▼
//! ┌───────────────────────────┐   ┌────────────────────────────────────┐
//! │   reconcile (field diff)  │   │   REST client (auth, TLS, paging)  │
//! └───────────────────────────┘   └────────────────┬───────────────────┘
//!                                                  │ HTTPS/JSON
//!                                                  ▼
//!                                        ┌──────────────────┐
//!                                        │   NAS cluster    │
//!                                        └──────────────────┘
//! ```
//!
//! Reconciliation is read-diff-write: fetch the current resource, diff it
//! field by field against the caller's parameters (unset fields carry no
//! opinion), issue at most one mutating call with only the changed
//! fields, then re-fetch. The cluster stays the single source of truth;
//! nothing persists between invocations.
//!
//! # Modules
//!
//! - [`client`]: REST transport, typed lookups, pagination drain
//! - [`reconcile`]: present-vs-desired delta computation
//! - [`resources`]: one manager per resource type
//! - [`plan`]: desired-state document and apply loop
//! - [`types`]: shared domain types
//! - [`error`]: error types and handling

pub mod client;
pub mod error;
pub mod plan;
pub mod reconcile;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use client::{ClusterConfig, Credentials, Lookup, RestClient};
pub use error::{Error, Result};
pub use plan::{apply_plan, Plan, ResourceEntry};
pub use reconcile::{Delta, DeltaBuilder};
pub use resources::ResourceManager;
pub use types::{ApplyOutcome, ApplyReport, CheckMode, ResourceState, ServiceMode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
