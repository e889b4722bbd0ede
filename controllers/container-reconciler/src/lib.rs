//! Keel Container Reconciliation Engine
//!
//! Turns a declarative container specification into Kubernetes workloads,
//! networking, storage and Tekton build pipelines, and keeps them in step
//! as the container settings change:
//! - Coordinator: sequences every reconciler for a create, update or delete
//! - Resource reconcilers: one per Kubernetes kind
//! - Change detector: decides which categories an update touches
//! - TCP proxy manager: exposes raw TCP ports through ingress-nginx
//! - Pipeline manager: Tekton triggers plus git provider webhooks

pub mod changes;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod resources;
pub mod tcp_proxy;

#[cfg(test)]
mod coordinator_test;
#[cfg(test)]
mod tcp_proxy_test;
#[cfg(test)]
mod test_utils;

pub use changes::{ChangeSet, ResourceCategory};
pub use cluster::{ClusterApi, KubeCluster, ResourceKind};
pub use config::EngineConfig;
pub use coordinator::{Action, Coordinator, ReconcileOutcome};
pub use error::{ClusterError, ReconcileError};
pub use pipeline::PipelineManager;
pub use tcp_proxy::{ProxySweep, TcpProxyManager};
