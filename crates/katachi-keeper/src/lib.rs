//! Resource Keeper
//!
//! Owns idempotent apply/delete of rendered resource manifests across
//! clusters, tracks which resources belong to which Application revision,
//! and garbage-collects resources no longer claimed.

pub mod cluster;
pub mod keeper;
pub mod kube_client;
pub mod manifest;

pub use cluster::{ApplyOptions, ClusterClient, ClusterRouter, InMemoryCluster, LOCAL_CLUSTER};
pub use keeper::ResourceKeeper;
pub use kube_client::KubeCluster;
pub use manifest::{KeeperError, ResourceIdent, ResourceManifest};
