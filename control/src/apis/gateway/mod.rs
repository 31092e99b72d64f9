//! Gateway API support (v1)
//!
//! Turns Gateway API objects into mesh routing config:
//! - types: watched objects and change events
//! - translate: GatewayClass/Gateway/HTTPRoute to Gateway/VirtualService
//! - namespace_keys: which Namespace label changes matter
//! - controller: reconciliation coordinator and query surface
//! - watcher: Kubernetes watchers feeding the object store

pub mod controller;
pub mod namespace_keys;
pub mod selector;
pub mod snapshot;
pub mod translate;
pub mod types;
pub mod validation;
pub mod watcher;
