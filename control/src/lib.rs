//! meshgate control plane library
//!
//! Translates Gateway API objects into mesh routing config and keeps the
//! derived snapshot current as the watched objects change.

pub mod apis;
pub mod config;
pub mod error;
pub mod gvk;
pub mod networking;
pub mod push;
pub mod store;
mod sync;

pub use apis::gateway::controller::{Coordinator, EventHandler};
pub use apis::gateway::translate::{translate, translate_all, TranslationOptions, Universe};
pub use apis::gateway::types::{ChangeEvent, Event, Object, ObjectKind};
pub use config::ControllerConfig;
pub use error::{ControllerError, StoreError};
