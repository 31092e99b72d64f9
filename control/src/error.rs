use crate::apis::gateway::types::ObjectKind;
use thiserror::Error;

/// Control plane errors surfaced to callers of the coordinator
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reconciliation worker already started")]
    AlreadyRunning,
}

/// Failures reported by an object store collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("failed to list {kind}: {reason}")]
    List { kind: ObjectKind, reason: String },

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// Reasons an input object (or part of one) is skipped during translation
///
/// Never returned from reconcile; only used to decide what to skip and what to log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid path: {0}")]
    Path(String),

    #[error("invalid hostname: {0}")]
    Hostname(String),

    #[error("invalid header name: {0}")]
    HeaderName(String),

    #[error("invalid regular expression: {0}")]
    Regex(String),

    #[error("invalid namespace selector: {0}")]
    Selector(String),

    #[error("invalid listener: {0}")]
    Listener(String),

    #[error("invalid port {0}")]
    Port(i32),
}
