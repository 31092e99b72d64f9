//! Object store: the coordinator's view of watched objects
//!
//! [`ObjectStore`] is the seam to the informer layer. [`MemoryStore`] is the
//! in-process implementation: the Kubernetes watchers write into it, tests
//! drive it directly, and every write is fanned out as a [`ChangeEvent`]
//! carrying the previous value.

use crate::apis::gateway::types::{ChangeEvent, Object, ObjectKind};
use crate::error::StoreError;
use crate::sync::{safe_lock, safe_read, safe_write};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// Read access to the current set of watched objects
pub trait ObjectStore: Send + Sync {
    /// Every object of `kind` currently known
    fn list_all(&self, kind: ObjectKind) -> Result<Vec<Object>, StoreError>;
}

/// Key for stored objects: (kind, namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(object: &Object) -> Self {
        Self::new(object.kind(), object.namespace(), object.name())
    }
}

/// In-memory object store with change fan-out
///
/// Clones share the same objects and subscribers.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<ObjectKey, Object>>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ChangeEvent>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every subsequent change to `tx`
    pub fn subscribe(&self, tx: mpsc::UnboundedSender<ChangeEvent>) {
        safe_lock(&self.subscribers).push(tx);
    }

    /// Insert or replace an object, notifying subscribers
    pub fn apply(&self, object: Object) {
        let key = ObjectKey::of(&object);
        let old = safe_write(&self.objects).insert(key.clone(), object.clone());
        self.publish(ChangeEvent {
            kind: key.kind,
            namespace: key.namespace,
            name: key.name,
            old,
            new: Some(object),
        });
    }

    /// Remove an object, notifying subscribers if it existed
    pub fn delete(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<Object> {
        let key = ObjectKey::new(kind, namespace, name);
        let old = safe_write(&self.objects).remove(&key)?;
        self.publish(ChangeEvent {
            kind: key.kind,
            namespace: key.namespace,
            name: key.name,
            old: Some(old.clone()),
            new: None,
        });
        Some(old)
    }

    pub fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<Object> {
        safe_read(&self.objects)
            .get(&ObjectKey::new(kind, namespace, name))
            .cloned()
    }

    /// Keys of every stored object of `kind`
    pub fn keys(&self, kind: ObjectKind) -> Vec<ObjectKey> {
        safe_read(&self.objects)
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        safe_read(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        safe_read(&self.objects).is_empty()
    }

    fn publish(&self, event: ChangeEvent) {
        debug!("MemoryStore: {}", event);
        // Drop subscribers whose receiver is gone
        safe_lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl ObjectStore for MemoryStore {
    fn list_all(&self, kind: ObjectKind) -> Result<Vec<Object>, StoreError> {
        Ok(safe_read(&self.objects)
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(_, v)| v.clone())
            .collect())
    }
}
