//! Referenced namespace keys - which namespace labels can change routing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     ReferencedNamespaceKeys                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  Data (Arc<RwLock<BTreeSet>>)       │  Metrics (Atomics - lock-free!)   │
//! │  ┌─────────────────────────────┐    │  ┌─────────────────────────────┐  │
//! │  │ label keys read by any      │    │  │ recomputes: AtomicU64       │  │
//! │  │ Gateway listener selector   │    │  │ checks: AtomicU64           │  │
//! │  └─────────────────────────────┘    │  │ relevant: AtomicU64         │  │
//! │                                      │  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Relevance
//!
//! A Namespace event only matters when it could change which namespaces a
//! listener selector admits. An event is relevant iff its labels changed (adds
//! and deletes always pass) and the touched keys (old label keys, new label
//! keys, and [`NAMESPACE_NAME_LABEL`]) intersect the referenced set.
//!
//! The set is replaced wholesale on every recompute, so it is always
//! consistent with the Gateways it was computed from.

use crate::apis::gateway::selector::selector_keys;
use crate::apis::gateway::types::{FromNamespaces, NamespaceSnapshot, RoutingGateway};
use crate::sync::{safe_read, safe_write};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Well-known label carrying a namespace's own name
pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

// =============================================================================
// NamespaceKeyMetrics - Lock-free atomic counters
// =============================================================================

/// Lock-free counters for relevance decisions
#[derive(Debug, Default)]
pub struct NamespaceKeyMetrics {
    recomputes: AtomicU64,
    checks: AtomicU64,
    relevant: AtomicU64,
}

impl NamespaceKeyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record_recompute(&self) {
        self.recomputes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_check(&self, relevant: bool) {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if relevant {
            self.relevant.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn recomputes(&self) -> u64 {
        self.recomputes.load(Ordering::Relaxed)
    }

    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    pub fn relevant(&self) -> u64 {
        self.relevant.load(Ordering::Relaxed)
    }

    /// Format metrics in Prometheus exposition format
    pub fn to_prometheus(&self, keys: usize) -> String {
        format!(
            r#"# HELP namespace_keys_recomputes_total Referenced namespace key recomputations
# TYPE namespace_keys_recomputes_total counter
namespace_keys_recomputes_total {recomputes}
# HELP namespace_keys_checks_total Namespace event relevance checks
# TYPE namespace_keys_checks_total counter
namespace_keys_checks_total {checks}
# HELP namespace_keys_relevant_total Namespace events judged relevant
# TYPE namespace_keys_relevant_total counter
namespace_keys_relevant_total {relevant}
# HELP namespace_keys_referenced Label keys referenced by Gateway selectors
# TYPE namespace_keys_referenced gauge
namespace_keys_referenced {keys}"#,
            recomputes = self.recomputes(),
            checks = self.checks(),
            relevant = self.relevant(),
            keys = keys,
        )
    }
}

// =============================================================================
// ReferencedNamespaceKeys
// =============================================================================

/// Label keys referenced by any known Gateway's allowed-routes selector
///
/// Clones share the same set and metrics.
#[derive(Debug, Clone, Default)]
pub struct ReferencedNamespaceKeys {
    inner: Arc<RwLock<BTreeSet<String>>>,
    metrics: Arc<NamespaceKeyMetrics>,
}

impl ReferencedNamespaceKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the set from the given Gateways, replacing the previous one
    ///
    /// Returns `true` if the set changed.
    pub fn recompute<'a>(&self, gateways: impl IntoIterator<Item = &'a RoutingGateway>) -> bool {
        self.replace(collect_referenced_keys(gateways))
    }

    /// Replace the set wholesale; returns `true` if it changed
    pub fn replace(&self, keys: BTreeSet<String>) -> bool {
        self.metrics.record_recompute();
        let mut inner = safe_write(&self.inner);
        if *inner == keys {
            return false;
        }
        debug!(
            "ReferencedNamespaceKeys: {} -> {} keys ({:?})",
            inner.len(),
            keys.len(),
            keys
        );
        *inner = keys;
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        safe_read(&self.inner).contains(key)
    }

    /// Sorted copy of the current keys
    pub fn keys(&self) -> Vec<String> {
        safe_read(&self.inner).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        safe_read(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        safe_read(&self.inner).is_empty()
    }

    /// Decide whether a Namespace change can affect translation
    pub fn is_relevant(
        &self,
        old: Option<&NamespaceSnapshot>,
        new: Option<&NamespaceSnapshot>,
    ) -> bool {
        let relevant = {
            let inner = safe_read(&self.inner);
            namespace_event_relevant(&inner, old, new)
        };
        self.metrics.record_check(relevant);
        relevant
    }

    pub fn metrics(&self) -> &NamespaceKeyMetrics {
        &self.metrics
    }

    pub fn prometheus_metrics(&self) -> String {
        self.metrics.to_prometheus(self.len())
    }
}

impl fmt::Display for ReferencedNamespaceKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = safe_read(&self.inner);
        write!(f, "ReferencedNamespaceKeys[")?;
        for (i, key) in inner.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", key)?;
        }
        write!(f, "]")
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

/// Label keys read by any listener selector across the given Gateways
pub fn collect_referenced_keys<'a>(
    gateways: impl IntoIterator<Item = &'a RoutingGateway>,
) -> BTreeSet<String> {
    gateways
        .into_iter()
        .flat_map(|gw| gw.spec.listeners.iter())
        .filter(|listener| listener.from_namespaces() == FromNamespaces::Selector)
        .filter_map(|listener| listener.namespace_selector())
        .flat_map(|selector| selector_keys(selector).map(str::to_string))
        .collect()
}

/// Every label key an event could have changed
pub fn touched_keys(
    old: Option<&NamespaceSnapshot>,
    new: Option<&NamespaceSnapshot>,
) -> BTreeSet<String> {
    old.into_iter()
        .chain(new)
        .flat_map(|ns| ns.labels.keys().cloned())
        .chain(std::iter::once(NAMESPACE_NAME_LABEL.to_string()))
        .collect()
}

/// Relevance decision against an explicit key set
pub fn namespace_event_relevant(
    referenced: &BTreeSet<String>,
    old: Option<&NamespaceSnapshot>,
    new: Option<&NamespaceSnapshot>,
) -> bool {
    match (old, new) {
        (None, None) => return false,
        (Some(old), Some(new)) if old.labels == new.labels => return false,
        _ => {}
    }
    touched_keys(old, new)
        .iter()
        .any(|key| referenced.contains(key))
}
