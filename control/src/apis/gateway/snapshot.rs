//! Generation snapshots of derived config
//!
//! A snapshot is immutable once built. The coordinator swaps the whole `Arc`
//! under a short write lock; readers clone the `Arc` and never observe a
//! partially installed generation.

use crate::apis::gateway::translate::Translation;
use crate::apis::gateway::types::Event;
use crate::gvk::{self, GroupVersionKind};
use crate::networking::Config;
use crate::sync::{safe_read, safe_write};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Kinds of derived config a snapshot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DerivedKind {
    Gateway,
    VirtualService,
}

impl DerivedKind {
    pub const ALL: [DerivedKind; 2] = [DerivedKind::Gateway, DerivedKind::VirtualService];

    pub fn gvk(self) -> GroupVersionKind {
        match self {
            DerivedKind::Gateway => gvk::GATEWAY,
            DerivedKind::VirtualService => gvk::VIRTUAL_SERVICE,
        }
    }

    pub fn from_gvk(kind: &GroupVersionKind) -> Option<Self> {
        DerivedKind::ALL.into_iter().find(|k| k.gvk() == *kind)
    }
}

impl fmt::Display for DerivedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DerivedKind::Gateway => f.write_str("Gateway"),
            DerivedKind::VirtualService => f.write_str("VirtualService"),
        }
    }
}

type ObjectKey = (String, String);

/// Configs of one kind, keyed for diffing and kept in translation order for listing
#[derive(Debug, Clone, Default, PartialEq)]
struct KindIndex {
    by_key: BTreeMap<ObjectKey, Config>,
    order: Vec<ObjectKey>,
}

impl KindIndex {
    fn build(configs: Vec<Config>) -> Self {
        let mut index = KindIndex::default();
        for config in configs {
            let key = (config.namespace.clone(), config.name.clone());
            if index.by_key.insert(key.clone(), config).is_none() {
                index.order.push(key);
            }
        }
        index
    }
}

/// One committed generation of derived config
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationSnapshot {
    version: u64,
    gateways: KindIndex,
    virtual_services: KindIndex,
}

impl GenerationSnapshot {
    pub fn new(version: u64, translation: Translation) -> Self {
        Self {
            version,
            gateways: KindIndex::build(translation.gateways),
            virtual_services: KindIndex::build(translation.virtual_services),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn index(&self, kind: DerivedKind) -> &KindIndex {
        match kind {
            DerivedKind::Gateway => &self.gateways,
            DerivedKind::VirtualService => &self.virtual_services,
        }
    }

    fn objects(&self, kind: DerivedKind) -> &BTreeMap<ObjectKey, Config> {
        &self.index(kind).by_key
    }

    /// Objects of `kind` in translation order, optionally restricted to one namespace
    pub fn list(&self, kind: DerivedKind, namespace: Option<&str>) -> Vec<Config> {
        let index = self.index(kind);
        index
            .order
            .iter()
            .filter_map(|key| index.by_key.get(key))
            .filter(|c| namespace.map_or(true, |ns| c.namespace == ns))
            .cloned()
            .collect()
    }

    pub fn len(&self, kind: DerivedKind) -> usize {
        self.objects(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.by_key.is_empty() && self.virtual_services.by_key.is_empty()
    }

    /// Per-kind differences from `previous` to `self`
    pub fn diff(&self, previous: &GenerationSnapshot) -> Vec<KindDiff> {
        DerivedKind::ALL
            .into_iter()
            .filter_map(|kind| diff_kind(kind, previous.objects(kind), self.objects(kind)))
            .collect()
    }
}

/// A changed kind and one representative change for handlers
#[derive(Debug, Clone, PartialEq)]
pub struct KindDiff {
    pub kind: DerivedKind,
    pub event: Event,
    pub old: Option<Config>,
    pub new: Option<Config>,
    /// Objects added, removed or modified
    pub changed: usize,
}

fn diff_kind(
    kind: DerivedKind,
    old: &BTreeMap<ObjectKey, Config>,
    new: &BTreeMap<ObjectKey, Config>,
) -> Option<KindDiff> {
    if old == new {
        return None;
    }

    let changed_keys: BTreeSet<&ObjectKey> = old
        .keys()
        .chain(new.keys())
        .filter(|key| old.get(*key) != new.get(*key))
        .collect();

    // Representative: first changed key in (namespace, name) order
    let first = *changed_keys.first()?;
    let (old_obj, new_obj) = (old.get(first).cloned(), new.get(first).cloned());
    let event = match (&old_obj, &new_obj) {
        (None, _) => Event::Add,
        (_, None) => Event::Delete,
        _ => Event::Update,
    };

    Some(KindDiff {
        kind,
        event,
        old: old_obj,
        new: new_obj,
        changed: changed_keys.len(),
    })
}

/// Holder of the latest committed snapshot
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: RwLock<Arc<GenerationSnapshot>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<GenerationSnapshot> {
        Arc::clone(&safe_read(&self.current))
    }

    pub fn store(&self, snapshot: GenerationSnapshot) {
        *safe_write(&self.current) = Arc::new(snapshot);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::networking::{GatewaySpec, VirtualServiceSpec};

    fn gw(ns: &str, name: &str) -> Config {
        Config::gateway(name, ns, GatewaySpec::default())
    }

    fn vs(ns: &str, name: &str, host: &str) -> Config {
        Config::virtual_service(
            name,
            ns,
            VirtualServiceSpec {
                hosts: vec![host.to_string()],
                ..Default::default()
            },
        )
    }

    fn snapshot(version: u64, gateways: Vec<Config>, virtual_services: Vec<Config>) -> GenerationSnapshot {
        GenerationSnapshot::new(
            version,
            Translation {
                gateways,
                virtual_services,
            },
        )
    }

    #[test]
    fn test_list_keeps_translation_order() {
        let snap = snapshot(
            1,
            vec![gw("ns2", "b"), gw("ns1", "z"), gw("ns1", "a")],
            vec![vs("ns1", "r-2", "x"), vs("ns1", "r-10", "y")],
        );

        let all: Vec<String> = snap
            .list(DerivedKind::Gateway, None)
            .iter()
            .map(Config::key)
            .collect();
        assert_eq!(all, vec!["ns2/b", "ns1/z", "ns1/a"]);

        let ns1: Vec<String> = snap
            .list(DerivedKind::Gateway, Some("ns1"))
            .iter()
            .map(Config::key)
            .collect();
        assert_eq!(ns1, vec!["ns1/z", "ns1/a"]);

        let routes: Vec<String> = snap
            .list(DerivedKind::VirtualService, None)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(routes, vec!["r-2", "r-10"]);
        assert!(snapshot(1, Vec::new(), Vec::new())
            .list(DerivedKind::VirtualService, None)
            .is_empty());
    }

    #[test]
    fn test_identical_snapshots_have_no_diff() {
        let a = snapshot(1, vec![gw("ns1", "a")], vec![vs("ns1", "r", "x")]);
        let b = snapshot(2, vec![gw("ns1", "a")], vec![vs("ns1", "r", "x")]);
        assert!(b.diff(&a).is_empty());
    }

    #[test]
    fn test_diff_classifies_changes_per_kind() {
        let empty = GenerationSnapshot::default();
        let first = snapshot(1, vec![gw("ns1", "a")], vec![vs("ns1", "r", "x")]);

        let diffs = first.diff(&empty);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].kind, DerivedKind::Gateway);
        assert_eq!(diffs[0].event, Event::Add);
        assert!(diffs[0].old.is_none());
        assert_eq!(diffs[1].kind, DerivedKind::VirtualService);

        let second = snapshot(2, vec![gw("ns1", "a")], vec![vs("ns1", "r", "y")]);
        let diffs = second.diff(&first);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].kind, DerivedKind::VirtualService);
        assert_eq!(diffs[0].event, Event::Update);
        assert_eq!(diffs[0].changed, 1);

        let diffs = empty.diff(&second);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| d.event == Event::Delete));
    }

    #[test]
    fn test_from_gvk() {
        assert_eq!(DerivedKind::from_gvk(&gvk::GATEWAY), Some(DerivedKind::Gateway));
        assert_eq!(DerivedKind::from_gvk(&gvk::HTTP_ROUTE), None);
    }

    #[test]
    fn test_cell_swaps_whole_snapshot() {
        let cell = SnapshotCell::new();
        let before = cell.load();
        cell.store(snapshot(3, vec![gw("ns1", "a")], Vec::new()));

        assert_eq!(before.version(), 0);
        assert!(before.is_empty());
        assert_eq!(cell.load().version(), 3);
        assert_eq!(cell.load().len(DerivedKind::Gateway), 1);
    }
}
