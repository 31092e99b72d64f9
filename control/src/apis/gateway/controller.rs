//! Reconciliation Coordinator
//!
//! Consumes [`ChangeEvent`]s from the object store, decides whether a recompute
//! is needed, runs translation, installs the new generation and notifies
//! handlers and the push sink.
//!
//! ## Flow
//!
//! ```text
//! ChangeEvent ──► Namespace? ──► relevant? ──no──► drop
//!                    │              │yes
//!                    ▼              │
//!               recompute ◄─────────┘
//!                    │
//!     list store ► keys ► (Namespace handlers) ► translate_all ► diff
//!                    ► install ► handlers ► push
//! ```
//!
//! The referenced namespace keys are rebuilt from the listed Gateways on every
//! successful pass. A pass whose store listing fails changes nothing and fires
//! no handlers.
//!
//! Passes are serialized by `reconcile_lock`; `list` only reads the committed
//! snapshot and never waits on a pass. Handlers run while a pass holds the
//! lock, so they must not call back into [`Coordinator::reconcile`].

use crate::apis::gateway::namespace_keys::ReferencedNamespaceKeys;
use crate::apis::gateway::snapshot::{DerivedKind, GenerationSnapshot, SnapshotCell};
use crate::apis::gateway::translate::{translate_all, TranslationOptions, Universe};
use crate::apis::gateway::types::{ChangeEvent, Event, Object, ObjectKind};
use crate::apis::metrics::{record_namespace_event, record_reconcile};
use crate::error::{ControllerError, StoreError};
use crate::gvk::{self, GroupVersionKind};
use crate::networking::Config;
use crate::push::{PushRequest, PushSink, ReconcileTrigger, TriggerReason};
use crate::store::ObjectStore;
use crate::sync::{safe_lock, safe_read, safe_write};
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback invoked once per changed kind per pass: `(old, new, event)`
pub type EventHandler = Arc<dyn Fn(Option<&Config>, Option<&Config>, Event) + Send + Sync>;

struct ControllerState {
    store: Arc<dyn ObjectStore>,
    push: Arc<dyn PushSink>,
    options: TranslationOptions,
    namespace_keys: ReferencedNamespaceKeys,
    snapshot: SnapshotCell,
    handlers: RwLock<HashMap<GroupVersionKind, Vec<EventHandler>>>,
    events_tx: mpsc::UnboundedSender<ChangeEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ChangeEvent>>>,
    reconcile_lock: Mutex<()>,
}

/// Gateway API reconciliation coordinator
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<ControllerState>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        push: Arc<dyn PushSink>,
        options: TranslationOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(ControllerState {
                store,
                push,
                options,
                namespace_keys: ReferencedNamespaceKeys::new(),
                snapshot: SnapshotCell::new(),
                handlers: RwLock::new(HashMap::new()),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                reconcile_lock: Mutex::new(()),
            }),
        }
    }

    /// Sender feeding the worker started by [`Coordinator::run`]
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ChangeEvent> {
        self.state.events_tx.clone()
    }

    pub fn namespace_keys(&self) -> &ReferencedNamespaceKeys {
        &self.state.namespace_keys
    }

    /// The latest committed generation
    pub fn snapshot(&self) -> Arc<GenerationSnapshot> {
        self.state.snapshot.load()
    }

    pub fn options(&self) -> &TranslationOptions {
        &self.state.options
    }

    /// Register a handler for changes of `kind`
    ///
    /// Handlers for derived kinds fire when a pass changes that kind. Namespace
    /// handlers fire (with no objects) for every relevant Namespace event.
    pub fn register_event_handler<F>(&self, kind: GroupVersionKind, handler: F)
    where
        F: Fn(Option<&Config>, Option<&Config>, Event) + Send + Sync + 'static,
    {
        debug!("Registering event handler for {}", kind);
        safe_write(&self.state.handlers)
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Derived objects of `kind` in `namespace` (all namespaces when empty)
    ///
    /// Kinds the controller does not produce yield an empty list.
    pub fn list(&self, kind: &GroupVersionKind, namespace: &str) -> Vec<Config> {
        let Some(kind) = DerivedKind::from_gvk(kind) else {
            return Vec::new();
        };
        let namespace = (!namespace.is_empty()).then_some(namespace);
        self.state.snapshot.load().list(kind, namespace)
    }

    /// Full recompute, including the referenced namespace keys
    pub fn reconcile(&self) -> Result<(), ControllerError> {
        self.recompute(ReconcileTrigger::Full, None)
    }

    /// Process one change notification
    pub fn handle_event(&self, event: ChangeEvent) -> Result<(), ControllerError> {
        match event.kind {
            ObjectKind::Namespace => {
                let old = event.old.as_ref().and_then(Object::as_namespace);
                let new = event.new.as_ref().and_then(Object::as_namespace);
                let relevant = self.state.namespace_keys.is_relevant(old, new);
                record_namespace_event(relevant);

                if !relevant {
                    debug!("Ignoring irrelevant Namespace event: {}", event);
                    return Ok(());
                }

                info!("Reconciling for Namespace event: {}", event);
                self.recompute(
                    ReconcileTrigger::Object(ObjectKind::Namespace),
                    Some(event.event()),
                )
            }
            kind => {
                debug!("Reconciling for {}", event);
                self.recompute(ReconcileTrigger::Object(kind), None)
            }
        }
    }

    /// Start the background worker
    ///
    /// Events sent through [`Coordinator::event_sender`] are processed in
    /// delivery order until `shutdown` flips to `true`. The last snapshot stays
    /// queryable afterwards. Only the first call starts a worker.
    pub fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>, ControllerError> {
        let Some(mut rx) = safe_lock(&self.state.events_rx).take() else {
            warn!("Gateway coordinator already running, ignoring start request");
            return Err(ControllerError::AlreadyRunning);
        };

        let coordinator = self.clone();
        Ok(tokio::spawn(async move {
            info!("Gateway coordinator started");
            if *shutdown.borrow() {
                info!("Gateway coordinator stopped before processing events");
                return;
            }
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = rx.recv() => {
                        let Some(event) = event else {
                            break;
                        };
                        if let Err(e) = coordinator.handle_event(event) {
                            error!("Reconcile failed, keeping previous snapshot: {}", e);
                        }
                    }
                }
            }
            info!("Gateway coordinator stopped");
        }))
    }

    fn load_universe(&self) -> Result<Universe, StoreError> {
        let mut universe = Universe::default();
        for kind in ObjectKind::ALL {
            for object in self.state.store.list_all(kind)? {
                match object {
                    Object::GatewayClass(o) => universe.classes.push(o),
                    Object::Gateway(o) => universe.gateways.push(o),
                    Object::HttpRoute(o) => universe.routes.push(o),
                    Object::Namespace(o) => universe.namespaces.push(o),
                }
            }
        }
        universe.normalize();
        Ok(universe)
    }

    /// One pass; `namespace_event` is set for relevant Namespace changes
    fn recompute(
        &self,
        trigger: ReconcileTrigger,
        namespace_event: Option<Event>,
    ) -> Result<(), ControllerError> {
        let _guard = safe_lock(&self.state.reconcile_lock);
        let start = Instant::now();

        let universe = match self.load_universe() {
            Ok(universe) => universe,
            Err(e) => {
                record_reconcile(trigger.as_str(), start.elapsed().as_secs_f64(), "error");
                return Err(e.into());
            }
        };

        if self.state.namespace_keys.recompute(&universe.gateways) {
            debug!("Referenced namespace keys now {}", self.state.namespace_keys);
        }

        if let Some(event) = namespace_event {
            self.fire_handlers(&gvk::NAMESPACE, None, None, event);
        }

        let translation = translate_all(&universe, &self.state.options);
        let previous = self.state.snapshot.load();
        let next = GenerationSnapshot::new(previous.version() + 1, translation);
        let diffs = next.diff(&previous);

        let version = if diffs.is_empty() {
            previous.version()
        } else {
            let version = next.version();
            self.state.snapshot.store(next);
            version
        };

        for diff in &diffs {
            debug!(
                "{} changed ({} objects, representative {})",
                diff.kind, diff.changed, diff.event
            );
            self.fire_handlers(&diff.kind.gvk(), diff.old.as_ref(), diff.new.as_ref(), diff.event);
        }

        let mut reasons = BTreeSet::new();
        if !diffs.is_empty() {
            reasons.insert(TriggerReason::ConfigUpdate);
        }
        if namespace_event.is_some() {
            reasons.insert(TriggerReason::NamespaceUpdate);
        }
        if !reasons.is_empty() {
            self.state
                .push
                .notify(PushRequest::full(version, reasons).triggered_by(trigger));
        }

        let elapsed = start.elapsed();
        info!(
            "Reconciled ({}): version {}, {} gateways, {} virtual services, {} kinds changed in {:?}",
            trigger.as_str(),
            version,
            self.state.snapshot.load().len(DerivedKind::Gateway),
            self.state.snapshot.load().len(DerivedKind::VirtualService),
            diffs.len(),
            elapsed
        );
        record_reconcile(trigger.as_str(), elapsed.as_secs_f64(), "success");
        Ok(())
    }

    fn fire_handlers(
        &self,
        kind: &GroupVersionKind,
        old: Option<&Config>,
        new: Option<&Config>,
        event: Event,
    ) {
        let handlers = safe_read(&self.state.handlers)
            .get(kind)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(old, new, event))).is_err() {
                error!("Event handler for {} panicked on {} event", kind, event);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::apis::gateway::types::{
        FromNamespaces, GatewayClassSpec, GatewaySpec, Listener,
        NamespaceSnapshot, RoutingClass, RoutingGateway,
    };
    use crate::apis::gateway::selector::match_label;
    use crate::push::ChannelPushSink;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn class() -> Object {
        Object::GatewayClass(RoutingClass {
            name: "istio".to_string(),
            spec: GatewayClassSpec {
                controller_name: crate::apis::gateway::translate::DEFAULT_CONTROLLER_NAME
                    .to_string(),
            },
        })
    }

    fn gateway(listener: Listener) -> Object {
        Object::Gateway(RoutingGateway {
            name: "gw".to_string(),
            namespace: "istio-system".to_string(),
            spec: GatewaySpec {
                gateway_class_name: "istio".to_string(),
                listeners: vec![listener],
            },
        })
    }

    fn namespace_event(old: Option<NamespaceSnapshot>, new: Option<NamespaceSnapshot>) -> ChangeEvent {
        let name = old
            .as_ref()
            .or(new.as_ref())
            .map(|ns| ns.name.clone())
            .unwrap_or_default();
        ChangeEvent {
            kind: ObjectKind::Namespace,
            namespace: String::new(),
            name,
            old: old.map(Object::Namespace),
            new: new.map(Object::Namespace),
        }
    }

    fn setup() -> (MemoryStore, Coordinator, crate::push::PushReceiver) {
        let store = MemoryStore::new();
        let (sink, pushes) = ChannelPushSink::new();
        let coordinator = Coordinator::new(
            Arc::new(store.clone()),
            Arc::new(sink),
            TranslationOptions::default(),
        );
        (store, coordinator, pushes)
    }

    struct FailingStore;

    impl ObjectStore for FailingStore {
        fn list_all(&self, kind: ObjectKind) -> Result<Vec<Object>, StoreError> {
            Err(StoreError::List {
                kind,
                reason: "informer not synced".to_string(),
            })
        }
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let (store, coordinator, mut pushes) = setup();
        store.apply(class());
        store.apply(gateway(
            Listener::new("http", 80, "HTTP").allow_from(FromNamespaces::All),
        ));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        coordinator.register_event_handler(gvk::GATEWAY, move |_, new, event| {
            assert_eq!(event, Event::Add);
            assert!(new.is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.reconcile().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = pushes.drain();
        assert_eq!(first.len(), 1);
        assert!(first[0].reasons.contains(&TriggerReason::ConfigUpdate));
        assert_eq!(first[0].trigger, ReconcileTrigger::Full);
        assert_eq!(coordinator.list(&gvk::GATEWAY, "").len(), 1);

        coordinator.reconcile().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(pushes.drain().is_empty());
        assert_eq!(coordinator.snapshot().version(), 1);
    }

    #[test]
    fn test_list_unknown_kind_is_empty() {
        let (store, coordinator, _pushes) = setup();
        store.apply(class());
        store.apply(gateway(Listener::new("http", 80, "HTTP")));
        coordinator.reconcile().unwrap();

        let unknown = GroupVersionKind::new("example.com", "v1", "Widget");
        assert!(coordinator.list(&unknown, "").is_empty());
        assert!(coordinator.list(&gvk::HTTP_ROUTE, "").is_empty());
        assert_eq!(coordinator.list(&gvk::GATEWAY, "istio-system").len(), 1);
        assert!(coordinator.list(&gvk::GATEWAY, "other").is_empty());
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let (store, coordinator, mut pushes) = setup();
        store.apply(class());
        store.apply(gateway(Listener::new("http", 80, "HTTP")));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        coordinator.register_event_handler(gvk::GATEWAY, |_, _, _| panic!("handler bug"));
        coordinator.register_event_handler(gvk::GATEWAY, move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.reconcile().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pushes.drain().len(), 1);
    }

    #[test]
    fn test_store_failure_keeps_snapshot() {
        let (sink, mut pushes) = ChannelPushSink::new();
        let coordinator = Coordinator::new(
            Arc::new(FailingStore),
            Arc::new(sink),
            TranslationOptions::default(),
        );

        let err = coordinator.reconcile().unwrap_err();
        assert!(matches!(err, ControllerError::Store(StoreError::List { .. })));
        assert_eq!(coordinator.snapshot().version(), 0);
        assert!(pushes.drain().is_empty());
    }

    #[test]
    fn test_failed_namespace_pass_fires_no_handlers() {
        let (sink, mut pushes) = ChannelPushSink::new();
        let coordinator = Coordinator::new(
            Arc::new(FailingStore),
            Arc::new(sink),
            TranslationOptions::default(),
        );
        coordinator
            .namespace_keys()
            .replace(BTreeSet::from(["allowed".to_string()]));

        let ns_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ns_calls);
        coordinator.register_event_handler(gvk::NAMESPACE, move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let allowed = NamespaceSnapshot::new("ns2").with_label("allowed", "true");
        let err = coordinator
            .handle_event(namespace_event(None, Some(allowed)))
            .unwrap_err();
        assert!(matches!(err, ControllerError::Store(_)));
        assert_eq!(ns_calls.load(Ordering::SeqCst), 0);
        assert!(pushes.drain().is_empty());
    }

    #[test]
    fn test_namespace_relevance_gates_push() {
        let (store, coordinator, mut pushes) = setup();
        store.apply(class());
        store.apply(gateway(
            Listener::new("http", 80, "HTTP")
                .allow_selector(match_label("allowed", "true")),
        ));
        coordinator.reconcile().unwrap();
        pushes.drain();
        assert_eq!(coordinator.namespace_keys().keys(), vec!["allowed"]);

        let ns_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ns_calls);
        coordinator.register_event_handler(gvk::NAMESPACE, move |old, new, _| {
            assert!(old.is_none() && new.is_none());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let foo = NamespaceSnapshot::new("ns1").with_label("foo", "bar");
        store.apply(Object::Namespace(foo.clone()));
        coordinator
            .handle_event(namespace_event(None, Some(foo)))
            .unwrap();
        assert!(pushes.drain().is_empty());
        assert_eq!(ns_calls.load(Ordering::SeqCst), 0);

        let allowed = NamespaceSnapshot::new("ns2").with_label("allowed", "true");
        store.apply(Object::Namespace(allowed.clone()));
        coordinator
            .handle_event(namespace_event(None, Some(allowed)))
            .unwrap();
        let push = pushes.drain();
        assert_eq!(push.len(), 1);
        assert!(push[0].reasons.contains(&TriggerReason::NamespaceUpdate));
        assert!(push[0].reasons.contains(&TriggerReason::ConfigUpdate));
        assert_eq!(push[0].trigger, ReconcileTrigger::Object(ObjectKind::Namespace));
        assert_eq!(ns_calls.load(Ordering::SeqCst), 1);

        let hosts = coordinator.list(&gvk::GATEWAY, "istio-system")[0]
            .as_gateway()
            .unwrap()
            .servers[0]
            .hosts
            .clone();
        assert_eq!(hosts, vec!["ns2/*"]);
    }

    #[test]
    fn test_gateway_event_updates_namespace_keys() {
        let (store, coordinator, _pushes) = setup();
        store.apply(class());
        let gw = gateway(
            Listener::new("http", 80, "HTTP").allow_selector(match_label("team", "a")),
        );
        store.apply(gw.clone());

        coordinator
            .handle_event(ChangeEvent {
                kind: ObjectKind::Gateway,
                namespace: "istio-system".to_string(),
                name: "gw".to_string(),
                old: None,
                new: Some(gw),
            })
            .unwrap();
        assert!(coordinator.namespace_keys().contains("team"));
    }

    #[tokio::test]
    async fn test_run_processes_events_and_rejects_second_start() {
        let (store, coordinator, mut pushes) = setup();
        store.subscribe(coordinator.event_sender());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = coordinator.run(shutdown_rx.clone()).unwrap();
        assert!(matches!(
            coordinator.run(shutdown_rx),
            Err(ControllerError::AlreadyRunning)
        ));

        store.apply(class());
        store.apply(gateway(Listener::new("http", 80, "HTTP")));
        assert!(pushes.wait(TIMEOUT).await.is_some());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(coordinator.list(&gvk::GATEWAY, "").len(), 1);
    }
}
