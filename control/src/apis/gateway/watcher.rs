//! Kubernetes watchers feeding the [`MemoryStore`]
//!
//! One `kube::runtime::watcher` per watched kind. Objects are converted to the
//! domain model by round-tripping their spec through `serde_json`, which keeps
//! the translation layer independent of the generated Gateway API types.
//! Objects that fail conversion are skipped with a warning.
//!
//! A relist (`Init` .. `InitDone`) deletes store entries of that kind that the
//! relist did not mention, so objects removed while disconnected do not linger.

use crate::apis::gateway::types::{
    GatewayClassSpec, GatewaySpec, HttpRoute, HttpRouteSpec, NamespaceSnapshot, Object,
    ObjectKind, RoutingClass, RoutingGateway,
};
use crate::store::{MemoryStore, ObjectKey};
use futures::StreamExt;
use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use gateway_api::apis::standard::gateways::Gateway;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{api::Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Debug;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Conversion failure for a watched object
pub type ConvertResult<T> = Result<T, serde_json::Error>;

fn convert_spec<S: Serialize, T: DeserializeOwned>(spec: &S) -> ConvertResult<T> {
    let mut value = serde_json::to_value(spec)?;
    strip_nulls(&mut value);
    serde_json::from_value(value)
}

/// Drop `null` object members so absent optionals fall back to serde defaults
fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

pub fn convert_gateway_class(gc: &GatewayClass) -> ConvertResult<Object> {
    Ok(Object::GatewayClass(RoutingClass {
        name: gc.name_any(),
        spec: convert_spec::<_, GatewayClassSpec>(&gc.spec)?,
    }))
}

pub fn convert_gateway(gw: &Gateway) -> ConvertResult<Object> {
    Ok(Object::Gateway(RoutingGateway {
        name: gw.name_any(),
        namespace: gw.namespace().unwrap_or_default(),
        spec: convert_spec::<_, GatewaySpec>(&gw.spec)?,
    }))
}

pub fn convert_http_route(route: &HTTPRoute) -> ConvertResult<Object> {
    Ok(Object::HttpRoute(HttpRoute {
        name: route.name_any(),
        namespace: route.namespace().unwrap_or_default(),
        spec: convert_spec::<_, HttpRouteSpec>(&route.spec)?,
    }))
}

pub fn convert_namespace(ns: &Namespace) -> ConvertResult<Object> {
    Ok(Object::Namespace(NamespaceSnapshot {
        name: ns.name_any(),
        labels: ns.labels().clone(),
        annotations: ns.annotations().clone(),
    }))
}

/// Watch one kind and mirror it into `store`
///
/// Runs until the watch stream ends. Call it in a `tokio::spawn()` task.
pub async fn watch_kind<K, F>(api: Api<K>, kind: ObjectKind, store: MemoryStore, convert: F)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(&K) -> ConvertResult<Object>,
{
    let watcher = watcher(api, WatcherConfig::default());

    futures::pin_mut!(watcher);

    info!("Starting {} watcher", kind);

    // Keys seen during the current relist
    let mut relist: Option<HashSet<ObjectKey>> = None;

    while let Some(event) = watcher.next().await {
        match event {
            Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                match convert(&obj) {
                    Ok(object) => {
                        if let Some(seen) = relist.as_mut() {
                            seen.insert(ObjectKey::of(&object));
                        }
                        store.apply(object);
                    }
                    Err(e) => {
                        warn!(
                            "Skipping {} {}/{}: cannot convert: {}",
                            kind,
                            obj.namespace().unwrap_or_default(),
                            obj.name_any(),
                            e
                        );
                    }
                }
            }
            Ok(watcher::Event::Delete(obj)) => {
                let namespace = obj.namespace().unwrap_or_default();
                let name = obj.name_any();
                if store.delete(kind, &namespace, &name).is_some() {
                    debug!("{} {}/{} deleted", kind, namespace, name);
                }
            }
            Ok(watcher::Event::Init) => {
                debug!("{} watcher initialized", kind);
                relist = Some(HashSet::new());
            }
            Ok(watcher::Event::InitDone) => {
                let seen = relist.take().unwrap_or_default();
                let stale: Vec<ObjectKey> = store
                    .keys(kind)
                    .into_iter()
                    .filter(|key| !seen.contains(key))
                    .collect();
                for key in &stale {
                    store.delete(kind, &key.namespace, &key.name);
                }
                info!(
                    "{} watcher initial sync complete ({} objects, {} stale removed)",
                    kind,
                    seen.len(),
                    stale.len()
                );
            }
            Err(e) => {
                warn!("{} watcher error: {}", kind, e);
            }
        }
    }
}

/// Start watchers for every kind the controller reads
pub fn spawn_watchers(client: Client, store: MemoryStore) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(watch_kind(
            Api::<GatewayClass>::all(client.clone()),
            ObjectKind::GatewayClass,
            store.clone(),
            convert_gateway_class,
        )),
        tokio::spawn(watch_kind(
            Api::<Gateway>::all(client.clone()),
            ObjectKind::Gateway,
            store.clone(),
            convert_gateway,
        )),
        tokio::spawn(watch_kind(
            Api::<HTTPRoute>::all(client.clone()),
            ObjectKind::HttpRoute,
            store.clone(),
            convert_http_route,
        )),
        tokio::spawn(watch_kind(
            Api::<Namespace>::all(client),
            ObjectKind::Namespace,
            store,
            convert_namespace,
        )),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::apis::gateway::types::FromNamespaces;
    use serde_json::json;

    #[test]
    fn test_strip_nulls() {
        let mut value = json!({ "a": null, "b": [{ "c": null, "d": 1 }] });
        strip_nulls(&mut value);
        assert_eq!(value, json!({ "b": [{ "d": 1 }] }));
    }

    #[test]
    fn test_convert_namespace() {
        let ns: Namespace = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": "ns1",
                "labels": { "allowed": "true" },
                "annotations": { "owner": "team-a" }
            }
        }))
        .unwrap();

        let object = convert_namespace(&ns).unwrap();
        let snapshot = object.as_namespace().unwrap();
        assert_eq!(snapshot.name, "ns1");
        assert_eq!(snapshot.labels.get("allowed").map(String::as_str), Some("true"));
        assert_eq!(snapshot.annotations.len(), 1);
        assert_eq!(object.namespace(), "");
    }

    #[test]
    fn test_convert_gateway() {
        let gw: Gateway = serde_json::from_value(json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "Gateway",
            "metadata": { "name": "gwspec", "namespace": "ns1" },
            "spec": {
                "gatewayClassName": "gwclass",
                "listeners": [{
                    "name": "default",
                    "port": 9009,
                    "protocol": "HTTP",
                    "allowedRoutes": { "namespaces": { "from": "All" } }
                }]
            }
        }))
        .unwrap();

        let Object::Gateway(gateway) = convert_gateway(&gw).unwrap() else {
            panic!("expected a Gateway");
        };
        assert_eq!(gateway.name, "gwspec");
        assert_eq!(gateway.namespace, "ns1");
        assert_eq!(gateway.spec.gateway_class_name, "gwclass");
        assert_eq!(gateway.spec.listeners[0].port, 9009);
        assert_eq!(
            gateway.spec.listeners[0].from_namespaces(),
            FromNamespaces::All
        );
    }

    #[test]
    fn test_convert_http_route() {
        let route: HTTPRoute = serde_json::from_value(json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "HTTPRoute",
            "metadata": { "name": "http-route", "namespace": "ns1" },
            "spec": {
                "parentRefs": [{ "name": "gwspec" }],
                "hostnames": ["test.cluster.local"],
                "rules": [{
                    "matches": [{ "path": { "type": "PathPrefix", "value": "/api" } }],
                    "backendRefs": [{ "name": "api", "port": 8080 }]
                }]
            }
        }))
        .unwrap();

        let Object::HttpRoute(converted) = convert_http_route(&route).unwrap() else {
            panic!("expected an HTTPRoute");
        };
        assert_eq!(converted.spec.parent_refs[0].name, "gwspec");
        assert_eq!(converted.spec.hostnames, vec!["test.cluster.local"]);
        assert_eq!(converted.spec.rules[0].backend_refs[0].port, Some(8080));
    }
}
