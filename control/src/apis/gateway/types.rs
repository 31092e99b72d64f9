//! Watched object model
//!
//! The controller reads four kinds of objects. They are modelled as a closed set
//! ([`ObjectKind`] / [`Object`]) so that the notification pipeline can switch on
//! the kind instead of inspecting types at runtime.
//!
//! Spec types mirror the Gateway API wire format (camelCase JSON), which keeps
//! them independent of any particular generated client version: the Kubernetes
//! watchers convert generated types through `serde_json`.

use crate::gvk::{self, GroupVersionKind};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Object kinds and change events
// =============================================================================

/// Kinds of objects the controller watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    GatewayClass,
    Gateway,
    HttpRoute,
    Namespace,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::GatewayClass,
        ObjectKind::Gateway,
        ObjectKind::HttpRoute,
        ObjectKind::Namespace,
    ];

    pub fn gvk(self) -> GroupVersionKind {
        match self {
            ObjectKind::GatewayClass => gvk::GATEWAY_CLASS,
            ObjectKind::Gateway => gvk::KUBERNETES_GATEWAY,
            ObjectKind::HttpRoute => gvk::HTTP_ROUTE,
            ObjectKind::Namespace => gvk::NAMESPACE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::GatewayClass => "GatewayClass",
            ObjectKind::Gateway => "Gateway",
            ObjectKind::HttpRoute => "HTTPRoute",
            ObjectKind::Namespace => "Namespace",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a change, also passed to event handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Add,
    Update,
    Delete,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Add => f.write_str("add"),
            Event::Update => f.write_str("update"),
            Event::Delete => f.write_str("delete"),
        }
    }
}

/// A watched object
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    GatewayClass(RoutingClass),
    Gateway(RoutingGateway),
    HttpRoute(HttpRoute),
    Namespace(NamespaceSnapshot),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::GatewayClass(_) => ObjectKind::GatewayClass,
            Object::Gateway(_) => ObjectKind::Gateway,
            Object::HttpRoute(_) => ObjectKind::HttpRoute,
            Object::Namespace(_) => ObjectKind::Namespace,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Object::GatewayClass(o) => &o.name,
            Object::Gateway(o) => &o.name,
            Object::HttpRoute(o) => &o.name,
            Object::Namespace(o) => &o.name,
        }
    }

    /// Namespace of the object; empty for cluster-scoped kinds
    pub fn namespace(&self) -> &str {
        match self {
            Object::Gateway(o) => &o.namespace,
            Object::HttpRoute(o) => &o.namespace,
            Object::GatewayClass(_) | Object::Namespace(_) => "",
        }
    }

    pub fn as_namespace(&self) -> Option<&NamespaceSnapshot> {
        match self {
            Object::Namespace(ns) => Some(ns),
            _ => None,
        }
    }
}

/// One change notification from the object store
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
    pub old: Option<Object>,
    pub new: Option<Object>,
}

impl ChangeEvent {
    pub fn event(&self) -> Event {
        match (&self.old, &self.new) {
            (None, Some(_)) => Event::Add,
            (Some(_), None) => Event::Delete,
            _ => Event::Update,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {} {}", self.event(), self.kind, self.name)
        } else {
            write!(
                f,
                "{} {} {}/{}",
                self.event(),
                self.kind,
                self.namespace,
                self.name
            )
        }
    }
}

// =============================================================================
// Objects
// =============================================================================

/// GatewayClass: identifies the controller implementing a class of Gateways
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoutingClass {
    pub name: String,
    pub spec: GatewayClassSpec,
}

/// Gateway: listeners exposing network entry points
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoutingGateway {
    pub name: String,
    pub namespace: String,
    pub spec: GatewaySpec,
}

/// HTTPRoute: HTTP matching rules attached to parent Gateways
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpRoute {
    pub name: String,
    pub namespace: String,
    pub spec: HttpRouteSpec,
}

/// The parts of a Namespace the controller cares about
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NamespaceSnapshot {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl NamespaceSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// GatewayClass / Gateway specs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassSpec {
    pub controller_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    pub gateway_class_name: String,
    #[serde(default)]
    pub listeners: Vec<Listener>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    pub hostname: Option<String>,
    pub port: i32,
    pub protocol: String,
    pub allowed_routes: Option<AllowedRoutes>,
}

impl Listener {
    pub fn new(name: impl Into<String>, port: i32, protocol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port,
            protocol: protocol.into(),
            ..Default::default()
        }
    }

    pub fn allow_from(mut self, from: FromNamespaces) -> Self {
        self.allowed_routes = Some(AllowedRoutes {
            namespaces: Some(RouteNamespaces {
                from: Some(from),
                selector: None,
            }),
        });
        self
    }

    pub fn allow_selector(mut self, selector: LabelSelector) -> Self {
        self.allowed_routes = Some(AllowedRoutes {
            namespaces: Some(RouteNamespaces {
                from: Some(FromNamespaces::Selector),
                selector: Some(selector),
            }),
        });
        self
    }

    /// The `from` policy, applying the Gateway API default of `Same`
    pub fn from_namespaces(&self) -> FromNamespaces {
        self.allowed_routes
            .as_ref()
            .and_then(|a| a.namespaces.as_ref())
            .and_then(|n| n.from)
            .unwrap_or(FromNamespaces::Same)
    }

    pub fn namespace_selector(&self) -> Option<&LabelSelector> {
        self.allowed_routes
            .as_ref()
            .and_then(|a| a.namespaces.as_ref())
            .and_then(|n| n.selector.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedRoutes {
    pub namespaces: Option<RouteNamespaces>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteNamespaces {
    pub from: Option<FromNamespaces>,
    pub selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FromNamespaces {
    All,
    Same,
    Selector,
}

// =============================================================================
// HTTPRoute spec
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub rules: Vec<HttpRouteRule>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub namespace: Option<String>,
    pub name: String,
    pub section_name: Option<String>,
    pub port: Option<i32>,
}

impl ParentReference {
    pub fn gateway(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True when the reference points at a Gateway (the defaults for group and kind)
    pub fn targets_gateway(&self) -> bool {
        let group = self.group.as_deref().unwrap_or(gvk::GATEWAY_API_GROUP);
        let kind = self.kind.as_deref().unwrap_or("Gateway");
        group == gvk::GATEWAY_API_GROUP && kind == "Gateway"
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    #[serde(default)]
    pub matches: Vec<HttpRouteMatch>,
    #[serde(default)]
    pub filters: Vec<HttpRouteFilter>,
    #[serde(default)]
    pub backend_refs: Vec<HttpBackendRef>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    pub path: Option<HttpPathMatch>,
    #[serde(default)]
    pub headers: Vec<HttpValueMatch>,
    #[serde(default)]
    pub query_params: Vec<HttpValueMatch>,
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathMatch {
    #[serde(rename = "type")]
    pub type_: Option<PathMatchType>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathMatchType {
    Exact,
    PathPrefix,
    RegularExpression,
}

/// Header or query parameter match
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpValueMatch {
    #[serde(rename = "type")]
    pub type_: Option<ValueMatchType>,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueMatchType {
    Exact,
    RegularExpression,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpBackendRef {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub name: String,
    pub namespace: Option<String>,
    pub port: Option<i32>,
    pub weight: Option<i32>,
}

impl HttpBackendRef {
    /// True for core Services, the only backend kind translated
    pub fn is_service(&self) -> bool {
        self.group.as_deref().unwrap_or("").is_empty()
            && self.kind.as_deref().unwrap_or("Service") == "Service"
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteFilter {
    #[serde(rename = "type")]
    pub type_: String,
    pub request_header_modifier: Option<HeaderModifier>,
    pub request_redirect: Option<RequestRedirect>,
    pub request_mirror: Option<RequestMirror>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderModifier {
    #[serde(default)]
    pub set: Vec<HttpHeader>,
    #[serde(default)]
    pub add: Vec<HttpHeader>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRedirect {
    pub scheme: Option<String>,
    pub hostname: Option<String>,
    pub path: Option<HttpPathModifier>,
    pub port: Option<i32>,
    pub status_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathModifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub replace_full_path: Option<String>,
    pub replace_prefix_match: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMirror {
    pub backend_ref: HttpBackendRef,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listener_defaults_to_same_namespace() {
        let listener = Listener::new("http", 80, "HTTP");
        assert_eq!(listener.from_namespaces(), FromNamespaces::Same);

        let listener = listener.allow_from(FromNamespaces::All);
        assert_eq!(listener.from_namespaces(), FromNamespaces::All);
    }

    #[test]
    fn test_gateway_spec_from_wire_format() {
        let spec: GatewaySpec = serde_json::from_value(json!({
            "gatewayClassName": "mesh",
            "listeners": [{
                "name": "default",
                "port": 9009,
                "protocol": "HTTP",
                "allowedRoutes": {
                    "namespaces": {
                        "from": "Selector",
                        "selector": { "matchLabels": { "allowed": "true" } }
                    }
                }
            }]
        }))
        .unwrap();

        let listener = &spec.listeners[0];
        assert_eq!(listener.from_namespaces(), FromNamespaces::Selector);
        assert_eq!(
            listener
                .namespace_selector()
                .and_then(|s| s.match_labels.as_ref())
                .and_then(|l| l.get("allowed"))
                .map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_http_route_spec_tolerates_missing_collections() {
        let spec: HttpRouteSpec = serde_json::from_value(json!({})).unwrap();
        assert!(spec.parent_refs.is_empty());
        assert!(spec.hostnames.is_empty());
        assert!(spec.rules.is_empty());
    }

    #[test]
    fn test_parent_reference_targets_gateway() {
        assert!(ParentReference::gateway("gw").targets_gateway());

        let service = ParentReference {
            group: Some(String::new()),
            kind: Some("Service".to_string()),
            ..ParentReference::gateway("svc")
        };
        assert!(!service.targets_gateway());
    }

    #[test]
    fn test_change_event_classification() {
        let ns = Object::Namespace(NamespaceSnapshot::new("ns1"));
        let event = ChangeEvent {
            kind: ObjectKind::Namespace,
            namespace: String::new(),
            name: "ns1".to_string(),
            old: None,
            new: Some(ns.clone()),
        };
        assert_eq!(event.event(), Event::Add);
        assert_eq!(event.to_string(), "add Namespace ns1");

        let event = ChangeEvent {
            old: Some(ns),
            new: None,
            ..event
        };
        assert_eq!(event.event(), Event::Delete);
    }

    #[test]
    fn test_backend_ref_kind_defaults_to_service() {
        let backend = HttpBackendRef {
            name: "api".to_string(),
            ..Default::default()
        };
        assert!(backend.is_service());

        let other = HttpBackendRef {
            kind: Some("ServiceImport".to_string()),
            group: Some("multicluster.x-k8s.io".to_string()),
            ..backend
        };
        assert!(!other.is_service());
    }
}
