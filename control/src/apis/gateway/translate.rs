//! Translation Engine - Gateway API objects to mesh routing config
//!
//! Pure functions: given a [`Universe`] of watched objects, produce the derived
//! Gateways and VirtualServices for a namespace. No I/O, no shared state;
//! identical input always yields identical output (ordering included).
//!
//! ## Naming
//!
//! ```text
//! Gateway  gwspec  listener default  ->  gwspec-<suffix>-default
//! HTTPRoute http-route (group 0)     ->  http-route-0-<suffix>
//! ```

use crate::apis::gateway::namespace_keys::NAMESPACE_NAME_LABEL;
use crate::apis::gateway::selector::{compile_selector, selector_matches};
use crate::apis::gateway::types::{
    FromNamespaces, HttpBackendRef, HttpRoute, HttpRouteFilter, HttpRouteRule, HttpRouteMatch,
    Listener, NamespaceSnapshot, ParentReference, PathMatchType, RoutingClass, RoutingGateway,
    ValueMatchType,
};
use crate::apis::gateway::validation::{
    validate_header_name, validate_hostname, validate_path, validate_regex,
};
use crate::error::ValidationError;
use crate::networking::{
    self, Config, Destination, HeaderOperations, Headers, HttpMatchRequest, HttpRedirect,
    HttpRouteDestination, Port, Server, StringMatch, VirtualServiceSpec,
};
use kube::core::SelectorExt;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

/// Suffix of every generated object name
pub const GATEWAY_NAME_SUFFIX: &str = "istio-autogenerated-k8s-gateway";

/// Controller identifier GatewayClasses must name to be handled
pub const DEFAULT_CONTROLLER_NAME: &str = "istio.io/gateway-controller";

/// Cluster DNS suffix for backend hosts
pub const DEFAULT_DOMAIN_SUFFIX: &str = "cluster.local";

/// Host pattern admitting VirtualServices from any namespace
pub const ALL_NAMESPACES_HOST: &str = "*/*";

const DEFAULT_REDIRECT_CODE: u32 = 302;

// =============================================================================
// Inputs and outputs
// =============================================================================

/// Translation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOptions {
    pub controller_name: String,
    pub domain_suffix: String,
    pub name_suffix: String,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_string(),
            name_suffix: GATEWAY_NAME_SUFFIX.to_string(),
        }
    }
}

/// Every watched object, as listed from the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Universe {
    pub classes: Vec<RoutingClass>,
    pub gateways: Vec<RoutingGateway>,
    pub routes: Vec<HttpRoute>,
    pub namespaces: Vec<NamespaceSnapshot>,
}

impl Universe {
    /// Sort every collection by identity so iteration order never depends on the store
    pub fn normalize(&mut self) {
        self.classes.sort_by(|a, b| a.name.cmp(&b.name));
        self.gateways
            .sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        self.routes
            .sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        self.namespaces.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Namespaces holding at least one Gateway or Route, sorted
    pub fn active_namespaces(&self) -> BTreeSet<String> {
        self.gateways
            .iter()
            .map(|gw| gw.namespace.clone())
            .chain(self.routes.iter().map(|r| r.namespace.clone()))
            .collect()
    }

    fn namespace(&self, name: &str) -> Option<&NamespaceSnapshot> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    fn gateway(&self, namespace: &str, name: &str) -> Option<&RoutingGateway> {
        self.gateways
            .iter()
            .find(|gw| gw.namespace == namespace && gw.name == name)
    }

    /// True when the Gateway's class exists and names our controller
    fn is_managed(&self, gateway: &RoutingGateway, options: &TranslationOptions) -> bool {
        self.classes.iter().any(|class| {
            class.name == gateway.spec.gateway_class_name
                && class.spec.controller_name == options.controller_name
        })
    }
}

/// Derived objects for one namespace (or all of them)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    pub gateways: Vec<Config>,
    pub virtual_services: Vec<Config>,
}

impl Translation {
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty() && self.virtual_services.is_empty()
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Name of the derived Gateway for one listener
pub fn derived_gateway_name(gateway: &str, listener: &str, suffix: &str) -> String {
    format!("{}-{}-{}", gateway, suffix, listener)
}

/// Name of the derived VirtualService for one host group of a Route
pub fn virtual_service_name(route: &str, index: usize, suffix: &str) -> String {
    format!("{}-{}-{}", route, index, suffix)
}

/// Translate every object in `namespace`
pub fn translate(namespace: &str, universe: &Universe, options: &TranslationOptions) -> Translation {
    let mut out = Translation::default();

    for gateway in universe
        .gateways
        .iter()
        .filter(|gw| gw.namespace == namespace)
    {
        if !universe.is_managed(gateway, options) {
            debug!(
                "Gateway {}/{}: class '{}' not handled by {}, skipping",
                gateway.namespace, gateway.name, gateway.spec.gateway_class_name, options.controller_name
            );
            continue;
        }
        out.gateways
            .extend(translate_gateway(gateway, universe, options));
    }

    for route in universe.routes.iter().filter(|r| r.namespace == namespace) {
        out.virtual_services
            .extend(translate_route(route, universe, options));
    }

    out
}

/// Translate every namespace holding at least one Gateway or Route
pub fn translate_all(universe: &Universe, options: &TranslationOptions) -> Translation {
    let mut out = Translation::default();
    for namespace in universe.active_namespaces() {
        let t = translate(&namespace, universe, options);
        out.gateways.extend(t.gateways);
        out.virtual_services.extend(t.virtual_services);
    }
    out
}

// =============================================================================
// Gateways
// =============================================================================

/// Listeners that pass validation, in declaration order
fn valid_listeners(gateway: &RoutingGateway) -> Vec<&Listener> {
    let mut seen = HashSet::new();
    gateway
        .spec
        .listeners
        .iter()
        .filter(|&listener| match validate_listener(listener, &mut seen) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Gateway {}/{}: skipping listener '{}': {}",
                    gateway.namespace, gateway.name, listener.name, e
                );
                false
            }
        })
        .collect()
}

fn validate_listener<'a>(
    listener: &'a Listener,
    seen: &mut HashSet<&'a str>,
) -> Result<(), ValidationError> {
    if listener.name.is_empty() {
        return Err(ValidationError::Listener("name cannot be empty".to_string()));
    }
    if !(1..=65535).contains(&listener.port) {
        return Err(ValidationError::Port(listener.port));
    }
    if let Some(hostname) = &listener.hostname {
        validate_hostname(hostname)?;
    }
    if listener.from_namespaces() == FromNamespaces::Selector {
        match listener.namespace_selector() {
            Some(selector) => {
                compile_selector(selector)?;
            }
            None => {
                return Err(ValidationError::Selector(
                    "from: Selector requires a selector".to_string(),
                ))
            }
        }
    }
    if !seen.insert(listener.name.as_str()) {
        return Err(ValidationError::Listener(format!(
            "duplicate listener name '{}'",
            listener.name
        )));
    }
    Ok(())
}

/// Labels used for selector evaluation, with the implicit name label
fn effective_labels(namespace: &str, universe: &Universe) -> BTreeMap<String, String> {
    let mut labels = universe
        .namespace(namespace)
        .map(|ns| ns.labels.clone())
        .unwrap_or_default();
    labels
        .entry(NAMESPACE_NAME_LABEL.to_string())
        .or_insert_with(|| namespace.to_string());
    labels
}

/// Does the listener admit Routes from `route_namespace`?
fn listener_allows(
    listener: &Listener,
    gateway_namespace: &str,
    route_namespace: &str,
    universe: &Universe,
) -> bool {
    match listener.from_namespaces() {
        FromNamespaces::All => true,
        FromNamespaces::Same => gateway_namespace == route_namespace,
        FromNamespaces::Selector => listener
            .namespace_selector()
            .is_some_and(|s| selector_matches(s, &effective_labels(route_namespace, universe))),
    }
}

fn server_hosts(listener: &Listener, gateway_namespace: &str, universe: &Universe) -> Vec<String> {
    match listener.from_namespaces() {
        FromNamespaces::All => vec![ALL_NAMESPACES_HOST.to_string()],
        FromNamespaces::Same => vec![format!("{}/*", gateway_namespace)],
        FromNamespaces::Selector => {
            let Some(selector) = listener
                .namespace_selector()
                .and_then(|s| compile_selector(s).ok())
            else {
                return Vec::new();
            };
            let mut names: Vec<&str> = universe
                .namespaces
                .iter()
                .filter(|ns| selector.matches(&effective_labels(&ns.name, universe)))
                .map(|ns| ns.name.as_str())
                .collect();
            names.sort_unstable();
            names.dedup();
            names.into_iter().map(|ns| format!("{}/*", ns)).collect()
        }
    }
}

fn translate_gateway(
    gateway: &RoutingGateway,
    universe: &Universe,
    options: &TranslationOptions,
) -> Vec<Config> {
    if gateway.spec.listeners.is_empty() {
        let name = format!("{}-{}", gateway.name, options.name_suffix);
        return vec![Config::gateway(
            name,
            &gateway.namespace,
            networking::GatewaySpec::default(),
        )];
    }

    valid_listeners(gateway)
        .into_iter()
        .map(|listener| {
            let server = Server {
                port: Port {
                    // Validated to 1..=65535
                    number: listener.port as u32,
                    name: listener.name.clone(),
                    protocol: listener.protocol.clone(),
                },
                hosts: server_hosts(listener, &gateway.namespace, universe),
            };
            Config::gateway(
                derived_gateway_name(&gateway.name, &listener.name, &options.name_suffix),
                &gateway.namespace,
                networking::GatewaySpec {
                    servers: vec![server],
                },
            )
        })
        .collect()
}

// =============================================================================
// Hostnames
// =============================================================================

/// The more specific of two overlapping hostnames, or `None` when disjoint
///
/// Either side may be a `*.` wildcard; a bare `*` candidate matches anything.
fn intersect_hostname<'a>(listener: &'a str, candidate: &'a str) -> Option<&'a str> {
    if listener == candidate {
        return Some(listener);
    }
    if candidate == "*" {
        return Some(listener);
    }
    match (listener.strip_prefix('*'), candidate.strip_prefix('*')) {
        (Some(suffix), None) => {
            (candidate.ends_with(suffix) && candidate.len() > suffix.len()).then_some(candidate)
        }
        (None, Some(suffix)) => {
            (listener.ends_with(suffix) && listener.len() > suffix.len()).then_some(listener)
        }
        (Some(a), Some(b)) if a.ends_with(b) => Some(listener),
        (Some(a), Some(b)) if b.ends_with(a) => Some(candidate),
        _ => None,
    }
}

/// Route hosts as seen through a listener, or `None` when they do not overlap
fn effective_hosts(listener: &Listener, route_hostnames: &[String]) -> Option<Vec<String>> {
    match listener.hostname.as_deref() {
        None => Some(if route_hostnames.is_empty() {
            vec!["*".to_string()]
        } else {
            route_hostnames.to_vec()
        }),
        Some(listener_host) if route_hostnames.is_empty() => Some(vec![listener_host.to_string()]),
        Some(listener_host) => {
            let mut hosts: Vec<String> = Vec::new();
            for host in route_hostnames
                .iter()
                .filter_map(|h| intersect_hostname(listener_host, h))
            {
                if !hosts.iter().any(|h| h == host) {
                    hosts.push(host.to_string());
                }
            }
            (!hosts.is_empty()).then_some(hosts)
        }
    }
}

// =============================================================================
// Routes
// =============================================================================

fn validate_route(route: &HttpRoute) -> Result<(), ValidationError> {
    for hostname in &route.spec.hostnames {
        // Routes may use a bare "*" to mean any host
        if hostname != "*" {
            validate_hostname(hostname)?;
        }
    }
    for rule in &route.spec.rules {
        for m in &rule.matches {
            validate_match(m)?;
        }
        for filter in &rule.filters {
            if let Some(modifier) = &filter.request_header_modifier {
                for header in modifier.set.iter().chain(&modifier.add) {
                    validate_header_name(&header.name)?;
                }
                for name in &modifier.remove {
                    validate_header_name(name)?;
                }
            }
        }
    }
    Ok(())
}

fn validate_match(m: &HttpRouteMatch) -> Result<(), ValidationError> {
    if let Some(path) = &m.path {
        let value = path.value.as_deref().unwrap_or("/");
        match path.type_.unwrap_or(PathMatchType::PathPrefix) {
            PathMatchType::RegularExpression => validate_regex(value)?,
            PathMatchType::Exact | PathMatchType::PathPrefix => validate_path(value)?,
        }
    }
    for header in &m.headers {
        validate_header_name(&header.name)?;
        if header.type_ == Some(ValueMatchType::RegularExpression) {
            validate_regex(&header.value)?;
        }
    }
    for param in &m.query_params {
        if param.type_ == Some(ValueMatchType::RegularExpression) {
            validate_regex(&param.value)?;
        }
    }
    Ok(())
}

/// One listener a Route attaches to
struct Attachment {
    gateway_ref: String,
    hosts: Vec<String>,
}

fn resolve_attachments(
    route: &HttpRoute,
    universe: &Universe,
    options: &TranslationOptions,
) -> Vec<Attachment> {
    let mut attachments = Vec::new();

    for parent in &route.spec.parent_refs {
        if !parent.targets_gateway() {
            debug!(
                "HTTPRoute {}/{}: parent '{}' is not a Gateway, ignoring",
                route.namespace, route.name, parent.name
            );
            continue;
        }
        let gw_namespace = parent.namespace.as_deref().unwrap_or(&route.namespace);
        let Some(gateway) = universe.gateway(gw_namespace, &parent.name) else {
            debug!(
                "HTTPRoute {}/{}: parent Gateway {}/{} not found",
                route.namespace, route.name, gw_namespace, parent.name
            );
            continue;
        };
        if !universe.is_managed(gateway, options) {
            debug!(
                "HTTPRoute {}/{}: parent Gateway {}/{} not handled by {}",
                route.namespace, route.name, gw_namespace, parent.name, options.controller_name
            );
            continue;
        }

        for listener in valid_listeners(gateway) {
            if !parent_selects(parent, listener) {
                continue;
            }
            if !listener_allows(listener, &gateway.namespace, &route.namespace, universe) {
                continue;
            }
            let Some(hosts) = effective_hosts(listener, &route.spec.hostnames) else {
                continue;
            };
            attachments.push(Attachment {
                gateway_ref: format!(
                    "{}/{}",
                    gateway.namespace,
                    derived_gateway_name(&gateway.name, &listener.name, &options.name_suffix)
                ),
                hosts,
            });
        }
    }

    attachments
}

fn parent_selects(parent: &ParentReference, listener: &Listener) -> bool {
    parent
        .section_name
        .as_deref()
        .map_or(true, |section| section == listener.name)
        && parent.port.map_or(true, |port| port == listener.port)
}

fn translate_route(
    route: &HttpRoute,
    universe: &Universe,
    options: &TranslationOptions,
) -> Vec<Config> {
    if let Err(e) = validate_route(route) {
        warn!(
            "HTTPRoute {}/{}: skipping malformed route: {}",
            route.namespace, route.name, e
        );
        return Vec::new();
    }

    let attachments = resolve_attachments(route, universe, options);
    if attachments.is_empty() {
        debug!(
            "HTTPRoute {}/{}: no accepting listeners",
            route.namespace, route.name
        );
        return Vec::new();
    }

    // Group listeners by effective host list, first appearance order
    let mut groups: Vec<(Vec<String>, Vec<String>)> = Vec::new();
    for attachment in attachments {
        match groups.iter_mut().find(|(hosts, _)| *hosts == attachment.hosts) {
            Some((_, gateways)) => {
                if !gateways.contains(&attachment.gateway_ref) {
                    gateways.push(attachment.gateway_ref);
                }
            }
            None => groups.push((attachment.hosts, vec![attachment.gateway_ref])),
        }
    }

    let http: Vec<networking::HttpRoute> = route
        .spec
        .rules
        .iter()
        .map(|rule| translate_rule(rule, &route.namespace, options))
        .collect();

    groups
        .into_iter()
        .enumerate()
        .map(|(index, (hosts, gateways))| {
            Config::virtual_service(
                virtual_service_name(&route.name, index, &options.name_suffix),
                &route.namespace,
                VirtualServiceSpec {
                    hosts,
                    gateways,
                    http: http.clone(),
                },
            )
        })
        .collect()
}

// =============================================================================
// Rules
// =============================================================================

fn translate_rule(
    rule: &HttpRouteRule,
    namespace: &str,
    options: &TranslationOptions,
) -> networking::HttpRoute {
    let mut out = networking::HttpRoute {
        matches: rule.matches.iter().map(translate_match).collect(),
        route: rule
            .backend_refs
            .iter()
            .filter_map(|backend| {
                destination(backend, namespace, options).map(|destination| HttpRouteDestination {
                    destination,
                    weight: backend.weight.unwrap_or(1),
                })
            })
            .collect(),
        ..Default::default()
    };

    for filter in &rule.filters {
        apply_filter(&mut out, filter, namespace, options);
    }

    out
}

fn translate_match(m: &HttpRouteMatch) -> HttpMatchRequest {
    let uri = m.path.as_ref().map(|path| {
        let value = path.value.clone().unwrap_or_else(|| "/".to_string());
        match path.type_.unwrap_or(PathMatchType::PathPrefix) {
            PathMatchType::Exact => StringMatch::Exact(value),
            PathMatchType::PathPrefix => StringMatch::Prefix(value),
            PathMatchType::RegularExpression => StringMatch::Regex(value),
        }
    });

    let value_match = |type_: Option<ValueMatchType>, value: &str| match type_ {
        Some(ValueMatchType::RegularExpression) => StringMatch::Regex(value.to_string()),
        _ => StringMatch::Exact(value.to_string()),
    };

    HttpMatchRequest {
        uri,
        headers: m
            .headers
            .iter()
            .map(|h| (h.name.to_lowercase(), value_match(h.type_, &h.value)))
            .collect(),
        query_params: m
            .query_params
            .iter()
            .map(|q| (q.name.clone(), value_match(q.type_, &q.value)))
            .collect(),
        method: m.method.clone().map(StringMatch::Exact),
    }
}

fn destination(
    backend: &HttpBackendRef,
    namespace: &str,
    options: &TranslationOptions,
) -> Option<Destination> {
    if !backend.is_service() {
        debug!(
            "Skipping backend '{}' of kind {}",
            backend.name,
            backend.kind.as_deref().unwrap_or("Service")
        );
        return None;
    }
    let backend_ns = backend.namespace.as_deref().unwrap_or(namespace);
    Some(Destination {
        host: format!(
            "{}.{}.svc.{}",
            backend.name, backend_ns, options.domain_suffix
        ),
        port: backend.port.and_then(|p| u32::try_from(p).ok()),
    })
}

fn apply_filter(
    out: &mut networking::HttpRoute,
    filter: &HttpRouteFilter,
    namespace: &str,
    options: &TranslationOptions,
) {
    match filter.type_.as_str() {
        "RequestHeaderModifier" => {
            let Some(modifier) = &filter.request_header_modifier else {
                return;
            };
            let ops = HeaderOperations {
                set: modifier
                    .set
                    .iter()
                    .map(|h| (h.name.clone(), h.value.clone()))
                    .collect(),
                add: modifier
                    .add
                    .iter()
                    .map(|h| (h.name.clone(), h.value.clone()))
                    .collect(),
                remove: modifier.remove.clone(),
            };
            if !ops.is_empty() {
                out.headers = Some(Headers { request: ops });
            }
        }
        "RequestRedirect" => {
            let Some(redirect) = &filter.request_redirect else {
                return;
            };
            out.redirect = Some(HttpRedirect {
                uri: redirect
                    .path
                    .as_ref()
                    .and_then(|p| p.replace_full_path.clone()),
                authority: redirect.hostname.clone(),
                scheme: redirect.scheme.clone(),
                port: redirect.port.and_then(|p| u32::try_from(p).ok()),
                redirect_code: redirect
                    .status_code
                    .and_then(|c| u32::try_from(c).ok())
                    .unwrap_or(DEFAULT_REDIRECT_CODE),
            });
        }
        "RequestMirror" => {
            out.mirror = filter
                .request_mirror
                .as_ref()
                .and_then(|m| destination(&m.backend_ref, namespace, options));
        }
        other => {
            debug!("Ignoring unsupported filter type '{}'", other);
        }
    }
}
