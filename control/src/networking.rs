//! Mesh-internal routing config produced by translation
//!
//! These are the objects handed to the proxy-configuration pipeline. They are
//! plain values: built once per generation, never mutated, replaced wholesale.
//! Every map is a `BTreeMap` so that serialized output is byte-stable.

use crate::gvk::{self, GroupVersionKind};
use serde::Serialize;
use std::collections::BTreeMap;

/// A generated config object with its identity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub group_version_kind: GroupVersionKind,
    pub name: String,
    pub namespace: String,
    pub spec: ConfigSpec,
}

impl Config {
    pub fn gateway(name: impl Into<String>, namespace: impl Into<String>, spec: GatewaySpec) -> Self {
        Self {
            group_version_kind: gvk::GATEWAY,
            name: name.into(),
            namespace: namespace.into(),
            spec: ConfigSpec::Gateway(spec),
        }
    }

    pub fn virtual_service(
        name: impl Into<String>,
        namespace: impl Into<String>,
        spec: VirtualServiceSpec,
    ) -> Self {
        Self {
            group_version_kind: gvk::VIRTUAL_SERVICE,
            name: name.into(),
            namespace: namespace.into(),
            spec: ConfigSpec::VirtualService(spec),
        }
    }

    /// `namespace/name`, the form used in VirtualService gateway references
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn as_gateway(&self) -> Option<&GatewaySpec> {
        match &self.spec {
            ConfigSpec::Gateway(spec) => Some(spec),
            ConfigSpec::VirtualService(_) => None,
        }
    }

    pub fn as_virtual_service(&self) -> Option<&VirtualServiceSpec> {
        match &self.spec {
            ConfigSpec::VirtualService(spec) => Some(spec),
            ConfigSpec::Gateway(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigSpec {
    Gateway(GatewaySpec),
    VirtualService(VirtualServiceSpec),
}

// =============================================================================
// Gateway
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewaySpec {
    pub servers: Vec<Server>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Server {
    pub port: Port,
    /// `namespace/host` patterns selecting which VirtualServices may bind
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Port {
    pub number: u32,
    pub name: String,
    pub protocol: String,
}

// =============================================================================
// VirtualService
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VirtualServiceSpec {
    pub hosts: Vec<String>,
    pub gateways: Vec<String>,
    /// Order is first-match precedence
    pub http: Vec<HttpRoute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HttpRoute {
    #[serde(rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpMatchRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<HttpRouteDestination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<HttpRedirect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<Destination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HttpMatchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, StringMatch>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub query_params: BTreeMap<String, StringMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpRouteDestination {
    pub destination: Destination,
    pub weight: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpRedirect {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    pub redirect_code: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Headers {
    pub request: HeaderOperations,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderOperations {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

impl HeaderOperations {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add.is_empty() && self.remove.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_config_key() {
        let config = Config::gateway("gw-default", "ns1", GatewaySpec::default());
        assert_eq!(config.key(), "ns1/gw-default");
        assert_eq!(config.group_version_kind, gvk::GATEWAY);
        assert!(config.as_gateway().is_some());
        assert!(config.as_virtual_service().is_none());
    }

    #[test]
    fn test_virtual_service_serializes_match_keyword() {
        let spec = VirtualServiceSpec {
            hosts: vec!["example.com".to_string()],
            gateways: vec!["ns1/gw".to_string()],
            http: vec![HttpRoute {
                matches: vec![HttpMatchRequest {
                    uri: Some(StringMatch::Prefix("/api".to_string())),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["http"][0]["match"][0]["uri"]["prefix"], "/api");
        // Empty collections are omitted
        assert!(json["http"][0].get("route").is_none());
    }
}
