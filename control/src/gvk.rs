//! Group/Version/Kind identifiers
//!
//! Identifies every config type the controller watches or produces. Callers may
//! build arbitrary identifiers with [`GroupVersionKind::new`]; the query surface
//! simply returns nothing for kinds it does not produce.

use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

/// A Kubernetes-style group/version/kind triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupVersionKind {
    pub group: Cow<'static, str>,
    pub version: Cow<'static, str>,
    pub kind: Cow<'static, str>,
}

impl GroupVersionKind {
    pub const fn from_static(group: &'static str, version: &'static str, kind: &'static str) -> Self {
        Self {
            group: Cow::Borrowed(group),
            version: Cow::Borrowed(version),
            kind: Cow::Borrowed(kind),
        }
    }

    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: Cow::Owned(group.into()),
            version: Cow::Owned(version.into()),
            kind: Cow::Owned(kind.into()),
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Gateway API group
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Mesh networking group for generated config
pub const NETWORKING_GROUP: &str = "networking.istio.io";

// Inputs
pub const GATEWAY_CLASS: GroupVersionKind =
    GroupVersionKind::from_static(GATEWAY_API_GROUP, "v1", "GatewayClass");
pub const KUBERNETES_GATEWAY: GroupVersionKind =
    GroupVersionKind::from_static(GATEWAY_API_GROUP, "v1", "Gateway");
pub const HTTP_ROUTE: GroupVersionKind =
    GroupVersionKind::from_static(GATEWAY_API_GROUP, "v1", "HTTPRoute");
pub const NAMESPACE: GroupVersionKind = GroupVersionKind::from_static("", "v1", "Namespace");

// Outputs
pub const GATEWAY: GroupVersionKind =
    GroupVersionKind::from_static(NETWORKING_GROUP, "v1alpha3", "Gateway");
pub const VIRTUAL_SERVICE: GroupVersionKind =
    GroupVersionKind::from_static(NETWORKING_GROUP, "v1alpha3", "VirtualService");
