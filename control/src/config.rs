//! Configuration for the meshgate controller

use crate::apis::gateway::translate::{
    TranslationOptions, DEFAULT_CONTROLLER_NAME, DEFAULT_DOMAIN_SUFFIX, GATEWAY_NAME_SUFFIX,
};
use crate::error::ControllerError;
use serde::{Deserialize, Serialize};
use std::env;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// GatewayClass controllerName this instance implements
    #[serde(default = "default_controller_name")]
    pub controller_name: String,

    /// Cluster DNS suffix for backend hosts (default: cluster.local)
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,

    /// Suffix of generated object names; only tests should change it
    #[serde(default = "default_gateway_name_suffix")]
    pub gateway_name_suffix: String,

    /// Watch the Kubernetes API instead of running store-only
    #[serde(default)]
    pub k8s_mode: bool,
}

fn default_controller_name() -> String {
    DEFAULT_CONTROLLER_NAME.to_string()
}

fn default_domain_suffix() -> String {
    DEFAULT_DOMAIN_SUFFIX.to_string()
}

fn default_gateway_name_suffix() -> String {
    GATEWAY_NAME_SUFFIX.to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: default_controller_name(),
            domain_suffix: default_domain_suffix(),
            gateway_name_suffix: default_gateway_name_suffix(),
            k8s_mode: false,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let mut config = Self::default();

        if let Some(val) = lookup("MESHGATE_CONTROLLER_NAME") {
            if val.trim().is_empty() {
                return Err(ControllerError::Config(
                    "MESHGATE_CONTROLLER_NAME cannot be empty".to_string(),
                ));
            }
            config.controller_name = val;
        }

        if let Some(val) = lookup("MESHGATE_DOMAIN_SUFFIX") {
            let val = val.trim_matches('.').to_string();
            if val.is_empty() {
                return Err(ControllerError::Config(
                    "MESHGATE_DOMAIN_SUFFIX cannot be empty".to_string(),
                ));
            }
            config.domain_suffix = val;
        }

        if let Some(val) = lookup("MESHGATE_K8S_MODE") {
            config.k8s_mode = val.parse::<bool>().map_err(|e| {
                ControllerError::Config(format!("Invalid MESHGATE_K8S_MODE '{}': {}", val, e))
            })?;
        }

        Ok(config)
    }

    pub fn translation_options(&self) -> TranslationOptions {
        TranslationOptions {
            controller_name: self.controller_name.clone(),
            domain_suffix: self.domain_suffix.clone(),
            name_suffix: self.gateway_name_suffix.clone(),
        }
    }
}
