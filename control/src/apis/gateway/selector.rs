//! Label selector evaluation for listener `allowedRoutes.namespaces.selector`
//!
//! Selectors use the Kubernetes `LabelSelector` type and are evaluated through
//! `kube::core::Selector`.

use crate::error::ValidationError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{Selector, SelectorExt};
use std::collections::BTreeMap;

/// Convert a selector for evaluation, rejecting malformed expressions
pub fn compile_selector(selector: &LabelSelector) -> Result<Selector, ValidationError> {
    for req in selector.match_expressions.iter().flatten() {
        let has_values = req.values.as_ref().is_some_and(|v| !v.is_empty());
        if matches!(req.operator.as_str(), "In" | "NotIn") && !has_values {
            return Err(ValidationError::Selector(format!(
                "operator {} on key '{}' requires values",
                req.operator, req.key
            )));
        }
    }
    Selector::try_from(selector.clone()).map_err(|e| ValidationError::Selector(e.to_string()))
}

/// True when `labels` satisfy the selector; malformed selectors match nothing
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    compile_selector(selector).is_ok_and(|s| s.matches(labels))
}

/// Selector with a single `matchLabels` entry
pub fn match_label(key: impl Into<String>, value: impl Into<String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([(key.into(), value.into())])),
        match_expressions: None,
    }
}

/// Label keys a selector reads: `matchLabels` keys and `matchExpressions` keys
pub fn selector_keys(selector: &LabelSelector) -> impl Iterator<Item = &str> {
    let label_keys = selector
        .match_labels
        .iter()
        .flat_map(|labels| labels.keys().map(String::as_str));
    let expression_keys = selector
        .match_expressions
        .iter()
        .flatten()
        .map(|req| req.key.as_str());
    label_keys.chain(expression_keys)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expression(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| v.to_string()).collect())
            },
        }
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(selector_matches(&selector, &labels(&[])));
        assert!(selector_matches(&selector, &labels(&[("a", "b")])));
    }

    #[test]
    fn test_match_labels() {
        let selector = match_label("allowed", "true");
        assert!(selector_matches(&selector, &labels(&[("allowed", "true")])));
        assert!(!selector_matches(&selector, &labels(&[("allowed", "false")])));
        assert!(!selector_matches(&selector, &labels(&[])));
    }

    #[test]
    fn test_match_expressions() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                expression("env", "In", &["prod", "staging"]),
                expression("team", "NotIn", &["legacy"]),
                expression("mesh", "Exists", &[]),
                expression("quarantine", "DoesNotExist", &[]),
            ]),
        };
        assert!(compile_selector(&selector).is_ok());

        assert!(selector_matches(
            &selector,
            &labels(&[("env", "prod"), ("mesh", "")])
        ));
        assert!(!selector_matches(
            &selector,
            &labels(&[("env", "dev"), ("mesh", "")])
        ));
        assert!(!selector_matches(
            &selector,
            &labels(&[("env", "prod"), ("mesh", ""), ("team", "legacy")])
        ));
        assert!(!selector_matches(
            &selector,
            &labels(&[("env", "prod"), ("mesh", ""), ("quarantine", "y")])
        ));
    }

    #[test]
    fn test_compile_rejects_bad_expressions() {
        let bad_operator = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![expression("env", "Matches", &["x"])]),
        };
        assert!(compile_selector(&bad_operator).is_err());
        assert!(!selector_matches(&bad_operator, &labels(&[("env", "x")])));

        let missing_values = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![expression("env", "In", &[])]),
        };
        assert!(compile_selector(&missing_values).is_err());
    }

    #[test]
    fn test_selector_keys() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("foo", "bar")])),
            match_expressions: Some(vec![expression("env", "Exists", &[])]),
        };
        let keys: Vec<&str> = selector_keys(&selector).collect();
        assert_eq!(keys, vec!["foo", "env"]);
    }
}
