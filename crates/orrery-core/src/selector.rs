//! Label selectors.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::meta::Labels;

/// Operator applied by a [`SelectorRequirement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorOperator {
    /// Label value must be one of the listed values.
    In,
    /// Label must be absent or have a value outside the list.
    NotIn,
    /// Label key must be present.
    Exists,
    /// Label key must be absent.
    DoesNotExist,
}

/// A single set-based requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRequirement {
    /// Label key the requirement applies to.
    pub key: String,
    /// Operator to apply.
    pub operator: SelectorOperator,
    /// Values for `In` and `NotIn`.
    #[serde(default)]
    pub values: Vec<String>,
}

impl SelectorRequirement {
    fn matches(&self, labels: &Labels) -> bool {
        match self.operator {
            SelectorOperator::In => labels
                .get(&self.key)
                .is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => labels
                .get(&self.key)
                .map_or(true, |v| !self.values.contains(v)),
            SelectorOperator::Exists => labels.contains_key(&self.key),
            SelectorOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// Predicate over object labels.
///
/// All `match_labels` entries and all `match_expressions` must hold. An empty
/// selector matches every object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    /// Exact key/value matches.
    #[serde(default)]
    pub match_labels: Labels,
    /// Set-based requirements.
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    /// Selector that matches the given labels exactly.
    #[must_use]
    pub fn from_labels<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            match_expressions: Vec::new(),
        }
    }

    /// Whether this selector matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Check the selector is well formed.
    pub fn validate(&self) -> CoreResult<()> {
        for req in &self.match_expressions {
            if req.key.is_empty() {
                return Err(CoreError::InvalidSelector(
                    "requirement key must not be empty".to_owned(),
                ));
            }
            match req.operator {
                SelectorOperator::In | SelectorOperator::NotIn if req.values.is_empty() => {
                    return Err(CoreError::InvalidSelector(format!(
                        "{:?} requirement on {:?} needs at least one value",
                        req.operator, req.key
                    )));
                }
                SelectorOperator::Exists | SelectorOperator::DoesNotExist
                    if !req.values.is_empty() =>
                {
                    return Err(CoreError::InvalidSelector(format!(
                        "{:?} requirement on {:?} must not list values",
                        req.operator, req.key
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Check whether `labels` satisfy this selector.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|r| r.matches(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(selector.is_empty());
        assert!(selector.matches(&Labels::new()));
        assert!(selector.matches(&labels(&[("app", "x")])));
    }

    #[test]
    fn match_labels_requires_all_pairs() {
        let selector = LabelSelector::from_labels([("app", "x"), ("tier", "web")]);
        assert!(selector.matches(&labels(&[("app", "x"), ("tier", "web"), ("extra", "1")])));
        assert!(!selector.matches(&labels(&[("app", "x")])));
        assert!(!selector.matches(&labels(&[("app", "y"), ("tier", "web")])));
    }

    #[test]
    fn set_based_requirements() {
        let selector = LabelSelector {
            match_labels: Labels::new(),
            match_expressions: vec![
                SelectorRequirement {
                    key: "env".to_owned(),
                    operator: SelectorOperator::In,
                    values: vec!["prod".to_owned(), "staging".to_owned()],
                },
                SelectorRequirement {
                    key: "canary".to_owned(),
                    operator: SelectorOperator::DoesNotExist,
                    values: vec![],
                },
            ],
        };
        assert!(selector.matches(&labels(&[("env", "prod")])));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
        assert!(!selector.matches(&labels(&[("env", "prod"), ("canary", "true")])));
    }

    #[test]
    fn not_in_matches_missing_key() {
        let selector = LabelSelector {
            match_labels: Labels::new(),
            match_expressions: vec![SelectorRequirement {
                key: "env".to_owned(),
                operator: SelectorOperator::NotIn,
                values: vec!["dev".to_owned()],
            }],
        };
        assert!(selector.matches(&Labels::new()));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
    }

    #[test]
    fn validate_rejects_in_without_values() {
        let selector = LabelSelector {
            match_labels: Labels::new(),
            match_expressions: vec![SelectorRequirement {
                key: "env".to_owned(),
                operator: SelectorOperator::In,
                values: vec![],
            }],
        };
        assert!(matches!(
            selector.validate(),
            Err(CoreError::InvalidSelector(_))
        ));
    }
}
