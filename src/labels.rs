//! Label-selector compilation.
//!
//! A structured [`LabelSelector`](crate::models::LabelSelector) is validated
//! and compiled once into a [`Selector`] that can be evaluated against any
//! label map without re-parsing.

use std::collections::HashMap;

use thiserror::Error;

use crate::models::{LabelSelector, LabelSelectorOperator, LabelSelectorRequirement};

const MAX_LABEL_VALUE_LEN: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    /// A values literal does not conform to label-value syntax.
    #[error(
        "Invalid value: {0:?}: a valid label value must be an empty string or consist of \
         alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric \
         character"
    )]
    InvalidValue(String),
    #[error("for 'In' and 'NotIn' operators, the values set can't be empty")]
    EmptyValues,
    #[error("the values set must be empty for 'Exists' and 'DoesNotExist' operators")]
    NonEmptyValues,
}

fn validate_label_value(value: &str) -> Result<(), SelectorError> {
    if value.is_empty() {
        return Ok(());
    }
    let bytes = value.as_bytes();
    let ok = value.len() <= MAX_LABEL_VALUE_LEN
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if ok {
        Ok(())
    } else {
        Err(SelectorError::InvalidValue(value.to_string()))
    }
}

/// One validated match expression.
#[derive(Clone, Debug)]
struct Requirement {
    key: String,
    operator: LabelSelectorOperator,
    values: Vec<String>,
}

impl Requirement {
    fn new(req: &LabelSelectorRequirement) -> Result<Self, SelectorError> {
        match req.operator {
            LabelSelectorOperator::In | LabelSelectorOperator::NotIn => {
                if req.values.is_empty() {
                    return Err(SelectorError::EmptyValues);
                }
            }
            LabelSelectorOperator::Exists | LabelSelectorOperator::DoesNotExist => {
                if !req.values.is_empty() {
                    return Err(SelectorError::NonEmptyValues);
                }
            }
        }
        for v in &req.values {
            validate_label_value(v)?;
        }
        Ok(Self {
            key: req.key.clone(),
            operator: req.operator.clone(),
            values: req.values.clone(),
        })
    }

    fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self.operator {
            LabelSelectorOperator::In => match labels.get(&self.key) {
                Some(v) => self.values.iter().any(|want| want == v),
                None => false,
            },
            // An absent key is "not in" any values set.
            LabelSelectorOperator::NotIn => match labels.get(&self.key) {
                Some(v) => !self.values.iter().any(|want| want == v),
                None => true,
            },
            LabelSelectorOperator::Exists => labels.contains_key(&self.key),
            LabelSelectorOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// A compiled label selector.
///
/// `Selector::nothing()` matches no label set at all; a compiled selector
/// with zero requirements matches every label set.
#[derive(Clone, Debug)]
pub struct Selector {
    requirements: Vec<Requirement>,
    nothing: bool,
}

impl Selector {
    /// The selector that matches nothing, used where a term carries no
    /// selector at all.
    pub fn nothing() -> Self {
        Self {
            requirements: Vec::new(),
            nothing: true,
        }
    }

    pub fn compile(selector: &LabelSelector) -> Result<Self, SelectorError> {
        let requirements = selector
            .match_expressions
            .iter()
            .map(Requirement::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            requirements,
            nothing: false,
        })
    }

    /// Compiles an optional selector, mapping `None` to [`Selector::nothing`].
    pub fn compile_opt(selector: Option<&LabelSelector>) -> Result<Self, SelectorError> {
        match selector {
            Some(s) => Self::compile(s),
            None => Ok(Self::nothing()),
        }
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        !self.nothing && self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn matches_nothing(&self) -> bool {
        self.nothing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LabelSelector;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn requirement(key: &str, operator: LabelSelectorOperator, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_in_operator() {
        let selector = Selector::compile(&LabelSelector {
            match_expressions: vec![requirement("security", LabelSelectorOperator::In, &["S1", "S2"])],
        })
        .unwrap();
        assert!(selector.matches(&labels(&[("security", "S1")])));
        assert!(selector.matches(&labels(&[("security", "S2"), ("extra", "x")])));
        assert!(!selector.matches(&labels(&[("security", "S3")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_not_in_operator_absent_key_matches() {
        let selector = Selector::compile(&LabelSelector {
            match_expressions: vec![requirement("security", LabelSelectorOperator::NotIn, &["S1"])],
        })
        .unwrap();
        assert!(!selector.matches(&labels(&[("security", "S1")])));
        assert!(selector.matches(&labels(&[("security", "S2")])));
        assert!(selector.matches(&labels(&[("other", "S1")])));
    }

    #[test]
    fn test_exists_and_does_not_exist() {
        let selector = Selector::compile(&LabelSelector {
            match_expressions: vec![
                requirement("security", LabelSelectorOperator::Exists, &[]),
                requirement("wrongkey", LabelSelectorOperator::DoesNotExist, &[]),
            ],
        })
        .unwrap();
        assert!(selector.matches(&labels(&[("security", "S1")])));
        assert!(!selector.matches(&labels(&[("security", "S1"), ("wrongkey", "v")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = Selector::compile(&LabelSelector::default()).unwrap();
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn test_nothing_matches_nothing() {
        let selector = Selector::nothing();
        assert!(!selector.matches(&labels(&[])));
        assert!(!selector.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let err = Selector::compile(&LabelSelector {
            match_expressions: vec![requirement(
                "security",
                LabelSelectorOperator::In,
                &["{{.bad-value.}}"],
            )],
        })
        .unwrap_err();
        assert_eq!(err, SelectorError::InvalidValue("{{.bad-value.}}".to_string()));
        assert!(err.to_string().contains(r#"Invalid value: "{{.bad-value.}}""#));
    }

    #[test]
    fn test_value_syntax_boundaries() {
        assert!(validate_label_value("").is_ok());
        assert!(validate_label_value("S1").is_ok());
        assert!(validate_label_value("a-b_c.d").is_ok());
        assert!(validate_label_value(&"a".repeat(63)).is_ok());
        assert!(validate_label_value(&"a".repeat(64)).is_err());
        assert!(validate_label_value("-leading").is_err());
        assert!(validate_label_value("trailing-").is_err());
        assert!(validate_label_value("sp ace").is_err());
    }

    #[test]
    fn test_operator_value_arity() {
        let err = Selector::compile(&LabelSelector {
            match_expressions: vec![requirement("k", LabelSelectorOperator::In, &[])],
        })
        .unwrap_err();
        assert_eq!(err, SelectorError::EmptyValues);

        let err = Selector::compile(&LabelSelector {
            match_expressions: vec![requirement("k", LabelSelectorOperator::Exists, &["v"])],
        })
        .unwrap_err();
        assert_eq!(err, SelectorError::NonEmptyValues);
    }
}
