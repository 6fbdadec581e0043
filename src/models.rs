use std::collections::{HashMap, HashSet};

use crate::labels::{Selector, SelectorError};

#[derive(Clone, Default, Debug)]
pub struct PodSpec {
    pub affinity: Option<Affinity>,
}

#[derive(Clone, Default, Debug)]
pub struct Affinity {
    pub pod_affinity: Option<PodAffinity>,
    pub pod_anti_affinity: Option<PodAntiAffinity>,
}

/// Inter-pod affinity: a preference to be co-located with pods matched by the
/// terms below, grouped per topology domain.
#[derive(Clone, Default, Debug)]
pub struct PodAffinity {
    pub required_during_scheduling_ignored_during_execution: Vec<PodAffinityTerm>,
    pub preferred_during_scheduling_ignored_during_execution: Vec<WeightedPodAffinityTerm>,
}

/// Inter-pod anti-affinity: a preference to stay away from matched pods.
#[derive(Clone, Default, Debug)]
pub struct PodAntiAffinity {
    pub required_during_scheduling_ignored_during_execution: Vec<PodAffinityTerm>,
    pub preferred_during_scheduling_ignored_during_execution: Vec<WeightedPodAffinityTerm>,
}

/// A selector over pods, scoped to a set of namespaces, whose matches are
/// grouped by the value of `topology_key` on the node hosting them.
///
/// An empty `namespaces` list with no `namespace_selector` means "the term
/// owner's own namespace".
#[derive(Clone, Default, Debug)]
pub struct PodAffinityTerm {
    pub label_selector: Option<LabelSelector>,
    pub namespaces: Vec<String>,
    pub topology_key: String,
    pub namespace_selector: Option<LabelSelector>,
}

#[derive(Clone, Default, Debug)]
pub struct WeightedPodAffinityTerm {
    /// Weight in the range 1-100 added for each node matching the term.
    pub weight: i32,
    pub pod_affinity_term: PodAffinityTerm,
}

/// A label query: the AND of its match expressions.
// Differ to k8s, we only support match_expressions now
#[derive(Clone, Default, Debug)]
pub struct LabelSelector {
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Clone, Default, Debug)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl Default for LabelSelectorOperator {
    fn default() -> Self {
        Self::Exists
    }
}

#[derive(Clone, Default, Debug)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
    pub spec: PodSpec,
    /// Name of the node the pod is bound to, if placed.
    pub scheduled: Option<String>,
}

impl PodInfo {
    /// Whether the pod carries any inter-pod affinity or anti-affinity block.
    pub fn has_affinity_constraints(&self) -> bool {
        match &self.spec.affinity {
            Some(a) => a.pod_affinity.is_some() || a.pod_anti_affinity.is_some(),
            None => false,
        }
    }

    /// Compiled hard affinity terms. Hard anti-affinity is enforced by the
    /// filter stage and never compiled here.
    pub fn required_affinity_terms(
        &self,
        ns_selector_enabled: bool,
    ) -> Result<Vec<AffinityTerm>, SelectorError> {
        let terms = self
            .spec
            .affinity
            .as_ref()
            .and_then(|a| a.pod_affinity.as_ref())
            .map(|p| p.required_during_scheduling_ignored_during_execution.as_slice())
            .unwrap_or_default();
        terms
            .iter()
            .map(|t| AffinityTerm::new(self, t, ns_selector_enabled))
            .collect()
    }

    pub fn preferred_affinity_terms(
        &self,
        ns_selector_enabled: bool,
    ) -> Result<Vec<WeightedAffinityTerm>, SelectorError> {
        let terms = self
            .spec
            .affinity
            .as_ref()
            .and_then(|a| a.pod_affinity.as_ref())
            .map(|p| p.preferred_during_scheduling_ignored_during_execution.as_slice())
            .unwrap_or_default();
        compile_weighted_terms(self, terms, ns_selector_enabled)
    }

    pub fn preferred_anti_affinity_terms(
        &self,
        ns_selector_enabled: bool,
    ) -> Result<Vec<WeightedAffinityTerm>, SelectorError> {
        let terms = self
            .spec
            .affinity
            .as_ref()
            .and_then(|a| a.pod_anti_affinity.as_ref())
            .map(|p| p.preferred_during_scheduling_ignored_during_execution.as_slice())
            .unwrap_or_default();
        compile_weighted_terms(self, terms, ns_selector_enabled)
    }
}

fn compile_weighted_terms(
    owner: &PodInfo,
    terms: &[WeightedPodAffinityTerm],
    ns_selector_enabled: bool,
) -> Result<Vec<WeightedAffinityTerm>, SelectorError> {
    terms
        .iter()
        .map(|t| {
            Ok(WeightedAffinityTerm {
                term: AffinityTerm::new(owner, &t.pod_affinity_term, ns_selector_enabled)?,
                weight: t.weight,
            })
        })
        .collect()
}

/// A [`PodAffinityTerm`] compiled relative to its owning pod: selectors are
/// validated and the namespace scope is resolved.
#[derive(Clone, Debug)]
pub struct AffinityTerm {
    pub selector: Selector,
    pub topology_key: String,
    pub namespaces: HashSet<String>,
    pub namespace_selector: Selector,
}

impl AffinityTerm {
    pub fn new(
        owner: &PodInfo,
        term: &PodAffinityTerm,
        ns_selector_enabled: bool,
    ) -> Result<Self, SelectorError> {
        let selector = Selector::compile_opt(term.label_selector.as_ref())?;
        let namespace_selector = if ns_selector_enabled {
            Selector::compile_opt(term.namespace_selector.as_ref())?
        } else {
            Selector::nothing()
        };
        Ok(Self {
            selector,
            topology_key: term.topology_key.clone(),
            namespaces: namespace_scope(owner, term),
            namespace_selector,
        })
    }

    /// Whether the term selects `pod`. `ns_labels` are the labels of `pod`'s
    /// namespace and are only consulted by the namespace selector.
    pub fn matches(&self, pod: &PodInfo, ns_labels: Option<&HashMap<String, String>>) -> bool {
        if self.namespaces.contains(&pod.namespace)
            || ns_labels.is_some_and(|l| self.namespace_selector.matches(l))
        {
            return self.selector.matches(&pod.labels);
        }
        false
    }
}

#[derive(Clone, Debug)]
pub struct WeightedAffinityTerm {
    pub term: AffinityTerm,
    pub weight: i32,
}

/// An explicit namespace list takes precedence; an empty list with no
/// namespace selector scopes the term to the owner's namespace. The empty
/// string is kept literally and matches a pod in the empty-named namespace.
fn namespace_scope(owner: &PodInfo, term: &PodAffinityTerm) -> HashSet<String> {
    if term.namespaces.is_empty() && term.namespace_selector.is_none() {
        HashSet::from([owner.namespace.clone()])
    } else {
        term.namespaces.iter().cloned().collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeInfo {
    pub name: String,
    pub labels: HashMap<String, String>,
}
