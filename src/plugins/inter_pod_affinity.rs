use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    cycle_state::CycleState,
    labels::{Selector, SelectorError},
    models::{AffinityTerm, NodeInfo, PodInfo, WeightedAffinityTerm},
    parallelize::Parallelizer,
    plugins::{
        Features, NodeScore, Plugin, PreScorePlugin, ScoreExtension, ScorePlugin, Status,
        MAX_NODE_SCORE,
    },
    snapshot::Snapshot,
};

pub const NAME: &str = "InterPodAffinity";

const PRE_SCORE_KEY: &str = "PreScore-InterPodAffinity";

pub const DEFAULT_HARD_POD_AFFINITY_WEIGHT: i32 = 1;
const MIN_HARD_POD_AFFINITY_WEIGHT: i32 = 0;
const MAX_HARD_POD_AFFINITY_WEIGHT: i32 = 100;

/// Construction-time arguments of the [`InterPodAffinity`] plugin.
#[derive(Clone, Debug)]
pub struct InterPodAffinityArgs {
    /// Weight at which an existing pod's *hard* affinity terms count toward
    /// the symmetric score of the incoming pod. Zero disables them.
    pub hard_pod_affinity_weight: i32,
}

impl Default for InterPodAffinityArgs {
    fn default() -> Self {
        Self {
            hard_pod_affinity_weight: DEFAULT_HARD_POD_AFFINITY_WEIGHT,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("hardPodAffinityWeight: invalid value {0}: must be in the range 0-100")]
pub struct InvalidArgs(pub i32);

impl InterPodAffinityArgs {
    fn validate(&self) -> Result<(), InvalidArgs> {
        let w = self.hard_pod_affinity_weight;
        if !(MIN_HARD_POD_AFFINITY_WEIGHT..=MAX_HARD_POD_AFFINITY_WEIGHT).contains(&w) {
            return Err(InvalidArgs(w));
        }
        Ok(())
    }
}

/// Scores nodes by how well they satisfy the incoming pod's soft inter-pod
/// affinity preferences and the symmetric preferences of already placed pods.
pub struct InterPodAffinity {
    args: InterPodAffinityArgs,
    ns_selector_enabled: bool,
    snapshot: Arc<Snapshot>,
    parallelizer: Parallelizer,
    cancel: CancellationToken,
}

impl InterPodAffinity {
    pub fn new(
        args: InterPodAffinityArgs,
        features: Features,
        snapshot: Arc<Snapshot>,
    ) -> Result<Self, InvalidArgs> {
        args.validate()?;
        Ok(Self {
            args,
            ns_selector_enabled: features.enable_pod_affinity_namespace_selector,
            snapshot,
            parallelizer: Parallelizer::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Token the host cancels to abort an in-flight pre-score pass at the
    /// next batch boundary. An aborted pass installs no cycle state.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves the namespace selector of the incoming pod's own terms ahead
    /// of the snapshot walk: matching namespaces are folded into the explicit
    /// set so that forward matching needs no per-candidate namespace lookup.
    fn merge_term_namespaces(&self, terms: &mut [WeightedAffinityTerm]) {
        for weighted in terms.iter_mut() {
            let term = &mut weighted.term;
            if term.namespace_selector.matches_nothing() {
                continue;
            }
            for (name, labels) in self.snapshot.namespaces() {
                if term.namespace_selector.matches(labels) {
                    term.namespaces.insert(name.clone());
                }
            }
            term.namespace_selector = Selector::nothing();
        }
    }

    /// Applies every contribution one existing pod makes to the counters:
    /// the incoming pod's own terms matched against the existing pod, and the
    /// existing pod's terms matched symmetrically against the incoming pod.
    fn process_existing_pod(
        &self,
        incoming: &IncomingPodTerms,
        existing: &PodInfo,
        node: &NodeInfo,
        pod: &PodInfo,
        counter: &TopologyPairCounter,
    ) -> Result<(), SelectorError> {
        process_weighted_terms(counter, &incoming.preferred, existing, None, node, 1);
        process_weighted_terms(counter, &incoming.preferred_anti, existing, None, node, -1);

        let ns_labels = self
            .ns_selector_enabled
            .then_some(&incoming.namespace_labels);

        // Hard affinity of the existing pod counts toward the incoming pod at
        // the configured weight. Hard anti-affinity never does.
        if self.args.hard_pod_affinity_weight > 0 {
            for term in existing.required_affinity_terms(self.ns_selector_enabled)? {
                process_term(
                    counter,
                    &term,
                    self.args.hard_pod_affinity_weight,
                    pod,
                    ns_labels,
                    node,
                    1,
                );
            }
        }

        process_weighted_terms(
            counter,
            &existing.preferred_affinity_terms(self.ns_selector_enabled)?,
            pod,
            ns_labels,
            node,
            1,
        );
        process_weighted_terms(
            counter,
            &existing.preferred_anti_affinity_terms(self.ns_selector_enabled)?,
            pod,
            ns_labels,
            node,
            -1,
        );
        Ok(())
    }
}

impl Plugin for InterPodAffinity {
    fn name(&self) -> &str {
        NAME
    }
}

/// The incoming pod's compiled terms plus the labels of its namespace,
/// snapshotted once per cycle for symmetric matching.
struct IncomingPodTerms {
    preferred: Vec<WeightedAffinityTerm>,
    preferred_anti: Vec<WeightedAffinityTerm>,
    namespace_labels: HashMap<String, String>,
}

/// Final counters of one pre-score pass, read-only once installed.
struct PreScoreState {
    topology_score: HashMap<String, HashMap<String, i64>>,
}

/// Concurrent counters keyed by topology pair. Writers to the same pair
/// serialize on the map entry; independent pairs proceed in parallel.
struct TopologyPairCounter {
    counts: DashMap<(String, String), i64>,
}

impl TopologyPairCounter {
    fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    fn add(&self, key: &str, value: &str, delta: i64) {
        if delta == 0 {
            return;
        }
        *self
            .counts
            .entry((key.to_string(), value.to_string()))
            .or_insert(0) += delta;
    }

    fn into_topology_score(self) -> HashMap<String, HashMap<String, i64>> {
        let mut by_key: HashMap<String, HashMap<String, i64>> = HashMap::new();
        for ((key, value), count) in self.counts {
            by_key.entry(key).or_default().insert(value, count);
        }
        by_key
    }
}

/// Counts `term` once against `target` on `node`, under the topology value
/// the node carries for the term's key. A node without the key contributes
/// nothing; an empty-string value is a legitimate topology domain.
fn process_term(
    counter: &TopologyPairCounter,
    term: &AffinityTerm,
    weight: i32,
    target: &PodInfo,
    ns_labels: Option<&HashMap<String, String>>,
    node: &NodeInfo,
    multiplier: i32,
) {
    if node.labels.is_empty() {
        return;
    }
    let Some(value) = node.labels.get(&term.topology_key) else {
        return;
    };
    if !term.matches(target, ns_labels) {
        return;
    }
    counter.add(&term.topology_key, value, weight as i64 * multiplier as i64);
}

fn process_weighted_terms(
    counter: &TopologyPairCounter,
    terms: &[WeightedAffinityTerm],
    target: &PodInfo,
    ns_labels: Option<&HashMap<String, String>>,
    node: &NodeInfo,
    multiplier: i32,
) {
    for weighted in terms {
        process_term(
            counter,
            &weighted.term,
            weighted.weight,
            target,
            ns_labels,
            node,
            multiplier,
        );
    }
}

impl PreScorePlugin for InterPodAffinity {
    fn pre_score(&self, state: &mut CycleState, pod: &PodInfo, nodes: Vec<NodeInfo>) -> Status {
        if nodes.is_empty() {
            return Status::default();
        }

        let mut preferred = match pod.preferred_affinity_terms(self.ns_selector_enabled) {
            Ok(terms) => terms,
            Err(e) => return Status::error(&e.to_string()),
        };
        let mut preferred_anti = match pod.preferred_anti_affinity_terms(self.ns_selector_enabled) {
            Ok(terms) => terms,
            Err(e) => return Status::error(&e.to_string()),
        };
        let has_preferred_constraints = !preferred.is_empty() || !preferred_anti.is_empty();

        let mut namespace_labels = HashMap::new();
        if self.ns_selector_enabled {
            self.merge_term_namespaces(&mut preferred);
            self.merge_term_namespaces(&mut preferred_anti);
            namespace_labels = match self.snapshot.namespace_labels(&pod.namespace) {
                Some(labels) => labels.clone(),
                None => {
                    log::trace!(
                        "no labels found for namespace {:?} of pod {:?}",
                        pod.namespace,
                        pod.name
                    );
                    HashMap::new()
                }
            };
        }
        let incoming = IncomingPodTerms {
            preferred,
            preferred_anti,
            namespace_labels,
        };

        // Unless the incoming pod has preferred terms, only existing pods
        // that themselves carry affinity can move any counter.
        let existing = if has_preferred_constraints {
            self.snapshot.list()
        } else {
            self.snapshot.list_with_affinity()
        };

        let counter = TopologyPairCounter::new();
        let first_err: Mutex<Option<SelectorError>> = Mutex::new(None);
        self.parallelizer.until(&self.cancel, existing.len(), |i| {
            let existing_pod = &existing[i];
            let Some(node_name) = &existing_pod.scheduled else {
                return;
            };
            let Some(node) = self.snapshot.node_info(node_name) else {
                log::trace!(
                    "pod {:?} is bound to node {:?} which is missing from the snapshot",
                    existing_pod.name,
                    node_name
                );
                return;
            };
            if let Err(e) =
                self.process_existing_pod(&incoming, existing_pod, node, pod, &counter)
            {
                let mut slot = first_err.lock().unwrap_or_else(|p| p.into_inner());
                slot.get_or_insert(e);
            }
        });

        if self.cancel.is_cancelled() {
            return Status::error("pre-score pass cancelled before completion");
        }
        if let Some(e) = first_err.into_inner().unwrap_or_else(|p| p.into_inner()) {
            return Status::error(&e.to_string());
        }

        state.write(
            PRE_SCORE_KEY,
            Box::new(PreScoreState {
                topology_score: counter.into_topology_score(),
            }),
        );
        Status::default()
    }
}

impl ScorePlugin for InterPodAffinity {
    /// Sums the counters of every topology domain the node belongs to. The
    /// walk is over topology keys referenced by some term, never over pods.
    fn score(&self, state: &mut CycleState, _pod: &PodInfo, node_info: NodeInfo) -> (i64, Status) {
        let Some(s) = state.read::<PreScoreState>(PRE_SCORE_KEY) else {
            return (
                0,
                Status::error(&format!("reading {PRE_SCORE_KEY:?} from cycle state")),
            );
        };
        let mut score = 0_i64;
        for (key, values) in &s.topology_score {
            if let Some(value) = node_info.labels.get(key) {
                if let Some(count) = values.get(value) {
                    score += count;
                }
            }
        }
        (score, Status::default())
    }

    fn score_extension(&self) -> Box<dyn ScoreExtension> {
        Box::new(InterPodAffinityScoreExtension)
    }
}

struct InterPodAffinityScoreExtension;

impl ScoreExtension for InterPodAffinityScoreExtension {
    /// Maps the raw scores onto `[0, MAX_NODE_SCORE]` by min/max: the most
    /// preferred node lands on the maximum, the least preferred on zero.
    fn normalize_score(
        &self,
        state: &CycleState,
        _pod: &PodInfo,
        scores: &mut Vec<NodeScore>,
    ) -> Status {
        let Some(s) = state.read::<PreScoreState>(PRE_SCORE_KEY) else {
            return Status::error(&format!("reading {PRE_SCORE_KEY:?} from cycle state"));
        };
        if s.topology_score.is_empty() {
            return Status::default();
        }

        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for node_score in scores.iter() {
            min = min.min(node_score.score);
            max = max.max(node_score.score);
        }

        let diff = max - min;
        for node_score in scores.iter_mut() {
            node_score.score = if diff > 0 {
                MAX_NODE_SCORE * (node_score.score - min) / diff
            } else {
                0
            };
        }
        Status::default()
    }
}
