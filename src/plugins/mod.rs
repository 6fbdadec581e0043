//! Scheduler plugins.
//!
//! The functionality of each plugin corresponds to its namesake in Kubernetes.
//! Some comments are also quoted from the Kubernetes codebase.

use crate::cycle_state::CycleState;
use crate::models::{NodeInfo, PodInfo};

pub mod inter_pod_affinity;

/// Upper bound of a normalized node score.
pub const MAX_NODE_SCORE: i64 = 100;

pub trait Plugin {
    fn name(&self) -> &str;
}

/// Informational plugin called after the filtering phase with the list of
/// viable nodes.
pub trait PreScorePlugin: Plugin {
    /// Executes with nodes that passed filtering. All must return success or
    /// the pod is rejected. Returns Skip to bypass the associated Score plugin.
    fn pre_score(&self, state: &mut CycleState, pod: &PodInfo, nodes: Vec<NodeInfo>) -> Status;
}

/// Plugin that ranks nodes passing the filtering phase.
pub trait ScorePlugin: Plugin {
    /// Assigns a score to a node (higher = better fit). Must return success.
    fn score(&self, state: &mut CycleState, pod: &PodInfo, node_info: NodeInfo) -> (i64, Status);

    fn score_extension(&self) -> Box<dyn ScoreExtension>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeScore {
    pub name: String,
    pub score: i64,
}

pub trait ScoreExtension {
    /// Rewrites the raw score list in place onto `[0, MAX_NODE_SCORE]`.
    fn normalize_score(
        &self,
        state: &CycleState,
        pod: &PodInfo,
        scores: &mut Vec<NodeScore>,
    ) -> Status;
}

/// Feature gates consumed at plugin construction.
///
/// Gates are threaded through explicitly so that no plugin reads
/// process-wide mutable state.
#[derive(Clone, Debug)]
pub struct Features {
    pub enable_pod_affinity_namespace_selector: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            enable_pod_affinity_namespace_selector: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Status {
    pub code: Code,
    pub reasons: Vec<String>,
    pub err: String,
    pub plugin: String,
}

impl Default for Status {
    /// Default success status
    fn default() -> Self {
        Self {
            code: Code::Success,
            reasons: vec![],
            err: String::new(),
            plugin: String::new(),
        }
    }
}

impl Status {
    pub fn new(code: Code, reasons: Vec<String>) -> Self {
        Status {
            code,
            reasons,
            err: String::new(),
            plugin: String::new(),
        }
    }

    pub fn error(error: &str) -> Self {
        Self {
            code: Code::Error,
            err: error.to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code, Code::Success)
    }
}

/// Code is the Status code/type which is returned from plugins.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Code {
    /// Success means that plugin ran correctly and found pod schedulable.
    Success,
    /// Error is one of the failures, used for internal plugin errors, unexpected input, etc.
    /// Plugin shouldn't return this code for expected failures, like Unschedulable.
    Error,
    /// Skip is used when a PreScore plugin finds nothing to do for the pod,
    /// so that the coupled Score plugin will be skipped.
    Skip,
}
