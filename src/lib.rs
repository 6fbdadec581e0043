//! Inter-pod affinity scoring for a cluster workload scheduler.
//!
//! The crate ranks candidate nodes for an incoming pod by how well each node
//! satisfies the pod's soft affinity/anti-affinity preferences toward already
//! placed pods, and the symmetric preferences of those pods toward the
//! incoming one. Scoring runs in three phases driven by the host framework:
//! `pre_score` walks the cluster snapshot once and aggregates per-topology
//! counters into cycle state, `score` reads them per node, and the score
//! extension normalizes the results onto `[0, MAX_NODE_SCORE]`.

pub mod cycle_state;
pub mod labels;
pub mod models;
pub mod parallelize;
pub mod plugins;
pub mod snapshot;
