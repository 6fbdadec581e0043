use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{NodeInfo, PodInfo};

/// Read-only view of the cluster taken at the start of a scheduling cycle.
///
/// Only placed pods enter the snapshot; a pod without a node binding cannot
/// contribute to topology counters. The secondary list of pods carrying
/// affinity constraints lets scoring skip the rest when the incoming pod has
/// no preferences of its own.
pub struct Snapshot {
    nodes: HashMap<String, NodeInfo>,
    pods: Vec<Arc<PodInfo>>,
    pods_with_affinity: Vec<Arc<PodInfo>>,
    namespaces: HashMap<String, HashMap<String, String>>,
}

impl Snapshot {
    pub fn new(pods: Vec<PodInfo>, nodes: Vec<NodeInfo>) -> Self {
        let mut all = Vec::with_capacity(pods.len());
        let mut with_affinity = Vec::new();
        for pod in pods {
            if pod.scheduled.is_none() {
                log::trace!("pod {:?} is not placed, leaving it out of the snapshot", pod.name);
                continue;
            }
            let pod = Arc::new(pod);
            if pod.has_affinity_constraints() {
                with_affinity.push(pod.clone());
            }
            all.push(pod);
        }
        Self {
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            pods: all,
            pods_with_affinity: with_affinity,
            namespaces: HashMap::new(),
        }
    }

    /// Attaches the namespace label table used by namespace selectors.
    pub fn with_namespaces(
        mut self,
        namespaces: Vec<(String, HashMap<String, String>)>,
    ) -> Self {
        self.namespaces = namespaces.into_iter().collect();
        self
    }

    /// Every placed pod in the cluster.
    pub fn list(&self) -> &[Arc<PodInfo>] {
        &self.pods
    }

    /// Placed pods that carry an affinity or anti-affinity block.
    pub fn list_with_affinity(&self) -> &[Arc<PodInfo>] {
        &self.pods_with_affinity
    }

    pub fn node_info(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.get(name)
    }

    pub fn namespace_labels(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.namespaces.get(name)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&String, &HashMap<String, String>)> {
        self.namespaces.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Affinity, PodAffinity, PodSpec};

    fn placed_pod(name: &str, node: &str) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            scheduled: Some(node.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_unplaced_pods_are_excluded() {
        let snapshot = Snapshot::new(
            vec![placed_pod("a", "node1"), PodInfo { name: "pending".to_string(), ..Default::default() }],
            vec![NodeInfo { name: "node1".to_string(), ..Default::default() }],
        );
        assert_eq!(snapshot.list().len(), 1);
        assert_eq!(snapshot.list()[0].name, "a");
    }

    #[test]
    fn test_affinity_sublist() {
        let mut with_affinity = placed_pod("picky", "node1");
        with_affinity.spec = PodSpec {
            affinity: Some(Affinity {
                pod_affinity: Some(PodAffinity::default()),
                ..Default::default()
            }),
        };
        let snapshot = Snapshot::new(vec![placed_pod("plain", "node1"), with_affinity], vec![]);
        assert_eq!(snapshot.list().len(), 2);
        assert_eq!(snapshot.list_with_affinity().len(), 1);
        assert_eq!(snapshot.list_with_affinity()[0].name, "picky");
    }

    #[test]
    fn test_node_and_namespace_lookup() {
        let snapshot = Snapshot::new(
            vec![],
            vec![NodeInfo { name: "node1".to_string(), ..Default::default() }],
        )
        .with_namespaces(vec![(
            "team-ns".to_string(),
            [("team".to_string(), "team1".to_string())].into_iter().collect(),
        )]);
        assert!(snapshot.node_info("node1").is_some());
        assert!(snapshot.node_info("node2").is_none());
        assert_eq!(
            snapshot.namespace_labels("team-ns").and_then(|l| l.get("team")),
            Some(&"team1".to_string())
        );
        assert!(snapshot.namespace_labels("other").is_none());
    }
}
