use std::collections::{BTreeSet, HashMap, HashSet};

use super::model::{ClusterOut, ClusterRow, EventDetail};

/// Survivors ordered and capped, with their leaves identified.
#[derive(Debug)]
pub struct Assembly {
    clusters: Vec<ClusterRow>,
    leaves: HashSet<i32>,
}

impl Assembly {
    /// Leaves are determined over all survivors before the cap applies, so a
    /// capped parent whose children were cut still carries no events.
    #[must_use]
    pub fn plan(mut survivors: Vec<ClusterRow>, max_clusters: Option<usize>) -> Self {
        let parents: HashSet<i32> = survivors
            .iter()
            .filter_map(|c| c.parent_cluster_id)
            .collect();
        let leaves = survivors
            .iter()
            .map(|c| c.cluster_id)
            .filter(|id| !parents.contains(id))
            .collect();

        survivors.sort_by_key(|c| c.cluster_id);
        if let Some(cap) = max_clusters {
            survivors.truncate(cap);
        }

        Self {
            clusters: survivors,
            leaves,
        }
    }

    #[must_use]
    pub fn clusters(&self) -> &[ClusterRow] {
        &self.clusters
    }

    #[must_use]
    pub fn is_leaf(&self, cluster_id: i32) -> bool {
        self.leaves.contains(&cluster_id)
    }

    /// Distinct member ids of the retained leaves, ascending.
    #[must_use]
    pub fn leaf_event_ids(&self) -> Vec<i32> {
        self.clusters
            .iter()
            .filter(|c| self.is_leaf(c.cluster_id))
            .flat_map(|c| c.event_ids.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Attaches hydrated events to leaves in member order. Member ids with no
    /// hydrated event are dropped.
    #[must_use]
    pub fn attach(self, events: Vec<EventDetail>) -> Vec<ClusterOut> {
        let hydrated: HashMap<i32, EventDetail> = events
            .into_iter()
            .map(|e| (e.event_id, e.sanitized()))
            .collect();
        let leaves = self.leaves;

        self.clusters
            .into_iter()
            .map(|cluster| {
                let events = if leaves.contains(&cluster.cluster_id) {
                    cluster
                        .event_ids
                        .iter()
                        .filter_map(|id| hydrated.get(id).cloned())
                        .collect()
                } else {
                    Vec::new()
                };
                ClusterOut::new(cluster, events)
            })
            .collect()
    }
}
