use log::warn;
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::model::ClusterRow;

/// Malformed hierarchy data found while building or walking the forest.
/// None of these abort a request.
#[derive(Clone, Debug, PartialEq)]
pub enum Diagnostic {
    /// The cluster's parent is not among the loaded rows.
    Orphan { cluster_id: i32, parent_id: i32 },
    /// Following parent pointers from the cluster leads back to it.
    Cycle { cluster_id: i32 },
    /// A second row with an already seen id; only the first is kept.
    Duplicate { cluster_id: i32 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Orphan {
                cluster_id,
                parent_id,
            } => write!(
                f,
                "cluster {} references missing parent {}",
                cluster_id, parent_id
            ),
            Self::Cycle { cluster_id } => {
                write!(f, "cluster {} is part of a parent cycle", cluster_id)
            }
            Self::Duplicate { cluster_id } => write!(f, "duplicate cluster id {}", cluster_id),
        }
    }
}

/// Parent/child adjacency over one request's cluster rows.
pub struct Forest {
    rows: Vec<Option<ClusterRow>>,
    by_id: HashMap<i32, usize>,
    roots: Vec<usize>,
    children_of: HashMap<i32, Vec<usize>>,
    diagnostics: Vec<Diagnostic>,
}

impl Forest {
    /// Indexes rows up to `max_level`. Deeper rows are dropped.
    #[must_use]
    pub fn build(rows: Vec<ClusterRow>, max_level: i32) -> Self {
        let mut kept = Vec::with_capacity(rows.len());
        let mut by_id = HashMap::with_capacity(rows.len());
        let mut diagnostics = Vec::new();

        for row in rows {
            if row.level > max_level {
                continue;
            }
            if by_id.contains_key(&row.cluster_id) {
                diagnostics.push(Diagnostic::Duplicate {
                    cluster_id: row.cluster_id,
                });
                continue;
            }
            by_id.insert(row.cluster_id, kept.len());
            kept.push(row);
        }

        let mut roots = Vec::new();
        let mut children_of: HashMap<i32, Vec<usize>> = HashMap::new();
        for (idx, row) in kept.iter().enumerate() {
            match row.parent_cluster_id {
                None => roots.push(idx),
                Some(parent) => children_of.entry(parent).or_default().push(idx),
            }
        }
        roots.sort_by_key(|&idx| kept[idx].cluster_id);
        for children in children_of.values_mut() {
            children.sort_by_key(|&idx| kept[idx].cluster_id);
        }

        Self {
            rows: kept.into_iter().map(Some).collect(),
            by_id,
            roots,
            children_of,
            diagnostics,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn row(&self, idx: usize) -> Option<&ClusterRow> {
        self.rows.get(idx).and_then(Option::as_ref)
    }

    /// Depth-first walk from the roots. A cluster the predicate rejects is
    /// skipped together with its whole subtree. Survivors come out in
    /// post-order.
    pub fn prune<P>(mut self, admits: P) -> Traversal
    where
        P: Fn(&ClusterRow) -> bool,
    {
        enum Step {
            Enter(usize),
            Emit(usize),
        }

        let mut visited = HashSet::with_capacity(self.rows.len());
        let mut emit = Vec::new();
        let mut pruned = 0;
        let mut stack: Vec<Step> = self.roots.iter().rev().map(|&idx| Step::Enter(idx)).collect();

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(idx) => {
                    if !visited.insert(idx) {
                        continue;
                    }
                    let row = match self.row(idx) {
                        Some(row) => row,
                        None => continue,
                    };
                    if !admits(row) {
                        pruned += 1;
                        continue;
                    }
                    stack.push(Step::Emit(idx));
                    if let Some(children) = self.children_of.get(&row.cluster_id) {
                        stack.extend(children.iter().rev().map(|&child| Step::Enter(child)));
                    }
                }
                Step::Emit(idx) => emit.push(idx),
            }
        }

        let unreached: Vec<usize> = (0..self.rows.len())
            .filter(|idx| !visited.contains(idx))
            .collect();
        for idx in unreached {
            if let Some(diagnostic) = self.classify_unreached(idx) {
                self.diagnostics.push(diagnostic);
            }
        }
        for diagnostic in &self.diagnostics {
            warn!("{}", diagnostic);
        }

        let survivors = emit
            .into_iter()
            .filter_map(|idx| self.rows.get_mut(idx).and_then(Option::take))
            .collect();

        Traversal {
            survivors,
            pruned,
            diagnostics: self.diagnostics,
        }
    }

    /// Explains why a cluster was never reached from a root. Clusters below a
    /// pruned ancestor are unreached too and yield `None`.
    fn classify_unreached(&self, idx: usize) -> Option<Diagnostic> {
        let start = self.row(idx)?;
        let mut seen = HashSet::new();
        let mut current = start;
        loop {
            if !seen.insert(current.cluster_id) {
                return if current.cluster_id == start.cluster_id {
                    Some(Diagnostic::Cycle {
                        cluster_id: start.cluster_id,
                    })
                } else {
                    // Hangs below a cycle; the cycle members report it.
                    None
                };
            }
            let parent_id = current.parent_cluster_id?;
            match self.by_id.get(&parent_id).and_then(|&p| self.row(p)) {
                Some(parent) => current = parent,
                None if current.cluster_id == start.cluster_id => {
                    return Some(Diagnostic::Orphan {
                        cluster_id: start.cluster_id,
                        parent_id,
                    })
                }
                None => return None,
            }
        }
    }
}

/// Result of a pruning walk.
#[derive(Debug)]
pub struct Traversal {
    pub survivors: Vec<ClusterRow>,
    pub pruned: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::filter::PruneWindow;
    use crate::hierarchy::model::Viewport;

    fn cluster(id: i32, parent: Option<i32>, level: i32, bbox: Option<[f64; 4]>) -> ClusterRow {
        let date = "2023-06-01T00:00:00Z".parse().ok();
        ClusterRow {
            cluster_id: id,
            parent_cluster_id: parent,
            centroid_lat: 0.0,
            centroid_lon: 0.0,
            centroid_time_days: None,
            level,
            min_lat: bbox.map(|b| b[0]),
            max_lat: bbox.map(|b| b[1]),
            min_lon: bbox.map(|b| b[2]),
            max_lon: bbox.map(|b| b[3]),
            min_date: date,
            max_date: date,
            event_ids: vec![],
        }
    }

    fn window(north: f64, south: f64, east: f64, west: f64) -> PruneWindow {
        PruneWindow::new(
            Viewport {
                north,
                south,
                east,
                west,
            },
            None,
        )
    }

    fn ids(traversal: &Traversal) -> Vec<i32> {
        let mut ids: Vec<i32> = traversal.survivors.iter().map(|c| c.cluster_id).collect();
        ids.sort();
        ids
    }

    #[test]
    fn disjoint_child_is_pruned() {
        let rows = vec![
            cluster(1, None, 0, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(2, Some(1), 1, Some([0.0, 5.0, 0.0, 5.0])),
            cluster(3, Some(1), 1, Some([5.0, 10.0, 5.0, 10.0])),
        ];
        let w = window(3.0, 1.0, 3.0, 1.0);
        let t = Forest::build(rows, 4).prune(|c| w.admits(c));
        assert_eq!(ids(&t), vec![1, 2]);
        assert_eq!(t.pruned, 1);
        assert!(t.diagnostics.is_empty());
    }

    #[test]
    fn survivors_come_out_in_post_order() {
        let rows = vec![
            cluster(1, None, 0, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(3, Some(1), 1, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(2, Some(1), 1, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(4, Some(2), 2, Some([0.0, 10.0, 0.0, 10.0])),
        ];
        let t = Forest::build(rows, 4).prune(|_| true);
        let order: Vec<i32> = t.survivors.iter().map(|c| c.cluster_id).collect();
        assert_eq!(order, vec![4, 2, 3, 1]);
    }

    #[test]
    fn pruned_subtree_leaves_no_descendants() {
        let rows = vec![
            cluster(1, None, 0, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(2, Some(1), 1, Some([20.0, 30.0, 20.0, 30.0])),
            // Breaks containment on purpose: a pruned parent hides it anyway.
            cluster(5, Some(2), 2, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(6, Some(5), 3, Some([0.0, 10.0, 0.0, 10.0])),
        ];
        let w = window(10.0, 0.0, 10.0, 0.0);
        let t = Forest::build(rows, 4).prune(|c| w.admits(c));
        assert_eq!(ids(&t), vec![1]);
        assert!(t.diagnostics.is_empty());
    }

    #[test]
    fn empty_cluster_hides_its_subtree() {
        let rows = vec![
            cluster(1, None, 0, None),
            cluster(2, Some(1), 1, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(7, None, 0, Some([0.0, 10.0, 0.0, 10.0])),
        ];
        let w = window(90.0, -90.0, 180.0, -180.0);
        let t = Forest::build(rows, 4).prune(|c| w.admits(c));
        assert_eq!(ids(&t), vec![7]);
    }

    #[test]
    fn rows_deeper_than_max_level_are_ignored() {
        let rows = vec![
            cluster(1, None, 0, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(2, Some(1), 1, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(3, Some(2), 2, Some([0.0, 10.0, 0.0, 10.0])),
        ];
        let t = Forest::build(rows, 1).prune(|_| true);
        assert_eq!(ids(&t), vec![1, 2]);
    }

    #[test]
    fn cycles_and_orphans_are_reported_without_aborting() {
        let bbox = Some([0.0, 10.0, 0.0, 10.0]);
        let rows = vec![
            cluster(1, None, 0, bbox),
            cluster(10, Some(11), 1, bbox),
            cluster(11, Some(10), 1, bbox),
            cluster(12, Some(10), 2, bbox),
            cluster(20, Some(99), 1, bbox),
            cluster(21, Some(20), 2, bbox),
            cluster(30, Some(30), 1, bbox),
        ];
        let t = Forest::build(rows, 4).prune(|_| true);
        assert_eq!(ids(&t), vec![1]);
        assert!(t.diagnostics.contains(&Diagnostic::Cycle { cluster_id: 10 }));
        assert!(t.diagnostics.contains(&Diagnostic::Cycle { cluster_id: 11 }));
        assert!(t.diagnostics.contains(&Diagnostic::Cycle { cluster_id: 30 }));
        assert!(t.diagnostics.contains(&Diagnostic::Orphan {
            cluster_id: 20,
            parent_id: 99
        }));
        assert_eq!(t.diagnostics.len(), 4);
    }

    #[test]
    fn duplicate_ids_keep_the_first_row() {
        let rows = vec![
            cluster(1, None, 0, Some([0.0, 10.0, 0.0, 10.0])),
            cluster(1, None, 0, None),
        ];
        let forest = Forest::build(rows, 4);
        assert_eq!(forest.len(), 1);
        let t = forest.prune(|_| true);
        assert_eq!(ids(&t), vec![1]);
        assert_eq!(t.diagnostics, vec![Diagnostic::Duplicate { cluster_id: 1 }]);
    }
}
