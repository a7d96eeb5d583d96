//! Hierarchical cluster query engine.
//!
//! A request is compiled into predicates, the level-bounded cluster index is
//! loaded in one read, the forest is pruned in memory against the viewport and
//! date window, and the surviving leaves are hydrated in a second read.

pub mod assemble;
pub mod filter;
pub mod model;
pub mod traversal;

use log::{debug, warn};

use self::assemble::Assembly;
use self::filter::{ClusterRequest, CompiledFilter, EventCriteria};
use self::model::{ClusterOut, ClusterRow, EventDetail};
use self::traversal::Forest;
use crate::deadline::Deadline;
use crate::error::Error;

/// Rows returned by the cluster index read.
#[derive(Debug, Default)]
pub struct ClusterLoad {
    pub rows: Vec<ClusterRow>,
    /// Rows dropped because they could not be decoded.
    pub skipped: usize,
}

/// Which events a hydration read covers.
#[derive(Clone, Copy, Debug)]
pub enum EventScope<'a> {
    Ids(&'a [i32]),
    All,
}

/// Read-only access to persisted clusters and events.
pub trait ClusterStore {
    /// Loads every cluster with `level <= max_level` along with its distinct
    /// member ids. When the filter has event conditions only clusters with at
    /// least one matching member are returned.
    ///
    /// # Errors
    ///
    /// Fails when the read itself fails; undecodable rows are counted in
    /// `ClusterLoad::skipped` instead.
    fn load_clusters(
        &self,
        max_level: i32,
        filter: &CompiledFilter,
        deadline: Deadline,
    ) -> Result<ClusterLoad, Error>;

    /// Loads events in scope that satisfy the filter's event conditions,
    /// with their tag names and cluster ids.
    ///
    /// # Errors
    ///
    /// Fails when the read fails.
    fn hydrate_events(
        &self,
        scope: EventScope<'_>,
        filter: &CompiledFilter,
        deadline: Deadline,
    ) -> Result<Vec<EventDetail>, Error>;
}

#[derive(Clone)]
pub struct Engine<S> {
    store: S,
}

impl<S: ClusterStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Runs a hierarchical cluster query.
    ///
    /// # Errors
    ///
    /// Propagates storage failures and deadline expiry. Returns
    /// `StorageInconsistent` if every loaded row was undecodable.
    pub fn hierarchical_clusters(
        &self,
        request: &ClusterRequest,
        deadline: Deadline,
    ) -> Result<Vec<ClusterOut>, Error> {
        let viewport = &request.viewport;
        if viewport.west > viewport.east {
            debug!(
                "viewport west {} is east of east {}; longitudes are compared as given",
                viewport.west, viewport.east
            );
        }

        let filter = CompiledFilter::for_clusters(request);
        let load = self
            .store
            .load_clusters(request.max_level, &filter, deadline)?;
        if load.skipped > 0 {
            warn!("skipped {} undecodable cluster rows", load.skipped);
            if load.rows.is_empty() {
                return Err(Error::StorageInconsistent(format!(
                    "none of {} cluster rows could be decoded",
                    load.skipped
                )));
            }
        }
        let loaded = load.rows.len();

        let forest = Forest::build(load.rows, request.max_level);
        if forest.is_empty() {
            debug!("no clusters at or above level {}", request.max_level);
        }
        let traversal = forest.prune(|cluster| filter.admits(cluster));
        debug!(
            "clusters: {} loaded, {} pruned, {} survived",
            loaded,
            traversal.pruned,
            traversal.survivors.len()
        );
        deadline.remaining()?;

        let plan = Assembly::plan(traversal.survivors, request.max_clusters);
        let ids = plan.leaf_event_ids();
        let events = if ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .hydrate_events(EventScope::Ids(&ids), &filter, deadline)?
        };
        debug!("hydrated {} of {} leaf events", events.len(), ids.len());

        Ok(plan.attach(events))
    }

    /// Returns every event matching the criteria, newest first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures and deadline expiry.
    pub fn filter_events(
        &self,
        criteria: &EventCriteria,
        deadline: Deadline,
    ) -> Result<Vec<EventDetail>, Error> {
        let filter = CompiledFilter::for_events(criteria);
        let events = self
            .store
            .hydrate_events(EventScope::All, &filter, deadline)?;
        debug!("{} events matched the filter", events.len());
        Ok(events.into_iter().map(EventDetail::sanitized).collect())
    }
}
