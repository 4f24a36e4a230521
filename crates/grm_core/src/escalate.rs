//! Escalation engine: walks the region tree upward to find the nearest
//! ancestor region with a worker of the issue's department.
//!
//! `Ok(None)` means escalation is exhausted (already at the root with
//! nobody found) — a terminal, reportable condition, not an error.

use crate::error::GrmError;
use crate::model::Assignee;
use crate::region::{RegionStore, RegionTree, MAX_TREE_DEPTH};
use crate::registry::WorkerRegistry;

/// Find the escalation assignee for a department starting from (and
/// excluding) `region_id`. Picks the lowest-id worker at the first
/// ancestor region that has any.
pub fn escalate_assignee(
    regions: &dyn RegionStore,
    registry: &dyn WorkerRegistry,
    department: u64,
    region_id: &str,
) -> Result<Option<Assignee>, GrmError> {
    let tree = RegionTree::new(regions);
    let mut current = tree.get_required(region_id)?;
    for _ in 0..MAX_TREE_DEPTH {
        let Some(parent) = tree.parent(&current)? else {
            return Ok(None);
        };
        let workers = registry.workers_at(department, &parent.id)?;
        if let Some(worker) = workers.into_iter().min_by_key(|w| w.user_id) {
            return Ok(Some(worker.assignee()));
        }
        current = parent;
    }
    Err(GrmError::CyclicRegionGraph {
        start: region_id.to_string(),
    })
}
