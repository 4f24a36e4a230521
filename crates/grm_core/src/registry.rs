//! Read interfaces over reference data: workers, departments,
//! categories, statuses and region-scoped representatives.
//!
//! No core algorithm mutates any of this; the in-memory implementation
//! exists for tests and for import tooling that materializes a registry
//! before writing it out.

use std::collections::HashMap;

use crate::error::GrmError;
use crate::model::{Assignee, Department, IssueCategory, IssueStatus, Worker};

/// Read interface over caseworkers.
pub trait WorkerRegistry {
    fn worker(&self, user_id: u64) -> Result<Option<Worker>, GrmError>;

    /// Workers authorized for a department at exactly this region,
    /// ordered by ascending user id so callers pick deterministically.
    fn workers_at(&self, department: u64, region_id: &str) -> Result<Vec<Worker>, GrmError>;

    /// The designated point-of-contact representative registered at a
    /// region ("village secretary" role), used as the last-resort
    /// assignee. `level` narrows the lookup when the category targets a
    /// specific rank.
    fn point_of_contact(
        &self,
        region_id: &str,
        level: Option<&str>,
    ) -> Result<Option<Assignee>, GrmError>;
}

/// Read interface over static reference documents.
pub trait Catalog {
    fn category(&self, id: u64) -> Result<Option<IssueCategory>, GrmError>;
    fn department(&self, id: u64) -> Result<Option<Department>, GrmError>;
    fn status(&self, id: u64) -> Result<Option<IssueStatus>, GrmError>;

    /// All configured statuses; used to derive the set of final
    /// (resolved) status ids for assignment-load aggregates.
    fn statuses(&self) -> Result<Vec<IssueStatus>, GrmError>;

    fn final_status_ids(&self) -> Result<Vec<u64>, GrmError> {
        Ok(self
            .statuses()?
            .into_iter()
            .filter(|s| s.final_status)
            .map(|s| s.id)
            .collect())
    }
}

/// A region-scoped representative record.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Representative {
    pub id: String,
    pub name: String,
    pub administrative_region: String,
    pub level: String,
    /// Only representatives flagged as the designated point of contact
    /// are eligible for fallback assignment.
    pub village_secretary: bool,
}

/// In-memory registry + catalog.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRegistry {
    workers: HashMap<u64, Worker>,
    representatives: Vec<Representative>,
    categories: HashMap<u64, IssueCategory>,
    departments: HashMap<u64, Department>,
    statuses: HashMap<u64, IssueStatus>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker(&mut self, worker: Worker) {
        self.workers.insert(worker.user_id, worker);
    }

    pub fn add_representative(&mut self, representative: Representative) {
        self.representatives.push(representative);
    }

    pub fn add_category(&mut self, category: IssueCategory) {
        self.categories.insert(category.id, category);
    }

    pub fn add_department(&mut self, department: Department) {
        self.departments.insert(department.id, department);
    }

    pub fn add_status(&mut self, status: IssueStatus) {
        self.statuses.insert(status.id, status);
    }
}

impl WorkerRegistry for InMemoryRegistry {
    fn worker(&self, user_id: u64) -> Result<Option<Worker>, GrmError> {
        Ok(self.workers.get(&user_id).cloned())
    }

    fn workers_at(&self, department: u64, region_id: &str) -> Result<Vec<Worker>, GrmError> {
        let mut workers: Vec<_> = self
            .workers
            .values()
            .filter(|w| w.department == department && w.administrative_region == region_id)
            .cloned()
            .collect();
        workers.sort_by_key(|w| w.user_id);
        Ok(workers)
    }

    fn point_of_contact(
        &self,
        region_id: &str,
        level: Option<&str>,
    ) -> Result<Option<Assignee>, GrmError> {
        Ok(self
            .representatives
            .iter()
            .filter(|r| {
                r.village_secretary
                    && r.administrative_region == region_id
                    && level.map_or(true, |l| r.level == l)
            })
            .min_by(|a, b| a.id.cmp(&b.id))
            .map(|r| Assignee {
                id: r.id.clone(),
                name: r.name.clone(),
            }))
    }
}

impl Catalog for InMemoryRegistry {
    fn category(&self, id: u64) -> Result<Option<IssueCategory>, GrmError> {
        Ok(self.categories.get(&id).cloned())
    }

    fn department(&self, id: u64) -> Result<Option<Department>, GrmError> {
        Ok(self.departments.get(&id).cloned())
    }

    fn status(&self, id: u64) -> Result<Option<IssueStatus>, GrmError> {
        Ok(self.statuses.get(&id).cloned())
    }

    fn statuses(&self) -> Result<Vec<IssueStatus>, GrmError> {
        let mut statuses: Vec<_> = self.statuses.values().cloned().collect();
        statuses.sort_by_key(|s| s.id);
        Ok(statuses)
    }
}
