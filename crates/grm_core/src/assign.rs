//! Assignment engine: computes the caseworker (or department head) who
//! should own an issue.
//!
//! Pure with respect to the stores: the engine only reads, callers
//! persist the result. An empty result means "needs operator
//! attention", never an error.
//!
//! Candidate selection is deterministic: free workers and equally
//! loaded workers are ordered by ascending worker id, so running the
//! engine twice over the same snapshot yields the same assignee.

use std::collections::HashSet;

use tracing::debug;

use crate::error::GrmError;
use crate::model::{AssigneeField, Issue, IssueCategory, RegionId};
use crate::region::{RegionStore, RegionTree};
use crate::registry::{Catalog, WorkerRegistry};
use crate::store::IssueStore;

pub struct AssignmentEngine<'a> {
    regions: &'a dyn RegionStore,
    registry: &'a dyn WorkerRegistry,
    catalog: &'a dyn Catalog,
    issues: &'a dyn IssueStore,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(
        regions: &'a dyn RegionStore,
        registry: &'a dyn WorkerRegistry,
        catalog: &'a dyn Catalog,
        issues: &'a dyn IssueStore,
    ) -> Self {
        Self {
            regions,
            registry,
            catalog,
            issues,
        }
    }

    /// Resolve the assignee for an issue from the current
    /// directory/assignment snapshot.
    pub fn assign(&self, issue: &Issue) -> Result<AssigneeField, GrmError> {
        let category = self
            .catalog
            .category(issue.category.id)?
            .ok_or(GrmError::CategoryNotFound(issue.category.id))?;

        let assignee = if category.redirection_protocol {
            self.assign_redirected(issue, &category)?
        } else {
            // Fixed routing: everything in this category goes to the
            // department head.
            let department = self
                .catalog
                .department(category.assigned_department)?
                .ok_or(GrmError::DepartmentNotFound(category.assigned_department))?;
            AssigneeField::Assigned(department.head)
        };

        if !assignee.needs_assignment() {
            return Ok(assignee);
        }

        // Last resort: the designated point-of-contact representative
        // for the issue's region.
        let fallback = self
            .registry
            .point_of_contact(&issue.administrative_region, category.target_level())?;
        if fallback.is_some() {
            debug!(issue = %issue.id, "assigned via point-of-contact fallback");
        }
        Ok(fallback.into())
    }

    /// Dynamic load-balanced routing within the category's department,
    /// scoped to the target region of the routing walk.
    fn assign_redirected(
        &self,
        issue: &Issue,
        category: &IssueCategory,
    ) -> Result<AssigneeField, GrmError> {
        let department = category.assigned_department;
        let target_region = self.target_region(issue, category)?;

        let eligible = self.registry.workers_at(department, &target_region)?;
        let final_status_ids = self.catalog.final_status_ids()?;
        let loads = self
            .issues
            .open_assignment_counts(department, &final_status_ids)?;
        let loaded_ids: HashSet<&str> = loads.iter().map(|l| l.worker_id.as_str()).collect();

        // Prefer the lowest-id worker with no open assignment at all.
        if let Some(free) = eligible
            .iter()
            .find(|w| !loaded_ids.contains(w.user_id.to_string().as_str()))
        {
            return Ok(AssigneeField::Assigned(free.assignee()));
        }

        if !loads.is_empty() {
            // Everyone eligible is busy: fewest open assignments wins,
            // ties already broken by worker id in the aggregate order.
            let eligible_ids: HashSet<String> =
                eligible.iter().map(|w| w.user_id.to_string()).collect();
            for load in &loads {
                if eligible_ids.contains(&load.worker_id) {
                    return Ok(AssigneeField::Assigned(crate::model::Assignee {
                        id: load.worker_id.clone(),
                        name: load.worker_name.clone(),
                    }));
                }
            }
            Ok(AssigneeField::Empty)
        } else if let Some(first) = eligible.first() {
            // Department has no assignment history yet.
            Ok(AssigneeField::Assigned(first.assignee()))
        } else {
            Ok(AssigneeField::Empty)
        }
    }

    /// The region whose workers are eligible for this issue. With a
    /// configured target level this is the ancestor at that level (root
    /// fallback included); without one, a reporting worker pins the
    /// issue to their own region, else the issue's region stands.
    fn target_region(&self, issue: &Issue, category: &IssueCategory) -> Result<RegionId, GrmError> {
        if let Some(level) = category.target_level() {
            let tree = RegionTree::new(self.regions);
            let region = tree.get_required(&issue.administrative_region)?;
            return Ok(tree.ancestor_at_level(&region, level)?.id);
        }
        if let Some(reporter) = &issue.reporter {
            if let Some(worker) = self.registry.worker(reporter.id)? {
                return Ok(worker.administrative_region);
            }
        }
        Ok(issue.administrative_region.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Assignee, Department, IssueStatus, Reporter, StatusRef, Worker};
    use crate::region::tests::sample_store;
    use crate::registry::{InMemoryRegistry, Representative};
    use crate::store::tests::confirmed_issue;
    use crate::store::InMemoryIssueStore;

    fn worker(user_id: u64, department: u64, region: &str) -> Worker {
        Worker {
            user_id,
            name: format!("Worker {user_id}"),
            department,
            administrative_region: region.to_string(),
        }
    }

    fn category(id: u64, redirection: bool, level: Option<&str>) -> IssueCategory {
        IssueCategory {
            id,
            name: "Water supply".into(),
            abbreviation: "WTR".into(),
            assigned_department: 1,
            confidentiality_level: "Confidential".into(),
            redirection_protocol: redirection,
            administrative_level: level.map(str::to_string),
        }
    }

    fn registry_with(categories: Vec<IssueCategory>) -> InMemoryRegistry {
        let mut registry = InMemoryRegistry::new();
        for c in categories {
            registry.add_category(c);
        }
        registry.add_department(Department {
            id: 1,
            name: "Infrastructure".into(),
            head: Assignee {
                id: "100".into(),
                name: "Head of Infrastructure".into(),
            },
        });
        registry.add_status(IssueStatus {
            id: 1,
            name: "Open".into(),
            open_status: true,
            rejected_status: false,
            final_status: false,
        });
        registry.add_status(IssueStatus {
            id: 3,
            name: "Closed".into(),
            open_status: false,
            rejected_status: false,
            final_status: true,
        });
        registry
    }

    fn issue_in(region: &str, category_id: u64) -> Issue {
        let mut issue = confirmed_issue("i-1");
        issue.administrative_region = region.to_string();
        issue.category.id = category_id;
        issue
    }

    #[test]
    fn test_fixed_routing_goes_to_department_head() {
        let regions = sample_store();
        let registry = registry_with(vec![category(1, false, None)]);
        let issues = InMemoryIssueStore::new();
        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);

        // Region is irrelevant for fixed routing.
        for region in ["c1", "s2", "nation"] {
            let assignee = engine.assign(&issue_in(region, 1)).unwrap();
            assert_eq!(assignee.as_assignee().unwrap().id, "100");
        }
    }

    #[test]
    fn test_redirection_targets_ancestor_at_level() {
        let regions = sample_store();
        let mut registry = registry_with(vec![category(1, true, Some("SECTOR"))]);
        registry.add_worker(worker(7, 1, "s1"));
        registry.add_worker(worker(8, 1, "s2")); // wrong sector
        let issues = InMemoryIssueStore::new();
        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);

        let assignee = engine.assign(&issue_in("c1", 1)).unwrap();
        assert_eq!(assignee.as_assignee().unwrap().id, "7");
    }

    #[test]
    fn test_free_worker_preferred_lowest_id() {
        let regions = sample_store();
        let mut registry = registry_with(vec![category(1, true, Some("SECTOR"))]);
        registry.add_worker(worker(9, 1, "s1"));
        registry.add_worker(worker(4, 1, "s1"));
        registry.add_worker(worker(6, 1, "s1"));
        let issues = InMemoryIssueStore::new();

        // Worker 4 is busy; 6 and 9 are free, 6 wins by id.
        let mut open = confirmed_issue("i-open");
        open.assignee = AssigneeField::Assigned(Assignee {
            id: "4".into(),
            name: "Worker 4".into(),
        });
        open.status = Some(StatusRef {
            id: 1,
            name: "Open".into(),
        });
        issues.create(&open).unwrap();

        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);
        let assignee = engine.assign(&issue_in("c1", 1)).unwrap();
        assert_eq!(assignee.as_assignee().unwrap().id, "6");
    }

    #[test]
    fn test_all_busy_picks_fewest_open_assignments() {
        let regions = sample_store();
        let mut registry = registry_with(vec![category(1, true, Some("SECTOR"))]);
        registry.add_worker(worker(4, 1, "s1"));
        registry.add_worker(worker(6, 1, "s1"));
        let issues = InMemoryIssueStore::new();

        let mut n = 0;
        let mut add_open = |worker_id: &str| {
            n += 1;
            let mut open = confirmed_issue(&format!("i-{n}"));
            open.assignee = AssigneeField::Assigned(Assignee {
                id: worker_id.into(),
                name: format!("Worker {worker_id}"),
            });
            open.status = Some(StatusRef {
                id: 1,
                name: "Open".into(),
            });
            issues.create(&open).unwrap();
        };
        add_open("4");
        add_open("4");
        add_open("6");

        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);
        let assignee = engine.assign(&issue_in("c1", 1)).unwrap();
        assert_eq!(assignee.as_assignee().unwrap().id, "6");
    }

    #[test]
    fn test_resolved_issues_do_not_count_as_load() {
        let regions = sample_store();
        let mut registry = registry_with(vec![category(1, true, Some("SECTOR"))]);
        registry.add_worker(worker(4, 1, "s1"));
        registry.add_worker(worker(6, 1, "s1"));
        let issues = InMemoryIssueStore::new();

        // Worker 4's only assignment is closed, so 4 is free again and
        // wins over busy 6 despite the higher raw document count.
        let mut closed = confirmed_issue("i-closed");
        closed.assignee = AssigneeField::Assigned(Assignee {
            id: "4".into(),
            name: "Worker 4".into(),
        });
        closed.status = Some(StatusRef {
            id: 3,
            name: "Closed".into(),
        });
        issues.create(&closed).unwrap();
        let mut open = confirmed_issue("i-open");
        open.assignee = AssigneeField::Assigned(Assignee {
            id: "6".into(),
            name: "Worker 6".into(),
        });
        open.status = Some(StatusRef {
            id: 1,
            name: "Open".into(),
        });
        issues.create(&open).unwrap();

        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);
        let assignee = engine.assign(&issue_in("c1", 1)).unwrap();
        assert_eq!(assignee.as_assignee().unwrap().id, "4");
    }

    #[test]
    fn test_no_worker_falls_back_to_point_of_contact() {
        let regions = sample_store();
        let mut registry = registry_with(vec![category(1, true, Some("SECTOR"))]);
        registry.add_representative(Representative {
            id: "rep-c1".into(),
            name: "Cell Secretary".into(),
            administrative_region: "c1".into(),
            level: "SECTOR".into(),
            village_secretary: true,
        });
        let issues = InMemoryIssueStore::new();
        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);

        let assignee = engine.assign(&issue_in("c1", 1)).unwrap();
        assert_eq!(assignee.as_assignee().unwrap().id, "rep-c1");
    }

    #[test]
    fn test_nobody_anywhere_resolves_empty() {
        let regions = sample_store();
        let registry = registry_with(vec![category(1, true, Some("SECTOR"))]);
        let issues = InMemoryIssueStore::new();
        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);

        assert_eq!(engine.assign(&issue_in("c1", 1)).unwrap(), AssigneeField::Empty);
    }

    #[test]
    fn test_missing_target_level_uses_reporter_region() {
        let regions = sample_store();
        let mut registry = registry_with(vec![category(1, true, None)]);
        registry.add_worker(worker(2, 1, "s2"));
        registry.add_worker(worker(3, 1, "c1"));
        let issues = InMemoryIssueStore::new();
        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);

        // Reporter (worker 2) operates at s2; the issue routes there
        // even though it was filed under c1.
        let mut issue = issue_in("c1", 1);
        issue.reporter = Some(Reporter {
            id: 2,
            name: "Worker 2".into(),
        });
        let assignee = engine.assign(&issue).unwrap();
        assert_eq!(assignee.as_assignee().unwrap().id, "2");

        // Without a registered reporter the issue's own region stands.
        issue.reporter = None;
        let assignee = engine.assign(&issue).unwrap();
        assert_eq!(assignee.as_assignee().unwrap().id, "3");
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let regions = sample_store();
        let mut registry = registry_with(vec![category(1, true, Some("SECTOR"))]);
        for id in [11, 5, 8] {
            registry.add_worker(worker(id, 1, "s1"));
        }
        let issues = InMemoryIssueStore::new();
        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);

        let first = engine.assign(&issue_in("c1", 1)).unwrap();
        let second = engine.assign(&issue_in("c1", 1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_assignee().unwrap().id, "5");
    }

    #[test]
    fn test_unknown_category_is_fatal() {
        let regions = sample_store();
        let registry = registry_with(vec![]);
        let issues = InMemoryIssueStore::new();
        let engine = AssignmentEngine::new(&regions, &registry, &registry, &issues);

        assert!(matches!(
            engine.assign(&issue_in("c1", 99)),
            Err(GrmError::CategoryNotFound(99))
        ));
    }
}
