//! Issue store interface and the shared repair predicates.
//!
//! The backing store is key-addressed and revision-versioned: every
//! update carries the revision it read, and a write against a stale
//! revision fails with [`GrmError::RevisionConflict`] instead of
//! silently overwriting. Reconciliation jobs run concurrently with
//! live user edits, so every per-issue repair goes through
//! [`update_with_retry`]: re-read, re-check the predicate, re-apply
//! only the still-needed changes, bounded attempts.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use crate::error::GrmError;
use crate::model::Issue;
use crate::pii::PII_MASK;

/// Default bound for retry-on-conflict around a per-issue repair write.
pub const DEFAULT_WRITE_RETRIES: usize = 3;

/// An issue together with the revision it was read at.
#[derive(Debug, Clone)]
pub struct VersionedIssue {
    pub issue: Issue,
    pub rev: u64,
}

/// Open-assignment load of one worker within a department, recomputed
/// from the issue documents themselves on every call (no cached
/// counter to drift).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentLoad {
    pub worker_id: String,
    pub worker_name: String,
    pub open_issues: u64,
}

pub trait IssueStore {
    fn get(&self, id: &str) -> Result<Option<VersionedIssue>, GrmError>;

    /// Insert a new issue document; returns its initial revision.
    fn create(&self, issue: &Issue) -> Result<u64, GrmError>;

    /// Update an existing document. Fails with
    /// [`GrmError::RevisionConflict`] when `expected_rev` is stale;
    /// returns the new revision otherwise.
    fn update(&self, issue: &Issue, expected_rev: u64) -> Result<u64, GrmError>;

    /// Ids of confirmed issues matching the integrity-repair predicate.
    fn needing_integrity_repair(&self) -> Result<Vec<String>, GrmError>;

    /// Ids of confirmed issues flagged for escalation with a populated
    /// assignee.
    fn pending_escalation(&self) -> Result<Vec<String>, GrmError>;

    /// Ids of confirmed issues with a reachable contact, a known
    /// status, and at least one notification event still unfired.
    fn pending_notification(&self) -> Result<Vec<String>, GrmError>;

    /// Per-worker open-assignment counts for a department, ascending by
    /// `(open_issues, worker_id)` with the id compared numerically.
    /// Issues whose status id is in `final_status_ids` are resolved and
    /// excluded.
    fn open_assignment_counts(
        &self,
        department: u64,
        final_status_ids: &[u64],
    ) -> Result<Vec<AssignmentLoad>, GrmError>;

    /// Highest `auto_increment_id` currently observed; 0 when none.
    fn max_auto_increment_id(&self) -> Result<u64, GrmError>;
}

// ---------------------------------------------------------------------
// Repair predicates, shared by every store implementation so the
// secondary-index queries and the in-closure re-checks agree.
// ---------------------------------------------------------------------

/// Either PII field still carries cleartext.
pub fn has_unmasked_pii(issue: &Issue) -> bool {
    let citizen_clear = !issue.citizen.is_empty() && issue.citizen != PII_MASK;
    let contact_clear = issue
        .contact_information
        .as_ref()
        .map_or(false, |c| !c.contact.is_empty() && c.contact != PII_MASK);
    citizen_clear || contact_clear
}

pub fn needs_integrity_repair(issue: &Issue) -> bool {
    issue.confirmed
        && (issue.auto_increment_id.is_none()
            || issue.internal_code.as_deref().map_or(true, str::is_empty)
            || issue.assignee.needs_assignment()
            || has_unmasked_pii(issue))
}

pub fn needs_escalation(issue: &Issue) -> bool {
    issue.confirmed && issue.escalate_flag && issue.assignee.as_assignee().is_some()
}

pub fn needs_notification(issue: &Issue) -> bool {
    issue.confirmed
        && issue
            .contact_information
            .as_ref()
            .map_or(false, |c| c.channel.is_reachable())
        && issue.status.is_some()
        && !(issue.accepted_alert_message
            && issue.rejected_alert_message
            && issue.closed_alert_message)
}

fn resolved(issue: &Issue, final_status_ids: &[u64]) -> bool {
    issue
        .status
        .as_ref()
        .map_or(false, |s| final_status_ids.contains(&s.id))
}

/// Compute [`AssignmentLoad`]s from an iterator of issue documents.
///
/// Ordered by `(open_issues, worker id)` with the id compared
/// numerically, so "9" sorts before "10" and load ties break the same
/// way as every other worker-id tie-break in the crate. Non-numeric
/// ids sort after numeric ones, lexicographically.
pub fn assignment_loads<'a, I>(
    issues: I,
    department: u64,
    final_status_ids: &[u64],
) -> Vec<AssignmentLoad>
where
    I: IntoIterator<Item = &'a Issue>,
{
    let mut counts: HashMap<String, (String, u64)> = HashMap::new();
    for issue in issues {
        if !issue.confirmed
            || issue.category.assigned_department != department
            || resolved(issue, final_status_ids)
        {
            continue;
        }
        if let Some(assignee) = issue.assignee.as_assignee() {
            let entry = counts
                .entry(assignee.id.clone())
                .or_insert_with(|| (assignee.name.clone(), 0));
            entry.1 += 1;
        }
    }
    let mut loads: Vec<AssignmentLoad> = counts
        .into_iter()
        .map(|(worker_id, (worker_name, open_issues))| AssignmentLoad {
            worker_id,
            worker_name,
            open_issues,
        })
        .collect();
    loads.sort_by(|a, b| {
        a.open_issues
            .cmp(&b.open_issues)
            .then_with(|| numeric_id_order(&a.worker_id).cmp(&numeric_id_order(&b.worker_id)))
    });
    loads
}

fn numeric_id_order(id: &str) -> (u64, &str) {
    (id.parse().unwrap_or(u64::MAX), id)
}

// ---------------------------------------------------------------------
// Conflict-bounded repair writes
// ---------------------------------------------------------------------

/// Re-read `id`, apply `repair` (which returns whether anything still
/// needed changing), and persist. On a revision conflict the whole
/// read-repair-write cycle is retried up to `retries` more times, so a
/// concurrent edit only delays a repair instead of failing the pass.
///
/// Returns the new revision, or `None` when the document turned out to
/// need no write.
pub fn update_with_retry<S, F>(
    store: &S,
    id: &str,
    retries: usize,
    mut repair: F,
) -> Result<Option<u64>, GrmError>
where
    S: IssueStore + ?Sized,
    F: FnMut(&mut Issue) -> Result<bool, GrmError>,
{
    let mut attempt = 0;
    loop {
        let VersionedIssue { mut issue, rev } = store
            .get(id)?
            .ok_or_else(|| GrmError::IssueNotFound(id.to_string()))?;
        if !repair(&mut issue)? {
            return Ok(None);
        }
        match store.update(&issue, rev) {
            Ok(new_rev) => return Ok(Some(new_rev)),
            Err(e @ GrmError::RevisionConflict { .. }) => {
                if attempt >= retries {
                    return Err(e);
                }
                attempt += 1;
                debug!(issue = %id, attempt, "revision conflict, retrying repair");
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------

/// In-memory issue store with the same revision semantics as the
/// SQLite-backed store. Used by tests and one-shot tools.
#[derive(Debug, Default)]
pub struct InMemoryIssueStore {
    docs: Mutex<HashMap<String, VersionedIssue>>,
}

impl InMemoryIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matching_ids<P: Fn(&Issue) -> bool>(&self, predicate: P) -> Result<Vec<String>, GrmError> {
        let docs = self.docs.lock().expect("issue store lock poisoned");
        let mut ids: Vec<String> = docs
            .values()
            .filter(|v| predicate(&v.issue))
            .map(|v| v.issue.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl IssueStore for InMemoryIssueStore {
    fn get(&self, id: &str) -> Result<Option<VersionedIssue>, GrmError> {
        let docs = self.docs.lock().expect("issue store lock poisoned");
        Ok(docs.get(id).cloned())
    }

    fn create(&self, issue: &Issue) -> Result<u64, GrmError> {
        let mut docs = self.docs.lock().expect("issue store lock poisoned");
        if docs.contains_key(&issue.id) {
            return Err(GrmError::Store(format!(
                "document already exists: {}",
                issue.id
            )));
        }
        docs.insert(
            issue.id.clone(),
            VersionedIssue {
                issue: issue.clone(),
                rev: 1,
            },
        );
        Ok(1)
    }

    fn update(&self, issue: &Issue, expected_rev: u64) -> Result<u64, GrmError> {
        let mut docs = self.docs.lock().expect("issue store lock poisoned");
        let entry = docs
            .get_mut(&issue.id)
            .ok_or_else(|| GrmError::IssueNotFound(issue.id.clone()))?;
        if entry.rev != expected_rev {
            return Err(GrmError::RevisionConflict {
                id: issue.id.clone(),
            });
        }
        entry.issue = issue.clone();
        entry.rev += 1;
        Ok(entry.rev)
    }

    fn needing_integrity_repair(&self) -> Result<Vec<String>, GrmError> {
        self.matching_ids(needs_integrity_repair)
    }

    fn pending_escalation(&self) -> Result<Vec<String>, GrmError> {
        self.matching_ids(needs_escalation)
    }

    fn pending_notification(&self) -> Result<Vec<String>, GrmError> {
        self.matching_ids(needs_notification)
    }

    fn open_assignment_counts(
        &self,
        department: u64,
        final_status_ids: &[u64],
    ) -> Result<Vec<AssignmentLoad>, GrmError> {
        let docs = self.docs.lock().expect("issue store lock poisoned");
        Ok(assignment_loads(
            docs.values().map(|v| &v.issue),
            department,
            final_status_ids,
        ))
    }

    fn max_auto_increment_id(&self) -> Result<u64, GrmError> {
        let docs = self.docs.lock().expect("issue store lock poisoned");
        Ok(docs
            .values()
            .filter_map(|v| v.issue.auto_increment_id)
            .max()
            .unwrap_or(0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{
        Assignee, AssigneeField, CategoryRef, ContactChannel, ContactInformation, Issue, StatusRef,
    };
    use chrono::Utc;

    pub(crate) fn draft_issue(id: &str) -> Issue {
        Issue {
            id: id.to_string(),
            auto_increment_id: None,
            internal_code: None,
            category: CategoryRef {
                id: 1,
                name: "Water".into(),
                assigned_department: 1,
            },
            administrative_region: "c1".into(),
            assignee: AssigneeField::Missing,
            status: None,
            confirmed: false,
            escalate_flag: false,
            citizen: String::new(),
            contact_information: None,
            reporter: None,
            accepted_alert_message: false,
            rejected_alert_message: false,
            closed_alert_message: false,
            comments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub(crate) fn confirmed_issue(id: &str) -> Issue {
        let mut issue = draft_issue(id);
        issue.confirmed = true;
        issue.citizen = "Jane Citizen".into();
        issue.contact_information = Some(ContactInformation {
            channel: ContactChannel::PhoneNumber,
            contact: "0788000001".into(),
        });
        issue.status = Some(StatusRef {
            id: 1,
            name: "Open".into(),
        });
        issue
    }

    #[test]
    fn test_update_requires_current_revision() {
        let store = InMemoryIssueStore::new();
        let issue = draft_issue("i-1");
        let rev = store.create(&issue).unwrap();

        let rev2 = store.update(&issue, rev).unwrap();
        assert_eq!(rev2, rev + 1);
        assert!(matches!(
            store.update(&issue, rev),
            Err(GrmError::RevisionConflict { .. })
        ));
    }

    #[test]
    fn test_repair_predicates() {
        let draft = draft_issue("i-1");
        assert!(!needs_integrity_repair(&draft));

        let confirmed = confirmed_issue("i-2");
        assert!(needs_integrity_repair(&confirmed));
        assert!(has_unmasked_pii(&confirmed));
        assert!(needs_notification(&confirmed));
        assert!(!needs_escalation(&confirmed));

        let mut repaired = confirmed_issue("i-3");
        repaired.auto_increment_id = Some(7);
        repaired.internal_code = Some("WTR-c1-7".into());
        repaired.assignee = AssigneeField::Assigned(Assignee {
            id: "3".into(),
            name: "W".into(),
        });
        repaired.citizen = PII_MASK.into();
        repaired.contact_information.as_mut().unwrap().contact = PII_MASK.into();
        assert!(!needs_integrity_repair(&repaired));

        repaired.escalate_flag = true;
        assert!(needs_escalation(&repaired));
    }

    #[test]
    fn test_assignment_loads_orders_by_count_then_id() {
        let store = InMemoryIssueStore::new();
        let mut n = 0;
        let mut add = |worker: &str, status_id: u64| {
            n += 1;
            let mut issue = confirmed_issue(&format!("i-{n}"));
            issue.assignee = AssigneeField::Assigned(Assignee {
                id: worker.into(),
                name: format!("Worker {worker}"),
            });
            issue.status = Some(StatusRef {
                id: status_id,
                name: "s".into(),
            });
            store.create(&issue).unwrap();
        };
        add("9", 1);
        add("9", 1);
        add("2", 1);
        add("5", 1);
        add("5", 3); // resolved, not counted

        let loads = store.open_assignment_counts(1, &[3]).unwrap();
        let ids: Vec<&str> = loads.iter().map(|l| l.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "5", "9"]);
        assert_eq!(loads[2].open_issues, 2);
    }

    #[test]
    fn test_assignment_load_ties_break_numerically() {
        let store = InMemoryIssueStore::new();
        for (n, worker) in ["10", "9"].iter().enumerate() {
            let mut issue = confirmed_issue(&format!("i-{n}"));
            issue.assignee = AssigneeField::Assigned(Assignee {
                id: (*worker).into(),
                name: format!("Worker {worker}"),
            });
            store.create(&issue).unwrap();
        }

        let loads = store.open_assignment_counts(1, &[]).unwrap();
        let ids: Vec<&str> = loads.iter().map(|l| l.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["9", "10"]);
    }

    #[test]
    fn test_update_with_retry_reapplies_after_conflict() {
        let store = InMemoryIssueStore::new();
        let mut issue = confirmed_issue("i-1");
        store.create(&issue).unwrap();

        // Simulate a concurrent edit landing between the job's read and
        // write: the first repair attempt writes against a stale rev.
        let mut first = true;
        let result = update_with_retry(&store, "i-1", 2, |doc| {
            if first {
                first = false;
                issue.citizen = "edited concurrently".into();
                let current = store.get("i-1").unwrap().unwrap();
                store.update(&issue, current.rev).unwrap();
            }
            doc.auto_increment_id = Some(1);
            Ok(true)
        })
        .unwrap();

        assert!(result.is_some());
        let stored = store.get("i-1").unwrap().unwrap().issue;
        assert_eq!(stored.auto_increment_id, Some(1));
        // The concurrent edit survived the retried repair.
        assert_eq!(stored.citizen, "edited concurrently");
    }

    #[test]
    fn test_update_with_retry_no_change_writes_nothing() {
        let store = InMemoryIssueStore::new();
        store.create(&draft_issue("i-1")).unwrap();
        let before = store.get("i-1").unwrap().unwrap().rev;
        let result = update_with_retry(&store, "i-1", 2, |_| Ok(false)).unwrap();
        assert!(result.is_none());
        assert_eq!(store.get("i-1").unwrap().unwrap().rev, before);
    }

    #[test]
    fn test_max_auto_increment_id() {
        let store = InMemoryIssueStore::new();
        assert_eq!(store.max_auto_increment_id().unwrap(), 0);
        let mut issue = draft_issue("i-1");
        issue.auto_increment_id = Some(41);
        store.create(&issue).unwrap();
        assert_eq!(store.max_auto_increment_id().unwrap(), 41);
    }
}
