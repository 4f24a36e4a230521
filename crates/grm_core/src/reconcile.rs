//! Reconciliation jobs: periodic, idempotent batch passes that repair
//! issues left incomplete by partial failures.
//!
//! Every job scans confirmed issues matching a "needs repair"
//! predicate, runs one repair pass per matched issue, and persists only
//! when something changed. A failure on one issue is collected into the
//! report and never aborts the batch. Per-issue writes go through
//! bounded retry-on-conflict (see [`crate::store::update_with_retry`]),
//! and each job run honors an overall deadline: once past it no new
//! per-issue repair starts and the report notes partial completion.

use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::assign::AssignmentEngine;
use crate::error::GrmError;
use crate::escalate::escalate_assignee;
use crate::model::{AssigneeField, Comment, Issue};
use crate::notify::{message_for, Channel, NotificationEvent, Notifier};
use crate::pii::{anonymize_issue, reveal, Cipher, PiiKind, PiiVault, PII_MASK};
use crate::region::RegionStore;
use crate::registry::{Catalog, WorkerRegistry};
use crate::store::{
    needs_escalation, needs_integrity_repair, update_with_retry, IssueStore,
};

/// Author recorded on system-generated audit comments.
pub const SYSTEM_COMMENT_AUTHOR: &str = "GRM System";

/// Everything a job run needs, passed explicitly (no globals).
pub struct JobContext<'a> {
    pub regions: &'a dyn RegionStore,
    pub registry: &'a dyn WorkerRegistry,
    pub catalog: &'a dyn Catalog,
    pub issues: &'a dyn IssueStore,
    pub vault: &'a dyn PiiVault,
    pub cipher: &'a dyn Cipher,
    pub notifier: &'a dyn Notifier,
    /// Once past this instant, the job stops starting new per-issue
    /// repairs and reports partial completion.
    pub deadline: Option<Instant>,
    /// Bound on retry-on-conflict cycles per issue write.
    pub write_retries: usize,
}

impl JobContext<'_> {
    fn past_deadline(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

/// Summary of an integrity-repair pass.
#[derive(Debug, Default, Serialize)]
pub struct CheckReport {
    pub errors: Vec<String>,
    pub auto_increment_id_updated: Vec<String>,
    pub internal_code_updated: Vec<String>,
    pub assignee_updated: Vec<String>,
    pub pii_anonymized: Vec<String>,
    pub updated_issues: usize,
    pub deadline_reached: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct AppliedRepairs {
    auto_increment_id: bool,
    internal_code: bool,
    assignee: bool,
    pii: bool,
}

impl AppliedRepairs {
    fn any(&self) -> bool {
        self.auto_increment_id || self.internal_code || self.assignee || self.pii
    }
}

/// Integrity repair: missing auto-increment ids, missing internal
/// codes, un-masked PII, missing assignees.
pub fn check_issues(ctx: &JobContext) -> CheckReport {
    let mut report = CheckReport::default();
    let ids = match ctx.issues.needing_integrity_repair() {
        Ok(ids) => ids,
        Err(e) => {
            report.errors.push(format!("scan failed: {e}"));
            return report;
        }
    };
    debug!(count = ids.len(), "integrity repair scan");

    for id in ids {
        if ctx.past_deadline() {
            warn!("integrity repair deadline reached, reporting partial completion");
            report.deadline_reached = true;
            break;
        }

        let mut applied = AppliedRepairs::default();
        let mut step_errors: Vec<String> = Vec::new();
        let outcome = update_with_retry(ctx.issues, &id, ctx.write_retries, |issue| {
            // A concurrent edit may have completed the issue already.
            applied = AppliedRepairs::default();
            step_errors.clear();
            if !needs_integrity_repair(issue) {
                return Ok(false);
            }
            repair_issue(ctx, issue, &mut applied, &mut step_errors);
            Ok(applied.any())
        });

        for e in step_errors {
            report.errors.push(format!("issue {id}: {e}"));
        }
        match outcome {
            Ok(Some(_)) => {
                report.updated_issues += 1;
                if applied.auto_increment_id {
                    report.auto_increment_id_updated.push(id.clone());
                }
                if applied.internal_code {
                    report.internal_code_updated.push(id.clone());
                }
                if applied.assignee {
                    report.assignee_updated.push(id.clone());
                }
                if applied.pii {
                    report.pii_anonymized.push(id.clone());
                }
            }
            Ok(None) => {}
            Err(e) => report.errors.push(format!("issue {id}: {e}")),
        }
    }
    report
}

/// One repair pass over a single issue document. Each step is
/// individually guarded: a failing step records an error and the
/// remaining steps still run.
fn repair_issue(
    ctx: &JobContext,
    issue: &mut Issue,
    applied: &mut AppliedRepairs,
    errors: &mut Vec<String>,
) {
    let auto_increment_id = match issue.auto_increment_id {
        Some(existing) => Some(existing),
        // Next value from the current maximum; issues repaired earlier
        // in this batch are already persisted and counted.
        None => match ctx.issues.max_auto_increment_id() {
            Ok(max) => {
                issue.auto_increment_id = Some(max + 1);
                applied.auto_increment_id = true;
                Some(max + 1)
            }
            Err(e) => {
                errors.push(format!("auto_increment_id: {e}"));
                None
            }
        },
    };

    if issue.internal_code.as_deref().map_or(true, str::is_empty) {
        match ctx.catalog.category(issue.category.id) {
            Ok(Some(category)) => {
                if let Some(seq) = auto_increment_id {
                    issue.internal_code =
                        Some(issue.derive_internal_code(&category.abbreviation, seq));
                    applied.internal_code = true;
                }
            }
            Ok(None) => errors.push(format!(
                "internal_code: {}",
                GrmError::CategoryNotFound(issue.category.id)
            )),
            Err(e) => errors.push(format!("internal_code: {e}")),
        }
    }

    match anonymize_issue(issue, ctx.vault, ctx.cipher) {
        Ok(true) => applied.pii = true,
        Ok(false) => {}
        Err(e) => errors.push(format!("anonymization: {e}")),
    }

    if issue.assignee.needs_assignment() {
        let engine = AssignmentEngine::new(ctx.regions, ctx.registry, ctx.catalog, ctx.issues);
        match engine.assign(issue) {
            Ok(AssigneeField::Assigned(assignee)) => {
                issue.comments.push(Comment {
                    author: SYSTEM_COMMENT_AUTHOR.to_string(),
                    body: format!("Issue assigned to {}", assignee.name),
                    created_at: Utc::now(),
                });
                issue.assignee = AssigneeField::Assigned(assignee);
                applied.assignee = true;
            }
            // Nobody eligible anywhere: left for operator attention,
            // re-checked next run.
            Ok(_) => debug!(issue = %issue.id, "no assignment candidate"),
            Err(e) => errors.push(format!("assignee: {e}")),
        }
    }
}

/// Summary of an escalation pass.
#[derive(Debug, Default, Serialize)]
pub struct EscalateReport {
    pub errors: Vec<String>,
    pub issues_updated: Vec<String>,
    /// Issues whose escalation walk reached the root without finding a
    /// worker; the flag stays set and the issue needs operator review.
    pub escalation_exhausted: Vec<String>,
    pub updated_issues: usize,
    pub deadline_reached: bool,
}

/// Escalation repair: replace the assignee of flagged issues with one
/// found further up the region tree and clear the flag.
pub fn escalate_issues(ctx: &JobContext) -> EscalateReport {
    let mut report = EscalateReport::default();
    let ids = match ctx.issues.pending_escalation() {
        Ok(ids) => ids,
        Err(e) => {
            report.errors.push(format!("scan failed: {e}"));
            return report;
        }
    };
    debug!(count = ids.len(), "escalation scan");

    for id in ids {
        if ctx.past_deadline() {
            warn!("escalation deadline reached, reporting partial completion");
            report.deadline_reached = true;
            break;
        }

        let mut exhausted = false;
        let outcome = update_with_retry(ctx.issues, &id, ctx.write_retries, |issue| {
            exhausted = false;
            if !needs_escalation(issue) {
                return Ok(false);
            }
            let category = ctx
                .catalog
                .category(issue.category.id)?
                .ok_or(GrmError::CategoryNotFound(issue.category.id))?;
            match escalate_assignee(
                ctx.regions,
                ctx.registry,
                category.assigned_department,
                &issue.administrative_region,
            )? {
                Some(assignee) => {
                    issue.assignee = AssigneeField::Assigned(assignee);
                    issue.escalate_flag = false;
                    Ok(true)
                }
                None => {
                    exhausted = true;
                    Ok(false)
                }
            }
        });

        match outcome {
            Ok(Some(_)) => {
                report.updated_issues += 1;
                report.issues_updated.push(id);
            }
            Ok(None) if exhausted => report.escalation_exhausted.push(id),
            Ok(None) => {}
            Err(e) => report.errors.push(format!("issue {id}: {e}")),
        }
    }
    report
}

/// Summary of a notification pass.
#[derive(Debug, Default, Serialize)]
pub struct NotifyReport {
    pub errors: Vec<String>,
    pub accepted_sent: Vec<String>,
    pub rejected_sent: Vec<String>,
    pub closed_sent: Vec<String>,
    pub updated_issues: usize,
    pub deadline_reached: bool,
}

/// Notification repair: at-least-once delivery of the three lifecycle
/// events. A flag is set only after the transport confirms delivery, so
/// transient failures are retried on the next run and successes are
/// never resent.
pub fn notify_issues(ctx: &JobContext) -> NotifyReport {
    let mut report = NotifyReport::default();
    let ids = match ctx.issues.pending_notification() {
        Ok(ids) => ids,
        Err(e) => {
            report.errors.push(format!("scan failed: {e}"));
            return report;
        }
    };
    debug!(count = ids.len(), "notification scan");

    for id in ids {
        if ctx.past_deadline() {
            warn!("notification deadline reached, reporting partial completion");
            report.deadline_reached = true;
            break;
        }
        if let Err(e) = notify_one(ctx, &id, &mut report) {
            report.errors.push(format!("issue {id}: {e}"));
        }
    }
    report
}

fn event_due(issue: &Issue, status_open: bool, status_rejected: bool, status_final: bool) -> Vec<NotificationEvent> {
    NotificationEvent::all()
        .into_iter()
        .filter(|event| match event {
            NotificationEvent::Accepted => status_open && !issue.accepted_alert_message,
            NotificationEvent::Rejected => status_rejected && !issue.rejected_alert_message,
            NotificationEvent::Closed => status_final && !issue.closed_alert_message,
        })
        .collect()
}

fn notify_one(ctx: &JobContext, id: &str, report: &mut NotifyReport) -> Result<(), GrmError> {
    let versioned = ctx
        .issues
        .get(id)?
        .ok_or_else(|| GrmError::IssueNotFound(id.to_string()))?;
    let issue = versioned.issue;

    let Some(contact) = issue.contact_information.clone() else {
        return Ok(());
    };
    let Some(status_ref) = issue.status.as_ref() else {
        return Ok(());
    };
    let status = ctx
        .catalog
        .status(status_ref.id)?
        .ok_or_else(|| GrmError::Store(format!("unknown status {}", status_ref.id)))?;

    let due = event_due(
        &issue,
        status.open_status,
        status.rejected_status,
        status.final_status,
    );
    if due.is_empty() {
        return Ok(());
    }

    // The stored contact value is masked once anonymization ran; the
    // real destination comes from the vault and is never persisted.
    let destination = if contact.contact == PII_MASK {
        reveal(&issue.id, PiiKind::Contact, ctx.vault, ctx.cipher)?.ok_or_else(|| {
            GrmError::Store(format!("no contact record in PII vault for {}", issue.id))
        })?
    } else {
        contact.contact.clone()
    };
    // Re-checked here because the scan result may be stale against a
    // concurrent contact edit.
    let Some(channel) = Channel::for_contact(&contact.channel) else {
        return Ok(());
    };

    // Deliveries happen outside the write-retry cycle so a revision
    // conflict never repeats a send.
    let mut delivered: Vec<NotificationEvent> = Vec::new();
    for event in due {
        match ctx
            .notifier
            .send(channel, &destination, &message_for(event, &issue))
        {
            Ok(()) => delivered.push(event),
            Err(e) => report.errors.push(format!("issue {id}: {e}")),
        }
    }
    if delivered.is_empty() {
        return Ok(());
    }

    let outcome = update_with_retry(ctx.issues, id, ctx.write_retries, |doc| {
        let mut changed = false;
        for event in &delivered {
            let flag = match event {
                NotificationEvent::Accepted => &mut doc.accepted_alert_message,
                NotificationEvent::Rejected => &mut doc.rejected_alert_message,
                NotificationEvent::Closed => &mut doc.closed_alert_message,
            };
            if !*flag {
                *flag = true;
                changed = true;
            }
        }
        Ok(changed)
    })?;

    if outcome.is_some() {
        report.updated_issues += 1;
        for event in delivered {
            match event {
                NotificationEvent::Accepted => report.accepted_sent.push(id.to_string()),
                NotificationEvent::Rejected => report.rejected_sent.push(id.to_string()),
                NotificationEvent::Closed => report.closed_sent.push(id.to_string()),
            }
        }
    }
    Ok(())
}
