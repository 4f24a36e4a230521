//! Core engine for a grievance redress mechanism (GRM): routes
//! citizen-submitted issues to the right government caseworker,
//! escalates stalled issues up the administrative-region tree, and
//! keeps issue metadata self-consistent under partial failure through
//! periodic, idempotent reconciliation jobs.
//!
//! The crate is synchronous and side-effect-free except through the
//! trait seams it is given: a revision-versioned document store, a
//! worker registry, a PII vault, and a notification transport. The
//! `grmd` daemon wires these to SQLite and a webhook transport and
//! drives the jobs on a fixed interval.

pub mod assign;
pub mod error;
pub mod escalate;
pub mod model;
pub mod notify;
pub mod pii;
pub mod reconcile;
pub mod region;
pub mod registry;
pub mod sqlite;
pub mod store;

pub use error::GrmError;
pub use model::{
    AdministrativeRegion, Assignee, AssigneeField, Comment, ContactChannel, ContactInformation,
    Department, Issue, IssueCategory, IssueStatus, Worker,
};
pub use reconcile::{
    check_issues, escalate_issues, notify_issues, CheckReport, EscalateReport, JobContext,
    NotifyReport,
};
