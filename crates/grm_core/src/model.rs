//! Document types for the grievance redress workflow.
//!
//! These mirror the JSON documents held in the document store. Reference
//! data (regions, departments, categories, statuses, workers) is loaded
//! by import tooling and rarely mutated; issues are live documents that
//! the reconciliation jobs continuously repair.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Opaque stable identifier of an administrative region.
pub type RegionId = String;

/// A node in the administrative location hierarchy.
///
/// `level` is an ordered rank label configured per deployment
/// (e.g. NATION / DISTRICT / SECTOR / CELL / VILLAGE); comparison is by
/// label equality only. The parent graph is a forest with exactly one
/// root (`parent_id == None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrativeRegion {
    pub id: RegionId,
    pub name: String,
    /// Rank label, compared by equality.
    #[serde(rename = "administrative_level")]
    pub level: String,
    pub parent_id: Option<RegionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// Worker id + name snapshot stored on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignee {
    pub id: String,
    pub name: String,
}

/// The `assignee` field of an issue is three-valued: the key can be
/// absent (issue never routed), the empty string (routing ran and found
/// nobody), or a populated snapshot. The distinction matters to the
/// repair predicates, so it is modeled explicitly instead of leaning on
/// key presence in raw JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AssigneeField {
    /// Key absent from the document.
    #[default]
    Missing,
    /// Explicit empty string: routing found no candidate.
    Empty,
    Assigned(Assignee),
}

impl AssigneeField {
    pub fn is_missing(&self) -> bool {
        matches!(self, AssigneeField::Missing)
    }

    /// True when the issue still needs an assignment pass.
    pub fn needs_assignment(&self) -> bool {
        !matches!(self, AssigneeField::Assigned(_))
    }

    pub fn as_assignee(&self) -> Option<&Assignee> {
        match self {
            AssigneeField::Assigned(a) => Some(a),
            _ => None,
        }
    }
}

impl From<Option<Assignee>> for AssigneeField {
    fn from(value: Option<Assignee>) -> Self {
        match value {
            Some(a) => AssigneeField::Assigned(a),
            None => AssigneeField::Empty,
        }
    }
}

impl Serialize for AssigneeField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Missing is normally skipped via `skip_serializing_if`; if
            // forced to serialize it degrades to the empty marker.
            AssigneeField::Missing | AssigneeField::Empty => serializer.serialize_str(""),
            AssigneeField::Assigned(a) => a.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AssigneeField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Snapshot(Assignee),
        }
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(AssigneeField::Missing),
            Some(Raw::Text(s)) if s.is_empty() => Ok(AssigneeField::Empty),
            Some(Raw::Text(s)) => Err(de::Error::custom(format!(
                "assignee must be empty or an id/name snapshot, got {s:?}"
            ))),
            Some(Raw::Snapshot(a)) => Ok(AssigneeField::Assigned(a)),
        }
    }
}

/// Static reference data: a government department.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub id: u64,
    pub name: String,
    /// Receives every issue of a category without redirection protocol.
    pub head: Assignee,
}

/// Static reference data: an issue category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueCategory {
    pub id: u64,
    pub name: String,
    pub abbreviation: String,
    pub assigned_department: u64,
    pub confidentiality_level: String,
    /// Selects dynamic load-balanced routing over fixed head routing.
    pub redirection_protocol: bool,
    /// Target rank for the routing walk; only meaningful when
    /// `redirection_protocol` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub administrative_level: Option<String>,
}

impl IssueCategory {
    /// Target level with surrounding whitespace stripped; `None` when
    /// unset or blank (import tooling produces both).
    pub fn target_level(&self) -> Option<&str> {
        self.administrative_level
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

/// Static reference data: an issue status and its classification flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueStatus {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub open_status: bool,
    #[serde(default)]
    pub rejected_status: bool,
    #[serde(default)]
    pub final_status: bool,
}

/// A caseworker. Registered at exactly one department and one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub user_id: u64,
    pub name: String,
    pub department: u64,
    pub administrative_region: RegionId,
}

impl Worker {
    pub fn assignee(&self) -> Assignee {
        Assignee {
            id: self.user_id.to_string(),
            name: self.name.clone(),
        }
    }
}

/// Contact channel of a citizen. Only phone and email are reachable by
/// the notification job; any other intake-written channel type is
/// preserved verbatim so the document stays round-trippable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactChannel {
    PhoneNumber,
    Email,
    #[serde(untagged)]
    Other(String),
}

impl ContactChannel {
    /// Whether a notification transport exists for this channel type.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, ContactChannel::Other(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactInformation {
    #[serde(rename = "type")]
    pub channel: ContactChannel,
    /// The value itself is PII; the channel type stays cleartext.
    pub contact: String,
}

/// Category snapshot embedded in an issue document. The department id
/// is denormalized so that per-department assignment aggregates can be
/// computed from issue documents alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: u64,
    pub name: String,
    pub assigned_department: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRef {
    pub id: u64,
    pub name: String,
}

/// The worker (if any) who recorded the issue on a citizen's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reporter {
    pub id: u64,
    pub name: String,
}

/// An audit trail entry on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A citizen-submitted grievance.
///
/// Created as a draft by the intake flow, then confirmed. A confirmed
/// issue is guaranteed (eventually, via reconciliation) a dense
/// sequential `auto_increment_id`, a derived `internal_code` and an
/// assignee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_increment_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_code: Option<String>,
    pub category: CategoryRef,
    pub administrative_region: RegionId,
    #[serde(default, skip_serializing_if = "AssigneeField::is_missing")]
    pub assignee: AssigneeField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusRef>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub escalate_flag: bool,
    /// Citizen identity; replaced by the mask sentinel once anonymized.
    #[serde(default)]
    pub citizen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_information: Option<ContactInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<Reporter>,
    #[serde(default)]
    pub accepted_alert_message: bool,
    #[serde(default)]
    pub rejected_alert_message: bool,
    #[serde(default)]
    pub closed_alert_message: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    /// Derived human-readable tracking identifier.
    pub fn derive_internal_code(&self, abbreviation: &str, auto_increment_id: u64) -> String {
        format!(
            "{abbreviation}-{}-{auto_increment_id}",
            self.administrative_region
        )
    }
}
