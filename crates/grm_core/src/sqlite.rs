//! SQLite-backed document store and PII vault.
//!
//! Documents are stored as JSON bodies in a single key-addressed table
//! with a revision column and a kind index; the kind index backs every
//! "find documents matching X" query, with the equality predicates
//! applied over the deserialized documents. Updates are guarded by
//! `WHERE rev = ?` so a write against a stale revision affects zero
//! rows and surfaces as a revision conflict instead of overwriting.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::GrmError;
use crate::model::{AdministrativeRegion, Department, Issue, IssueCategory, IssueStatus, Worker};
use crate::pii::{PiiKind, PiiVault};
use crate::region::RegionStore;
use crate::registry::{Catalog, Representative, WorkerRegistry};
use crate::store::{
    assignment_loads, needs_escalation, needs_integrity_repair, needs_notification,
    AssignmentLoad, IssueStore, VersionedIssue,
};

const KIND_REGION: &str = "administrative_region";
const KIND_WORKER: &str = "worker";
const KIND_REPRESENTATIVE: &str = "representative";
const KIND_CATEGORY: &str = "issue_category";
const KIND_DEPARTMENT: &str = "issue_department";
const KIND_STATUS: &str = "issue_status";
const KIND_ISSUE: &str = "issue";

/// JSON document store over SQLite. One connection, shared behind a
/// mutex; every operation is a single statement or a short transaction.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self, GrmError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GrmError::Store(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Ephemeral store for tests and tooling.
    pub fn open_in_memory() -> Result<Self, GrmError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), GrmError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                rev INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_kind ON documents(kind)",
            [],
        )?;
        Ok(())
    }

    /// Insert or replace a reference document (regions, workers,
    /// categories, ...). Reference data is import-managed, so replace
    /// semantics are fine here; issues go through the revision-checked
    /// path instead.
    pub fn upsert_reference<T: Serialize>(
        &self,
        kind: &str,
        id: &str,
        value: &T,
    ) -> Result<(), GrmError> {
        let body = serde_json::to_string(value)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO documents (id, kind, rev, body) VALUES (?1, ?2, 1, ?3)
            ON CONFLICT (kind, id) DO UPDATE SET rev = rev + 1, body = excluded.body
            "#,
            params![id, kind, body],
        )?;
        Ok(())
    }

    pub fn put_region(&self, region: &AdministrativeRegion) -> Result<(), GrmError> {
        self.upsert_reference(KIND_REGION, &region.id, region)
    }

    pub fn put_worker(&self, worker: &Worker) -> Result<(), GrmError> {
        self.upsert_reference(KIND_WORKER, &worker.user_id.to_string(), worker)
    }

    pub fn put_representative(&self, representative: &Representative) -> Result<(), GrmError> {
        self.upsert_reference(KIND_REPRESENTATIVE, &representative.id, representative)
    }

    pub fn put_category(&self, category: &IssueCategory) -> Result<(), GrmError> {
        self.upsert_reference(KIND_CATEGORY, &category.id.to_string(), category)
    }

    pub fn put_department(&self, department: &Department) -> Result<(), GrmError> {
        self.upsert_reference(KIND_DEPARTMENT, &department.id.to_string(), department)
    }

    pub fn put_status(&self, status: &IssueStatus) -> Result<(), GrmError> {
        self.upsert_reference(KIND_STATUS, &status.id.to_string(), status)
    }

    fn load_one<T: DeserializeOwned>(&self, kind: &str, id: &str) -> Result<Option<T>, GrmError> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE kind = ?1 AND id = ?2",
                params![kind, id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(GrmError::from))
            .transpose()
    }

    fn load_all<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>, GrmError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT body FROM documents WHERE kind = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![kind], |row| row.get::<_, String>(0))?;
        let mut values = Vec::new();
        for body in rows {
            values.push(serde_json::from_str(&body?)?);
        }
        Ok(values)
    }

    /// Load every issue document, skipping bodies that no longer
    /// deserialize. One mangled document must not starve the batch
    /// scans of every healthy issue behind it; skipped ids are logged
    /// for operator follow-up.
    fn load_issues(&self) -> Result<Vec<Issue>, GrmError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, body FROM documents WHERE kind = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![KIND_ISSUE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut issues = Vec::new();
        for row in rows {
            let (id, body) = row?;
            match serde_json::from_str(&body) {
                Ok(issue) => issues.push(issue),
                Err(e) => warn!(issue = %id, "skipping undeserializable issue document: {e}"),
            }
        }
        Ok(issues)
    }

    fn issue_ids_matching<P: Fn(&Issue) -> bool>(
        &self,
        predicate: P,
    ) -> Result<Vec<String>, GrmError> {
        Ok(self
            .load_issues()?
            .into_iter()
            .filter(|i| predicate(i))
            .map(|i| i.id)
            .collect())
    }
}

impl RegionStore for SqliteDocumentStore {
    fn get(&self, id: &str) -> Result<Option<AdministrativeRegion>, GrmError> {
        self.load_one(KIND_REGION, id)
    }

    fn children(&self, parent_id: &str) -> Result<Vec<AdministrativeRegion>, GrmError> {
        let regions: Vec<AdministrativeRegion> = self.load_all(KIND_REGION)?;
        Ok(regions
            .into_iter()
            .filter(|r| r.parent_id.as_deref() == Some(parent_id))
            .collect())
    }

    fn root(&self) -> Result<AdministrativeRegion, GrmError> {
        let regions: Vec<AdministrativeRegion> = self.load_all(KIND_REGION)?;
        regions
            .into_iter()
            .find(|r| r.parent_id.is_none())
            .ok_or_else(|| GrmError::Store("region forest has no root".into()))
    }
}

impl WorkerRegistry for SqliteDocumentStore {
    fn worker(&self, user_id: u64) -> Result<Option<Worker>, GrmError> {
        self.load_one(KIND_WORKER, &user_id.to_string())
    }

    fn workers_at(&self, department: u64, region_id: &str) -> Result<Vec<Worker>, GrmError> {
        let workers: Vec<Worker> = self.load_all(KIND_WORKER)?;
        let mut workers: Vec<Worker> = workers
            .into_iter()
            .filter(|w| w.department == department && w.administrative_region == region_id)
            .collect();
        workers.sort_by_key(|w| w.user_id);
        Ok(workers)
    }

    fn point_of_contact(
        &self,
        region_id: &str,
        level: Option<&str>,
    ) -> Result<Option<crate::model::Assignee>, GrmError> {
        let representatives: Vec<Representative> = self.load_all(KIND_REPRESENTATIVE)?;
        Ok(representatives
            .into_iter()
            .filter(|r| {
                r.village_secretary
                    && r.administrative_region == region_id
                    && level.map_or(true, |l| r.level == l)
            })
            .min_by(|a, b| a.id.cmp(&b.id))
            .map(|r| crate::model::Assignee {
                id: r.id,
                name: r.name,
            }))
    }
}

impl Catalog for SqliteDocumentStore {
    fn category(&self, id: u64) -> Result<Option<IssueCategory>, GrmError> {
        self.load_one(KIND_CATEGORY, &id.to_string())
    }

    fn department(&self, id: u64) -> Result<Option<Department>, GrmError> {
        self.load_one(KIND_DEPARTMENT, &id.to_string())
    }

    fn status(&self, id: u64) -> Result<Option<IssueStatus>, GrmError> {
        self.load_one(KIND_STATUS, &id.to_string())
    }

    fn statuses(&self) -> Result<Vec<IssueStatus>, GrmError> {
        let mut statuses: Vec<IssueStatus> = self.load_all(KIND_STATUS)?;
        statuses.sort_by_key(|s| s.id);
        Ok(statuses)
    }
}

impl IssueStore for SqliteDocumentStore {
    fn get(&self, id: &str) -> Result<Option<VersionedIssue>, GrmError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT rev, body FROM documents WHERE kind = ?1 AND id = ?2",
                params![KIND_ISSUE, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(rev, body)| {
            Ok(VersionedIssue {
                issue: serde_json::from_str(&body)?,
                rev: rev as u64,
            })
        })
        .transpose()
    }

    fn create(&self, issue: &Issue) -> Result<u64, GrmError> {
        let body = serde_json::to_string(issue)?;
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO documents (id, kind, rev, body) VALUES (?1, ?2, 1, ?3)",
            params![issue.id, KIND_ISSUE, body],
        )?;
        if inserted == 0 {
            return Err(GrmError::Store(format!(
                "document already exists: {}",
                issue.id
            )));
        }
        Ok(1)
    }

    fn update(&self, issue: &Issue, expected_rev: u64) -> Result<u64, GrmError> {
        let body = serde_json::to_string(issue)?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE documents SET rev = rev + 1, body = ?1 \
             WHERE kind = ?2 AND id = ?3 AND rev = ?4",
            params![body, KIND_ISSUE, issue.id, expected_rev as i64],
        )?;
        if updated == 1 {
            return Ok(expected_rev + 1);
        }
        let exists: Option<i64> = conn
            .query_row(
                "SELECT rev FROM documents WHERE kind = ?1 AND id = ?2",
                params![KIND_ISSUE, issue.id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Err(GrmError::RevisionConflict {
                id: issue.id.clone(),
            }),
            None => Err(GrmError::IssueNotFound(issue.id.clone())),
        }
    }

    fn needing_integrity_repair(&self) -> Result<Vec<String>, GrmError> {
        self.issue_ids_matching(needs_integrity_repair)
    }

    fn pending_escalation(&self) -> Result<Vec<String>, GrmError> {
        self.issue_ids_matching(needs_escalation)
    }

    fn pending_notification(&self) -> Result<Vec<String>, GrmError> {
        self.issue_ids_matching(needs_notification)
    }

    fn open_assignment_counts(
        &self,
        department: u64,
        final_status_ids: &[u64],
    ) -> Result<Vec<AssignmentLoad>, GrmError> {
        let issues = self.load_issues()?;
        Ok(assignment_loads(issues.iter(), department, final_status_ids))
    }

    fn max_auto_increment_id(&self) -> Result<u64, GrmError> {
        Ok(self
            .load_issues()?
            .iter()
            .filter_map(|i| i.auto_increment_id)
            .max()
            .unwrap_or(0))
    }
}

/// SQLite-backed PII vault, one row per (kind, issue).
#[derive(Clone)]
pub struct SqlitePiiVault {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePiiVault {
    pub fn open(path: &Path) -> Result<Self, GrmError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GrmError::Store(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        let vault = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        vault.init_schema()?;
        Ok(vault)
    }

    pub fn open_in_memory() -> Result<Self, GrmError> {
        let conn = Connection::open_in_memory()?;
        let vault = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        vault.init_schema()?;
        Ok(vault)
    }

    fn init_schema(&self) -> Result<(), GrmError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS pii_records (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            )
            "#,
            [],
        )?;
        Ok(())
    }
}

impl PiiVault for SqlitePiiVault {
    fn put(&self, kind: PiiKind, key: &str, ciphertext: &str) -> Result<(), GrmError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO pii_records (kind, key, data, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), key, ciphertext, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get(&self, kind: PiiKind, key: &str) -> Result<Option<String>, GrmError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT data FROM pii_records WHERE kind = ?1 AND key = ?2",
                params![kind.as_str(), key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn delete(&self, kind: PiiKind, key: &str) -> Result<(), GrmError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM pii_records WHERE kind = ?1 AND key = ?2",
            params![kind.as_str(), key],
        )?;
        Ok(())
    }
}
