use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use uuid::Uuid;

use super::{parse_job_id, JobRecord, StatusLookup};
use crate::db;

/// The job status table. `upsert` is the only write: one whole record,
/// inserted or overwritten by id in a single step.
pub trait JobStore: Send + Sync {
    fn upsert(&self, record: &JobRecord) -> Result<()>;
    fn get(&self, id: &Uuid) -> Result<Option<JobRecord>>;
}

/// Status query by raw id text. Never fails: store errors read as not found.
pub fn lookup(store: &dyn JobStore, raw_id: &str) -> StatusLookup {
    let Some(id) = parse_job_id(raw_id) else {
        return StatusLookup::InvalidId;
    };
    match store.get(&id) {
        Ok(Some(record)) => StatusLookup::Found(record.snapshot()),
        Ok(None) => StatusLookup::NotFound,
        Err(e) => {
            tracing::warn!("status lookup for {} failed: {}", id, e);
            StatusLookup::NotFound
        }
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn upsert(&self, record: &JobRecord) -> Result<()> {
        let mut jobs = self.jobs.lock().map_err(|_| anyhow!("job table lock poisoned"))?;
        jobs.insert(record.id, record.clone());
        Ok(())
    }

    fn get(&self, id: &Uuid) -> Result<Option<JobRecord>> {
        let jobs = self.jobs.lock().map_err(|_| anyhow!("job table lock poisoned"))?;
        Ok(jobs.get(id).cloned())
    }
}

/// SQLite-backed table, so statuses outlive the process that ran the jobs.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = db::connect(path)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        db::init_schema(&conn)?;
        Ok(SqliteJobStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn counts(&self) -> Result<db::JobCounts> {
        let conn = self.conn.lock().map_err(|_| anyhow!("job db lock poisoned"))?;
        db::count_jobs(&conn)
    }
}

impl JobStore for SqliteJobStore {
    fn upsert(&self, record: &JobRecord) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| anyhow!("job db lock poisoned"))?;
        db::upsert_job(&conn, record)
    }

    fn get(&self, id: &Uuid) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock().map_err(|_| anyhow!("job db lock poisoned"))?;
        db::fetch_job(&conn, id)
    }
}
