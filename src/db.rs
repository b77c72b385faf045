use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::jobs::{JobRecord, JobStatus};
use crate::storage::DownloadRef;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id            TEXT PRIMARY KEY,
            source        TEXT NOT NULL,
            output_stem   TEXT NOT NULL,
            status        TEXT NOT NULL CHECK(status IN ('pending','processing','completed','failed')),
            download_name TEXT,
            download_url  TEXT,
            error         TEXT,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
        ",
    )?;
    Ok(())
}

// ── Jobs ──

pub fn upsert_job(conn: &Connection, job: &JobRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO jobs
         (id, source, output_stem, status, download_name, download_url, error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            job.id.to_string(),
            job.source.to_string_lossy().into_owned(),
            job.output_stem,
            job.status.as_str(),
            job.download.as_ref().map(|d| d.filename.as_str()),
            job.download.as_ref().map(|d| d.download_url.as_str()),
            job.error,
            job.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

struct JobRow {
    id: String,
    source: String,
    output_stem: String,
    status: String,
    download_name: Option<String>,
    download_url: Option<String>,
    error: Option<String>,
    updated_at: String,
}

pub fn fetch_job(conn: &Connection, id: &Uuid) -> Result<Option<JobRecord>> {
    let row = conn
        .query_row(
            "SELECT id, source, output_stem, status, download_name, download_url, error, updated_at
             FROM jobs WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok(JobRow {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    output_stem: row.get(2)?,
                    status: row.get(3)?,
                    download_name: row.get(4)?,
                    download_url: row.get(5)?,
                    error: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            },
        )
        .optional()?;

    row.map(into_record).transpose()
}

fn into_record(row: JobRow) -> Result<JobRecord> {
    let download = match (row.download_name, row.download_url) {
        (Some(filename), Some(download_url)) => Some(DownloadRef {
            filename,
            download_url,
        }),
        _ => None,
    };
    Ok(JobRecord {
        id: Uuid::parse_str(&row.id).with_context(|| format!("bad job id in db: {}", row.id))?,
        source: row.source.into(),
        output_stem: row.output_stem,
        status: row.status.parse::<JobStatus>()?,
        download,
        error: row.error,
        updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
            .with_context(|| format!("bad timestamp in db: {}", row.updated_at))?
            .with_timezone(&Utc),
    })
}

pub struct JobCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

pub fn count_jobs(conn: &Connection) -> Result<JobCounts> {
    let count = |status: JobStatus| -> Result<usize> {
        let n: usize = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            [status.as_str()],
            |r| r.get(0),
        )?;
        Ok(n)
    };
    Ok(JobCounts {
        pending: count(JobStatus::Pending)?,
        processing: count(JobStatus::Processing)?,
        completed: count(JobStatus::Completed)?,
        failed: count(JobStatus::Failed)?,
    })
}
