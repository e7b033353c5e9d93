//! SQLite persistence: employees, face templates, attendance logs.
//!
//! The attendance table carries a UNIQUE (emp_code, date) constraint, the
//! per-day uniqueness guarantee the rest of the pipeline relies on. The
//! in-process cooldown only smooths UX on top of it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::NaiveDate;
use presence_core::{Embedding, Gallery, GalleryEntry};
use rusqlite::{params, Connection};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt face template: {len} bytes is not a whole number of f32s")]
    CorruptTemplate { len: usize },
    #[error("employee code already exists: {0}")]
    DuplicateEmployee(String),
}

/// How an attendance record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkMethod {
    Face,
    Manual,
}

impl MarkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkMethod::Face => "FACE",
            MarkMethod::Manual => "MANUAL",
        }
    }
}

/// Outcome of an attendance insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The per-day uniqueness constraint rejected a second insert. An
    /// expected outcome, not a fault.
    AlreadyMarked,
}

/// Payload for registering a new employee.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEmployee {
    pub code: String,
    pub full_name: String,
    #[serde(default)]
    pub joining_date: Option<String>,
    /// Shift start "HH:MM:SS"; absent means no lateness rule applies.
    #[serde(default)]
    pub shift_start: Option<String>,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS employees (
                 emp_code     TEXT PRIMARY KEY,
                 full_name    TEXT NOT NULL,
                 joining_date TEXT,
                 shift_start  TEXT,
                 is_active    INTEGER NOT NULL DEFAULT 1
             );
             CREATE TABLE IF NOT EXISTS face_templates (
                 id        INTEGER PRIMARY KEY AUTOINCREMENT,
                 emp_code  TEXT NOT NULL REFERENCES employees(emp_code),
                 embedding BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS attendance_logs (
                 id       INTEGER PRIMARY KEY AUTOINCREMENT,
                 emp_code TEXT NOT NULL REFERENCES employees(emp_code),
                 date     TEXT NOT NULL,
                 in_time  TEXT NOT NULL,
                 status   TEXT NOT NULL,
                 method   TEXT NOT NULL,
                 UNIQUE (emp_code, date)
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Load all active employees' templates, in template insertion order.
    ///
    /// The order matters: recognition selects the first entry within
    /// tolerance, so reordering this query changes match outcomes.
    pub fn load_gallery(&self) -> Result<Gallery, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT f.embedding, f.emp_code
             FROM face_templates f
             JOIN employees e ON f.emp_code = e.emp_code
             WHERE e.is_active = 1
             ORDER BY f.id",
        )?;

        let rows = stmt.query_map([], |row| {
            let blob: Vec<u8> = row.get(0)?;
            let identity: String = row.get(1)?;
            Ok((blob, identity))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (blob, identity) = row?;
            entries.push(GalleryEntry {
                embedding: embedding_from_blob(&blob)?,
                identity,
            });
        }

        tracing::info!(templates = entries.len(), "gallery loaded");
        Ok(Gallery::new(entries))
    }

    /// Full name and shift start for an employee. `None` when the code is
    /// not enrolled.
    pub fn shift_info(&self, emp_code: &str) -> Result<Option<(String, Option<String>)>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt =
            conn.prepare("SELECT full_name, shift_start FROM employees WHERE emp_code = ?1")?;
        let mut rows = stmt.query(params![emp_code])?;
        match rows.next()? {
            Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
            None => Ok(None),
        }
    }

    /// Insert one attendance record. The UNIQUE (emp_code, date)
    /// constraint maps to [`InsertOutcome::AlreadyMarked`].
    pub fn insert_attendance(
        &self,
        emp_code: &str,
        date: &str,
        in_time: &str,
        status: &str,
        method: MarkMethod,
    ) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let result = conn.execute(
            "INSERT INTO attendance_logs (emp_code, date, in_time, status, method)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![emp_code, date, in_time, status, method.as_str()],
        );

        match result {
            Ok(_) => {
                tracing::info!(emp_code, method = method.as_str(), status, "attendance recorded");
                Ok(InsertOutcome::Inserted)
            }
            Err(e) if is_constraint_violation(&e) => Ok(InsertOutcome::AlreadyMarked),
            Err(e) => Err(e.into()),
        }
    }

    /// Employee codes already marked on the given date.
    pub fn marked_on(&self, date: NaiveDate) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn.prepare("SELECT emp_code FROM attendance_logs WHERE date = ?1")?;
        let rows = stmt.query_map(params![date.format("%Y-%m-%d").to_string()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut codes = HashSet::new();
        for row in rows {
            codes.insert(row?);
        }
        Ok(codes)
    }

    /// Save an employee and their face templates in one transaction.
    pub fn add_employee(
        &self,
        employee: &NewEmployee,
        samples: &[Embedding],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().expect("store lock poisoned");
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO employees (emp_code, full_name, joining_date, shift_start)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                employee.code,
                employee.full_name,
                employee.joining_date,
                employee.shift_start
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::DuplicateEmployee(employee.code.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        for sample in samples {
            tx.execute(
                "INSERT INTO face_templates (emp_code, embedding) VALUES (?1, ?2)",
                params![employee.code, embedding_to_blob(sample)],
            )?;
        }

        tx.commit()?;
        tracing::info!(
            emp_code = %employee.code,
            templates = samples.len(),
            "employee registered"
        );
        Ok(())
    }

    pub fn employee_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let n: u64 = conn.query_row(
            "SELECT COUNT(*) FROM employees WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Serialize an embedding as little-endian f32 bytes.
pub fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    embedding
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

pub fn embedding_from_blob(blob: &[u8]) -> Result<Embedding, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::CorruptTemplate { len: blob.len() });
    }
    let values = blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(Embedding::new(values))
}

/// The set of employees already marked today.
///
/// Hydrated from the store with [`refresh`](Self::refresh) at session
/// start, then maintained in memory by the dispatcher as marks land.
/// Only ever touched from the dispatch context.
#[derive(Debug)]
pub struct MarkedToday {
    date: NaiveDate,
    codes: HashSet<String>,
}

impl MarkedToday {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            codes: HashSet::new(),
        }
    }

    /// Re-hydrate from the store for this cache's date.
    pub fn refresh(&mut self, store: &Store) -> Result<(), StoreError> {
        self.codes = store.marked_on(self.date)?;
        tracing::debug!(date = %self.date, marked = self.codes.len(), "marked-today cache refreshed");
        Ok(())
    }

    pub fn contains(&self, emp_code: &str) -> bool {
        self.codes.contains(emp_code)
    }

    pub fn insert(&mut self, emp_code: &str) {
        self.codes.insert(emp_code.to_string());
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}
