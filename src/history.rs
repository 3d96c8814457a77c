//! Append-only prediction history backed by SQLite.
//!
//! The store holds both outcome kinds behind one contract: a
//! `predictions` table for classification and a `detections` table for
//! annotated detection runs. Schema initialization is idempotent, and
//! older databases are migrated additively (missing columns are added
//! with defaults, rows are never rewritten or dropped). Writers serialize
//! through the connection mutex; each insert is a single statement, so a
//! record is either fully visible or absent.

use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::classify::Prediction;
use crate::error::VisionError;

/// A classification outcome to persist.
#[derive(Clone, Debug)]
pub struct ClassificationRecord {
    pub filename: String,
    pub top1_label: String,
    pub top1_confidence: f32,
    pub predictions: Vec<Prediction>,
    pub model_name: String,
}

/// A persisted classification row.
#[derive(Clone, Debug, Serialize)]
pub struct HistoryRow {
    pub id: i64,
    pub filename: String,
    pub top1_label: String,
    pub top1_confidence: f32,
    pub predictions: Vec<Prediction>,
    pub created_at: String,
    pub model_name: String,
}

/// An annotated detection run to persist.
#[derive(Clone, Debug)]
pub struct DetectionRecord {
    pub source_filename: String,
    /// `"image"` or `"video"`.
    pub source_type: String,
    /// Artifact path relative to the outputs root, `/`-separated.
    pub output_relpath: String,
    pub classes: Vec<String>,
    pub confs: Vec<f32>,
    pub model: String,
    pub duration_ms: i64,
    pub conf: f32,
    pub iou: f32,
}

/// A persisted detection row.
#[derive(Clone, Debug, Serialize)]
pub struct DetectionRow {
    pub id: i64,
    pub source_filename: String,
    pub source_type: String,
    pub output_relpath: String,
    pub classes: Vec<String>,
    pub confs: Vec<f32>,
    pub created_at: String,
    pub model: String,
    pub duration_ms: i64,
    pub conf: f32,
    pub iou: f32,
}

/// Durable history store. Cheap to share behind an `Arc`; all methods
/// take `&self` and serialize on the inner connection.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the store at `db_path` and bring the schema up to
    /// date. Safe to call on every process start.
    pub fn open(db_path: &str) -> Result<Self, VisionError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, VisionError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, VisionError> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, VisionError> {
        self.conn
            .lock()
            .map_err(|_| VisionError::Storage("history connection lock poisoned".to_string()))
    }

    /// Append a classification record, returning its assigned id.
    pub fn insert_classification(
        &self,
        record: &ClassificationRecord,
    ) -> Result<i64, VisionError> {
        let predictions_json = serde_json::to_string(&record.predictions)?;
        let created_at = crate::utc_timestamp();

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO predictions (filename, top1_label, top1_confidence, predictions_json, created_at, model_name)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.filename,
                record.top1_label,
                record.top1_confidence as f64,
                predictions_json,
                created_at,
                record.model_name,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a detection record, returning its assigned id.
    pub fn insert_detection(&self, record: &DetectionRecord) -> Result<i64, VisionError> {
        let classes_json = serde_json::to_string(&record.classes)?;
        let confs_json = serde_json::to_string(&record.confs)?;
        let created_at = crate::utc_timestamp();

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO detections (
                source_filename, source_type, output_relpath, classes_json, confs_json,
                created_at, model, duration_ms, conf, iou
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.source_filename,
                record.source_type,
                record.output_relpath,
                classes_json,
                confs_json,
                created_at,
                record.model,
                record.duration_ms,
                record.conf as f64,
                record.iou as f64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Top-1 label frequencies, count descending, ties by label ascending.
    pub fn label_counts(&self, limit: usize) -> Result<Vec<(String, u64)>, VisionError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT top1_label, COUNT(*) AS cnt
            FROM predictions
            GROUP BY top1_label
            ORDER BY cnt DESC, top1_label ASC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Most recent classification rows, newest first by insertion order.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRow>, VisionError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, filename, top1_label, top1_confidence, predictions_json, created_at, model_name
            FROM predictions
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let predictions_json: String = row.get(4)?;
            Ok(HistoryRow {
                id: row.get(0)?,
                filename: row.get(1)?,
                top1_label: row.get(2)?,
                top1_confidence: row.get::<_, f64>(3)? as f32,
                // Rows written before the predictions column stabilized may
                // carry unparseable payloads; render those as empty.
                predictions: serde_json::from_str(&predictions_json).unwrap_or_default(),
                created_at: row.get(5)?,
                model_name: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Most recent detection rows, newest first.
    pub fn recent_detections(&self, limit: usize) -> Result<Vec<DetectionRow>, VisionError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, source_filename, source_type, output_relpath, classes_json, confs_json,
                   created_at, model, duration_ms, conf, iou
            FROM detections
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], map_detection_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// One detection row by id.
    pub fn detection(&self, id: i64) -> Result<Option<DetectionRow>, VisionError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, source_filename, source_type, output_relpath, classes_json, confs_json,
                   created_at, model, duration_ms, conf, iou
            FROM detections
            WHERE id = ?1
            "#,
        )?;
        let mut rows = stmt.query_map(params![id], map_detection_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

fn map_detection_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DetectionRow> {
    let classes_json: String = row.get(4)?;
    let confs_json: String = row.get(5)?;
    Ok(DetectionRow {
        id: row.get(0)?,
        source_filename: row.get(1)?,
        source_type: row.get(2)?,
        output_relpath: row.get(3)?,
        classes: serde_json::from_str(&classes_json).unwrap_or_default(),
        confs: serde_json::from_str(&confs_json).unwrap_or_default(),
        created_at: row.get(6)?,
        model: row.get(7)?,
        duration_ms: row.get(8)?,
        conf: row.get::<_, f64>(9)? as f32,
        iou: row.get::<_, f64>(10)? as f32,
    })
}

fn ensure_schema(conn: &Connection) -> Result<(), VisionError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS predictions (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          filename TEXT NOT NULL,
          top1_label TEXT NOT NULL,
          top1_confidence REAL NOT NULL,
          predictions_json TEXT NOT NULL,
          created_at TEXT NOT NULL,
          model_name TEXT NOT NULL DEFAULT 'unknown'
        );

        CREATE TABLE IF NOT EXISTS detections (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          source_filename TEXT NOT NULL,
          source_type TEXT NOT NULL,
          output_relpath TEXT NOT NULL,
          classes_json TEXT NOT NULL,
          confs_json TEXT NOT NULL,
          created_at TEXT NOT NULL,
          model TEXT NOT NULL,
          duration_ms INTEGER NOT NULL,
          conf REAL NOT NULL,
          iou REAL NOT NULL
        );
        "#,
    )?;

    // Databases created before the model column existed gain it here;
    // their rows read back as 'unknown'.
    ensure_columns(
        conn,
        "predictions",
        &[("model_name", "TEXT DEFAULT 'unknown'")],
    )?;
    Ok(())
}

/// Additive migration: add any missing columns to an existing table.
/// Forward-only; nothing is ever renamed, rewritten or dropped.
fn ensure_columns(
    conn: &Connection,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<(), VisionError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;

    for (name, decl) in columns {
        if !existing.iter().any(|col| col == name) {
            log::info!("migrating {}: adding column {}", table, name);
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, decl),
                [],
            )?;
        }
    }
    Ok(())
}
