use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use meme_engine::{Template, TemplateMode};

/// Local template corpus and caption feedback log.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                instructions TEXT NOT NULL DEFAULT '',
                video_url TEXT NOT NULL,
                greenscreen INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'completed',
                error_message TEXT
            )",
            [],
        )?;

        // One vector per (template, model); rewritten whenever the instructions change
        conn.execute(
            "CREATE TABLE IF NOT EXISTS template_embeddings (
                template_id TEXT NOT NULL,
                model_name TEXT NOT NULL,
                vector_blob BLOB NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (template_id, model_name),
                FOREIGN KEY (template_id) REFERENCES templates(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS caption_feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                template_id TEXT NOT NULL,
                prompt_text TEXT NOT NULL,
                caption TEXT NOT NULL,
                model_choice TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Migration: corpora created before the processing status existed
        let has_status = conn.prepare("SELECT status FROM templates LIMIT 1").is_ok();
        if !has_status {
            conn.execute(
                "ALTER TABLE templates ADD COLUMN status TEXT NOT NULL DEFAULT 'completed'",
                [],
            )?;
            conn.execute("ALTER TABLE templates ADD COLUMN error_message TEXT", [])?;
        }

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_templates_greenscreen ON templates(greenscreen, created_at)",
            [],
        )?;

        Ok(())
    }
}

/// Longest error message kept on a failed template.
const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Processing state of a template's video. Only `Completed` templates are
/// offered to retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemplateStatus {
    #[serde(rename = "processing")]
    Processing,
    #[default]
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::Processing => "processing",
            TemplateStatus::Completed => "completed",
            TemplateStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processing" | "pending" => Ok(TemplateStatus::Processing),
            "completed" | "ready" => Ok(TemplateStatus::Completed),
            "failed" => Ok(TemplateStatus::Failed),
            other => Err(format!("unknown template status: {}", other)),
        }
    }
}

/// A template row plus its bookkeeping columns.
#[derive(Debug, Clone)]
pub struct StoredTemplate {
    pub template: Template,
    pub status: TemplateStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const TEMPLATE_COLUMNS: &str =
    "id, name, instructions, video_url, greenscreen, created_at, updated_at, status, error_message";

impl StoredTemplate {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(StoredTemplate {
            template: Template {
                id: uuid_column(row, 0)?,
                name: row.get(1)?,
                instructions: row.get(2)?,
                video_url: row.get(3)?,
                greenscreen: row.get(4)?,
                embedding: Vec::new(),
            },
            status: status_column(row, 7)?,
            error_message: row.get(8)?,
            created_at: timestamp_column(row, 5)?,
            updated_at: timestamp_column(row, 6)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CaptionFeedback {
    pub id: i64,
    pub template_id: Uuid,
    pub prompt_text: String,
    pub caption: String,
    pub model_choice: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn status_column(row: &Row, idx: usize) -> rusqlite::Result<TemplateStatus> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Little-endian `f32` encoding used for `vector_blob`.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl Database {
    /// Insert a template whose video is ready to use.
    pub fn create_template(
        &self,
        name: &str,
        instructions: &str,
        video_url: &str,
        greenscreen: bool,
    ) -> Result<Uuid> {
        self.insert_template(name, instructions, video_url, greenscreen, TemplateStatus::Completed)
    }

    /// Insert a template whose video is still being processed. It stays
    /// out of retrieval until marked completed.
    pub fn create_pending_template(
        &self,
        name: &str,
        instructions: &str,
        video_url: &str,
        greenscreen: bool,
    ) -> Result<Uuid> {
        self.insert_template(name, instructions, video_url, greenscreen, TemplateStatus::Processing)
    }

    fn insert_template(
        &self,
        name: &str,
        instructions: &str,
        video_url: &str,
        greenscreen: bool,
        status: TemplateStatus,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO templates (id, name, instructions, video_url, greenscreen, created_at, updated_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
            params![id.to_string(), name, instructions, video_url, greenscreen, now, status.as_str()],
        )?;
        Ok(id)
    }

    /// Move a template through processing. The error message is kept only
    /// for `Failed` and is cut to 1000 characters; any other status clears it.
    /// Returns `false` if no such template.
    pub fn update_template_status(
        &self,
        id: Uuid,
        status: TemplateStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let error_message: Option<String> = match status {
            TemplateStatus::Failed => error_message.map(|m| m.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()),
            _ => None,
        };
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE templates SET status = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?1",
            params![id.to_string(), status.as_str(), error_message, now],
        )?;
        Ok(updated > 0)
    }

    pub fn get_template(&self, id: Uuid) -> Result<Option<StoredTemplate>> {
        let conn = self.conn()?;
        let template = conn
            .query_row(
                &format!("SELECT {} FROM templates WHERE id = ?1", TEMPLATE_COLUMNS),
                params![id.to_string()],
                StoredTemplate::from_row,
            )
            .optional()?;
        Ok(template)
    }

    /// Newest first, optionally restricted to one mode and/or status.
    pub fn list_templates(
        &self,
        mode: Option<TemplateMode>,
        status: Option<TemplateStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredTemplate>> {
        let greenscreen = mode.map(|m| m == TemplateMode::Greenscreen);
        let status = status.map(|s| s.as_str());
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM templates
             WHERE (?1 IS NULL OR greenscreen = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3",
            TEMPLATE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![greenscreen, status, limit], StoredTemplate::from_row)?;

        let mut templates = Vec::new();
        for row in rows {
            templates.push(row?);
        }
        Ok(templates)
    }

    /// Rewrite name and/or instructions. Changing the instructions invalidates
    /// every stored embedding for the template. Returns `false` if no such template.
    pub fn update_template_text(&self, id: Uuid, name: Option<&str>, instructions: Option<&str>) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE templates
             SET name = COALESCE(?2, name),
                 instructions = COALESCE(?3, instructions),
                 updated_at = ?4
             WHERE id = ?1",
            params![id.to_string(), name, instructions, now],
        )?;

        if updated > 0 && instructions.is_some() {
            tx.execute(
                "DELETE FROM template_embeddings WHERE template_id = ?1",
                params![id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(updated > 0)
    }

    pub fn delete_template(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM templates WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    pub fn store_template_embedding(&self, template_id: Uuid, model_name: &str, vector: &[f32]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO template_embeddings (template_id, model_name, vector_blob, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![template_id.to_string(), model_name, encode_vector(vector), now],
        )?;
        Ok(())
    }

    /// Completed templates of the given mode that have an embedding for
    /// `model_name`, with [`Template::embedding`] populated.
    pub fn load_embedded_templates(&self, model_name: &str, mode: TemplateMode) -> Result<Vec<Template>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.instructions, t.video_url, t.greenscreen, e.vector_blob
             FROM templates t
             JOIN template_embeddings e ON e.template_id = t.id
             WHERE e.model_name = ?1 AND t.greenscreen = ?2 AND t.status = 'completed'",
        )?;

        let rows = stmt.query_map(params![model_name, mode == TemplateMode::Greenscreen], |row| {
            let blob: Vec<u8> = row.get(5)?;
            Ok(Template {
                id: uuid_column(row, 0)?,
                name: row.get(1)?,
                instructions: row.get(2)?,
                video_url: row.get(3)?,
                greenscreen: row.get(4)?,
                embedding: decode_vector(&blob),
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Completed templates of the given mode with no embedding for
    /// `model_name`, newest first.
    pub fn load_unembedded_templates(&self, model_name: &str, mode: TemplateMode, limit: usize) -> Result<Vec<Template>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM templates t
             WHERE t.greenscreen = ?2 AND t.status = 'completed'
               AND NOT EXISTS (
                   SELECT 1 FROM template_embeddings e
                   WHERE e.template_id = t.id AND e.model_name = ?1
               )
             ORDER BY t.created_at DESC, t.rowid DESC
             LIMIT ?3",
            TEMPLATE_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![model_name, mode == TemplateMode::Greenscreen, limit as i64],
            StoredTemplate::from_row,
        )?;

        let mut templates = Vec::new();
        for row in rows {
            templates.push(row?.template);
        }
        Ok(templates)
    }

    /// Log the caption a user finally picked, for later analysis.
    pub fn record_caption_feedback(
        &self,
        template_id: Uuid,
        prompt_text: &str,
        caption: &str,
        model_choice: Option<&str>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO caption_feedback (template_id, prompt_text, caption, model_choice, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![template_id.to_string(), prompt_text, caption, model_choice, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_caption_feedback(&self, limit: usize) -> Result<Vec<CaptionFeedback>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, template_id, prompt_text, caption, model_choice, created_at
             FROM caption_feedback ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(CaptionFeedback {
                id: row.get(0)?,
                template_id: uuid_column(row, 1)?,
                prompt_text: row.get(2)?,
                caption: row.get(3)?,
                model_choice: row.get(4)?,
                created_at: timestamp_column(row, 5)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
