use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::db::schema::ExecutionOutcome;
use crate::pipeline::{Explanation, QueryTurn};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS turns (
    id          TEXT PRIMARY KEY,
    recorded_at TEXT NOT NULL,
    question    TEXT NOT NULL,
    sql_text    TEXT NOT NULL,
    outcome     TEXT NOT NULL,
    explanation TEXT
);
CREATE INDEX IF NOT EXISTS idx_turns_recorded_at ON turns(recorded_at);
";

#[derive(Debug, thiserror::Error)]
#[error("transcript: {0:#}")]
pub struct TranscriptError(#[from] anyhow::Error);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub recorded_at: String,
    pub question: String,
    pub sql: String,
    /// Row count, affected rows or the execution error.
    pub outcome: String,
    pub explanation: Option<String>,
}

impl TranscriptEntry {
    pub fn from_turn(turn: &QueryTurn) -> Self {
        let outcome = match &turn.outcome {
            None => "not executed".to_string(),
            Some(Ok(ExecutionOutcome::Rows(table))) => format!(
                "{} rows x {} columns",
                table.row_count(),
                table.column_count()
            ),
            Some(Ok(ExecutionOutcome::Affected(n))) => format!("{} rows affected", n),
            Some(Err(e)) => format!("error: {}", e),
        };
        let explanation = match &turn.explanation {
            Some(Explanation::Text(text)) => Some(text.clone()),
            Some(Explanation::Failed(err)) => Some(format!("[summary failed] {}", err)),
            None => None,
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            question: turn.question.clone(),
            sql: turn.sql.clone(),
            outcome,
            explanation,
        }
    }
}

/// Append-only log of completed turns in a local SQLite file.
pub struct TranscriptStore {
    conn: Arc<Mutex<Connection>>,
}

impl TranscriptStore {
    /// Open (or create) the transcript database at `path`.
    pub fn open(path: &Path) -> Result<Self, TranscriptError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create transcript directory")?;
        }
        let conn = Connection::open(path).context("Failed to open transcript database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to set WAL mode")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply transcript schema")?;

        log::info!("Transcript database opened at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn record(&self, entry: TranscriptEntry) -> Result<(), TranscriptError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            c.execute(
                "INSERT OR REPLACE INTO turns (id, recorded_at, question, sql_text, outcome, explanation) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    entry.id,
                    entry.recorded_at,
                    entry.question,
                    entry.sql,
                    entry.outcome,
                    entry.explanation,
                ],
            )
            .context("Failed to record turn")?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .context("spawn_blocking join error")??;
        Ok(())
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<TranscriptEntry>, TranscriptError> {
        let conn = self.conn.clone();
        let entries = tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let mut stmt = c
                .prepare(
                    "SELECT id, recorded_at, question, sql_text, outcome, explanation \
                     FROM turns ORDER BY recorded_at DESC, rowid DESC LIMIT ?1",
                )
                .context("Failed to prepare transcript query")?;

            let rows = stmt
                .query_map(rusqlite::params![limit as i64], |row| {
                    Ok(TranscriptEntry {
                        id: row.get(0)?,
                        recorded_at: row.get(1)?,
                        question: row.get(2)?,
                        sql: row.get(3)?,
                        outcome: row.get(4)?,
                        explanation: row.get(5)?,
                    })
                })
                .context("Failed to query transcript")?
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read transcript row")?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await
        .context("spawn_blocking join error")??;
        Ok(entries)
    }

    pub async fn clear(&self) -> Result<(), TranscriptError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            c.execute("DELETE FROM turns", [])
                .context("Failed to clear transcript")?;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .context("spawn_blocking join error")??;
        Ok(())
    }
}
