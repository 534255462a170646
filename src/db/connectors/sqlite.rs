use super::{ConnectionConfig, DatabaseConnector, DatabaseEngine};
use crate::db::schema::{CellValue, ColumnInfo, ExecutionOutcome, QueryParams, Relationship, Table};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OpenFlags};
use std::sync::{Arc, Mutex};

const DEFAULT_DATABASE_FILE: &str = "construction_schedule.db";

const TABLES_QUERY: &str = "SELECT name FROM sqlite_master \
                            WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                            ORDER BY name";

const COLUMNS_QUERY: &str = "SELECT name, type, \"notnull\", dflt_value \
                             FROM pragma_table_info(?1) ORDER BY cid";

const RELATIONSHIPS_QUERY: &str = "SELECT m.name, fk.id, fk.\"from\", fk.\"table\", fk.\"to\" \
                                   FROM sqlite_master m \
                                   JOIN pragma_foreign_key_list(m.name) fk \
                                   WHERE m.type = 'table' \
                                   ORDER BY m.name, fk.\"from\"";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// SQLite connector using rusqlite. Blocking calls run on the tokio
/// blocking pool, as the app database does.
pub struct SqliteConnector {
    config: ConnectionConfig,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    fn database_path(&self) -> String {
        self.config
            .file_path
            .clone()
            .or_else(|| self.config.database.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE_FILE.to_string())
    }

    /// Run `f` against the open connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let c = guard
                .as_ref()
                .ok_or_else(|| anyhow!("Not connected to SQLite"))?;
            f(c)
        })
        .await
        .context("spawn_blocking join error")?
    }

    /// `VARCHAR(255)` -> 255
    fn declared_length(data_type: &str) -> Option<i32> {
        let open = data_type.find('(')?;
        let close = data_type[open..].find(')')? + open;
        data_type[open + 1..close]
            .split(',')
            .next()
            .and_then(|s| s.trim().parse().ok())
    }

    fn is_temporal_decl(decl: Option<&str>) -> bool {
        decl.map(|d| {
            let upper = d.to_uppercase();
            upper.contains("DATE") || upper.contains("TIME")
        })
        .unwrap_or(false)
    }

    /// Convert one SQLite value, parsing text in date/time typed columns.
    fn value_to_cell(value: ValueRef<'_>, temporal: bool) -> CellValue {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(v) => CellValue::Int(v),
            ValueRef::Real(v) => CellValue::Float(v),
            ValueRef::Text(bytes) => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                if temporal {
                    if let Some(cell) = Self::parse_temporal(&text) {
                        return cell;
                    }
                }
                CellValue::Text(text)
            }
            ValueRef::Blob(bytes) => CellValue::Other(format!("0x{}", hex::encode_upper(bytes))),
        }
    }

    fn parse_temporal(text: &str) -> Option<CellValue> {
        for format in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                return Some(CellValue::DateTime(dt));
            }
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .map(CellValue::Date)
    }

    fn cell_to_value(cell: &CellValue) -> Value {
        match cell {
            CellValue::Null => Value::Null,
            CellValue::Bool(v) => Value::Integer(*v as i64),
            CellValue::Int(v) => Value::Integer(*v),
            CellValue::Float(v) => Value::Real(*v),
            CellValue::Text(v) | CellValue::Other(v) => Value::Text(v.clone()),
            CellValue::Date(_) | CellValue::DateTime(_) => Value::Text(cell.to_string()),
        }
    }

    /// Accept `name`, `:name`, `@name` or `$name` keys.
    fn parameter_name(key: &str) -> String {
        if key.starts_with([':', '@', '$']) {
            key.to_string()
        } else {
            format!(":{}", key)
        }
    }

    fn run_statement(
        c: &Connection,
        sql: &str,
        params: &[(String, Value)],
    ) -> anyhow::Result<ExecutionOutcome> {
        let mut stmt = c.prepare(sql).context("Failed to prepare statement")?;

        for (name, value) in params {
            let index = stmt
                .parameter_index(name)?
                .ok_or_else(|| anyhow!("Statement has no parameter named {}", name))?;
            stmt.raw_bind_parameter(index, value)?;
        }

        if stmt.column_count() == 0 {
            let affected = stmt.raw_execute().context("Failed to execute statement")?;
            return Ok(ExecutionOutcome::Affected(affected as u64));
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let temporal: Vec<bool> = stmt
            .columns()
            .iter()
            .map(|col| Self::is_temporal_decl(col.decl_type()))
            .collect();

        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next().context("Failed to read query results")? {
            let mut cells = Vec::with_capacity(columns.len());
            for (i, is_temporal) in temporal.iter().enumerate() {
                cells.push(Self::value_to_cell(row.get_ref(i)?, *is_temporal));
            }
            out.push(cells);
        }

        Ok(ExecutionOutcome::Rows(Table::new(columns, out)))
    }
}

#[async_trait]
impl DatabaseConnector for SqliteConnector {
    async fn connect(&mut self) -> anyhow::Result<()> {
        let path = self.database_path();
        let read_only = self.config.read_only;
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let connection = if read_only {
                Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            } else {
                Connection::open(&path)
            }
            .context(format!("Failed to open SQLite database {}", path))?;

            connection
                .execute_batch("PRAGMA foreign_keys = ON;")
                .context("Failed to enable foreign keys")?;

            let mut guard = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            *guard = Some(connection);
            log::info!("Opened SQLite database {}", path);
            Ok(())
        })
        .await
        .context("spawn_blocking join error")?
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        let mut guard = self.conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        *guard = None;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.conn.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.with_conn(|c| {
            c.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .context("Connection check failed")?;
            Ok(())
        })
        .await
    }

    async fn get_tables(&self) -> anyhow::Result<Vec<String>> {
        self.with_conn(|c| {
            let mut stmt = c
                .prepare(TABLES_QUERY)
                .context("Failed to prepare tables query")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .context("Failed to query tables")?;
            let mut tables = Vec::new();
            for row in rows {
                tables.push(row?);
            }
            Ok(tables)
        })
        .await
    }

    async fn get_columns(&self, table_name: &str) -> anyhow::Result<Vec<ColumnInfo>> {
        let table = table_name.to_string();
        self.with_conn(move |c| {
            let mut stmt = c
                .prepare(COLUMNS_QUERY)
                .context("Failed to prepare columns query")?;
            let rows = stmt
                .query_map([&table], |row| {
                    let data_type: String = row.get(1)?;
                    let not_null: i64 = row.get(2)?;
                    Ok(ColumnInfo {
                        name: row.get(0)?,
                        max_length: Self::declared_length(&data_type),
                        data_type,
                        nullable: not_null == 0,
                        default: row.get(3)?,
                    })
                })
                .context(format!("Failed to query columns of {}", table))?;
            let mut columns = Vec::new();
            for row in rows {
                columns.push(row?);
            }
            Ok(columns)
        })
        .await
    }

    async fn get_relationships(&self) -> anyhow::Result<Vec<Relationship>> {
        self.with_conn(|c| {
            let mut stmt = c
                .prepare(RELATIONSHIPS_QUERY)
                .context("Failed to prepare foreign key query")?;
            let rows = stmt
                .query_map([], |row| {
                    let parent_table: String = row.get(0)?;
                    let id: i64 = row.get(1)?;
                    Ok(Relationship {
                        fk_name: format!("fk_{}_{}", parent_table, id),
                        parent_column: row.get(2)?,
                        referenced_table: row.get(3)?,
                        referenced_column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        parent_table,
                    })
                })
                .context("Failed to query foreign keys")?;
            let mut relationships = Vec::new();
            for row in rows {
                relationships.push(row?);
            }
            Ok(relationships)
        })
        .await
    }

    async fn execute(&self, sql: &str, params: &QueryParams) -> anyhow::Result<ExecutionOutcome> {
        let sql = sql.to_string();
        let params: Vec<(String, Value)> = params
            .iter()
            .map(|(k, v)| (Self::parameter_name(k), Self::cell_to_value(v)))
            .collect();

        self.with_conn(move |c| Self::run_statement(c, &sql, &params))
            .await
    }

    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::Sqlite
    }
}
