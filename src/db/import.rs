//! Loading a CSV export of a schedule into a database table.
//!
//! The target table is replaced: dropped if present, created with one column
//! per CSV header, then filled row by row inside a single transaction so a
//! failed load leaves the previous table in place.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};

use crate::db::connectors::DatabaseEngine;
use crate::db::gateway::{DatabaseGateway, ExecutionError};
use crate::db::schema::{CellValue, QueryParams, Table};
use crate::security::{quote_identifier, quote_table_name};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M",
];

/// Storage type chosen for one imported column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Date,
    DateTime,
    Text,
}

impl ColumnKind {
    fn of(value: &CellValue) -> Option<Self> {
        match value {
            CellValue::Null => None,
            CellValue::Int(_) | CellValue::Bool(_) => Some(ColumnKind::Integer),
            CellValue::Float(_) => Some(ColumnKind::Real),
            CellValue::Date(_) => Some(ColumnKind::Date),
            CellValue::DateTime(_) => Some(ColumnKind::DateTime),
            CellValue::Text(_) | CellValue::Other(_) => Some(ColumnKind::Text),
        }
    }

    /// Widen two observed kinds into one that holds both.
    fn merge(self, other: Self) -> Self {
        use ColumnKind::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Real) | (Real, Integer) => Real,
            (Date, DateTime) | (DateTime, Date) => DateTime,
            _ => Text,
        }
    }

    pub fn sql_type(self, engine: DatabaseEngine) -> &'static str {
        match (engine, self) {
            (DatabaseEngine::Sqlite, ColumnKind::Integer) => "INTEGER",
            (DatabaseEngine::Sqlite, ColumnKind::Real) => "REAL",
            (DatabaseEngine::Sqlite, ColumnKind::Date) => "DATE",
            (DatabaseEngine::Sqlite, ColumnKind::DateTime) => "DATETIME",
            (DatabaseEngine::Sqlite, ColumnKind::Text) => "TEXT",
            (DatabaseEngine::SqlServer, ColumnKind::Integer) => "BIGINT",
            (DatabaseEngine::SqlServer, ColumnKind::Real) => "FLOAT",
            (DatabaseEngine::SqlServer, ColumnKind::Date) => "DATE",
            (DatabaseEngine::SqlServer, ColumnKind::DateTime) => "DATETIME2",
            (DatabaseEngine::SqlServer, ColumnKind::Text) => "NVARCHAR(MAX)",
        }
    }
}

/// A parsed CSV file ready to load: the cells plus one kind per column.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportData {
    pub table: Table,
    pub kinds: Vec<ColumnKind>,
}

/// Interpret one CSV field. Empty fields are NULL.
pub fn parse_cell(field: &str) -> CellValue {
    let field = field.trim();
    if field.is_empty() {
        return CellValue::Null;
    }
    if let Ok(v) = field.parse::<i64>() {
        return CellValue::Int(v);
    }
    if let Ok(v) = field.parse::<f64>() {
        // "inf" and "NaN" parse as floats but are names, not numbers.
        if v.is_finite() && field.chars().any(|c| c.is_ascii_digit()) {
            return CellValue::Float(v);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(v) = NaiveDateTime::parse_from_str(field, format) {
            return CellValue::DateTime(v);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(v) = NaiveDate::parse_from_str(field, format) {
            return CellValue::Date(v);
        }
    }
    CellValue::Text(field.to_string())
}

/// Read a CSV file with a header line.
pub fn read_csv(path: &Path) -> Result<ImportData> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("cannot read the header of {}", path.display()))?
        .clone();
    let columns = column_names(headers.iter());
    if columns.is_empty() {
        bail!("{} has no header line", path.display());
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("bad CSV record {}", line + 1))?;
        let mut row: Vec<CellValue> = record.iter().map(parse_cell).collect();
        if row.len() > columns.len() {
            bail!(
                "record {} has {} fields but the header has {}",
                line + 1,
                row.len(),
                columns.len()
            );
        }
        row.resize(columns.len(), CellValue::Null);
        rows.push(row);
    }
    if rows.is_empty() {
        bail!("{} has no data rows", path.display());
    }

    Ok(prepare(Table::new(columns, rows)))
}

/// Unique, non-empty column names from a header line.
fn column_names<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for (i, header) in headers.enumerate() {
        let header = header.trim_start_matches('\u{feff}').trim();
        let base = if header.is_empty() {
            format!("column_{}", i + 1)
        } else {
            header.to_string()
        };
        let mut name = base.clone();
        let mut n = 2;
        while !seen.insert(name.to_lowercase()) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        names.push(name);
    }
    names
}

/// Pick a kind per column and store text columns as text throughout.
pub fn prepare(mut table: Table) -> ImportData {
    let kinds: Vec<ColumnKind> = (0..table.column_count())
        .map(|i| {
            table
                .column_values(i)
                .filter_map(ColumnKind::of)
                .reduce(ColumnKind::merge)
                .unwrap_or(ColumnKind::Text)
        })
        .collect();

    for row in &mut table.rows {
        for (cell, kind) in row.iter_mut().zip(&kinds) {
            *cell = match (kind, std::mem::replace(cell, CellValue::Null)) {
                (_, CellValue::Null) => CellValue::Null,
                (ColumnKind::Text, v @ CellValue::Text(_)) => v,
                (ColumnKind::Text, v) => CellValue::Text(v.to_string()),
                (ColumnKind::Real, CellValue::Int(v)) => CellValue::Float(v as f64),
                (ColumnKind::DateTime, CellValue::Date(v)) => {
                    CellValue::DateTime(v.and_hms_opt(0, 0, 0).unwrap_or_default())
                }
                (_, v) => v,
            };
        }
    }
    ImportData { table, kinds }
}

pub fn drop_table_sql(engine: DatabaseEngine, table_name: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_table_name(engine, table_name))
}

pub fn create_table_sql(engine: DatabaseEngine, table_name: &str, data: &ImportData) -> String {
    let columns: Vec<String> = data
        .table
        .columns
        .iter()
        .zip(&data.kinds)
        .map(|(name, kind)| {
            format!("{} {} NULL", quote_identifier(engine, name), kind.sql_type(engine))
        })
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        quote_table_name(engine, table_name),
        columns.join(", ")
    )
}

/// Insert statement with one named parameter `p<i>` per column.
pub fn insert_sql(engine: DatabaseEngine, table_name: &str, columns: &[String]) -> String {
    let prefix = match engine {
        DatabaseEngine::SqlServer => '@',
        DatabaseEngine::Sqlite => ':',
    };
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(engine, c)).collect();
    let placeholders: Vec<String> = (0..columns.len())
        .map(|i| format!("{}p{}", prefix, i))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_table_name(engine, table_name),
        names.join(", "),
        placeholders.join(", ")
    )
}

fn transaction_statements(engine: DatabaseEngine) -> (&'static str, &'static str, &'static str) {
    match engine {
        DatabaseEngine::SqlServer => (
            "BEGIN TRANSACTION",
            "COMMIT TRANSACTION",
            "ROLLBACK TRANSACTION",
        ),
        DatabaseEngine::Sqlite => ("BEGIN", "COMMIT", "ROLLBACK"),
    }
}

/// Replace `table_name` with the imported rows. Returns the number of rows
/// written.
pub async fn import_table(
    gateway: &mut DatabaseGateway,
    table_name: &str,
    data: &ImportData,
) -> Result<u64, ExecutionError> {
    let engine = gateway.engine();
    let (begin, commit, rollback) = transaction_statements(engine);

    gateway.execute(begin, None).await?;
    match load_rows(gateway, engine, table_name, data).await {
        Ok(written) => {
            gateway.execute(commit, None).await?;
            log::info!("Imported {} rows into {}", written, table_name);
            Ok(written)
        }
        Err(e) => {
            if let Err(rollback_error) = gateway.execute(rollback, None).await {
                log::warn!("Rollback after failed import failed: {}", rollback_error);
            }
            Err(e)
        }
    }
}

async fn load_rows(
    gateway: &mut DatabaseGateway,
    engine: DatabaseEngine,
    table_name: &str,
    data: &ImportData,
) -> Result<u64, ExecutionError> {
    gateway.execute(&drop_table_sql(engine, table_name), None).await?;
    gateway
        .execute(&create_table_sql(engine, table_name, data), None)
        .await?;

    let insert = insert_sql(engine, table_name, &data.table.columns);
    let mut written = 0;
    for row in &data.table.rows {
        let params: QueryParams = row
            .iter()
            .enumerate()
            .map(|(i, cell)| (format!("p{}", i), cell.clone()))
            .collect();
        gateway.execute(&insert, Some(&params)).await?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connectors::{create_connector, ConnectionConfig};
    use crate::db::schema::ExecutionOutcome;

    fn write_csv(dir: &Path, text: &str) -> std::path::PathBuf {
        let path = dir.join("schedule.csv");
        std::fs::write(&path, text).unwrap();
        path
    }

    fn sqlite_gateway(dir: &Path) -> DatabaseGateway {
        let config = ConnectionConfig {
            engine: DatabaseEngine::Sqlite,
            file_path: Some(dir.join("schedule.db").to_string_lossy().into_owned()),
            ..Default::default()
        };
        DatabaseGateway::new(create_connector(config))
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell(""), CellValue::Null);
        assert_eq!(parse_cell(" 42 "), CellValue::Int(42));
        assert_eq!(parse_cell("12.5"), CellValue::Float(12.5));
        assert_eq!(
            parse_cell("2024-03-15"),
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        assert_eq!(
            parse_cell("15.03.2024"),
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        assert!(matches!(parse_cell("2024-03-15 08:00:00"), CellValue::DateTime(_)));
        assert_eq!(parse_cell("NaN"), CellValue::Text("NaN".into()));
        assert_eq!(parse_cell("inf"), CellValue::Text("inf".into()));
        assert_eq!(parse_cell("Excavation"), CellValue::Text("Excavation".into()));
    }

    #[test]
    fn test_read_csv_infers_column_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "\u{feff}Activity ID,Activity Name,Progress,Duration,Start Date\n\
             A1,Excavation,50,10,2024-01-10\n\
             A2,\"Formwork, level 1\",80,2.5,2024-02-01\n\
             W1,WBS: Structure,,,\n",
        );

        let data = read_csv(&path).unwrap();
        assert_eq!(
            data.table.columns,
            vec!["Activity ID", "Activity Name", "Progress", "Duration", "Start Date"]
        );
        assert_eq!(
            data.kinds,
            vec![
                ColumnKind::Text,
                ColumnKind::Text,
                ColumnKind::Integer,
                ColumnKind::Real,
                ColumnKind::Date
            ]
        );
        assert_eq!(data.table.row_count(), 3);
        assert_eq!(data.table.rows[1][1], CellValue::Text("Formwork, level 1".into()));
        assert_eq!(data.table.rows[0][3], CellValue::Float(10.0));
        assert_eq!(data.table.rows[2][2], CellValue::Null);
    }

    #[test]
    fn test_mixed_column_is_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "Code\n100\nA-7\n");
        let data = read_csv(&path).unwrap();
        assert_eq!(data.kinds, vec![ColumnKind::Text]);
        assert_eq!(data.table.rows[0][0], CellValue::Text("100".into()));
    }

    #[test]
    fn test_header_names_are_unique() {
        let names = column_names(["Status", "", "status", "Status"].into_iter());
        assert_eq!(names, vec!["Status", "column_2", "status_2", "Status_3"]);
    }

    #[test]
    fn test_read_csv_rejects_empty_and_ragged_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "Activity ID,Progress\n");
        assert!(read_csv(&path).unwrap_err().to_string().contains("no data rows"));

        let path = write_csv(dir.path(), "Activity ID,Progress\nA1,50,extra\n");
        assert!(read_csv(&path).unwrap_err().to_string().contains("has 3 fields"));

        assert!(read_csv(&dir.path().join("missing.csv")).is_err());
    }

    #[test]
    fn test_statements_per_engine() {
        let data = prepare(Table::new(
            vec!["Activity Name".into(), "Progress".into()],
            vec![vec![CellValue::Text("Excavation".into()), CellValue::Int(50)]],
        ));
        assert_eq!(
            create_table_sql(DatabaseEngine::SqlServer, "planning.activities", &data),
            "CREATE TABLE [planning].[activities] ([Activity Name] NVARCHAR(MAX) NULL, [Progress] BIGINT NULL)"
        );
        assert_eq!(
            create_table_sql(DatabaseEngine::Sqlite, "activities", &data),
            "CREATE TABLE \"activities\" (\"Activity Name\" TEXT NULL, \"Progress\" INTEGER NULL)"
        );
        assert_eq!(
            insert_sql(DatabaseEngine::SqlServer, "activities", &data.table.columns),
            "INSERT INTO [activities] ([Activity Name], [Progress]) VALUES (@p0, @p1)"
        );
        assert_eq!(
            insert_sql(DatabaseEngine::Sqlite, "activities", &data.table.columns),
            "INSERT INTO \"activities\" (\"Activity Name\", \"Progress\") VALUES (:p0, :p1)"
        );
        assert_eq!(
            drop_table_sql(DatabaseEngine::SqlServer, "activities"),
            "DROP TABLE IF EXISTS [activities]"
        );
    }

    #[tokio::test]
    async fn test_import_replaces_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut gateway = sqlite_gateway(dir.path());
        gateway
            .execute("CREATE TABLE activities (old_column INTEGER)", None)
            .await
            .unwrap();

        let path = write_csv(
            dir.path(),
            "Activity Name,Progress\nExcavation,50\nSteel erection,90\n",
        );
        let data = read_csv(&path).unwrap();
        assert_eq!(import_table(&mut gateway, "activities", &data).await, Ok(2));

        let outcome = gateway
            .execute("SELECT [Activity Name], Progress FROM activities ORDER BY Progress", None)
            .await
            .unwrap();
        let ExecutionOutcome::Rows(table) = outcome else {
            panic!("expected rows");
        };
        assert_eq!(table.columns, vec!["Activity Name", "Progress"]);
        assert_eq!(
            table.rows[1],
            vec![CellValue::Text("Steel erection".into()), CellValue::Int(90)]
        );
    }

    #[tokio::test]
    async fn test_failed_import_keeps_previous_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut gateway = sqlite_gateway(dir.path());
        gateway
            .execute("CREATE TABLE activities (name TEXT)", None)
            .await
            .unwrap();
        gateway
            .execute("INSERT INTO activities VALUES ('kept')", None)
            .await
            .unwrap();

        // Duplicate columns make CREATE TABLE fail after the drop ran.
        let data = prepare(Table::new(
            vec!["name".into(), "name".into()],
            vec![vec![CellValue::Text("new".into()), CellValue::Null]],
        ));
        let err = import_table(&mut gateway, "activities", &data).await.unwrap_err();
        assert!(err.message.contains("duplicate column"), "{}", err);

        let outcome = gateway
            .execute("SELECT name FROM activities", None)
            .await
            .unwrap();
        assert_eq!(
            outcome.table().unwrap().rows,
            vec![vec![CellValue::Text("kept".into())]]
        );
    }
}
