use super::{ConnectionConfig, DatabaseConnector, DatabaseEngine, MissingCredentials};
use crate::db::schema::{CellValue, ColumnInfo, ExecutionOutcome, QueryParams, Relationship, Table};
use crate::security::leading_keywords;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, QueryItem};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

const TABLES_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                            WHERE TABLE_TYPE = 'BASE TABLE' \
                            ORDER BY TABLE_NAME";

const COLUMNS_QUERY: &str = "SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, \
                                    IS_NULLABLE, COLUMN_DEFAULT \
                             FROM INFORMATION_SCHEMA.COLUMNS \
                             WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 \
                             ORDER BY ORDINAL_POSITION";

const RELATIONSHIPS_QUERY: &str = "SELECT fk.name AS FK_NAME, \
                                          tp.name AS PARENT_TABLE, \
                                          cp.name AS PARENT_COLUMN, \
                                          tr.name AS REFERENCED_TABLE, \
                                          cr.name AS REFERENCED_COLUMN \
                                   FROM sys.foreign_keys fk \
                                   INNER JOIN sys.tables tp ON fk.parent_object_id = tp.object_id \
                                   INNER JOIN sys.tables tr ON fk.referenced_object_id = tr.object_id \
                                   INNER JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id \
                                   INNER JOIN sys.columns cp ON fkc.parent_column_id = cp.column_id \
                                       AND fkc.parent_object_id = cp.object_id \
                                   INNER JOIN sys.columns cr ON fkc.referenced_column_id = cr.column_id \
                                       AND fkc.referenced_object_id = cr.object_id \
                                   ORDER BY tp.name, cp.name";

/// Column of the trailing result set that reports `@@ROWCOUNT`.
const ROW_COUNT_COLUMN: &str = "__schedule_sql_rowcount";

/// SQL Server / Azure SQL connector using tiberius
pub struct SqlServerConnector {
    config: ConnectionConfig,
    client: Mutex<Option<Client<Compat<TcpStream>>>>,
}

impl SqlServerConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    /// Build a tiberius Config from our ConnectionConfig and return it with the TCP address.
    fn build_tiberius_config(&self) -> anyhow::Result<(Config, String)> {
        if let Some(ref conn_str) = self.config.connection_string {
            let config = Config::from_ado_string(conn_str)
                .context("Failed to parse SQL Server connection string")?;
            let addr = config.get_addr();
            return Ok((config, addr));
        }

        let mut tib_config = Config::new();

        let host = self
            .config
            .host
            .clone()
            .unwrap_or_else(|| "localhost".to_string());
        let port = self.config.port.unwrap_or(1433);

        tib_config.host(&host);
        tib_config.port(port);

        if let Some(ref db) = self.config.database {
            tib_config.database(db);
        }

        match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) if !user.is_empty() => {
                tib_config.authentication(AuthMethod::sql_server(user, pass));
            }
            _ => return Err(MissingCredentials("SQL Server username and password").into()),
        }

        // Azure SQL requires encryption; local dev servers use self-signed certs
        tib_config.trust_cert();
        tib_config.encryption(EncryptionLevel::Required);

        Ok((tib_config, format!("{}:{}", host, port)))
    }

    /// Split `schema.table` into its parts, defaulting to `dbo`.
    fn split_table_name(table_name: &str) -> (String, String) {
        match table_name.split_once('.') {
            Some((schema, table)) => (schema.to_string(), table.to_string()),
            None => ("dbo".to_string(), table_name.to_string()),
        }
    }

    /// Convert a tiberius Row into an ordered list of cells
    fn row_to_cells(row: &tiberius::Row) -> Vec<CellValue> {
        row.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| Self::column_to_cell(row, idx, col))
            .collect()
    }

    /// Convert a single tiberius column value to a CellValue
    fn column_to_cell(row: &tiberius::Row, idx: usize, col: &tiberius::Column) -> CellValue {
        use tiberius::ColumnType;

        match col.column_type() {
            ColumnType::Null => CellValue::Null,
            ColumnType::Bit | ColumnType::Bitn => match row.try_get::<bool, _>(idx) {
                Ok(Some(v)) => CellValue::Bool(v),
                _ => CellValue::Null,
            },
            ColumnType::Int1 => match row.try_get::<u8, _>(idx) {
                Ok(Some(v)) => CellValue::Int(v as i64),
                _ => CellValue::Null,
            },
            ColumnType::Int2 => match row.try_get::<i16, _>(idx) {
                Ok(Some(v)) => CellValue::Int(v as i64),
                _ => CellValue::Null,
            },
            ColumnType::Int4 => match row.try_get::<i32, _>(idx) {
                Ok(Some(v)) => CellValue::Int(v as i64),
                _ => CellValue::Null,
            },
            ColumnType::Int8 => match row.try_get::<i64, _>(idx) {
                Ok(Some(v)) => CellValue::Int(v),
                _ => CellValue::Null,
            },
            ColumnType::Intn => {
                if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
                    CellValue::Int(v)
                } else if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
                    CellValue::Int(v as i64)
                } else if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
                    CellValue::Int(v as i64)
                } else if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
                    CellValue::Int(v as i64)
                } else {
                    CellValue::Null
                }
            }
            ColumnType::Float4 => match row.try_get::<f32, _>(idx) {
                Ok(Some(v)) => CellValue::Float(v as f64),
                _ => CellValue::Null,
            },
            ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => {
                match row.try_get::<f64, _>(idx) {
                    Ok(Some(v)) => CellValue::Float(v),
                    _ => CellValue::Null,
                }
            }
            ColumnType::Floatn => {
                if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
                    CellValue::Float(v)
                } else if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
                    CellValue::Float(v as f64)
                } else {
                    CellValue::Null
                }
            }
            ColumnType::Numericn | ColumnType::Decimaln => {
                match row.try_get::<tiberius::numeric::Numeric, _>(idx) {
                    Ok(Some(v)) => CellValue::Float(f64::from(v)),
                    _ => CellValue::Null,
                }
            }
            ColumnType::Daten => match row.try_get::<chrono::NaiveDate, _>(idx) {
                Ok(Some(v)) => CellValue::Date(v),
                _ => CellValue::Null,
            },
            ColumnType::Datetime
            | ColumnType::Datetime4
            | ColumnType::Datetimen
            | ColumnType::Datetime2 => match row.try_get::<chrono::NaiveDateTime, _>(idx) {
                Ok(Some(v)) => CellValue::DateTime(v),
                _ => CellValue::Null,
            },
            ColumnType::DatetimeOffsetn => {
                match row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
                    Ok(Some(v)) => CellValue::DateTime(v.naive_utc()),
                    _ => CellValue::Null,
                }
            }
            ColumnType::Timen => match row.try_get::<chrono::NaiveTime, _>(idx) {
                Ok(Some(v)) => CellValue::Other(v.to_string()),
                _ => CellValue::Null,
            },
            ColumnType::Guid => match row.try_get::<tiberius::Uuid, _>(idx) {
                Ok(Some(v)) => CellValue::Other(v.to_string()),
                _ => CellValue::Null,
            },
            ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => {
                match row.try_get::<&[u8], _>(idx) {
                    Ok(Some(v)) => CellValue::Other(format!("0x{}", hex::encode_upper(v))),
                    _ => CellValue::Null,
                }
            }
            _ => match row.try_get::<&str, _>(idx) {
                Ok(Some(v)) => CellValue::Text(v.to_string()),
                _ => CellValue::Null,
            },
        }
    }
}

/// Rewrite `@name` placeholders to tiberius' positional `@Pn`, returning the
/// values in bind order. Longer names are rewritten first so `@id` never
/// clobbers `@idx`.
pub(crate) fn bind_positional<'a>(
    sql: &str,
    params: &'a QueryParams,
) -> (String, Vec<&'a CellValue>) {
    let mut names: Vec<(usize, &String)> = params.keys().enumerate().collect();
    names.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut rewritten = sql.to_string();
    for (position, name) in names {
        let placeholder = format!("@{}", name.trim_start_matches('@'));
        rewritten = rewritten.replace(&placeholder, &format!("@P{}", position + 1));
    }

    (rewritten, params.values().collect())
}

/// One result set of a batch, in arrival order.
#[derive(Debug, Clone, PartialEq)]
struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

/// Module definitions that SQL Server only accepts as the sole statement of
/// a batch, so nothing may be appended to them.
fn must_run_alone(sql: &str) -> bool {
    let words = leading_keywords(sql, 4);
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    let object = match words.as_slice() {
        ["CREATE", "OR", "ALTER", object, ..] | ["CREATE" | "ALTER", object, ..] => *object,
        _ => return false,
    };
    matches!(
        object,
        "VIEW" | "PROCEDURE" | "PROC" | "FUNCTION" | "TRIGGER" | "SCHEMA" | "DEFAULT" | "RULE"
    )
}

/// Append a trailing `@@ROWCOUNT` select so batches that return no rows of
/// their own still report how many rows their last statement touched.
fn with_row_count(statement: &str) -> String {
    let body = statement.trim_end();
    let terminator = if body.ends_with(';') { "" } else { ";" };
    format!(
        "{}{}\nSELECT CAST(@@ROWCOUNT AS BIGINT) AS [{}]",
        body, terminator, ROW_COUNT_COLUMN
    )
}

/// The first result set the batch itself produced becomes the table, whatever
/// statement kinds the batch contains (`DECLARE ...; SELECT`, `EXEC`,
/// `INSERT ... OUTPUT`). Without one the outcome is the row count.
fn outcome_from_result_sets(mut sets: Vec<ResultSet>) -> ExecutionOutcome {
    let is_row_count =
        |set: &ResultSet| set.columns.len() == 1 && set.columns[0] == ROW_COUNT_COLUMN;
    let mut affected = 0;
    if sets.last().is_some_and(is_row_count) {
        let count = sets.pop().and_then(|set| set.rows.into_iter().flatten().next());
        if let Some(CellValue::Int(n)) = count {
            affected = n.max(0) as u64;
        }
    }

    match sets.into_iter().next() {
        Some(set) => ExecutionOutcome::Rows(Table::new(set.columns, set.rows)),
        None => ExecutionOutcome::Affected(affected),
    }
}

fn bind_cell<'a>(query: &mut Query<'a>, value: &'a CellValue) {
    match value {
        CellValue::Null => query.bind(Option::<&str>::None),
        CellValue::Bool(v) => query.bind(*v),
        CellValue::Int(v) => query.bind(*v),
        CellValue::Float(v) => query.bind(*v),
        CellValue::Text(v) | CellValue::Other(v) => query.bind(v.as_str()),
        CellValue::Date(v) => query.bind(*v),
        CellValue::DateTime(v) => query.bind(*v),
    }
}

#[async_trait]
impl DatabaseConnector for SqlServerConnector {
    async fn connect(&mut self) -> anyhow::Result<()> {
        let (tib_config, addr) = self.build_tiberius_config()?;
        let timeout = Duration::from_secs(self.config.connection_timeout_secs);

        let tcp = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("Timed out connecting to SQL Server at {}", addr))?
            .context(format!("Failed to connect to SQL Server at {}", addr))?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(tib_config, tcp.compat_write())
            .await
            .context("TDS connection/authentication failed")?;

        log::info!("Connected to SQL Server at {}", addr);
        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        *self.client.lock().await = None;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.client.lock().await.is_some()
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to SQL Server"))?;

        client
            .simple_query("SELECT 1")
            .await
            .context("Connection check failed")?
            .into_first_result()
            .await
            .context("Connection check failed")?;
        Ok(())
    }

    async fn get_tables(&self) -> anyhow::Result<Vec<String>> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to SQL Server"))?;

        let rows = client
            .simple_query(TABLES_QUERY)
            .await
            .context("Failed to query tables")?
            .into_first_result()
            .await
            .context("Failed to read table results")?;

        let mut tables = Vec::new();
        for row in &rows {
            let schema: &str = row.try_get(0)?.unwrap_or("dbo");
            let name: &str = row.try_get(1)?.unwrap_or("");
            if schema == "dbo" {
                tables.push(name.to_string());
            } else {
                tables.push(format!("{}.{}", schema, name));
            }
        }
        Ok(tables)
    }

    async fn get_columns(&self, table_name: &str) -> anyhow::Result<Vec<ColumnInfo>> {
        let (schema_name, bare_table) = Self::split_table_name(table_name);

        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to SQL Server"))?;

        let mut query = Query::new(COLUMNS_QUERY);
        query.bind(schema_name.as_str());
        query.bind(bare_table.as_str());

        let rows = query
            .query(client)
            .await
            .context(format!("Failed to query columns of {}", table_name))?
            .into_first_result()
            .await
            .context("Failed to read column results")?;

        let mut columns = Vec::new();
        for row in &rows {
            let name: &str = row.try_get(0)?.unwrap_or("");
            let data_type: &str = row.try_get(1)?.unwrap_or("");
            let max_length: Option<i32> = row.try_get(2)?;
            let nullable: &str = row.try_get(3)?.unwrap_or("YES");
            let default: Option<&str> = row.try_get(4)?;

            columns.push(ColumnInfo {
                name: name.to_string(),
                data_type: data_type.to_string(),
                nullable: nullable == "YES",
                max_length,
                default: default.map(|s| s.to_string()),
            });
        }
        Ok(columns)
    }

    async fn get_relationships(&self) -> anyhow::Result<Vec<Relationship>> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to SQL Server"))?;

        let rows = client
            .simple_query(RELATIONSHIPS_QUERY)
            .await
            .context("Failed to query foreign keys")?
            .into_first_result()
            .await
            .context("Failed to read foreign key results")?;

        let mut relationships = Vec::with_capacity(rows.len());
        for row in &rows {
            let text = |idx: usize| -> anyhow::Result<String> {
                Ok(row.try_get::<&str, _>(idx)?.unwrap_or("").to_string())
            };
            relationships.push(Relationship {
                fk_name: text(0)?,
                parent_table: text(1)?,
                parent_column: text(2)?,
                referenced_table: text(3)?,
                referenced_column: text(4)?,
            });
        }
        Ok(relationships)
    }

    async fn execute(&self, sql: &str, params: &QueryParams) -> anyhow::Result<ExecutionOutcome> {
        let (statement, binds) = bind_positional(sql, params);

        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to SQL Server"))?;

        if must_run_alone(&statement) {
            let mut query = Query::new(statement);
            for value in binds {
                bind_cell(&mut query, value);
            }
            let result = query
                .execute(client)
                .await
                .context("Failed to execute statement")?;
            return Ok(ExecutionOutcome::Affected(result.rows_affected().iter().sum()));
        }

        let mut query = Query::new(with_row_count(&statement));
        for value in binds {
            bind_cell(&mut query, value);
        }

        let mut stream = query.query(client).await.context("Failed to execute statement")?;
        let mut result_sets: Vec<ResultSet> = Vec::new();
        while let Some(item) = stream
            .try_next()
            .await
            .context("Failed to read query results")?
        {
            match item {
                QueryItem::Metadata(meta) => result_sets.push(ResultSet {
                    columns: meta.columns().iter().map(|c| c.name().to_string()).collect(),
                    rows: Vec::new(),
                }),
                QueryItem::Row(row) => {
                    if let Some(set) = result_sets.last_mut() {
                        set.rows.push(Self::row_to_cells(&row));
                    }
                }
            }
        }

        Ok(outcome_from_result_sets(result_sets))
    }

    fn engine(&self) -> DatabaseEngine {
        DatabaseEngine::SqlServer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_config_from_params() {
        let config = ConnectionConfig {
            engine: DatabaseEngine::SqlServer,
            host: Some("myserver".to_string()),
            port: Some(1434),
            database: Some("schedule".to_string()),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..Default::default()
        };
        let connector = SqlServerConnector::new(config);
        let (_tib_config, addr) = connector.build_tiberius_config().unwrap();
        assert_eq!(addr, "myserver:1434");
    }

    #[test]
    fn test_build_config_defaults() {
        let config = ConnectionConfig {
            engine: DatabaseEngine::SqlServer,
            username: Some("sa".to_string()),
            password: Some("pass".to_string()),
            ..Default::default()
        };
        let connector = SqlServerConnector::new(config);
        let (_tib_config, addr) = connector.build_tiberius_config().unwrap();
        assert_eq!(addr, "localhost:1433");
    }

    #[test]
    fn test_build_config_without_credentials_fails() {
        for (username, password) in [
            (None, None),
            (Some("sa"), None),
            (None, Some("pass")),
            (Some(""), Some("pass")),
        ] {
            let connector = SqlServerConnector::new(ConnectionConfig {
                engine: DatabaseEngine::SqlServer,
                host: Some("sched.database.windows.net".to_string()),
                username: username.map(str::to_string),
                password: password.map(str::to_string),
                ..Default::default()
            });
            let err = connector.build_tiberius_config().unwrap_err();
            assert!(err.downcast_ref::<MissingCredentials>().is_some(), "{:#}", err);
        }
    }

    #[tokio::test]
    async fn test_connect_without_credentials_fails_before_network() {
        // Port 9 on a reserved address: reaching the network would time out.
        let mut connector = SqlServerConnector::new(ConnectionConfig {
            engine: DatabaseEngine::SqlServer,
            host: Some("192.0.2.1".to_string()),
            port: Some(9),
            connection_timeout_secs: 30,
            ..Default::default()
        });
        let err = tokio::time::timeout(Duration::from_secs(2), connector.connect())
            .await
            .expect("connect should fail immediately")
            .unwrap_err();
        assert!(err.to_string().contains("missing credentials"));
        assert!(!connector.is_connected().await);
    }

    fn rows(columns: &[&str], rows: Vec<Vec<CellValue>>) -> ResultSet {
        ResultSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn row_count(n: i64) -> ResultSet {
        rows(&[ROW_COUNT_COLUMN], vec![vec![CellValue::Int(n)]])
    }

    #[test]
    fn test_with_row_count_appends_trailing_select() {
        assert_eq!(
            with_row_count("UPDATE activities SET Progress = 100  \n"),
            format!(
                "UPDATE activities SET Progress = 100;\nSELECT CAST(@@ROWCOUNT AS BIGINT) AS [{}]",
                ROW_COUNT_COLUMN
            )
        );
        assert!(with_row_count("SELECT 1;").starts_with("SELECT 1;\nSELECT CAST"));
        // A trailing line comment cannot swallow the appended statement.
        assert!(with_row_count("SELECT 1 -- all").contains("-- all;\nSELECT CAST"));
    }

    #[test]
    fn test_declare_then_select_returns_rows() {
        // DECLARE @t INT = 75; SELECT [Activity Name] FROM activities WHERE Progress > @t
        let outcome = outcome_from_result_sets(vec![
            rows(&["Activity Name"], vec![vec![CellValue::Text("Pour slab".into())]]),
            row_count(1),
        ]);
        let table = outcome.table().expect("rows");
        assert_eq!(table.columns, vec!["Activity Name"]);
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_nocount_select_with_no_matches_is_an_empty_table() {
        // SET NOCOUNT ON; SELECT * FROM activities WHERE 1 = 0
        let outcome = outcome_from_result_sets(vec![
            rows(&["Activity ID", "Progress"], vec![]),
            row_count(0),
        ]);
        assert_eq!(
            outcome,
            ExecutionOutcome::Rows(Table::new(
                vec!["Activity ID".into(), "Progress".into()],
                vec![]
            ))
        );
    }

    #[test]
    fn test_exec_with_several_result_sets_keeps_the_first() {
        // EXEC sp_help 'activities'
        let outcome = outcome_from_result_sets(vec![
            rows(
                &["Name", "Owner"],
                vec![vec![CellValue::Text("activities".into()), CellValue::Text("dbo".into())]],
            ),
            rows(&["Column_name"], vec![vec![CellValue::Text("Progress".into())]]),
            row_count(1),
        ]);
        assert_eq!(outcome.table().expect("rows").columns, vec!["Name", "Owner"]);
    }

    #[test]
    fn test_insert_output_returns_inserted_rows() {
        // INSERT INTO activities (...) OUTPUT inserted.[Activity ID] VALUES (...), (...)
        let outcome = outcome_from_result_sets(vec![
            rows(
                &["Activity ID"],
                vec![vec![CellValue::Text("A9".into())], vec![CellValue::Text("A10".into())]],
            ),
            row_count(2),
        ]);
        assert_eq!(outcome.table().expect("rows").row_count(), 2);
    }

    #[test]
    fn test_plain_dml_reports_affected_rows() {
        // UPDATE activities SET Status = 'Complete' WHERE Progress = 100
        assert_eq!(
            outcome_from_result_sets(vec![row_count(3)]),
            ExecutionOutcome::Affected(3)
        );
        assert_eq!(outcome_from_result_sets(vec![]), ExecutionOutcome::Affected(0));
    }

    #[test]
    fn test_module_definitions_run_alone() {
        assert!(must_run_alone("CREATE VIEW late AS SELECT * FROM activities"));
        assert!(must_run_alone("/* v2 */ create or alter procedure p AS SELECT 1"));
        assert!(must_run_alone("ALTER FUNCTION f() RETURNS INT AS BEGIN RETURN 1 END"));
        assert!(!must_run_alone("CREATE TABLE t (id INT)"));
        assert!(!must_run_alone("DECLARE @t INT = 75; SELECT @t"));
        assert!(!must_run_alone("SELECT 'CREATE VIEW'"));
    }

    #[test]
    fn test_build_config_from_connection_string() {
        let config = ConnectionConfig {
            engine: DatabaseEngine::SqlServer,
            connection_string: Some(
                "Server=tcp:myserver,1444;Database=schedule;User Id=sa;Password=pass;".to_string(),
            ),
            ..Default::default()
        };
        let connector = SqlServerConnector::new(config);
        let (_tib_config, addr) = connector.build_tiberius_config().unwrap();
        assert_eq!(addr, "myserver:1444");
    }

    #[test]
    fn test_split_table_name() {
        assert_eq!(
            SqlServerConnector::split_table_name("activities"),
            ("dbo".to_string(), "activities".to_string())
        );
        assert_eq!(
            SqlServerConnector::split_table_name("planning.activities"),
            ("planning".to_string(), "activities".to_string())
        );
    }

    #[test]
    fn test_bind_positional_rewrites_names_in_order() {
        let mut params = QueryParams::new();
        params.insert("id".into(), CellValue::Int(7));
        params.insert("idx".into(), CellValue::Text("x".into()));

        let (sql, binds) =
            bind_positional("SELECT * FROM t WHERE a = @id AND b = @idx", &params);
        assert_eq!(sql, "SELECT * FROM t WHERE a = @P1 AND b = @P2");
        assert_eq!(binds, vec![&CellValue::Int(7), &CellValue::Text("x".into())]);
    }

    #[test]
    fn test_bind_positional_without_params_is_identity() {
        let params = QueryParams::new();
        let (sql, binds) = bind_positional("SELECT 1", &params);
        assert_eq!(sql, "SELECT 1");
        assert!(binds.is_empty());
    }

    #[tokio::test]
    async fn test_not_connected_by_default() {
        let connector = SqlServerConnector::new(ConnectionConfig {
            engine: DatabaseEngine::SqlServer,
            ..Default::default()
        });
        assert!(!connector.is_connected().await);
        assert!(connector.ping().await.is_err());
    }
}
