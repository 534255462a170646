pub mod sqlite;
pub mod sqlserver;

use crate::db::schema::{ColumnInfo, ExecutionOutcome, QueryParams, Relationship};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Supported database engines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DatabaseEngine {
    SqlServer,
    Sqlite,
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseEngine::SqlServer => write!(f, "SQL Server"),
            DatabaseEngine::Sqlite => write!(f, "SQLite"),
        }
    }
}

impl std::str::FromStr for DatabaseEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlserver" | "sql server" | "mssql" | "azure_sql" => Ok(DatabaseEngine::SqlServer),
            "sqlite" => Ok(DatabaseEngine::Sqlite),
            other => Err(format!("Unknown database engine: {}", other)),
        }
    }
}

/// Connection configuration for a database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub engine: DatabaseEngine,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connection_string: Option<String>,
    pub file_path: Option<String>,
    pub read_only: bool,
    pub connection_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::Sqlite,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            connection_string: None,
            file_path: None,
            read_only: false,
            connection_timeout_secs: 30,
        }
    }
}

/// Credentials the selected engine needs are not configured. Raised before
/// any network connection is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing credentials: {0} must be configured")]
pub struct MissingCredentials(pub &'static str);

/// The core trait that all database connectors must implement
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Connect to the database
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Disconnect from the database
    async fn disconnect(&mut self) -> anyhow::Result<()>;

    /// Whether a connection handle is currently held
    async fn is_connected(&self) -> bool;

    /// Round-trip a trivial statement to prove the held connection still works
    async fn ping(&self) -> anyhow::Result<()>;

    /// Names of all base tables, ordered by name
    async fn get_tables(&self) -> anyhow::Result<Vec<String>>;

    /// Ordered column metadata for one table
    async fn get_columns(&self, table_name: &str) -> anyhow::Result<Vec<ColumnInfo>>;

    /// Every foreign-key edge in the database, fetched with a single query
    async fn get_relationships(&self) -> anyhow::Result<Vec<Relationship>>;

    /// Run caller-supplied SQL verbatim
    async fn execute(&self, sql: &str, params: &QueryParams) -> anyhow::Result<ExecutionOutcome>;

    /// Get the database engine type
    fn engine(&self) -> DatabaseEngine;
}

/// Build the connector matching the configured engine. The connector is not
/// connected yet; the gateway opens it lazily.
pub fn create_connector(config: ConnectionConfig) -> Box<dyn DatabaseConnector> {
    match config.engine {
        DatabaseEngine::SqlServer => Box::new(sqlserver::SqlServerConnector::new(config)),
        DatabaseEngine::Sqlite => Box::new(sqlite::SqliteConnector::new(config)),
    }
}
