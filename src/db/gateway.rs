use crate::db::connectors::{DatabaseConnector, DatabaseEngine};
use crate::db::schema::{ExecutionOutcome, QueryParams};

/// Any failure while running SQL: connection, syntax, permission or timeout.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Runs SQL against the configured database. Every failure is returned as an
/// [`ExecutionError`]; statements are executed verbatim.
pub struct DatabaseGateway {
    connector: Box<dyn DatabaseConnector>,
}

impl DatabaseGateway {
    pub fn new(connector: Box<dyn DatabaseConnector>) -> Self {
        Self { connector }
    }

    pub fn engine(&self) -> DatabaseEngine {
        self.connector.engine()
    }

    /// Open the connection if none is held; if one is held but fails its
    /// check, reconnect exactly once.
    async fn ensure_connected(&mut self) -> Result<(), ExecutionError> {
        if !self.connector.is_connected().await {
            log::info!("Opening {} connection", self.connector.engine());
            return self
                .connector
                .connect()
                .await
                .map_err(|e| ExecutionError::new(format!("Database connection failed: {:#}", e)));
        }

        if let Err(e) = self.connector.ping().await {
            log::warn!("Connection check failed, reconnecting: {:#}", e);
            if let Err(e) = self.connector.disconnect().await {
                log::warn!("Error while dropping stale connection: {:#}", e);
            }
            self.connector
                .connect()
                .await
                .map_err(|e| ExecutionError::new(format!("Database connection failed: {:#}", e)))?;
        }
        Ok(())
    }

    /// A checked, open connection for read-only introspection.
    pub async fn connection(&mut self) -> Result<&dyn DatabaseConnector, ExecutionError> {
        self.ensure_connected().await?;
        Ok(self.connector.as_ref())
    }

    pub async fn execute(
        &mut self,
        sql: &str,
        params: Option<&QueryParams>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        self.ensure_connected().await?;

        let empty = QueryParams::new();
        let outcome = self
            .connector
            .execute(sql, params.unwrap_or(&empty))
            .await
            .map_err(|e| ExecutionError::new(format!("{:#}", e)))?;

        match &outcome {
            ExecutionOutcome::Rows(table) => log::info!(
                "Query returned {} rows x {} columns",
                table.row_count(),
                table.column_count()
            ),
            ExecutionOutcome::Affected(n) => log::info!("Statement affected {} rows", n),
        }
        Ok(outcome)
    }

    /// Connect (or re-check) and report success, for status displays.
    pub async fn test_connection(&mut self) -> Result<(), ExecutionError> {
        self.ensure_connected().await
    }

    pub async fn disconnect(&mut self) -> Result<(), ExecutionError> {
        self.connector
            .disconnect()
            .await
            .map_err(|e| ExecutionError::new(format!("{:#}", e)))
    }
}
