use indexmap::IndexMap;

use crate::db::connectors::DatabaseConnector;
use crate::db::gateway::DatabaseGateway;
use crate::db::schema::{SchemaInfo, TableSchema};

/// Raised when no usable schema could be read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("schema unavailable: {reason}")]
pub struct SchemaUnavailable {
    pub reason: String,
}

impl SchemaUnavailable {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Session-scoped schema cache. Never invalidates itself; callers ask for a
/// refresh when they know the database changed.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    cached: Option<SchemaInfo>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self) -> Option<&SchemaInfo> {
        self.cached.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Return the cached schema, reading it through the gateway's connection
    /// on first use or when `force_refresh` is set.
    pub async fn load(
        &mut self,
        gateway: &mut DatabaseGateway,
        force_refresh: bool,
    ) -> Result<&SchemaInfo, SchemaUnavailable> {
        if force_refresh {
            self.cached = None;
        }

        if self.cached.is_none() {
            let connector = gateway
                .connection()
                .await
                .map_err(|e| SchemaUnavailable::new(e.message))?;
            let schema = introspect(connector).await?;
            log::info!(
                "Loaded schema: {} tables, {} relationships",
                schema.table_count(),
                schema.relationships.len()
            );
            self.cached = Some(schema);
        }

        self.cached
            .as_ref()
            .ok_or_else(|| SchemaUnavailable::new("schema cache is empty"))
    }
}

/// Read tables, their columns and every foreign key. Relationships come from
/// one catalog-wide query, never one per table.
pub async fn introspect(connector: &dyn DatabaseConnector) -> Result<SchemaInfo, SchemaUnavailable> {
    let table_names = connector
        .get_tables()
        .await
        .map_err(|e| SchemaUnavailable::new(format!("{:#}", e)))?;

    if table_names.is_empty() {
        return Err(SchemaUnavailable::new("database has no tables"));
    }

    let mut tables = IndexMap::with_capacity(table_names.len());
    for name in table_names {
        match connector.get_columns(&name).await {
            Ok(columns) if !columns.is_empty() => {
                tables.insert(name, TableSchema { columns });
            }
            Ok(_) => log::warn!("Table {} reported no columns, skipping", name),
            Err(e) => log::warn!("Failed to read columns of {}: {:#}", name, e),
        }
    }

    if tables.is_empty() {
        return Err(SchemaUnavailable::new("no table columns could be read"));
    }

    let relationships = match connector.get_relationships().await {
        Ok(relationships) => relationships,
        Err(e) => {
            log::warn!("Failed to read foreign keys: {:#}", e);
            Vec::new()
        }
    };

    Ok(SchemaInfo {
        tables,
        relationships,
    })
}
