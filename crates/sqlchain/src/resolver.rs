use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use sqlchain_api::{ChainError, DatasetRef, Result, Schema, TableName, WarehouseClient};
use tracing::{debug, instrument};

/// Answers "which columns does this dataset have".
///
/// Warehouse tables are looked up once through the [`WarehouseClient`] and
/// cached for the life of the resolver; schemas are assumed not to change
/// mid-session. Query datasets (compiled chains) only ever report the columns
/// they were built with, nothing is executed.
pub struct SchemaResolver {
    client: Arc<dyn WarehouseClient>,
    cache: RwLock<HashMap<TableName, Schema>>,
}

impl SchemaResolver {
    pub fn new(client: Arc<dyn WarehouseClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Arc<dyn WarehouseClient> {
        &self.client
    }

    #[instrument(skip(self, dataset), fields(dataset = %dataset.label()))]
    pub fn columns_of(&self, dataset: &DatasetRef) -> Result<Schema> {
        if let Some(columns) = dataset.known_columns() {
            return Ok(columns.clone());
        }
        match dataset {
            DatasetRef::Table { name, .. } => self.table_columns(name),
            DatasetRef::Query { alias, .. } => Err(ChainError::schema_unavailable(
                alias.clone(),
                "the query declares no output columns",
            )),
        }
    }

    pub fn table_columns(&self, table: &TableName) -> Result<Schema> {
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned();
        if let Some(schema) = cached {
            return Ok(schema);
        }

        let columns = self.client.get_columns(table).map_err(|e| match e {
            ChainError::SchemaUnavailable { .. } => e,
            other => ChainError::schema_unavailable(table.to_string(), other.to_string()),
        })?;
        if columns.is_empty() {
            return Err(ChainError::schema_unavailable(
                table.to_string(),
                "the warehouse reports no columns; does the table exist?",
            ));
        }

        let schema = Schema::new(columns);
        debug!("Resolved {} columns for {}", schema.len(), table);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.clone(), schema.clone());
        Ok(schema)
    }

    /// Seed the cache, e.g. from a schema catalog file.
    pub fn prime(&self, table: TableName, schema: Schema) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table, schema);
    }

    pub fn invalidate(&self, table: &TableName) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(table);
    }

    pub fn cached_tables(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for SchemaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaResolver")
            .field("cached_tables", &self.cached_tables())
            .finish()
    }
}
