//! In-memory warehouse backed by a schema catalog.
//!
//! Used for offline compilation (schemas come from a YAML catalog instead of a
//! live connection) and by tests. Statements are recorded, never executed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use indexmap::IndexMap;
use serde::Deserialize;
use sqlchain_api::{ChainError, Column, ResultTable, Result, TableName, WarehouseClient};
use tracing::debug;

/// Schema catalog file:
///
/// ```yaml
/// tables:
///   DB.PUBLIC.ORDERS:
///     - { name: ID, type: NUMBER }
///     - { name: AMOUNT, type: NUMBER }
/// ```
#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    tables: IndexMap<String, Vec<Column>>,
}

#[derive(Debug, Default)]
pub struct StaticWarehouse {
    tables: RwLock<HashMap<TableName, Vec<Column>>>,
    executed: Mutex<Vec<String>>,
    views: Mutex<Vec<(TableName, String)>>,
    lookups: AtomicUsize,
}

impl StaticWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: TableName, columns: Vec<Column>) -> Self {
        self.add_table(table, columns);
        self
    }

    pub fn add_table(&self, table: TableName, columns: Vec<Column>) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table, columns);
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(yaml)
            .map_err(|e| ChainError::Config(format!("invalid schema catalog: {}", e)))?;
        let warehouse = Self::new();
        for (name, columns) in catalog.tables {
            warehouse.add_table(TableName::parse(&name)?, columns);
        }
        Ok(warehouse)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let warehouse = Self::from_yaml_str(&content)?;
        debug!(
            "Loaded {} tables from {}",
            warehouse.table_count(),
            path.display()
        );
        Ok(warehouse)
    }

    pub fn table_count(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Statements passed to [`WarehouseClient::execute`], oldest first.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Views created through [`WarehouseClient::create_view`], oldest first.
    pub fn views(&self) -> Vec<(TableName, String)> {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of [`WarehouseClient::get_columns`] calls so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl WarehouseClient for StaticWarehouse {
    fn get_columns(&self, table: &TableName) -> Result<Vec<Column>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    fn execute(&self, sql: &str) -> Result<ResultTable> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());
        Ok(ResultTable::empty())
    }

    fn create_view(&self, name: &TableName, sql: &str) -> Result<()> {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.clone(), sql.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"
tables:
  DB.PUBLIC.ORDERS:
    - { name: ID, type: NUMBER }
    - { name: AMOUNT }
"#;

    #[test]
    fn test_catalog_from_yaml() {
        let warehouse = StaticWarehouse::from_yaml_str(CATALOG).unwrap();
        let columns = warehouse
            .get_columns(&TableName::new("DB", "PUBLIC", "ORDERS"))
            .unwrap();
        assert_eq!(columns, vec![Column::typed("ID", "NUMBER"), Column::new("AMOUNT")]);
        assert!(warehouse
            .get_columns(&TableName::new("DB", "PUBLIC", "OTHER"))
            .unwrap()
            .is_empty());
        assert_eq!(warehouse.lookup_count(), 2);
    }

    #[test]
    fn test_catalog_rejects_partial_names() {
        let err = StaticWarehouse::from_yaml_str("tables:\n  ORDERS: []\n").unwrap_err();
        assert!(matches!(err, ChainError::InvalidTableName { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let warehouse = StaticWarehouse::load_from_file(file.path()).unwrap();
        assert_eq!(warehouse.table_count(), 1);
    }

    #[test]
    fn test_execute_and_views_are_recorded() {
        let warehouse = StaticWarehouse::new();
        warehouse.execute("SELECT 1").unwrap();
        warehouse
            .create_view(&TableName::new("DB", "V", "X"), "SELECT 2")
            .unwrap();
        assert_eq!(warehouse.executed(), vec!["SELECT 1".to_string()]);
        assert_eq!(warehouse.views().len(), 1);
    }
}
