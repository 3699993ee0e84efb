//! Interface to the analytical warehouse.
//!
//! The chain compiler only ever calls [`WarehouseClient::get_columns`]; the
//! remaining methods are used by the session layer once a statement has been
//! compiled.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::Column;
use crate::table::TableName;
use crate::Scalar;

/// Rows returned by [`WarehouseClient::execute`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

impl ResultTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Synchronous warehouse connection.
///
/// Implementations own connection handling, credentials and any retry
/// policy. Calls block until the warehouse answers.
pub trait WarehouseClient: Send + Sync {
    /// Ordered columns of a table or view. An empty list means the table does
    /// not exist.
    fn get_columns(&self, table: &TableName) -> Result<Vec<Column>>;

    fn execute(&self, sql: &str) -> Result<ResultTable>;

    fn create_view(&self, name: &TableName, sql: &str) -> Result<()>;
}
