use serde::{Deserialize, Serialize};

use crate::table::TableName;

/// A single output column. The type is whatever the warehouse or a template
/// declared; it is `None` when nobody stated it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
        }
    }

    pub fn typed(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type.into()),
        }
    }
}

/// Ordered column list of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Untyped schema from bare names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: names.into_iter().map(Column::new).collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Case-sensitive exact lookup.
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }
}

impl From<Vec<Column>> for Schema {
    fn from(columns: Vec<Column>) -> Self {
        Schema::new(columns)
    }
}

impl IntoIterator for Schema {
    type Item = Column;
    type IntoIter = std::vec::IntoIter<Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

/// Pointer to a dataset a transform can read from.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetRef {
    /// Warehouse-resident table or view.
    Table {
        name: TableName,
        columns: Option<Schema>,
    },
    /// SQL statement standing in for a relation, e.g. a compiled chain used
    /// as a join partner.
    Query {
        alias: String,
        sql: String,
        columns: Option<Schema>,
    },
}

impl DatasetRef {
    pub fn table(name: TableName) -> Self {
        DatasetRef::Table {
            name,
            columns: None,
        }
    }

    pub fn query(alias: impl Into<String>, sql: impl Into<String>, columns: Option<Schema>) -> Self {
        DatasetRef::Query {
            alias: alias.into(),
            sql: sql.into(),
            columns,
        }
    }

    /// Columns already known for this dataset without asking anybody.
    pub fn known_columns(&self) -> Option<&Schema> {
        match self {
            DatasetRef::Table { columns, .. } | DatasetRef::Query { columns, .. } => {
                columns.as_ref()
            }
        }
    }

    /// Text usable in a `FROM`/`JOIN` position.
    pub fn relation_sql(&self) -> String {
        match self {
            DatasetRef::Table { name, .. } => name.to_string(),
            DatasetRef::Query { sql, .. } => format!("(\n{}\n)", sql),
        }
    }

    /// Human-readable label used in error messages.
    pub fn label(&self) -> String {
        match self {
            DatasetRef::Table { name, .. } => name.to_string(),
            DatasetRef::Query { alias, .. } => alias.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lookup_is_case_sensitive() {
        let schema = Schema::from_names(["ID", "Amount"]);
        assert!(schema.contains("Amount"));
        assert!(!schema.contains("AMOUNT"));
        assert_eq!(schema.names(), vec!["ID", "Amount"]);
    }

    #[test]
    fn test_column_serializes_type_field() {
        let col = Column::typed("ID", "NUMBER");
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json, serde_json::json!({"name": "ID", "type": "NUMBER"}));

        let untyped: Column = serde_json::from_value(serde_json::json!({"name": "X"})).unwrap();
        assert_eq!(untyped.data_type, None);
    }

    #[test]
    fn test_query_dataset_relation_is_parenthesized() {
        let ds = DatasetRef::query("CUSTOMERS", "SELECT ID FROM A.B.C", None);
        assert_eq!(ds.relation_sql(), "(\nSELECT ID FROM A.B.C\n)");
        assert_eq!(ds.label(), "CUSTOMERS");
    }
}
