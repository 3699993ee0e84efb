//! Fully-qualified table names and namespaces.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};

static FQTN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s.]+\.[^\s.]+\.[^\s.]+$").expect("valid fqtn regex"));
static NAMESPACE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s.]+\.[^\s.]+$").expect("valid namespace regex"));

/// `DATABASE.SCHEMA` pair that partial table names are completed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace {
    pub database: String,
    pub schema: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
        }
    }

    pub fn parse(namespace: &str) -> Result<Self> {
        let trimmed = namespace.trim();
        if !NAMESPACE_PATTERN.is_match(trimmed) {
            return Err(ChainError::InvalidTableName {
                name: namespace.to_string(),
                reason: "expected a DATABASE.SCHEMA namespace".to_string(),
            });
        }
        let (database, schema) = trimmed
            .split_once('.')
            .ok_or_else(|| ChainError::InvalidTableName {
                name: namespace.to_string(),
                reason: "expected a DATABASE.SCHEMA namespace".to_string(),
            })?;
        Ok(Self::new(database, schema))
    }

    /// Table with the given name inside this namespace.
    pub fn table(&self, table: impl Into<String>) -> TableName {
        TableName::new(self.database.clone(), self.schema.clone(), table)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.schema)
    }
}

impl TryFrom<String> for Namespace {
    type Error = ChainError;

    fn try_from(value: String) -> Result<Self> {
        Namespace::parse(&value)
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.to_string()
    }
}

/// Three-part identifier of a warehouse-resident table or view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parse a strict `DATABASE.SCHEMA.TABLE` name.
    pub fn parse(fqtn: &str) -> Result<Self> {
        let trimmed = fqtn.trim();
        if !FQTN_PATTERN.is_match(trimmed) {
            return Err(ChainError::InvalidTableName {
                name: fqtn.to_string(),
                reason: "expected DATABASE.SCHEMA.TABLE".to_string(),
            });
        }
        let parts: Vec<&str> = trimmed.split('.').collect();
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }

    /// Parse a one-, two- or three-part name, filling the missing leading
    /// parts from `default_namespace`.
    pub fn parse_with_namespace(name: &str, default_namespace: Option<&Namespace>) -> Result<Self> {
        let trimmed = name.trim();
        let dots = trimmed.matches('.').count();
        if dots == 2 {
            return Self::parse(trimmed);
        }
        let namespace = default_namespace.ok_or_else(|| ChainError::InvalidTableName {
            name: name.to_string(),
            reason: "partial table name requires a default namespace".to_string(),
        })?;
        let candidate = match dots {
            0 => format!("{}.{}.{}", namespace.database, namespace.schema, trimmed),
            1 => format!("{}.{}", namespace.database, trimmed),
            _ => trimmed.to_string(),
        };
        Self::parse(&candidate).map_err(|_| ChainError::InvalidTableName {
            name: name.to_string(),
            reason: "not a well-formed table name".to_string(),
        })
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.database.clone(), self.schema.clone())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.table)
    }
}

impl FromStr for TableName {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        TableName::parse(s)
    }
}

impl TryFrom<String> for TableName {
    type Error = ChainError;

    fn try_from(value: String) -> Result<Self> {
        TableName::parse(&value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strict_fqtn() {
        let name = TableName::parse("adventureworks.public.factinternetsales").unwrap();
        assert_eq!(name.database, "adventureworks");
        assert_eq!(name.schema, "public");
        assert_eq!(name.table, "factinternetsales");
        assert_eq!(name.to_string(), "adventureworks.public.factinternetsales");
    }

    #[test]
    fn test_rejects_partial_or_spaced_names() {
        assert!(TableName::parse("public.sales").is_err());
        assert!(TableName::parse("db.my schema.sales").is_err());
        assert!(TableName::parse("db..sales").is_err());
        assert!(TableName::parse("a.b.c.d").is_err());
    }

    #[test]
    fn test_completes_partial_names_from_namespace() {
        let ns = Namespace::parse("ANALYTICS.PUBLIC").unwrap();
        assert_eq!(
            TableName::parse_with_namespace("ORDERS", Some(&ns)).unwrap(),
            TableName::new("ANALYTICS", "PUBLIC", "ORDERS")
        );
        assert_eq!(
            TableName::parse_with_namespace("STAGING.ORDERS", Some(&ns)).unwrap(),
            TableName::new("ANALYTICS", "STAGING", "ORDERS")
        );
        assert_eq!(
            TableName::parse_with_namespace("RAW.SALES.ORDERS", Some(&ns)).unwrap(),
            TableName::new("RAW", "SALES", "ORDERS")
        );
    }

    #[test]
    fn test_partial_name_without_namespace_fails() {
        let err = TableName::parse_with_namespace("ORDERS", None).unwrap_err();
        assert!(matches!(err, ChainError::InvalidTableName { .. }));
    }

    #[test]
    fn test_namespace_deserializes_from_string() {
        let ns: Namespace = serde_json::from_str("\"DB.SCHEMA\"").unwrap();
        assert_eq!(ns, Namespace::new("DB", "SCHEMA"));
        assert!(serde_json::from_str::<Namespace>("\"DB\"").is_err());
    }
}
