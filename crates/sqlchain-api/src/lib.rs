use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod schema;
pub mod table;
pub mod warehouse;

pub use error::{ChainError, Result};
pub use schema::{Column, DatasetRef, Schema};
pub use table::{Namespace, TableName};
pub use warehouse::{ResultTable, WarehouseClient};

/// A single scalar argument or result cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

/// Argument supplied for one application of a transform template.
///
/// Each variant is one argument shape a template parameter can declare; the
/// binder checks the shape before anything is rendered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Scalar(Scalar),
    List(Vec<ArgValue>),
    Mapping(IndexMap<String, ArgValue>),
    /// A second dataset, e.g. the right-hand side of a join.
    #[serde(skip)]
    Dataset(DatasetRef),
}

impl ArgValue {
    pub fn null() -> Self {
        ArgValue::Scalar(Scalar::Null)
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ArgValue>,
    {
        ArgValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn mapping<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ArgValue>,
    {
        ArgValue::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Name of the shape, as used in template manifests and error messages.
    pub fn shape_name(&self) -> &'static str {
        match self {
            ArgValue::Scalar(_) => "scalar",
            ArgValue::List(_) => "list",
            ArgValue::Mapping(_) => "mapping",
            ArgValue::Dataset(_) => "dataset",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Scalar(Scalar::Null))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Scalar(s) => s.as_str(),
            _ => None,
        }
    }
}

impl From<Scalar> for ArgValue {
    fn from(value: Scalar) -> Self {
        ArgValue::Scalar(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Scalar(Scalar::Str(value.to_string()))
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Scalar(Scalar::Str(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Scalar(Scalar::Bool(value))
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Scalar(Scalar::Int(value))
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::Scalar(Scalar::Int(value as i64))
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Scalar(Scalar::Float(value))
    }
}

impl<T: Into<ArgValue>> From<Vec<T>> for ArgValue {
    fn from(value: Vec<T>) -> Self {
        ArgValue::list(value)
    }
}

impl From<IndexMap<String, ArgValue>> for ArgValue {
    fn from(value: IndexMap<String, ArgValue>) -> Self {
        ArgValue::Mapping(value)
    }
}

impl From<TableName> for ArgValue {
    fn from(value: TableName) -> Self {
        ArgValue::Dataset(DatasetRef::table(value))
    }
}

impl From<DatasetRef> for ArgValue {
    fn from(value: DatasetRef) -> Self {
        ArgValue::Dataset(value)
    }
}

/// Named arguments for one transform application, in caller order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(IndexMap<String, ArgValue>);

impl Arguments {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Arguments {
    type Item = (String, ArgValue);
    type IntoIter = indexmap::map::IntoIter<String, ArgValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(String, ArgValue)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (String, ArgValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
