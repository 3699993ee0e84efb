//! Argument binding: check caller arguments against a template's parameters.

use indexmap::IndexMap;
use sqlchain_api::{ArgValue, Arguments, ChainError, DatasetRef, Namespace, Result, TableName};
use template_render::Value;

use crate::registry::{ParamShape, TransformTemplate, SOURCE_TABLE};

/// Arguments that passed binding, in parameter declaration order, with
/// defaults filled in and dataset names resolved.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundArguments {
    values: IndexMap<String, ArgValue>,
}

impl BoundArguments {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Dataset-shaped arguments.
    pub fn datasets(&self) -> impl Iterator<Item = (&String, &DatasetRef)> {
        self.values.iter().filter_map(|(name, value)| match value {
            ArgValue::Dataset(dataset) => Some((name, dataset)),
            _ => None,
        })
    }

    /// Values as seen by the template; datasets become their relation text.
    pub fn to_values(&self) -> IndexMap<String, Value> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(value)))
            .collect()
    }
}

/// Validate `args` against `template`.
///
/// Unknown names (including the reserved `source_table`) are rejected,
/// required parameters must be present and non-null, and every supplied value
/// must match its parameter's shape. Dataset parameters given as a string are
/// parsed as a table name, completed from `namespace` when partial.
pub fn bind(
    template: &TransformTemplate,
    args: Arguments,
    namespace: Option<&Namespace>,
) -> Result<BoundArguments> {
    if let Some((unknown, _)) = args
        .iter()
        .find(|(name, _)| name.as_str() == SOURCE_TABLE || template.parameter(name).is_none())
    {
        return Err(ChainError::UnexpectedArgument {
            template: template.name().to_string(),
            argument: unknown.clone(),
        });
    }

    let mut supplied: IndexMap<String, ArgValue> = args.into_iter().collect();
    let mut values = IndexMap::with_capacity(template.parameters().len());

    for param in template.parameters() {
        let value = match supplied.shift_remove(&param.name) {
            Some(value) if !value.is_null() => {
                if !param.shape.accepts(&value) {
                    return Err(ChainError::ArgumentShape {
                        template: template.name().to_string(),
                        argument: param.name.clone(),
                        expected: param.shape.to_string(),
                        found: value.shape_name().to_string(),
                    });
                }
                if param.shape == ParamShape::Dataset {
                    to_dataset(value, namespace)?
                } else {
                    value
                }
            }
            _ if param.required => {
                return Err(ChainError::MissingArgument {
                    template: template.name().to_string(),
                    argument: param.name.clone(),
                });
            }
            _ => param.default.clone().unwrap_or_else(ArgValue::null),
        };
        values.insert(param.name.clone(), value);
    }

    Ok(BoundArguments { values })
}

fn to_dataset(value: ArgValue, namespace: Option<&Namespace>) -> Result<ArgValue> {
    match value {
        ArgValue::Scalar(scalar) => match scalar.as_str() {
            Some(name) => {
                let table = TableName::parse_with_namespace(name, namespace)?;
                Ok(ArgValue::Dataset(DatasetRef::table(table)))
            }
            None => Ok(ArgValue::Scalar(scalar)),
        },
        other => Ok(other),
    }
}
