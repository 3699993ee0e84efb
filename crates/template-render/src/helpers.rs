//! Helper functions, filters and methods available inside templates.

use sqlchain_api::{ChainError, Column, Result, Schema};

use crate::interpreter::Evaluator;
use crate::parser::parse_template;
use crate::value::Value;

/// Deterministic SQL-safe identifier derived from arbitrary text.
///
/// Surrounding whitespace is dropped, inner spaces and dashes become `_`, the
/// result is upper-cased and anything outside `A-Z0-9_` is removed. Names that
/// would be empty or start with a digit get a leading `_`.
pub fn cleanse_name(name: &str) -> String {
    let mut cleansed: String = name
        .trim()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .flat_map(char::to_uppercase)
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '_')
        .collect();
    if cleansed.is_empty() || cleansed.starts_with(|c: char| c.is_ascii_digit()) {
        cleansed.insert(0, '_');
    }
    cleansed
}

/// SQL literal for a value: strings are single-quoted with `''` escaping.
pub fn quote_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
        Value::List(items) => items
            .iter()
            .map(quote_literal)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Output columns declared while rendering, in declaration order.
#[derive(Debug, Default)]
pub(crate) struct OutputColumns {
    columns: Vec<Column>,
}

impl OutputColumns {
    fn push(&mut self, template: &str, column: Column) -> Result<()> {
        if self.columns.iter().any(|c| c.name == column.name) {
            return Err(ChainError::DuplicateColumn {
                template: template.to_string(),
                column: column.name,
            });
        }
        self.columns.push(column);
        Ok(())
    }

    /// `None` when the template declared nothing.
    pub(crate) fn into_schema(self) -> Option<Schema> {
        if self.columns.is_empty() {
            None
        } else {
            Some(Schema::new(self.columns))
        }
    }
}

fn column_type(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.to_string()),
    }
}

impl<'t, 'c> Evaluator<'t, 'c> {
    pub(crate) fn call_helper(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        let kwarg = |key: &str| kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v);
        match name {
            "cleanse_name" => {
                let text = self.single_arg(name, &args)?;
                Ok(Value::Str(cleanse_name(&text.to_string())))
            }
            "quote" => Ok(Value::Str(quote_literal(self.single_arg(name, &args)?))),
            "raise_exception" => {
                let message = args.first().map(Value::to_string).unwrap_or_default();
                Err(ChainError::TemplateAborted {
                    template: self.template.name().to_string(),
                    message,
                })
            }
            "mutually_exclusive" => {
                let (first, second) = match (args.first(), args.get(1)) {
                    (Some(Value::Str(a)), Some(Value::Str(b))) => (a.clone(), b.clone()),
                    _ => {
                        return Err(self.error(
                            "mutually_exclusive() expects two argument names",
                        ))
                    }
                };
                let supplied = |arg: &str| {
                    self.ctx
                        .arguments
                        .get(arg)
                        .is_some_and(|value| !value.is_null())
                };
                if supplied(&first) && supplied(&second) {
                    return Err(ChainError::MutuallyExclusiveArguments {
                        template: self.template.name().to_string(),
                        first,
                        second,
                    });
                }
                Ok(Value::Null)
            }
            "get_columns" => {
                let (schema, _) = self.dataset_schema(args.first().or(kwarg("dataset")))?;
                Ok(Value::column_map(schema))
            }
            "columns" => {
                let (schema, _) = self.dataset_schema(args.first().or(kwarg("dataset")))?;
                Ok(Value::column_list(schema))
            }
            "columns_except" => {
                let excluded = names_of(self.single_arg(name, &args)?);
                let (schema, _) = self.dataset_schema(None)?;
                Ok(Value::List(
                    schema
                        .iter()
                        .filter(|c| !excluded.contains(&c.name))
                        .map(|c| Value::Str(c.name.clone()))
                        .collect(),
                ))
            }
            "require_columns" => {
                let wanted = names_of(self.single_arg(name, &args)?);
                let (schema, label) = self.dataset_schema(args.get(1).or(kwarg("dataset")))?;
                if let Some(missing) = wanted.into_iter().find(|c| !schema.contains(c)) {
                    return Err(ChainError::InvalidColumnReference {
                        template: self.template.name().to_string(),
                        column: missing,
                        dataset: label,
                    });
                }
                Ok(Value::Null)
            }
            "output" => {
                let column = self.single_arg(name, &args)?.to_string();
                let data_type = column_type(args.get(1).or(kwarg("type")));
                let template = self.template.name();
                self.output.push(
                    template,
                    Column {
                        name: column,
                        data_type,
                    },
                )?;
                Ok(Value::Null)
            }
            "output_all" => {
                let template = self.template.name();
                match self.single_arg(name, &args)?.clone() {
                    Value::Map(entries) => {
                        for (column, ty) in entries {
                            let data_type = column_type(Some(&ty));
                            self.output.push(
                                template,
                                Column {
                                    name: column,
                                    data_type,
                                },
                            )?;
                        }
                    }
                    Value::List(items) => {
                        for item in items {
                            self.output.push(template, Column::new(item.to_string()))?;
                        }
                    }
                    Value::Null => {}
                    other => {
                        return Err(self.error(format!(
                            "output_all() expects a list or mapping, got {}",
                            other.type_name()
                        )))
                    }
                }
                Ok(Value::Null)
            }
            "dataset_name" => {
                let label = self.dataset_label(args.first())?;
                let short = label.rsplit('.').next().unwrap_or(&label).to_string();
                Ok(Value::Str(short))
            }
            "render" => {
                let text = self.single_arg(name, &args)?.to_string();
                self.render_inline(&text)
            }
            other => Err(self.error(format!("'{}' is undefined", other))),
        }
    }

    fn single_arg<'v>(&self, helper: &str, args: &'v [Value]) -> Result<&'v Value> {
        args.first()
            .ok_or_else(|| self.error(format!("{}() takes at least one argument", helper)))
    }

    /// Schema and error label of the input dataset or a side dataset.
    ///
    /// With no argument, or with the current `source_table`, this is the input
    /// schema. Otherwise the argument must be a dataset argument's value.
    fn dataset_schema(&self, dataset: Option<&Value>) -> Result<(&'c Schema, String)> {
        let ctx = self.ctx;
        let key = match dataset {
            None | Some(Value::Null) => None,
            Some(Value::Str(s)) if s == ctx.source => None,
            Some(Value::Str(s)) => Some(s.as_str()),
            Some(other) => {
                return Err(self.error(format!(
                    "expected a dataset, got {}",
                    other.type_name()
                )))
            }
        };
        match key {
            None => ctx
                .input
                .map(|schema| (schema, ctx.source_label.to_string()))
                .ok_or_else(|| {
                    ChainError::schema_unavailable(
                        ctx.source_label,
                        "no column list is known for this dataset",
                    )
                }),
            Some(key) => {
                let side = ctx.datasets.get(key).ok_or_else(|| {
                    self.error(format!("'{}' is not a dataset argument", key))
                })?;
                side.columns
                    .as_ref()
                    .map(|schema| (schema, side.label.clone()))
                    .ok_or_else(|| {
                        ChainError::schema_unavailable(
                            side.label.clone(),
                            "no column list is known for this dataset",
                        )
                    })
            }
        }
    }

    /// Label of the input dataset or of a side dataset, e.g. `DB.SCHEMA.TABLE`.
    fn dataset_label(&self, dataset: Option<&Value>) -> Result<String> {
        match dataset {
            None | Some(Value::Null) => Ok(self.ctx.source_label.to_string()),
            Some(Value::Str(s)) if s == self.ctx.source => Ok(self.ctx.source_label.to_string()),
            Some(Value::Str(s)) => self
                .ctx
                .datasets
                .get(s.as_str())
                .map(|side| side.label.clone())
                .ok_or_else(|| self.error(format!("'{}' is not a dataset argument", s))),
            Some(other) => Err(self.error(format!(
                "expected a dataset, got {}",
                other.type_name()
            ))),
        }
    }

    fn render_inline(&mut self, text: &str) -> Result<Value> {
        let parsed = parse_template(self.template.name(), text)?;
        if !parsed.macros.is_empty() {
            return Err(self.error("text passed to render() cannot define macros"));
        }
        self.enter()?;
        let mut buffer = String::new();
        let result = self.exec(&parsed.nodes, &mut buffer);
        self.leave();
        result?;
        Ok(Value::Str(buffer))
    }

    pub(crate) fn apply_filter(&self, name: &str, value: Value, args: Vec<Value>) -> Result<Value> {
        match name {
            "join" => {
                let separator = args.first().map(Value::to_string).unwrap_or_default();
                let items = match value {
                    Value::List(items) => items,
                    Value::Map(entries) => entries.into_keys().map(Value::Str).collect(),
                    Value::Null => Vec::new(),
                    other => vec![other],
                };
                Ok(Value::Str(
                    items
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(&separator),
                ))
            }
            "upper" => Ok(Value::Str(value.to_string().to_uppercase())),
            "lower" => Ok(Value::Str(value.to_string().to_lowercase())),
            "trim" => Ok(Value::Str(value.to_string().trim().to_string())),
            "quote" => Ok(Value::Str(quote_literal(&value))),
            "length" | "count" => match value {
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Null => Ok(Value::Int(0)),
                other => Err(self.error(format!("a {} has no length", other.type_name()))),
            },
            "list" => match value {
                Value::List(items) => Ok(Value::List(items)),
                Value::Map(entries) => Ok(Value::List(
                    entries.into_keys().map(Value::Str).collect(),
                )),
                Value::Str(s) => Ok(Value::List(
                    s.chars().map(|c| Value::Str(c.to_string())).collect(),
                )),
                Value::Null => Ok(Value::List(Vec::new())),
                other => Err(self.error(format!("cannot convert a {} to a list", other.type_name()))),
            },
            "default" => {
                if value.is_null() {
                    Ok(args.into_iter().next().unwrap_or(Value::Str(String::new())))
                } else {
                    Ok(value)
                }
            }
            other => Err(self.error(format!("unknown filter '{}'", other))),
        }
    }

    pub(crate) fn call_method(&self, receiver: Value, method: &str, args: Vec<Value>) -> Result<Value> {
        match (receiver, method) {
            (Value::Map(entries), "items") => Ok(Value::List(
                entries
                    .into_iter()
                    .map(|(k, v)| Value::List(vec![Value::Str(k), v]))
                    .collect(),
            )),
            (Value::Map(entries), "keys") => Ok(Value::List(
                entries.into_keys().map(Value::Str).collect(),
            )),
            (Value::Map(entries), "values") => Ok(Value::List(entries.into_values().collect())),
            (Value::Map(entries), "get") => {
                let key = args.first().map(Value::to_string).unwrap_or_default();
                Ok(entries
                    .get(&key)
                    .cloned()
                    .or_else(|| args.get(1).cloned())
                    .unwrap_or(Value::Null))
            }
            (Value::Str(s), "upper") => Ok(Value::Str(s.to_uppercase())),
            (Value::Str(s), "lower") => Ok(Value::Str(s.to_lowercase())),
            (Value::Str(s), "startswith") => {
                let prefix = args.first().map(Value::to_string).unwrap_or_default();
                Ok(Value::Bool(s.starts_with(&prefix)))
            }
            (receiver, method) => Err(self.error(format!(
                "{} has no method '{}'",
                receiver.type_name(),
                method
            ))),
        }
    }
}

/// Column names named by a string, a list, or the keys of a mapping.
fn names_of(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::List(items) => items.iter().map(Value::to_string).collect(),
        Value::Map(entries) => entries.keys().cloned().collect(),
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanse_name() {
        assert_eq!(cleanse_name("amount_string"), "AMOUNT_STRING");
        assert_eq!(cleanse_name("  order date "), "ORDER_DATE");
        assert_eq!(cleanse_name("net-amount ($)"), "NET_AMOUNT_");
        assert_eq!(cleanse_name("1st"), "_1ST");
        assert_eq!(cleanse_name("€"), "_");
    }

    #[test]
    fn test_quote_literal_escapes_quotes() {
        assert_eq!(quote_literal(&Value::from("O'Brien")), "'O''Brien'");
        assert_eq!(quote_literal(&Value::Null), "NULL");
        assert_eq!(quote_literal(&Value::Int(3)), "3");
        assert_eq!(
            quote_literal(&Value::from(vec!["a", "b"])),
            "'a', 'b'"
        );
    }
}
